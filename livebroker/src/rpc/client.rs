use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    registry::MethodId,
    rpc::{CallFailure, RpcError, RpcResult},
    util::SharedMap,
};

/// What a subscriber receives: a result, or a failure of the call that was
/// supposed to produce one.
pub type Emission = Result<Value, CallFailure>;

/// The sending half of a subscription. A subscription's stream completes once
/// every clone of its observer has been dropped.
pub type Observer = mpsc::UnboundedSender<Emission>;

/// A binding to one remote service. Implementations receive the method name
/// and its positional arguments and resolve to the method's result.
pub trait ServiceClient: Send + Sync + 'static {
    fn call<'c, 'a, 'f>(&'c self, method: &'a str, args: &'a [Value]) -> BoxFuture<'f, RpcResult<Value>>
    where
        'c: 'f,
        'a: 'f;
}

/// Resolves a service name to a binding on demand.
pub type BindingLoader = Arc<dyn Fn(&str) -> Option<Arc<dyn ServiceClient>> + Send + Sync>;

/// Bindings by service name. A name is resolved through the loader at most
/// once; a name the loader cannot resolve stays unbound and calls to it fail
/// with [`RpcError::NoBinding`].
#[derive(Default)]
pub struct ServiceRegistry {
    bindings: SharedMap<String, dyn ServiceClient>,
    loader: Option<BindingLoader>,
}

impl ServiceRegistry {
    pub fn new() -> ServiceRegistry {
        ServiceRegistry::default()
    }

    pub fn with_loader(loader: BindingLoader) -> ServiceRegistry {
        ServiceRegistry {
            bindings: SharedMap::new(),
            loader: Some(loader),
        }
    }

    pub fn insert<S: Into<String>>(&self, service: S, client: Arc<dyn ServiceClient>) {
        self.bindings.insert(service.into(), client);
    }

    pub fn resolve(&self, service: &str) -> Option<Arc<dyn ServiceClient>> {
        self.bindings.get_or_resolve(service.to_owned(), |name| {
            let found = self.loader.as_ref().and_then(|load| load(name.as_str()));
            if found.is_none() {
                log::warn!("no binding for service {name}");
            }
            found
        })
    }
}

/// Performs single calls and turns their outcome into emissions.
pub(crate) struct Invoker {
    services: ServiceRegistry,
    timeout: Option<Duration>,
}

impl Invoker {
    pub(crate) fn new(services: ServiceRegistry, timeout: Option<Duration>) -> Invoker {
        Invoker { services, timeout }
    }

    pub(crate) async fn call(&self, id: &MethodId, args: &[Value]) -> RpcResult<Value> {
        let res = match self.services.resolve(id.service()) {
            Some(client) => {
                log::debug!("outgoing RPC: {id}");
                let call = client.call(id.method(), args);
                match self.timeout {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(res) => res,
                        Err(_) => Err(RpcError::Spurious(format!("timed out after {limit:?}"))),
                    },
                    None => call.await,
                }
            }
            None => Err(RpcError::NoBinding(id.service().to_owned())),
        };
        res.map_err(|e| RpcError::Downstream(id.to_string(), Box::new(e)))
    }

    /// Calls `id` with `args` and emits the outcome to `observer`, which is
    /// dropped afterwards. Whether that completes the stream depends on who
    /// else holds a clone: nobody in one-shot mode, the registry in real-time
    /// mode. An emission to a cancelled subscription is discarded.
    pub(crate) async fn invoke(&self, id: MethodId, args: Arc<[Value]>, observer: Observer) {
        let emission = match self.call(&id, &args).await {
            Ok(value) => Ok(value),
            Err(e) => {
                log::error!("{e}");
                Err(CallFailure::from(e))
            }
        };
        if observer.send(emission).is_err() {
            log::debug!("dropping result of {id}: subscriber is gone");
        }
    }
}
