//! The public entry point: a [`Broker`] hands out [`Subscription`] streams for
//! RPC methods.
//!
//! In real-time mode a subscription stays open and re-emits whenever the push
//! channel announces a change to the entity type its method returns. In
//! one-shot mode it emits once and completes. Both look the same to callers.

use std::{
    marker::PhantomData,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use livebroker_schemas::MethodReturnTypes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    config::{BrokerConfiguration, LoadedConfig},
    error::Result,
    push::{ConnectionState, PushFrame, PushTransport, StompTransport},
    registry::{MethodId, Registry},
    rpc::{
        BindingLoader, CallFailure, Emission, HttpService, Invoker, ServiceClient,
        ServiceRegistry,
    },
};

pub(crate) struct BrokerInner {
    pub(crate) config: BrokerConfiguration,
    pub(crate) invoker: Invoker,
    pub(crate) push: Arc<dyn PushTransport>,
    registry: Mutex<Registry>,
    connection: Mutex<ConnectionState>,
}

impl BrokerInner {
    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().expect("lock poisoned")
    }

    pub(crate) fn connection(&self) -> MutexGuard<'_, ConnectionState> {
        self.connection.lock().expect("lock poisoned")
    }
}

/// Turns RPC methods into streams. Cloning a broker yields a handle to the same
/// push connection and subscription table.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn builder(config: BrokerConfiguration) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    pub fn config(&self) -> &BrokerConfiguration {
        &self.inner.config
    }

    /// Declares which entity type each method of `service` returns. Only
    /// methods with a declared type are refreshed by push events.
    pub fn register_method_types<S: AsRef<str>>(&self, service: S, types: MethodReturnTypes) {
        self.inner
            .registry()
            .register_method_types(service.as_ref(), types);
    }

    /// A stream of the results of `service.method(args)`. Nothing happens until
    /// the stream is first polled; dropping it cancels the subscription.
    pub fn subscribe<S, M>(&self, service: S, method: M, args: Vec<Value>) -> Subscription
    where
        S: Into<String>,
        M: Into<String>,
    {
        Subscription {
            state: State::Idle {
                broker: self.clone(),
                id: MethodId::new(service, method),
                args,
            },
        }
    }

    /// Calls `service.method(args)` once, outside of any subscription.
    pub async fn call<S, M>(&self, service: S, method: M, args: &[Value]) -> std::result::Result<Value, CallFailure>
    where
        S: Into<String>,
        M: Into<String>,
    {
        let id = MethodId::new(service, method);
        self.inner.invoker.call(&id, args).await.map_err(|e| {
            log::error!("{e}");
            CallFailure::from(e)
        })
    }

    /// Resolves once the push channel is up. Subscriptions call this on their
    /// own; it is exposed for callers that want to wait for the connection.
    pub async fn ensure_connected(&self) {
        self.inner.ensure_connected().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Number of identities currently kept live by push events.
    pub fn engaged(&self) -> usize {
        self.inner.registry().len()
    }

    /// Feeds a push message to the dispatcher as if it had arrived on the
    /// channel. Returns how many calls it refreshed.
    pub fn dispatch(&self, frame: &PushFrame) -> usize {
        self.inner.on_push_message(frame)
    }

    fn start(self, id: MethodId, args: Vec<Value>) -> State {
        let (tx, rx) = mpsc::unbounded_channel();
        let args: Arc<[Value]> = args.into();
        let inner = self.inner.clone();

        if !self.config().is_real_time() {
            tokio::task::spawn(async move {
                inner.invoker.invoke(id, args, tx).await;
            });
            return State::Live { rx, _guard: None };
        }

        let engagement = inner.registry().engage(id.clone(), args.clone(), tx.clone());
        log::debug!(
            "{id} {}",
            match engagement.created {
                true => "subscribed",
                false => "subscribed again, sharing the existing engagement",
            }
        );
        let task_id = id.clone();
        tokio::task::spawn(async move {
            tokio::select! {
                _ = inner.ensure_connected() => {}
                _ = tx.closed() => return,
            }
            if tx.is_closed() {
                return;
            }
            inner.invoker.invoke(task_id, args, tx).await;
        });

        State::Live {
            rx,
            _guard: Some(Engaged {
                broker: self,
                id,
                token: engagement.token,
            }),
        }
    }
}

/// Disengages its identity when the subscription is dropped.
struct Engaged {
    broker: Broker,
    id: MethodId,
    token: u64,
}

impl Drop for Engaged {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.broker.inner.registry.lock() {
            registry.disengage(&self.id, self.token);
        }
    }
}

enum State {
    Idle {
        broker: Broker,
        id: MethodId,
        args: Vec<Value>,
    },
    Failed(Option<CallFailure>),
    Live {
        rx: mpsc::UnboundedReceiver<Emission>,
        _guard: Option<Engaged>,
    },
    Done,
}

/// The results of one subscribed method.
///
/// When several subscriptions share a `service.method` in real-time mode, the
/// most recent one takes over: its arguments are the ones replayed on push
/// events and only it receives push-driven results. An older subscription
/// stops receiving results and ends once the calls already issued for it have
/// resolved.
#[must_use = "streams do nothing unless polled"]
pub struct Subscription {
    state: State,
}

impl Subscription {
    /// A subscription that yields `failure` and completes.
    pub fn failed(failure: CallFailure) -> Subscription {
        Subscription {
            state: State::Failed(Some(failure)),
        }
    }

    /// Deserializes every result into `T`.
    pub fn typed<T: DeserializeOwned>(self) -> Typed<T> {
        Typed {
            inner: self,
            _marker: PhantomData,
        }
    }
}

impl Stream for Subscription {
    type Item = Emission;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Emission>> {
        let this = self.get_mut();
        if matches!(this.state, State::Idle { .. }) {
            if let State::Idle { broker, id, args } = std::mem::replace(&mut this.state, State::Done) {
                this.state = broker.start(id, args);
            }
        }
        match &mut this.state {
            State::Idle { .. } | State::Done => Poll::Ready(None),
            State::Failed(failure) => {
                let failure = failure.take();
                this.state = State::Done;
                Poll::Ready(failure.map(Err))
            }
            State::Live { rx, .. } => rx.poll_recv(cx),
        }
    }
}

/// A [`Subscription`] whose results are deserialized into `T`.
#[must_use = "streams do nothing unless polled"]
pub struct Typed<T> {
    inner: Subscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Stream for Typed<T> {
    type Item = std::result::Result<T, CallFailure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx).map(|next| {
            next.map(|emission| {
                emission.and_then(|v| {
                    serde_json::from_value(v)
                        .map_err(|e| CallFailure::new(format!("could not decode result: {e}")))
                })
            })
        })
    }
}

/// Assembles a [`Broker`].
pub struct BrokerBuilder {
    config: BrokerConfiguration,
    services: Vec<(String, Arc<dyn ServiceClient>)>,
    loader: Option<BindingLoader>,
    push: Option<Arc<dyn PushTransport>>,
    types: Vec<(String, MethodReturnTypes)>,
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfiguration) -> BrokerBuilder {
        BrokerBuilder {
            config,
            services: Vec::new(),
            loader: None,
            push: None,
            types: Vec::new(),
        }
    }

    /// A builder for a loaded configuration file, with its method types
    /// registered and HTTP bindings for every service.
    pub fn from_loaded(loaded: LoadedConfig) -> BrokerBuilder {
        let mut builder = BrokerBuilder::new(loaded.broker).http_services();
        builder.types.extend(loaded.types);
        builder
    }

    pub fn service<S: Into<String>>(mut self, name: S, client: Arc<dyn ServiceClient>) -> BrokerBuilder {
        self.services.push((name.into(), client));
        self
    }

    /// Resolves services that were not added with [`service`][Self::service].
    pub fn loader(mut self, loader: BindingLoader) -> BrokerBuilder {
        self.loader = Some(loader);
        self
    }

    /// Binds every service to an [`HttpService`] under the configured path.
    pub fn http_services(self) -> BrokerBuilder {
        let loader = HttpService::loader(self.config.path());
        self.loader(loader)
    }

    /// Defaults to [`StompTransport`].
    pub fn push_transport<T: PushTransport>(mut self, transport: T) -> BrokerBuilder {
        self.push = Some(Arc::new(transport));
        self
    }

    pub fn method_types<S: Into<String>>(mut self, service: S, types: MethodReturnTypes) -> BrokerBuilder {
        self.types.push((service.into(), types));
        self
    }

    pub fn build(self) -> Result<Broker> {
        self.config.validate()?;

        let services = match self.loader {
            Some(loader) => ServiceRegistry::with_loader(loader),
            None => ServiceRegistry::new(),
        };
        for (name, client) in self.services {
            services.insert(name, client);
        }

        let mut registry = Registry::new();
        for (service, types) in self.types {
            registry.register_method_types(&service, types);
        }

        let invoker = Invoker::new(services, self.config.request_timeout());
        let push = self.push.unwrap_or_else(|| Arc::new(StompTransport::new()));
        Ok(Broker {
            inner: Arc::new(BrokerInner {
                config: self.config,
                invoker,
                push,
                registry: Mutex::new(registry),
                connection: Mutex::new(ConnectionState::Unconnected),
            }),
        })
    }
}
