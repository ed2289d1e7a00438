use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use crate::rpc::{BindingLoader, RpcError, RpcResult, ServiceClient};

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    log::debug!("created global reqwest HTTP client");
    reqwest::Client::new()
});

/// The body of a failed call.
#[derive(Deserialize)]
struct RemoteFailure {
    message: String,
    exception: Option<Value>,
}

/// A binding that calls `POST {path}/{service}/{method}` with the JSON array
/// of arguments as body. A successful response body is the method's result.
/// Any other status is a failure whose body should be `{message, exception}`.
pub struct HttpService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpService {
    pub fn new(path: &str, service: &str) -> HttpService {
        HttpService {
            client: HTTP_CLIENT.clone(),
            endpoint: format!("{}/{}", path.trim_end_matches('/'), service),
        }
    }

    /// A loader that binds any service name to an `HttpService` under `path`.
    pub fn loader(path: &str) -> BindingLoader {
        let path = path.to_owned();
        Arc::new(move |service: &str| {
            let client: Arc<dyn ServiceClient> = Arc::new(HttpService::new(&path, service));
            Some(client)
        })
    }

    async fn post(&self, method: &str, args: &[Value]) -> RpcResult<Value> {
        let url = format!("{}/{}", self.endpoint, method);
        log::debug!("outgoing RPC -> {url}");
        let resp = self.client.post(&url).json(args).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await?;
            return Err(match serde_json::from_str::<RemoteFailure>(&body) {
                Ok(f) => RpcError::Remote {
                    message: f.message,
                    exception: f.exception,
                },
                Err(_) => RpcError::Misc(format!("http status {status}: {body}")),
            });
        }
        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

impl ServiceClient for HttpService {
    fn call<'c, 'a, 'f>(&'c self, method: &'a str, args: &'a [Value]) -> BoxFuture<'f, RpcResult<Value>>
    where
        'c: 'f,
        'a: 'f,
    {
        Box::pin(self.post(method, args))
    }
}
