use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// An error when making an RPC call.
#[derive(Clone, Debug)]
pub enum RpcError {
    /// A spurious error with an unstructured string message, such as a
    /// timeout. The call may succeed if repeated.
    Spurious(String),

    /// A miscellaneous error with an unstructured string message.
    Misc(String),

    /// The remote method itself failed.
    Remote {
        message: String,
        exception: Option<Value>,
    },

    /// No binding could be resolved for the named service.
    NoBinding(String),

    /// An error together with the `service.method` it came from. Constructed
    /// by the invocation bridge. Use `root_cause` to get the innermost error.
    Downstream(String, Box<RpcError>),
}

impl RpcError {
    /// Unwrap layers of caused-by nesting to get the innermost error.
    pub fn root_cause(&self) -> &RpcError {
        match self {
            RpcError::Downstream(_, e) => e.root_cause(),
            _ => self,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Spurious(s) => write!(f, "spurious: {s}"),
            RpcError::Misc(s) => write!(f, "rpc error: {s}"),
            RpcError::Remote { message, .. } => write!(f, "remote error: {message}"),
            RpcError::NoBinding(s) => write!(f, "no binding for service {s}"),
            RpcError::Downstream(at, e) => write!(f, "{at}: {e}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<String> for RpcError {
    fn from(s: String) -> Self {
        RpcError::Misc(s)
    }
}

impl From<&str> for RpcError {
    fn from(value: &str) -> Self {
        RpcError::Misc(value.to_owned())
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            let origin = match value.url() {
                Some(u) => u.origin().ascii_serialization(),
                None => "(unknown)".to_owned(),
            };
            RpcError::Spurious(format!("http timeout at {origin}"))
        } else {
            RpcError::Misc(format!("http error: {value}"))
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(value: serde_json::Error) -> Self {
        RpcError::Misc(format!("json error: {value}"))
    }
}

/// The failure delivered to subscribers. Every kind of RPC error collapses into
/// this one shape: a message plus whatever exception payload the server sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallFailure {
    pub message: String,
    pub exception: Option<Value>,
}

impl CallFailure {
    pub fn new<S: Into<String>>(message: S) -> CallFailure {
        CallFailure {
            message: message.into(),
            exception: None,
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exception {
            Some(e) => write!(f, "{} ({e})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CallFailure {}

impl From<RpcError> for CallFailure {
    fn from(value: RpcError) -> Self {
        let message = value.to_string();
        let exception = match value.root_cause() {
            RpcError::Remote { exception, .. } => exception.clone(),
            _ => None,
        };
        CallFailure { message, exception }
    }
}
