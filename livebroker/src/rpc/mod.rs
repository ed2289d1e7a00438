//! The RPC side of the broker: service bindings, the invocation bridge and the
//! error shapes of a failed call.
//!
//! Bindings are usually created with [`HttpService`], or generated per service
//! with the [`live_ops!`][crate::live_ops] macro on top of a
//! [`Broker`][crate::Broker].

mod client;
mod error;
mod http;
mod macros;

pub(crate) use client::Invoker;
pub use client::{BindingLoader, Emission, Observer, ServiceClient, ServiceRegistry};
pub use error::{CallFailure, RpcError, RpcResult};
pub use http::HttpService;
