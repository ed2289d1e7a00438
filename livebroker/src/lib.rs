//! Keeps the results of RPC calls live.
//!
//! A [`Broker`] turns a request/response RPC facade into streams of results.
//! In real-time mode every subscribed call is re-run whenever the server's
//! push channel announces a change to the entity type the call returns.
//!
//! ```no_run
//! use futures::StreamExt;
//! use livebroker::{Broker, BrokerConfiguration, MethodReturnTypes};
//!
//! # async fn example() -> livebroker::error::Result<()> {
//! let config = BrokerConfiguration::real_time("http://localhost:8080/broker", "ws://localhost:8080/ws");
//! let mut types = MethodReturnTypes::new();
//! types.insert("findAll".to_owned(), "com.acme.User[]".to_owned());
//!
//! let broker = Broker::builder(config)
//!     .http_services()
//!     .method_types("userService", types)
//!     .build()?;
//!
//! let mut users = broker.subscribe("userService", "findAll", vec![]);
//! while let Some(result) = users.next().await {
//!     println!("{result:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod push;
pub mod registry;
pub mod retry;
pub mod rpc;
pub mod test;
mod util;

pub use broker::{Broker, BrokerBuilder, Subscription, Typed};
pub use config::{BrokerConfiguration, LoadedConfig};
pub use livebroker_schemas::{ChangeKind, ENTITIES_TOPIC, MethodReturnTypes, TopicLayout};
pub use registry::MethodId;
pub use serde_json::{self, Value};
