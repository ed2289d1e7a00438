//! The push channel: transports, the STOMP codec, and the connection manager
//! that keeps one session open per broker.

mod connection;
pub mod stomp;
mod ws;

use std::fmt;

use futures::future::BoxFuture;

use crate::retry::RetryError;

pub(crate) use connection::ConnectionState;
pub use ws::StompTransport;

pub type PushResult<T> = std::result::Result<T, PushError>;

/// A message received on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushFrame {
    pub topic: String,
    pub body: String,
}

impl PushFrame {
    pub fn new<T: Into<String>, B: Into<String>>(topic: T, body: B) -> PushFrame {
        PushFrame {
            topic: topic.into(),
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum PushError {
    /// The endpoint is not a usable address. Retrying cannot help.
    Endpoint(String),
    /// The endpoint could not be reached or refused the session.
    Connect(String),
    /// The peer sent something that is not valid for the protocol.
    Protocol(String),
    /// The session ended.
    Closed,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Endpoint(s) => write!(f, "invalid push endpoint: {s}"),
            PushError::Connect(s) => write!(f, "push connect failed: {s}"),
            PushError::Protocol(s) => write!(f, "push protocol error: {s}"),
            PushError::Closed => write!(f, "push session closed"),
        }
    }
}

impl std::error::Error for PushError {}

impl RetryError for PushError {
    fn should_retry(&self) -> bool {
        !matches!(self, PushError::Endpoint(_))
    }
}

/// Opens push sessions.
pub trait PushTransport: Send + Sync + 'static {
    fn connect<'t, 'e, 'f>(&'t self, endpoint: &'e str) -> BoxFuture<'f, PushResult<Box<dyn PushSession>>>
    where
        't: 'f,
        'e: 'f;
}

/// One open push session.
pub trait PushSession: Send + 'static {
    /// Starts delivering messages published on `topic`.
    fn subscribe<'s, 't, 'f>(&'s mut self, topic: &'t str) -> BoxFuture<'f, PushResult<()>>
    where
        's: 'f,
        't: 'f;

    /// The next message on any subscribed topic, or `None` once the session
    /// has ended.
    fn next_frame(&mut self) -> BoxFuture<'_, Option<PushFrame>>;
}
