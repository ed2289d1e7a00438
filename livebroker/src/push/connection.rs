use std::sync::{Arc, Weak};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};

use crate::{
    broker::BrokerInner,
    push::{PushResult, PushSession},
    retry::RetryStrategy,
};

/// The broker's push connection. There is at most one connect in flight;
/// everybody who needs the connection waits on the same future.
#[derive(Default)]
pub(crate) enum ConnectionState {
    #[default]
    Unconnected,
    Connecting(Shared<BoxFuture<'static, ()>>),
    Connected,
}

impl BrokerInner {
    /// Resolves once the push channel is connected and its topics are
    /// subscribed. Connect failures are retried forever and never reported.
    pub(crate) async fn ensure_connected(self: &Arc<Self>) {
        if let Some(pending) = self.connecting() {
            pending.await;
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        matches!(*self.connection(), ConnectionState::Connected)
    }

    /// Starts connecting unless already connected or connecting. Returns the
    /// in-flight connect, if any.
    fn connecting(self: &Arc<Self>) -> Option<Shared<BoxFuture<'static, ()>>> {
        let mut state = self.connection();
        let pending = match &*state {
            ConnectionState::Connected => return None,
            ConnectionState::Connecting(pending) => return Some(pending.clone()),
            ConnectionState::Unconnected => connect_loop(Arc::downgrade(self)).boxed().shared(),
        };
        tokio::task::spawn(pending.clone());
        *state = ConnectionState::Connecting(pending.clone());
        Some(pending)
    }

    async fn open_session(&self, endpoint: &str) -> PushResult<Box<dyn PushSession>> {
        let mut session = self.push.connect(endpoint).await?;
        for topic in self.config.topics().topics() {
            session.subscribe(&topic).await?;
        }
        Ok(session)
    }
}

async fn connect_loop(broker: Weak<BrokerInner>) {
    for attempt in 1.. {
        let Some(inner) = broker.upgrade() else {
            return;
        };
        let endpoint = inner.config.stomp_path().unwrap_or_default().to_owned();
        match inner.open_session(&endpoint).await {
            Ok(session) => {
                log::info!("push channel connected at {endpoint}");
                *inner.connection() = ConnectionState::Connected;
                tokio::task::spawn(read_loop(broker.clone(), session));
                return;
            }
            Err(e) => {
                let Some(delay) = inner.config.reconnect().retry(attempt, &e) else {
                    log::error!("giving up on push channel: {e}");
                    *inner.connection() = ConnectionState::Unconnected;
                    return;
                };
                log::warn!("retry after {delay:?}: {e}");
                // Sleep without keeping the broker alive.
                drop(inner);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn read_loop(broker: Weak<BrokerInner>, mut session: Box<dyn PushSession>) {
    while let Some(frame) = session.next_frame().await {
        let Some(inner) = broker.upgrade() else {
            return;
        };
        inner.on_push_message(&frame);
    }
    let Some(inner) = broker.upgrade() else {
        return;
    };
    log::warn!("push channel closed, reconnecting");
    *inner.connection() = ConnectionState::Unconnected;
    drop(inner.connecting());
}
