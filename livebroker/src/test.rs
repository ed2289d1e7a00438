//! In-process stand-ins for the RPC facade and the push channel.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    push::{PushError, PushFrame, PushResult, PushSession, PushTransport},
    rpc::{RpcError, RpcResult, ServiceClient},
};

type SyncHandler = Box<dyn Fn(&[Value]) -> RpcResult<Value> + Send + Sync>;
type AsyncHandler = Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, RpcResult<Value>> + Send + Sync>;

enum Mock {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// A service whose methods are closures. Every call is recorded.
#[derive(Default)]
pub struct MockService {
    methods: HashMap<String, Mock>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockService {
    pub fn new() -> MockService {
        MockService::default()
    }

    pub fn on<F>(mut self, method: &str, f: F) -> MockService
    where
        F: Fn(&[Value]) -> RpcResult<Value> + Send + Sync + 'static,
    {
        self.methods.insert(method.to_owned(), Mock::Sync(Box::new(f)));
        self
    }

    pub fn on_async<F>(mut self, method: &str, f: F) -> MockService
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, RpcResult<Value>> + Send + Sync + 'static,
    {
        self.methods.insert(method.to_owned(), Mock::Async(Box::new(f)));
        self
    }

    /// Every call so far, in issue order.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

impl ServiceClient for MockService {
    fn call<'c, 'a, 'f>(&'c self, method: &'a str, args: &'a [Value]) -> BoxFuture<'f, RpcResult<Value>>
    where
        'c: 'f,
        'a: 'f,
    {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push((method.to_owned(), args.to_vec()));
        match self.methods.get(method) {
            Some(Mock::Sync(f)) => {
                let res = f(args);
                Box::pin(async move { res })
            }
            Some(Mock::Async(f)) => f(args.to_vec()),
            None => {
                let e = RpcError::Misc(format!("unexpected RPC invocation of {method}"));
                Box::pin(async move { Err(e) })
            }
        }
    }
}

#[derive(Default)]
struct MockPushState {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    session: Mutex<Option<mpsc::UnboundedSender<PushFrame>>>,
}

/// A push transport driven by the test. Clones share state, so keep one clone
/// to publish on while the broker owns another.
#[derive(Clone, Default)]
pub struct MockPush {
    state: Arc<MockPushState>,
}

impl MockPush {
    pub fn new() -> MockPush {
        MockPush::default()
    }

    /// The first `n` connection attempts fail.
    pub fn failing(n: usize) -> MockPush {
        let push = MockPush::new();
        push.state.failures.store(n, Ordering::SeqCst);
        push
    }

    /// Connection attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Every topic subscription made, over all sessions.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().expect("lock poisoned").clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .session
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Delivers a message to the open session. Returns false if there is none.
    pub fn publish(&self, topic: &str, body: &str) -> bool {
        match self.state.session.lock().expect("lock poisoned").as_ref() {
            Some(tx) => tx.send(PushFrame::new(topic, body)).is_ok(),
            None => false,
        }
    }

    /// Ends the open session as if the server had gone away.
    pub fn disconnect(&self) {
        self.state.session.lock().expect("lock poisoned").take();
    }
}

impl PushTransport for MockPush {
    fn connect<'t, 'e, 'f>(&'t self, endpoint: &'e str) -> BoxFuture<'f, PushResult<Box<dyn PushSession>>>
    where
        't: 'f,
        'e: 'f,
    {
        Box::pin(async move {
            self.state.attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .state
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(PushError::Connect(format!("{endpoint}: scripted failure")));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *self.state.session.lock().expect("lock poisoned") = Some(tx);
            let session: Box<dyn PushSession> = Box::new(MockSession {
                state: self.state.clone(),
                topics: Vec::new(),
                rx,
            });
            Ok(session)
        })
    }
}

struct MockSession {
    state: Arc<MockPushState>,
    topics: Vec<String>,
    rx: mpsc::UnboundedReceiver<PushFrame>,
}

impl PushSession for MockSession {
    fn subscribe<'s, 't, 'f>(&'s mut self, topic: &'t str) -> BoxFuture<'f, PushResult<()>>
    where
        's: 'f,
        't: 'f,
    {
        self.topics.push(topic.to_owned());
        self.state
            .subscriptions
            .lock()
            .expect("lock poisoned")
            .push(topic.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn next_frame(&mut self) -> BoxFuture<'_, Option<PushFrame>> {
        Box::pin(async move {
            loop {
                let frame = self.rx.recv().await?;
                if self.topics.contains(&frame.topic) {
                    return Some(frame);
                }
            }
        })
    }
}
