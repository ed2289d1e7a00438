use std::collections::{HashMap, VecDeque};

use futures::{SinkExt, StreamExt, future::BoxFuture};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, http::Uri},
};

use crate::push::{
    PushError, PushFrame, PushResult, PushSession, PushTransport,
    stomp::{self, Frame},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// STOMP over a plain WebSocket. `http://` and `https://` endpoints are
/// contacted as `ws://` and `wss://`.
///
/// SockJS framing is not spoken, so the endpoint must accept raw WebSocket
/// connections. A Spring endpoint registered with `.withSockJS()` serves one
/// at `<path>/websocket`; point `stomp_path` there.
#[derive(Clone, Debug, Default)]
pub struct StompTransport;

impl StompTransport {
    pub fn new() -> StompTransport {
        StompTransport
    }
}

impl PushTransport for StompTransport {
    fn connect<'t, 'e, 'f>(&'t self, endpoint: &'e str) -> BoxFuture<'f, PushResult<Box<dyn PushSession>>>
    where
        't: 'f,
        'e: 'f,
    {
        Box::pin(async move {
            let session = StompSession::open(endpoint).await?;
            let session: Box<dyn PushSession> = Box::new(session);
            Ok(session)
        })
    }
}

pub(crate) fn ws_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_owned()
    } else {
        format!("ws://{endpoint}")
    }
}

struct StompSession {
    ws: WsStream,
    pending: VecDeque<Frame>,
    topics: HashMap<String, String>,
    next_id: usize,
}

impl StompSession {
    async fn open(endpoint: &str) -> PushResult<StompSession> {
        let url = ws_url(endpoint);
        let uri = url
            .parse::<Uri>()
            .map_err(|e| PushError::Endpoint(format!("{url}: {e}")))?;
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PushError::Endpoint(format!("{url}: no host")))?
            .to_owned();

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| PushError::Connect(format!("{url}: {e}")))?;
        let mut session = StompSession {
            ws,
            pending: VecDeque::new(),
            topics: HashMap::new(),
            next_id: 0,
        };

        session.send(&stomp::connect(&host)).await?;
        loop {
            let frame = match session.pending.pop_front() {
                Some(f) => f,
                None => {
                    let frames = session.read().await?;
                    session.pending.extend(frames);
                    continue;
                }
            };
            match frame.command.as_str() {
                "CONNECTED" => {
                    log::debug!(
                        "stomp session open at {url}, version {}",
                        frame.get("version").unwrap_or("?")
                    );
                    return Ok(session);
                }
                "ERROR" => return Err(PushError::Connect(describe_error(&frame))),
                other => log::debug!("ignoring {other} frame before CONNECTED"),
            }
        }
    }

    async fn send(&mut self, frame: &Frame) -> PushResult<()> {
        self.ws
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| PushError::Protocol(format!("send failed: {e}")))
    }

    async fn read(&mut self) -> PushResult<Vec<Frame>> {
        loop {
            let msg = match self.ws.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(PushError::Protocol(format!("read failed: {e}"))),
                None => return Err(PushError::Closed),
            };
            match msg {
                Message::Text(t) => return stomp::parse(t.as_str()),
                Message::Binary(b) => return stomp::parse(&String::from_utf8_lossy(&b)),
                Message::Close(_) => return Err(PushError::Closed),
                _ => continue,
            }
        }
    }

    async fn next(&mut self) -> Option<PushFrame> {
        loop {
            let Some(frame) = self.pending.pop_front() else {
                match self.read().await {
                    Ok(frames) => self.pending.extend(frames),
                    Err(PushError::Closed) => return None,
                    Err(e) => {
                        log::warn!("{e}");
                        return None;
                    }
                }
                continue;
            };
            match frame.command.as_str() {
                "MESSAGE" => {
                    let topic = frame
                        .get("destination")
                        .map(str::to_owned)
                        .or_else(|| {
                            frame
                                .get("subscription")
                                .and_then(|id| self.topics.get(id).cloned())
                        })
                        .unwrap_or_default();
                    return Some(PushFrame {
                        topic,
                        body: frame.body,
                    });
                }
                "ERROR" => {
                    log::warn!("stomp error: {}", describe_error(&frame));
                    return None;
                }
                other => log::debug!("ignoring {other} frame"),
            }
        }
    }
}

fn describe_error(frame: &Frame) -> String {
    match (frame.get("message"), frame.body.trim()) {
        (Some(m), "") => m.to_owned(),
        (Some(m), body) => format!("{m}: {body}"),
        (None, "") => "unspecified ERROR frame".to_owned(),
        (None, body) => body.to_owned(),
    }
}

impl PushSession for StompSession {
    fn subscribe<'s, 't, 'f>(&'s mut self, topic: &'t str) -> BoxFuture<'f, PushResult<()>>
    where
        's: 'f,
        't: 'f,
    {
        Box::pin(async move {
            let id = format!("sub-{}", self.next_id);
            self.next_id += 1;
            self.send(&stomp::subscribe(&id, topic)).await?;
            log::debug!("subscribed to {topic} as {id}");
            self.topics.insert(id, topic.to_owned());
            Ok(())
        })
    }

    fn next_frame(&mut self) -> BoxFuture<'_, Option<PushFrame>> {
        Box::pin(self.next())
    }
}
