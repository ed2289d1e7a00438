use std::{sync::Arc, time::Duration};

use futures::{SinkExt, Stream, StreamExt};
use livebroker::{Broker, BrokerConfiguration, test::MockService};
use livebroker::push::{
    PushFrame, PushSession, PushTransport, StompTransport,
    stomp::{self, Frame},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

async fn expect_frame<S>(ws: &mut S) -> Frame
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(t) => return stomp::parse(t.as_str()).unwrap().remove(0),
            _ => continue,
        }
    }
}

/// Accepts one client, answers CONNECT and sends one MESSAGE per subscription.
async fn serve() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();

        let connect = expect_frame(&mut ws).await;
        assert_eq!(connect.command, "CONNECT");
        assert_eq!(connect.get("accept-version"), Some("1.2"));
        let connected = Frame::new("CONNECTED").header("version", "1.2");
        ws.send(Message::Text(connected.encode().into())).await.unwrap();

        let sub = expect_frame(&mut ws).await;
        assert_eq!(sub.command, "SUBSCRIBE");
        let id = sub.get("id").unwrap().to_owned();
        let dest = sub.get("destination").unwrap().to_owned();

        // A heartbeat, then a message routed only by subscription id.
        ws.send(Message::Text("\n".into())).await.unwrap();
        let msg = Frame::new("MESSAGE")
            .header("subscription", id)
            .header("message-id", "1")
            .body("com.acme.User");
        ws.send(Message::Text(msg.encode().into())).await.unwrap();
        let msg = Frame::new("MESSAGE")
            .header("destination", dest)
            .header("message-id", "2")
            .body(r#"{"type":"com.acme.Order"}"#);
        ws.send(Message::Text(msg.encode().into())).await.unwrap();
        ws.close(None).await.unwrap();
    });
    format!("http://{addr}/ws")
}

#[tokio::test]
async fn receives_messages_on_subscribed_topic() {
    let endpoint = serve().await;
    let transport = StompTransport::new();
    let mut session = transport.connect(&endpoint).await.unwrap();
    session.subscribe("/topic/entities").await.unwrap();

    assert_eq!(
        session.next_frame().await,
        Some(PushFrame::new("/topic/entities", "com.acme.User"))
    );
    assert_eq!(
        session.next_frame().await,
        Some(PushFrame::new("/topic/entities", r#"{"type":"com.acme.Order"}"#))
    );
    assert_eq!(session.next_frame().await, None);
}

#[tokio::test]
async fn unreachable_endpoint_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = StompTransport::new();
    assert!(transport.connect(&format!("ws://{addr}/ws")).await.is_err());
}

#[tokio::test]
async fn invalid_endpoint_gives_up_without_blocking_calls() {
    let service = Arc::new(MockService::new().on("findAll", |_| Ok(json!([]))));
    let config = BrokerConfiguration::real_time("http://rpc/broker", "http://bad host/ws");
    let broker = Broker::builder(config)
        .service("userService", service.clone())
        .build()
        .unwrap();

    let mut users = broker.subscribe("userService", "findAll", vec![]);
    let first = tokio::time::timeout(Duration::from_secs(5), users.next())
        .await
        .expect("initial call never ran");
    assert_eq!(first.unwrap().unwrap(), json!([]));
    assert!(!broker.is_connected());
    assert_eq!(service.call_count("findAll"), 1);
}
