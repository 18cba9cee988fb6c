use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::handshake::server::Request;
use tungstenite::protocol::Message as WsMessage;

use crate::config::HubSettings;
use crate::hub::{Hub, PubSubHandler};
use crate::transport::frame::{Frame, FrameWriter};
use crate::transport::memory;
use crate::transport::message::{ControlMessage, Inbound, PresenceStatus, ServerMessage, classify};
use crate::transport::websocket::{IdentityResolver, QueryParamIdentity, WebSocketServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[test]
fn control_frames_are_classified() {
    assert_eq!(
        classify(r#"{"type":"subscribe","topic":"lobby"}"#),
        Inbound::Control(ControlMessage::Subscribe {
            topic: "lobby".to_string()
        })
    );
    assert_eq!(
        classify(r#"{"type":"unsubscribe","topic":"lobby"}"#),
        Inbound::Control(ControlMessage::Unsubscribe {
            topic: "lobby".to_string()
        })
    );
    assert_eq!(classify(r#"{"type":"ping"}"#), Inbound::Control(ControlMessage::Ping));
    assert_eq!(classify(r#"{"type":"close"}"#), Inbound::Control(ControlMessage::Close));
}

#[test]
fn broken_control_frames_are_malformed() {
    assert!(matches!(
        classify(r#"{"type":"subscribe"}"#),
        Inbound::Malformed { ref kind, .. } if kind == "subscribe"
    ));
    assert!(matches!(
        classify(r#"{"type":"unsubscribe","topic":""}"#),
        Inbound::Malformed { .. }
    ));
}

#[test]
fn everything_else_is_application_traffic() {
    assert_eq!(classify(r#"{"type":"publish","topic":"a","payload":1}"#), Inbound::Application);
    assert_eq!(classify(r#"{"text":"no header"}"#), Inbound::Application);
    assert_eq!(classify("plain text"), Inbound::Application);
}

#[test]
fn server_messages_carry_a_type_header() {
    let frame = ServerMessage::Presence {
        identity: "alice".to_string(),
        status: PresenceStatus::Offline,
        timestamp: 1,
    }
    .to_frame()
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.as_text().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({"type": "presence", "identity": "alice", "status": "offline", "timestamp": 1})
    );
}

#[test]
fn query_param_identity_reads_the_configured_parameter() {
    let resolver = QueryParamIdentity::new("player_id");
    let request = |uri: &str| Request::builder().uri(uri).body(()).unwrap();

    assert_eq!(
        resolver.resolve(&request("/ws?room=1&player_id=alice")),
        Some("alice".to_string())
    );
    assert_eq!(
        resolver.resolve(&request("/ws?player_id=john%20doe")),
        Some("john doe".to_string())
    );
    assert_eq!(
        resolver.resolve(&request("/ws?player_id=a%26b&x=1")),
        Some("a&b".to_string())
    );
    assert_eq!(resolver.resolve(&request("/ws?player_id=")), None);
    assert_eq!(resolver.resolve(&request("/ws?user=alice")), None);
    assert_eq!(resolver.resolve(&request("/ws")), None);
}

#[tokio::test]
async fn memory_writer_close_ends_the_peer_stream() {
    let (_reader, mut writer, mut peer) = memory::pair(2);
    writer.write_frame(Frame::text("hello")).await.unwrap();
    writer.close().await.unwrap();

    assert_eq!(peer.recv().await, Some(Frame::text("hello")));
    assert_eq!(peer.recv().await, None);
    assert!(writer.write_frame(Frame::text("late")).await.is_err());
}

async fn start_server(settings: HubSettings) -> (Hub, String) {
    let hub = Hub::new(settings, Arc::new(PubSubHandler)).unwrap();
    let server = WebSocketServer::bind(
        "127.0.0.1:0",
        hub.clone(),
        Arc::new(QueryParamIdentity::new("player_id")),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (hub, format!("ws://{addr}"))
}

/// Reads until a server message matching `pred` arrives.
async fn expect_message(
    client: &mut Client,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    let wait = async {
        while let Some(message) = client.next().await {
            if let WsMessage::Text(text) = message.unwrap() {
                let parsed: ServerMessage = serde_json::from_str(text.as_str()).unwrap();
                if pred(&parsed) {
                    return parsed;
                }
            }
        }
        panic!("connection ended before the expected message");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for message")
}

async fn send_json(client: &mut Client, value: serde_json::Value) {
    client.send(WsMessage::text(value.to_string())).await.unwrap();
}

/// Round-trips a JSON ping so every earlier frame has been processed.
async fn sync(client: &mut Client) {
    send_json(client, json!({"type": "ping"})).await;
    expect_message(client, |m| matches!(m, ServerMessage::Pong {})).await;
}

#[tokio::test]
async fn websocket_clients_publish_and_receive() {
    let (hub, url) = start_server(HubSettings::default()).await;

    let (mut alice, _) = connect_async(format!("{url}/?player_id=alice")).await.unwrap();
    let welcome = expect_message(&mut alice, |m| matches!(m, ServerMessage::Welcome { .. })).await;
    assert!(matches!(welcome, ServerMessage::Welcome { ref identity, .. } if identity == "alice"));

    send_json(&mut alice, json!({"type": "subscribe", "topic": "lobby"})).await;
    sync(&mut alice).await;

    let (mut bob, _) = connect_async(format!("{url}/?player_id=bob")).await.unwrap();
    expect_message(&mut bob, |m| matches!(m, ServerMessage::Welcome { .. })).await;
    let presence =
        expect_message(&mut alice, |m| matches!(m, ServerMessage::Presence { .. })).await;
    assert!(matches!(
        presence,
        ServerMessage::Presence {
            ref identity,
            status: PresenceStatus::Online,
            ..
        } if identity == "bob"
    ));

    send_json(
        &mut bob,
        json!({"type": "publish", "topic": "lobby", "payload": {"text": "hi"}}),
    )
    .await;
    match expect_message(&mut alice, |m| matches!(m, ServerMessage::Message { .. })).await {
        ServerMessage::Message { topic, payload, .. } => {
            assert_eq!(topic, "lobby");
            assert_eq!(payload, json!({"text": "hi"}));
        }
        other => panic!("unexpected message {other:?}"),
    }

    assert_eq!(hub.connection_count(), 2);
    bob.close(None).await.unwrap();
    let offline = expect_message(&mut alice, |m| matches!(m, ServerMessage::Presence { .. })).await;
    assert!(matches!(
        offline,
        ServerMessage::Presence { status: PresenceStatus::Offline, .. }
    ));

    hub.shutdown().await;
}

#[tokio::test]
async fn handshake_without_identity_is_unauthorized() {
    let (hub, url) = start_server(HubSettings::default()).await;

    match connect_async(format!("{url}/")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("handshake should have been refused"),
    }
    assert_eq!(hub.connection_count(), 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn capacity_refusal_closes_with_try_again_later() {
    let (hub, url) = start_server(HubSettings {
        max_connections: 1,
        ..HubSettings::default()
    })
    .await;

    let (mut first, _) = connect_async(format!("{url}/?player_id=alice")).await.unwrap();
    expect_message(&mut first, |m| matches!(m, ServerMessage::Welcome { .. })).await;

    let (mut second, _) = connect_async(format!("{url}/?player_id=bob")).await.unwrap();
    let close = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match second.next().await {
                Some(Ok(WsMessage::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for close");

    assert_eq!(close.map(|frame| u16::from(frame.code)), Some(1013));
    assert_eq!(hub.metrics().admissions_refused, 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn shutdown_sends_going_away() {
    let (hub, url) = start_server(HubSettings::default()).await;
    let (mut client, _) = connect_async(format!("{url}/?player_id=alice")).await.unwrap();
    expect_message(&mut client, |m| matches!(m, ServerMessage::Welcome { .. })).await;

    hub.shutdown().await;

    let close = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for close");
    assert_eq!(close.map(|frame| u16::from(frame.code)), Some(1001));
}

#[tokio::test]
async fn shutdown_abandons_pending_handshakes() {
    let (hub, url) = start_server(HubSettings::default()).await;
    let addr = url.trim_start_matches("ws://").to_string();

    let mut silent = TcpStream::connect(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    hub.shutdown().await;

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(3), silent.read(&mut buf))
        .await
        .expect("socket still open after shutdown");
    assert!(matches!(read, Ok(0) | Err(_)));
}
