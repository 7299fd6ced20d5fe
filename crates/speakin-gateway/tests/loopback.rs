//! Socket tests against a local tokio-tungstenite server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;
use uuid::Uuid;

use speakin_api::memory::MemoryBackend;
use speakin_api::{HistoryLoader, SessionToken};
use speakin_gateway::channel::CloseInitiator;
use speakin_gateway::{
    ChannelEvent, ChannelRequest, ChannelState, ChatEvent, Connector, ConversationManager,
    GatewayConfig, SendOutcome, TransportError, WsConnector,
};
use speakin_types::models::{Counterpart, Persona};

const WAIT: Duration = Duration::from_secs(5);

/// Accept one socket, report the request URI, then hand the stream to
/// `serve`.
async fn server<F, Fut>(serve: F) -> (Url, oneshot::Receiver<String>)
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let record_uri = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, record_uri)
            .await
            .unwrap();
        serve(ws).await;
    });

    let base = Url::parse(&format!("ws://{}/ws/", addr)).unwrap();
    (base, uri_rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("event channel closed")
}

#[tokio::test]
async fn channel_relays_frames_and_reports_remote_close() {
    let (base, uri_rx) = server(|mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let echoed = text.replace('}', r#", "sender_id": 1}"#);
                ws.send(Message::Text(echoed)).await.unwrap();
                ws.close(None).await.unwrap();
            }
        }
    })
    .await;

    let config = GatewayConfig::new(base).with_heartbeat(None);
    let conn_id = Uuid::new_v4();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let handle = WsConnector.open(
        ChannelRequest {
            conn_id,
            url: config.chat_url(42, "s3cret").unwrap(),
            heartbeat: None,
        },
        events_tx,
    );

    assert_eq!(next_event(&mut events).await, ChannelEvent::Opened { conn_id });
    assert_eq!(uri_rx.await.unwrap(), "/ws/chat/42/?token=s3cret");

    handle.send_text(r#"{"message": "hi"}"#.into()).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Frame {
            conn_id,
            text: r#"{"message": "hi", "sender_id": 1}"#.into()
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Closed {
            conn_id,
            initiator: CloseInitiator::Remote
        }
    );
}

#[tokio::test]
async fn silent_server_trips_heartbeat() {
    // Never read, so pings are never answered.
    let (base, _uri) = server(|ws| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(ws);
    })
    .await;

    let config = GatewayConfig::new(base);
    let conn_id = Uuid::new_v4();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let _handle = WsConnector.open(
        ChannelRequest {
            conn_id,
            url: config.notifications_url("tok").unwrap(),
            heartbeat: Some(Duration::from_millis(50)),
        },
        events_tx,
    );

    assert_eq!(next_event(&mut events).await, ChannelEvent::Opened { conn_id });
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Failed {
            conn_id,
            error: TransportError::HeartbeatTimeout { missed: 2 }
        }
    );
}

#[tokio::test]
async fn unreachable_server_fails_without_leaking_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = GatewayConfig::new(Url::parse(&format!("ws://{}/ws/", addr)).unwrap());
    let conn_id = Uuid::new_v4();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let _handle = WsConnector.open(
        ChannelRequest {
            conn_id,
            url: config.chat_url(3, "s3cret").unwrap(),
            heartbeat: None,
        },
        events_tx,
    );

    match next_event(&mut events).await {
        ChannelEvent::Failed {
            error: TransportError::Connect { url, .. },
            ..
        } => {
            assert!(url.contains("token=***"));
            assert!(!url.contains("s3cret"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn conversation_round_trip_over_real_socket() {
    // Echo every posted message back to the room, as the chat server does.
    let (base, _uri) = server(|mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let posted: serde_json::Value = serde_json::from_str(&text).unwrap();
                let echo = serde_json::json!({ "message": posted["message"], "sender_id": 1 });
                ws.send(Message::Text(echo.to_string())).await.unwrap();
            }
        }
    })
    .await;

    let backend = MemoryBackend::new();
    let handle = ConversationManager::spawn(
        1,
        HistoryLoader::new(Arc::new(backend)),
        SessionToken::new("tok"),
        GatewayConfig::new(base),
        Arc::new(WsConnector),
    );
    let mut events = handle.subscribe();

    handle.select(Counterpart {
        id: 42,
        profile_image: None,
        persona: Persona::Student { name: "Ana".into() },
    });

    let open = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(ChatEvent::StateChanged(ChannelState::Open)) = events.recv().await {
                break;
            }
        }
    });
    open.await.expect("channel never opened");

    assert_eq!(handle.send(" hello ").await, SendOutcome::Sent);

    let appended = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(ChatEvent::MessageAppended(message)) = events.recv().await {
                return message;
            }
        }
    })
    .await
    .expect("echo never arrived");

    assert_eq!(appended.content, "hello");
    assert_eq!(appended.sender_id, 1);
    assert_eq!(appended.recipient_id, 42);
    handle.shutdown();
}
