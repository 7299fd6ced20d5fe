//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` that hands out separate
//! reader/writer halves for use in a `tokio::select!` loop and maps
//! tungstenite errors into [`TransportError`].

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use url::Url;

use crate::config::redact;
use crate::error::TransportError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A received frame.
#[derive(Debug)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close frame; code 1005 when the peer sent none.
    Close { code: u16, reason: String },
}

#[derive(Debug)]
pub struct WsWriter {
    sink: SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    pub async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    /// Send a close frame and flush.
    pub async fn send_close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}

#[derive(Debug)]
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl WsReader {
    /// Next frame, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::Read(e.to_string()))),
            };
            let mapped = match msg {
                tungstenite::Message::Text(text) => WsMessage::Text(text),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data),
                tungstenite::Message::Pong(data) => WsMessage::Pong(data),
                tungstenite::Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    WsMessage::Close { code, reason }
                }
                // Raw frames never surface when reading.
                tungstenite::Message::Frame(_) => continue,
            };
            return Some(Ok(mapped));
        }
    }
}

/// Perform the WebSocket handshake and split the stream.
pub async fn connect(url: &Url) -> Result<(WsWriter, WsReader), TransportError> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Connect {
            url: redact(url),
            reason: e.to_string(),
        })?;

    let (sink, stream) = ws_stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}
