use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::config::redact;
use crate::error::TransportError;
use crate::transport::{self, WsMessage};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive unanswered pings before the channel is declared dead.
const MAX_MISSED_PONGS: u8 = 2;

/// Lifecycle of one logical channel as seen by its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    Remote,
    Local,
}

/// Socket events, tagged with the `conn_id` of the channel that produced
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { conn_id: Uuid },
    Frame { conn_id: Uuid, text: String },
    Closed { conn_id: Uuid, initiator: CloseInitiator },
    Failed { conn_id: Uuid, error: TransportError },
}

impl ChannelEvent {
    pub fn conn_id(&self) -> Uuid {
        match self {
            Self::Opened { conn_id }
            | Self::Frame { conn_id, .. }
            | Self::Closed { conn_id, .. }
            | Self::Failed { conn_id, .. } => *conn_id,
        }
    }
}

/// What a manager asks a [`Connector`] to open.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub conn_id: Uuid,
    pub url: Url,
    pub heartbeat: Option<Duration>,
}

/// Commands from the owning manager to the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Exclusive handle to one open (or opening) socket.
///
/// Dropping the handle without calling [`ChannelHandle::close`] aborts the
/// socket task.
#[derive(Debug)]
pub struct ChannelHandle {
    conn_id: Uuid,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn new(
        conn_id: Uuid,
        outbound: mpsc::UnboundedSender<Outbound>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            conn_id,
            outbound,
            task,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Write("socket task has exited".into()))
    }

    /// Ask the socket task to send a close frame and exit. Later events from
    /// this channel carry a conn_id nobody is waiting for.
    pub fn close(mut self) {
        let _ = self.outbound.send(Outbound::Close);
        // Let the task finish the close handshake instead of aborting it.
        self.task.take();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens channels. [`WsConnector`] is the real implementation.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        request: ChannelRequest,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ChannelHandle;
}

/// Opens channels over tokio-tungstenite, one task per socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &self,
        request: ChannelRequest,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> ChannelHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = request.conn_id;
        let task = tokio::spawn(run_channel(request, rx, events));
        ChannelHandle::new(conn_id, tx, Some(task))
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Socket task: connect, then relay frames both ways until either side
/// closes. Sends exactly one terminal event (`Closed` or `Failed`).
async fn run_channel(
    request: ChannelRequest,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let conn_id = request.conn_id;
    let shown = redact(&request.url);

    let fail = |error: TransportError| {
        warn!("Channel {} ({}) failed: {}", conn_id, shown, error);
        let _ = events.send(ChannelEvent::Failed { conn_id, error });
    };

    let (mut writer, mut reader) =
        match tokio::time::timeout(CONNECT_TIMEOUT, transport::connect(&request.url)).await {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                fail(e);
                return;
            }
            Err(_) => {
                fail(TransportError::Connect {
                    url: shown.clone(),
                    reason: format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()),
                });
                return;
            }
        };

    info!("Channel {} open ({})", conn_id, shown);
    let _ = events.send(ChannelEvent::Opened { conn_id });

    let mut heartbeat = request.heartbeat.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    trace!("Channel {} -> {} bytes", conn_id, text.len());
                    if let Err(e) = writer.send_text(&text).await {
                        fail(e);
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = writer.send_close().await {
                        debug!("Channel {} close frame not sent: {}", conn_id, e);
                    }
                    info!("Channel {} closed locally", conn_id);
                    let _ = events.send(ChannelEvent::Closed {
                        conn_id,
                        initiator: CloseInitiator::Local,
                    });
                    return;
                }
            },
            msg = reader.recv() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(ChannelEvent::Frame { conn_id, text });
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    pong_received = true;
                }
                // tungstenite queues the pong reply itself.
                Some(Ok(WsMessage::Ping(_))) => {}
                Some(Ok(WsMessage::Binary(data))) => {
                    trace!("Channel {} ignoring {} byte binary frame", conn_id, data.len());
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    info!("Channel {} closed by server ({} {})", conn_id, code, reason);
                    let _ = events.send(ChannelEvent::Closed {
                        conn_id,
                        initiator: CloseInitiator::Remote,
                    });
                    return;
                }
                Some(Err(e)) => {
                    fail(e);
                    return;
                }
                None => {
                    info!("Channel {} stream ended", conn_id);
                    let _ = events.send(ChannelEvent::Closed {
                        conn_id,
                        initiator: CloseInitiator::Remote,
                    });
                    return;
                }
            },
            _ = heartbeat_tick(&mut heartbeat) => {
                if pong_received {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MAX_MISSED_PONGS {
                        fail(TransportError::HeartbeatTimeout { missed: missed_heartbeats });
                        return;
                    }
                }
                pong_received = false;
                if let Err(e) = writer.send_ping().await {
                    fail(e);
                    return;
                }
            }
        }
    }
}
