//! Per-user notification socket and feed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use speakin_api::enrich;
use speakin_api::{Backend, NetworkError, SessionToken};
use speakin_store::{FetchTicket, NotificationFeed};
use speakin_types::UserId;
use speakin_types::api::NotificationEntry;
use speakin_types::events::NotificationFrame;

use crate::channel::{ChannelEvent, ChannelHandle, ChannelRequest, ChannelState, Connector};
use crate::config::GatewayConfig;
use crate::error::NotificationError;
use crate::preview;

const EVENT_CAPACITY: usize = 256;

/// UI surfaces that show the feed. Either one keeps the socket open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Surface {
    Flyout,
    MobileModal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    StateChanged(ChannelState),
    /// A pushed notification, already enriched, now at the top of the feed.
    Received(NotificationEntry),
    Loaded { count: usize },
    UnreadChanged(u32),
    Cleared,
    Error(NotificationError),
}

#[derive(Debug, Clone)]
pub struct NotificationSnapshot {
    pub state: ChannelState,
    pub entries: Vec<NotificationEntry>,
    pub unread: u32,
    pub active: Vec<Surface>,
    pub error: Option<NotificationError>,
}

enum Command {
    Activate(Surface),
    Deactivate(Surface),
    RefreshUnread,
    ClearAll(oneshot::Sender<Result<(), NotificationError>>),
    Snapshot(oneshot::Sender<NotificationSnapshot>),
    Shutdown,
}

enum Completion {
    Fetched {
        ticket: FetchTicket,
        result: Result<Vec<NotificationEntry>, NetworkError>,
    },
    Count(Result<u32, NetworkError>),
    Enriched {
        seq: u64,
        entry: NotificationEntry,
    },
    Cleared {
        result: Result<(), NetworkError>,
        reply: oneshot::Sender<Result<(), NotificationError>>,
    },
}

#[derive(Clone)]
pub struct NotificationHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<NotificationEvent>,
}

impl NotificationHandle {
    fn post(&self, cmd: Command) -> bool {
        self.tx.send(cmd).is_ok()
    }

    /// Show `surface`: open the socket if needed and reload the feed.
    pub fn activate(&self, surface: Surface) {
        self.post(Command::Activate(surface));
    }

    pub fn deactivate(&self, surface: Surface) {
        self.post(Command::Deactivate(surface));
    }

    pub fn refresh_unread(&self) {
        self.post(Command::RefreshUnread);
    }

    /// Clear every notification on the server, then locally. On failure the
    /// feed is untouched.
    pub async fn clear_all(&self) -> Result<(), NotificationError> {
        let (reply, rx) = oneshot::channel();
        if !self.post(Command::ClearAll(reply)) {
            return Err(NotificationError::Unavailable);
        }
        rx.await.unwrap_or(Err(NotificationError::Unavailable))
    }

    pub async fn snapshot(&self) -> Option<NotificationSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Snapshot(reply));
        rx.await.ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }
}

pub struct NotificationManager {
    user_id: UserId,
    backend: Arc<dyn Backend>,
    token: SessionToken,
    config: GatewayConfig,
    connector: Arc<dyn Connector>,

    feed: NotificationFeed,
    active: BTreeSet<Surface>,
    channel: Option<ChannelHandle>,
    state: ChannelState,
    error: Option<NotificationError>,

    /// Sequence given to the next pushed frame.
    next_push: u64,
    /// Sequence of the next push allowed into the feed.
    next_apply: u64,
    /// Enriched pushes waiting for an earlier one to finish.
    reorder: BTreeMap<u64, NotificationEntry>,

    done_tx: mpsc::UnboundedSender<Completion>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    events: broadcast::Sender<NotificationEvent>,
}

impl NotificationManager {
    pub fn spawn(
        user_id: UserId,
        backend: Arc<dyn Backend>,
        token: SessionToken,
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
    ) -> NotificationHandle {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let manager = Self {
            user_id,
            backend,
            token,
            config,
            connector,
            feed: NotificationFeed::new(),
            active: BTreeSet::new(),
            channel: None,
            state: ChannelState::Idle,
            error: None,
            next_push: 0,
            next_apply: 0,
            reorder: BTreeMap::new(),
            done_tx,
            channel_tx,
            events: events.clone(),
        };
        tokio::spawn(manager.run(inbox, done_rx, channel_rx));

        NotificationHandle { tx, events }
    }

    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
        mut channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        info!("Notification manager started for user {}", self.user_id);

        loop {
            tokio::select! {
                cmd = inbox.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(done) = done_rx.recv() => self.handle_completion(done),
                Some(event) = channel_rx.recv() => self.handle_channel_event(event),
            }
        }

        self.close_channel();
        info!("Notification manager for user {} stopped", self.user_id);
    }

    fn emit(&self, event: NotificationEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state != state {
            debug!("Notification channel {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(NotificationEvent::StateChanged(state));
        }
    }

    fn set_error(&mut self, error: NotificationError) {
        warn!("Notification error: {}", error);
        self.error = Some(error.clone());
        self.emit(NotificationEvent::Error(error));
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Activate(surface) => self.activate(surface),
            Command::Deactivate(surface) => self.deactivate(surface),
            Command::RefreshUnread => self.refresh_unread(),
            Command::ClearAll(reply) => self.clear_all(reply),
            Command::Snapshot(reply) => {
                let _ = reply.send(NotificationSnapshot {
                    state: self.state,
                    entries: self.feed.to_vec(),
                    unread: self.feed.unread(),
                    active: self.active.iter().copied().collect(),
                    error: self.error.clone(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn activate(&mut self, surface: Surface) {
        if self.active.insert(surface) {
            debug!("Notification surface {:?} active", surface);
        }
        // Commands are serialized, so a second activation sees the first
        // channel and does not open another.
        if self.channel.is_none() {
            self.open_channel();
        }
        self.start_fetch();
    }

    fn deactivate(&mut self, surface: Surface) {
        self.active.remove(&surface);
        if self.active.is_empty() && self.channel.is_some() {
            self.close_channel();
            self.set_state(ChannelState::Closed);
        }
    }

    fn open_channel(&mut self) {
        let url = match self.config.notifications_url(&self.token.current()) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot open notification channel: {}", e);
                self.set_state(ChannelState::Closed);
                return;
            }
        };
        let request = ChannelRequest {
            conn_id: uuid::Uuid::new_v4(),
            url,
            heartbeat: self.config.heartbeat_interval,
        };
        self.set_state(ChannelState::Connecting);
        self.channel = Some(self.connector.open(request, self.channel_tx.clone()));
    }

    fn close_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!("Closing notification channel {}", channel.conn_id());
            channel.close();
        }
    }

    fn start_fetch(&mut self) {
        let ticket = self.feed.begin_fetch(Utc::now());
        let backend = self.backend.clone();
        let user_id = self.user_id;
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = match backend.notifications(user_id).await {
                Ok(records) => Ok(enrich::enrich_records(backend.as_ref(), records).await),
                Err(e) => Err(e),
            };
            let _ = done.send(Completion::Fetched { ticket, result });
        });
    }

    fn refresh_unread(&self) {
        let backend = self.backend.clone();
        let user_id = self.user_id;
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = backend.notification_count(user_id).await;
            let _ = done.send(Completion::Count(result));
        });
    }

    fn clear_all(&self, reply: oneshot::Sender<Result<(), NotificationError>>) {
        let backend = self.backend.clone();
        let user_id = self.user_id;
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = backend.clear_notifications(user_id).await;
            let _ = done.send(Completion::Cleared { result, reply });
        });
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Fetched { ticket, result } => match result {
                Ok(entries) => match self.feed.apply_fetch(ticket, entries) {
                    Ok(count) => {
                        self.error = None;
                        self.emit(NotificationEvent::Loaded { count });
                    }
                    Err(_) => debug!("Discarding superseded notification listing"),
                },
                Err(e) => {
                    if self.feed.fetch_failed(ticket).is_ok() {
                        self.set_error(NotificationError::FetchFailed(e));
                    }
                }
            },
            Completion::Count(result) => match result {
                Ok(count) => {
                    self.feed.set_unread(count);
                    self.emit(NotificationEvent::UnreadChanged(count));
                }
                Err(e) => warn!("Failed to load unread count: {}", e),
            },
            Completion::Enriched { seq, entry } => {
                self.reorder.insert(seq, entry);
                while let Some(entry) = self.reorder.remove(&self.next_apply) {
                    self.next_apply += 1;
                    self.feed.prepend(entry.clone());
                    self.emit(NotificationEvent::Received(entry));
                    self.emit(NotificationEvent::UnreadChanged(self.feed.unread()));
                }
            }
            Completion::Cleared { result, reply } => {
                let outcome = match result {
                    Ok(()) => {
                        self.feed.clear();
                        self.error = None;
                        info!("Cleared notifications for user {}", self.user_id);
                        self.emit(NotificationEvent::Cleared);
                        self.emit(NotificationEvent::UnreadChanged(0));
                        Ok(())
                    }
                    Err(e) => {
                        let error = NotificationError::ClearFailed(e);
                        self.set_error(error.clone());
                        Err(error)
                    }
                };
                let _ = reply.send(outcome);
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        let current = self.channel.as_ref().map(ChannelHandle::conn_id);
        if current != Some(event.conn_id()) {
            debug!(
                "Discarding event from superseded notification channel {}",
                event.conn_id()
            );
            return;
        }

        match event {
            ChannelEvent::Opened { .. } => self.set_state(ChannelState::Open),
            ChannelEvent::Frame { text, .. } => self.on_frame(&text, Utc::now()),
            ChannelEvent::Closed { initiator, .. } => {
                info!("Notification channel closed ({:?})", initiator);
                self.channel = None;
                self.set_state(ChannelState::Closed);
            }
            ChannelEvent::Failed { error, .. } => {
                warn!("Notification channel failed: {}", error);
                self.channel = None;
                self.set_state(ChannelState::Closed);
            }
        }
    }

    fn on_frame(&mut self, text: &str, received_at: DateTime<Utc>) {
        let (sender_id, message) = match serde_json::from_str::<NotificationFrame>(text) {
            Ok(NotificationFrame::SendNotification { sender_id, message }) => (sender_id, message),
            Err(e) => {
                warn!("Ignoring notification frame ({}): {}", e, preview(text, 200));
                return;
            }
        };

        let seq = self.next_push;
        self.next_push += 1;

        let backend = self.backend.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let identity = enrich::resolve_sender(backend.as_ref(), sender_id).await;
            let entry = enrich::push_entry(sender_id, message, received_at, identity);
            let _ = done.send(Completion::Enriched { seq, entry });
        });
    }
}
