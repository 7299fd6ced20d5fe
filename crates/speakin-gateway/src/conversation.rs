//! Per-conversation chat socket.
//!
//! [`ConversationManager`] runs as one task. It owns the message store, the
//! roster and the chat channel; callers talk to it through a cloneable
//! [`ConversationHandle`] and observe it through [`ChatEvent`]s.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use speakin_api::{EnrichmentError, HistoryLoader, NetworkError, RosterLoad, SessionToken};
use speakin_store::{Binding, MessageStore, Roster};
use speakin_types::UserId;
use speakin_types::events::{ChatCommand, ChatFrame};
use speakin_types::models::{Counterpart, Message};

use crate::channel::{
    ChannelEvent, ChannelHandle, ChannelRequest, ChannelState, CloseInitiator, Connector,
};
use crate::config::GatewayConfig;
use crate::error::ChatError;
use crate::preview;

const EVENT_CAPACITY: usize = 256;

/// Observable changes on the conversation surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    StateChanged(ChannelState),
    Selected(Counterpart),
    HistoryLoaded { counterpart_id: UserId, count: usize },
    MessageAppended(Message),
    /// The view should scroll to the newest message.
    ScrollToLatest,
    RosterChanged { len: usize },
    /// Some roster profiles could not be loaded; the rest are shown.
    RosterPartial { failed: Vec<UserId> },
    Error(ChatError),
    ErrorCleared,
}

/// Result of [`ConversationHandle::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The channel is not open (still connecting, closed, or the manager is gone).
    NotOpen,
    /// Nothing left after trimming.
    Empty,
    NoCounterpart,
}

#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub state: ChannelState,
    pub counterpart: Option<Counterpart>,
    pub messages: Vec<Message>,
    pub history_loaded: bool,
    pub roster: Vec<Counterpart>,
    pub error: Option<ChatError>,
}

enum Command {
    LoadRoster,
    OpenCounterpart(UserId),
    Select(Counterpart),
    Send(String, oneshot::Sender<SendOutcome>),
    RetryHistory,
    Search(String, oneshot::Sender<Vec<Counterpart>>),
    Snapshot(oneshot::Sender<ConversationSnapshot>),
    Shutdown,
}

/// REST results coming back to the actor.
enum Completion {
    History {
        binding: Binding,
        result: Result<Vec<Message>, NetworkError>,
    },
    Roster(Result<RosterLoad, NetworkError>),
    DeepLink {
        seq: u64,
        result: Result<Counterpart, EnrichmentError>,
    },
    Discovered {
        user_id: UserId,
        result: Result<Counterpart, EnrichmentError>,
    },
}

/// Cloneable front of a running [`ConversationManager`].
#[derive(Clone)]
pub struct ConversationHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ChatEvent>,
}

impl ConversationHandle {
    fn post(&self, cmd: Command) {
        if self.tx.send(cmd).is_err() {
            debug!("Conversation manager has stopped; command dropped");
        }
    }

    /// Load every known conversation partner into the roster.
    pub fn load_roster(&self) {
        self.post(Command::LoadRoster);
    }

    /// Select a counterpart by id, fetching its profile first if it is not in
    /// the roster yet.
    pub fn open_counterpart(&self, id: UserId) {
        self.post(Command::OpenCounterpart(id));
    }

    pub fn select(&self, counterpart: Counterpart) {
        self.post(Command::Select(counterpart));
    }

    pub async fn send(&self, text: impl Into<String>) -> SendOutcome {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Send(text.into(), reply));
        rx.await.unwrap_or(SendOutcome::NotOpen)
    }

    pub fn retry_history(&self) {
        self.post(Command::RetryHistory);
    }

    pub async fn search(&self, query: impl Into<String>) -> Vec<Counterpart> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Search(query.into(), reply));
        rx.await.unwrap_or_default()
    }

    /// `None` once the manager has stopped.
    pub async fn snapshot(&self) -> Option<ConversationSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Snapshot(reply));
        rx.await.ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }
}

pub struct ConversationManager {
    user_id: UserId,
    loader: HistoryLoader,
    token: SessionToken,
    config: GatewayConfig,
    connector: Arc<dyn Connector>,

    store: MessageStore,
    roster: Roster,
    counterpart: Option<Counterpart>,
    channel: Option<ChannelHandle>,
    state: ChannelState,
    error: Option<ChatError>,
    /// Ids with a `new_conversation` profile lookup in flight.
    discovering: HashSet<UserId>,
    /// Bumped on every selection request; deep-link lookups carry it.
    selection_seq: u64,

    done_tx: mpsc::UnboundedSender<Completion>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    events: broadcast::Sender<ChatEvent>,
}

impl ConversationManager {
    /// Start the manager task for `user_id` and return its handle.
    pub fn spawn(
        user_id: UserId,
        loader: HistoryLoader,
        token: SessionToken,
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
    ) -> ConversationHandle {
        let (tx, inbox) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let manager = Self {
            user_id,
            loader,
            token,
            config,
            connector,
            store: MessageStore::new(),
            roster: Roster::new(),
            counterpart: None,
            channel: None,
            state: ChannelState::Idle,
            error: None,
            discovering: HashSet::new(),
            selection_seq: 0,
            done_tx,
            channel_tx,
            events: events.clone(),
        };
        tokio::spawn(manager.run(inbox, done_rx, channel_rx));

        ConversationHandle { tx, events }
    }

    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
        mut channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        info!("Conversation manager started for user {}", self.user_id);

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

        self.teardown();
        info!("Conversation manager for user {} stopped", self.user_id);
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state != state {
            debug!("Chat channel {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(ChatEvent::StateChanged(state));
        }
    }

    fn set_error(&mut self, error: ChatError) {
        warn!("Chat error: {}", error);
        self.error = Some(error.clone());
        self.emit(ChatEvent::Error(error));
    }

    fn clear_error_if(&mut self, pred: impl Fn(&ChatError) -> bool) {
        if self.error.as_ref().is_some_and(pred) {
            self.error = None;
            self.emit(ChatEvent::ErrorCleared);
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::LoadRoster => self.load_roster(),
            Command::OpenCounterpart(id) => self.open_counterpart(id),
            Command::Select(counterpart) => {
                self.selection_seq += 1;
                self.select(counterpart);
            }
            Command::Send(text, reply) => {
                let _ = reply.send(self.send(&text));
            }
            Command::RetryHistory => self.retry_history(),
            Command::Search(query, reply) => {
                let found = self.roster.search(&query).into_iter().cloned().collect();
                let _ = reply.send(found);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            state: self.state,
            counterpart: self.counterpart.clone(),
            messages: self.store.to_vec(),
            history_loaded: self.store.history_loaded(),
            roster: self.roster.iter().cloned().collect(),
            error: self.error.clone(),
        }
    }

    fn load_roster(&self) {
        let loader = self.loader.clone();
        let user_id = self.user_id;
        let known = self.roster.ids();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = loader.load_roster(user_id, &known).await;
            let _ = done.send(Completion::Roster(result));
        });
    }

    fn open_counterpart(&mut self, id: UserId) {
        self.selection_seq += 1;

        if let Some(counterpart) = self.roster.get(id).cloned() {
            self.select(counterpart);
            return;
        }

        debug!("Resolving deep-linked counterpart {}", id);
        let loader = self.loader.clone();
        let seq = self.selection_seq;
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = loader.resolve_counterpart(id).await;
            let _ = done.send(Completion::DeepLink { seq, result });
        });
    }

    /// Close the current channel without surfacing anything. Its remaining
    /// events no longer match and are dropped.
    fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!("Closing chat channel {}", channel.conn_id());
            channel.close();
        }
    }

    fn select(&mut self, counterpart: Counterpart) {
        self.teardown();

        let binding = Binding::new(counterpart.id);
        self.store.reset(binding.clone());
        self.roster.insert(counterpart.clone());
        self.counterpart = Some(counterpart.clone());
        self.clear_error_if(|_| true);
        self.set_state(ChannelState::Connecting);
        self.emit(ChatEvent::Selected(counterpart.clone()));

        info!(
            "Selected conversation with {} ({})",
            counterpart.display_name(),
            counterpart.id
        );

        match self.config.chat_url(counterpart.id, &self.token.current()) {
            Ok(url) => {
                let request = ChannelRequest {
                    conn_id: binding.conn_id,
                    url,
                    heartbeat: self.config.heartbeat_interval,
                };
                self.channel = Some(self.connector.open(request, self.channel_tx.clone()));
            }
            Err(e) => {
                self.set_state(ChannelState::Closed);
                self.set_error(ChatError::ConnectionError(e));
            }
        }

        self.spawn_history(binding);
    }

    fn spawn_history(&self, binding: Binding) {
        let loader = self.loader.clone();
        let user_id = self.user_id;
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = loader.load_history(user_id, binding.counterpart_id).await;
            let _ = done.send(Completion::History { binding, result });
        });
    }

    fn retry_history(&mut self) {
        let Some(binding) = self.store.binding().cloned() else {
            return;
        };
        if self.store.history_loaded() {
            return;
        }
        self.clear_error_if(|e| matches!(e, ChatError::HistoryFailed(_)));
        self.spawn_history(binding);
    }

    fn send(&mut self, text: &str) -> SendOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return SendOutcome::Empty;
        }
        if self.store.binding().is_none() {
            return SendOutcome::NoCounterpart;
        }
        let Some(channel) = self.channel.as_ref().filter(|_| self.state == ChannelState::Open)
        else {
            return SendOutcome::NotOpen;
        };

        let payload = match serde_json::to_string(&ChatCommand {
            message: trimmed.to_string(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode chat message: {}", e);
                return SendOutcome::NotOpen;
            }
        };

        match channel.send_text(payload) {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!("Chat send failed: {}", e);
                SendOutcome::NotOpen
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::History { binding, result } => self.on_history(binding, result),
            Completion::Roster(result) => self.on_roster(result),
            Completion::DeepLink { seq, result } => {
                if seq != self.selection_seq {
                    debug!("Discarding deep-link result superseded by a newer selection");
                    return;
                }
                match result {
                    Ok(counterpart) => self.select(counterpart),
                    Err(e) => self.set_error(ChatError::LoadFailed(e.source)),
                }
            }
            Completion::Discovered { user_id, result } => {
                self.discovering.remove(&user_id);
                match result {
                    Ok(counterpart) => {
                        if self.roster.insert(counterpart) {
                            info!("New conversation with {} added to roster", user_id);
                            self.emit(ChatEvent::RosterChanged {
                                len: self.roster.len(),
                            });
                        }
                    }
                    Err(e) => warn!("New conversation lookup failed: {}", e),
                }
            }
        }
    }

    fn on_history(&mut self, binding: Binding, result: Result<Vec<Message>, NetworkError>) {
        let current = self.store.binding().is_some_and(|b| b.matches(&binding));
        if !current {
            debug!(
                "Discarding history for {} from a superseded selection",
                binding.counterpart_id
            );
            return;
        }

        match result {
            Ok(history) => {
                let count = history.len();
                if self.store.apply_history(&binding, history).is_ok() {
                    self.clear_error_if(|e| matches!(e, ChatError::HistoryFailed(_)));
                    self.emit(ChatEvent::HistoryLoaded {
                        counterpart_id: binding.counterpart_id,
                        count,
                    });
                    self.emit(ChatEvent::ScrollToLatest);
                }
            }
            Err(e) => self.set_error(ChatError::HistoryFailed(e)),
        }
    }

    fn on_roster(&mut self, result: Result<RosterLoad, NetworkError>) {
        match result {
            Ok(load) => {
                let added = self.roster.extend(load.resolved);
                debug!("Roster load added {} counterpart(s)", added);
                if self.roster.is_empty() {
                    info!("No conversations yet for user {}", self.user_id);
                }
                self.emit(ChatEvent::RosterChanged {
                    len: self.roster.len(),
                });
                if !load.failures.is_empty() {
                    let failed = load.failures.iter().map(|f| f.user_id).collect();
                    self.emit(ChatEvent::RosterPartial { failed });
                }
            }
            Err(e) => self.set_error(ChatError::LoadFailed(e)),
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        let current = self.channel.as_ref().map(ChannelHandle::conn_id);
        if current != Some(event.conn_id()) {
            debug!("Discarding event from superseded chat channel {}", event.conn_id());
            return;
        }

        match event {
            ChannelEvent::Opened { .. } => {
                self.set_state(ChannelState::Open);
                self.clear_error_if(ChatError::is_connection);
            }
            ChannelEvent::Frame { text, .. } => self.on_frame(&text),
            ChannelEvent::Closed { initiator, .. } => {
                self.channel = None;
                self.set_state(ChannelState::Closed);
                if initiator == CloseInitiator::Remote {
                    self.set_error(ChatError::ConnectionLost);
                }
            }
            ChannelEvent::Failed { error, .. } => {
                self.channel = None;
                self.set_state(ChannelState::Closed);
                self.set_error(ChatError::ConnectionError(error));
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        match ChatFrame::parse(text) {
            Ok(ChatFrame::Message { message, sender_id }) => {
                let Some(binding) = self.store.binding().cloned() else {
                    return;
                };
                let recipient_id = if sender_id == binding.counterpart_id {
                    self.user_id
                } else {
                    binding.counterpart_id
                };
                let message = Message::live(sender_id, recipient_id, message, Utc::now());
                if self.store.push_live(&binding, message.clone()).is_ok() {
                    self.emit(ChatEvent::MessageAppended(message));
                    self.emit(ChatEvent::ScrollToLatest);
                }
            }
            Ok(ChatFrame::NewConversation { user_id }) => self.discover(user_id),
            Err(e) => warn!("Ignoring chat frame ({}): {}", e, preview(text, 200)),
        }
    }

    fn discover(&mut self, user_id: UserId) {
        if user_id == self.user_id
            || self.roster.contains(user_id)
            || !self.discovering.insert(user_id)
        {
            return;
        }

        let loader = self.loader.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = loader.resolve_counterpart(user_id).await;
            let _ = done.send(Completion::Discovered { user_id, result });
        });
    }
}
