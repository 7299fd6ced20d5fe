use speakin_api::NetworkError;

/// Socket-level failure on a chat or notification channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid socket URL: {0}")]
    InvalidUrl(String),

    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("socket read failed: {0}")]
    Read(String),

    #[error("socket write failed: {0}")]
    Write(String),

    #[error("no heartbeat reply after {missed} pings")]
    HeartbeatTimeout { missed: u8 },
}

/// User-visible error on the conversation surface. Display strings are the
/// banner copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The server closed the chat socket. Read-only until re-selection.
    #[error("Connection lost. Please reopen the conversation.")]
    ConnectionLost,

    #[error("Connection error. Please try again.")]
    ConnectionError(#[source] TransportError),

    #[error("Failed to load message history")]
    HistoryFailed(#[source] NetworkError),

    #[error("Failed to load chat")]
    LoadFailed(#[source] NetworkError),
}

impl ChatError {
    /// Errors that a successful (re)connect resolves.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::ConnectionError(_))
    }
}

/// User-visible error on the notification surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to clear notifications")]
    ClearFailed(#[source] NetworkError),

    #[error("Failed to load notifications")]
    FetchFailed(#[source] NetworkError),

    /// The actor is gone (shut down or panicked).
    #[error("Notifications are unavailable")]
    Unavailable,
}
