//! Socket side of the messaging client.
//!
//! Each manager is a single task that owns its store and its socket handle.
//! Commands, REST completions and socket events are all funnelled into that
//! task, so state changes are applied one at a time in arrival order.
//! Every asynchronous result carries the binding it was started for and is
//! dropped if that binding is no longer current.

pub mod channel;
pub mod config;
pub mod conversation;
pub mod error;
pub mod notifications;
#[cfg(test)]
mod testing;
pub mod transport;

pub use channel::{
    ChannelEvent, ChannelHandle, ChannelRequest, ChannelState, Connector, WsConnector,
};
pub use config::GatewayConfig;
pub use conversation::{
    ChatEvent, ConversationHandle, ConversationManager, ConversationSnapshot, SendOutcome,
};
pub use error::{ChatError, NotificationError, TransportError};
pub use notifications::{
    NotificationEvent, NotificationHandle, NotificationManager, NotificationSnapshot, Surface,
};

/// First `max` characters of an inbound frame, for log lines.
pub(crate) fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
