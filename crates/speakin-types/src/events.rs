use serde::{Deserialize, Serialize};

use crate::ids::{self, UserId};

/// Frames received on the per-conversation chat socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatFrame {
    /// A message posted to the conversation room (including our own echo).
    Message { message: String, sender_id: UserId },

    /// The server announces a conversation with a user we may not know yet.
    NewConversation { user_id: UserId },
}

/// Wire shape of a chat frame. The server sends untagged message frames and
/// `type`-tagged control frames on the same socket.
#[derive(Debug, Deserialize)]
struct RawChatFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, deserialize_with = "ids::lenient_opt")]
    sender_id: Option<UserId>,
    #[serde(default, deserialize_with = "ids::lenient_opt")]
    user_id: Option<UserId>,
}

/// Why an inbound chat frame could not be used.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is missing '{0}'")]
    MissingField(&'static str),
    #[error("unrecognized frame")]
    Unrecognized,
}

impl ChatFrame {
    pub const NEW_CONVERSATION: &'static str = "new_conversation";

    /// Parse one text frame. Empty message bodies are not messages.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawChatFrame = serde_json::from_str(text)?;

        if let Some(message) = raw.message.filter(|m| !m.is_empty()) {
            let sender_id = raw.sender_id.ok_or(FrameError::MissingField("sender_id"))?;
            return Ok(Self::Message { message, sender_id });
        }

        if raw.kind.as_deref() == Some(Self::NEW_CONVERSATION) {
            let user_id = raw.user_id.ok_or(FrameError::MissingField("user_id"))?;
            return Ok(Self::NewConversation { user_id });
        }

        Err(FrameError::Unrecognized)
    }
}

/// Frame sent from client to server on the chat socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCommand {
    pub message: String,
}

/// Frames received on the per-user notification socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationFrame {
    #[serde(rename = "send.notification")]
    SendNotification {
        #[serde(deserialize_with = "ids::lenient")]
        sender_id: UserId,
        message: String,
    },
}
