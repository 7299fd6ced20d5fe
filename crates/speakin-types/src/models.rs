use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{self, UserId};

/// One chat message between two users.
///
/// History rows come from the server with an `id`; messages delivered over
/// the chat socket have none and carry the client arrival time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(deserialize_with = "ids::lenient")]
    pub sender_id: UserId,
    #[serde(deserialize_with = "ids::lenient")]
    pub recipient_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn live(
        sender_id: UserId,
        recipient_id: UserId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            sender_id,
            recipient_id,
            content: content.into(),
            timestamp,
        }
    }
}

/// Raw profile returned by `GET /users/{id}/`.
///
/// The shape depends on `user_type`: tutors carry their public teaching name
/// in `tutor_details.speakin_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "ids::lenient")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_type: String,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub tutor_details: Option<TutorDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorDetails {
    #[serde(default)]
    pub speakin_name: Option<String>,
}

/// The other participant of a one-to-one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Counterpart {
    pub id: UserId,
    pub profile_image: Option<String>,
    pub persona: Persona,
}

/// Role-specific identity. Display name resolution lives in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "user_type", rename_all = "snake_case")]
pub enum Persona {
    Student { name: String },
    Tutor { speakin_name: String },
    Admin { name: String },
}

impl Persona {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Student { name } | Self::Admin { name } => name,
            Self::Tutor { speakin_name } => speakin_name,
        }
    }
}

impl Counterpart {
    pub fn display_name(&self) -> &str {
        self.persona.display_name()
    }
}

impl From<UserProfile> for Counterpart {
    fn from(profile: UserProfile) -> Self {
        let persona = match profile.user_type.as_str() {
            "tutor" => {
                // Tutors without a details row yet still need a label.
                let speakin_name = profile
                    .tutor_details
                    .and_then(|d| d.speakin_name)
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or(profile.name);
                Persona::Tutor { speakin_name }
            }
            "admin" => Persona::Admin { name: profile.name },
            _ => Persona::Student { name: profile.name },
        };

        Self {
            id: profile.id,
            profile_image: profile.profile_image.filter(|url| !url.is_empty()),
            persona,
        }
    }
}
