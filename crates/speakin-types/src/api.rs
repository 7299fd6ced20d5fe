use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{self, UserId};

// -- Notifications --

/// Raw record returned by `GET /notifications/{userId}/`. Carries only the
/// sender id; display fields are resolved client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(deserialize_with = "ids::lenient")]
    pub sender_id: UserId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

/// A display-ready notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEntry {
    pub id: Option<u64>,
    pub message: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_image: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Body of `GET /notifications/count/{userId}/`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NotificationCount {
    pub count: u32,
}
