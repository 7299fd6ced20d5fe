use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::warn;

use speakin_types::UserId;
use speakin_types::api::{NotificationEntry, NotificationRecord};
use speakin_types::models::Counterpart;

use crate::client::Backend;
use crate::error::EnrichmentError;

/// Display identity of a notification sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub name: String,
    pub image: Option<String>,
}

impl SenderIdentity {
    /// Label used when the sender's profile cannot be loaded.
    pub fn fallback(sender_id: UserId) -> Self {
        Self {
            name: format!("User {}", sender_id),
            image: None,
        }
    }
}

impl From<Counterpart> for SenderIdentity {
    fn from(counterpart: Counterpart) -> Self {
        Self {
            name: counterpart.display_name().to_string(),
            image: counterpart.profile_image,
        }
    }
}

/// Resolve a sender id to a display identity. Never fails: lookup errors
/// degrade to [`SenderIdentity::fallback`].
pub async fn resolve_sender(backend: &dyn Backend, sender_id: UserId) -> SenderIdentity {
    match backend.user(sender_id).await {
        Ok(profile) => Counterpart::from(profile).into(),
        Err(source) => {
            let err = EnrichmentError {
                user_id: sender_id,
                source,
            };
            warn!("{}; showing generic sender label", err);
            SenderIdentity::fallback(sender_id)
        }
    }
}

/// Build the entry for a pushed notification, stamped with the client
/// receive time.
pub fn push_entry(
    sender_id: UserId,
    message: String,
    received_at: DateTime<Utc>,
    identity: SenderIdentity,
) -> NotificationEntry {
    NotificationEntry {
        id: None,
        message,
        sender_id,
        sender_name: identity.name,
        sender_image: identity.image,
        timestamp: received_at,
        is_read: false,
    }
}

/// Enrich a bulk notification listing. Each distinct sender is looked up
/// once, all lookups run concurrently, and record order is preserved.
pub async fn enrich_records(
    backend: &dyn Backend,
    records: Vec<NotificationRecord>,
) -> Vec<NotificationEntry> {
    let mut senders: Vec<UserId> = records.iter().map(|r| r.sender_id).collect();
    senders.sort_unstable();
    senders.dedup();

    let identities = join_all(senders.iter().map(|&id| resolve_sender(backend, id))).await;
    let by_sender: HashMap<UserId, SenderIdentity> =
        senders.into_iter().zip(identities).collect();

    records
        .into_iter()
        .map(|record| {
            let identity = by_sender
                .get(&record.sender_id)
                .cloned()
                .unwrap_or_else(|| SenderIdentity::fallback(record.sender_id));
            NotificationEntry {
                id: record.id,
                message: record.message,
                sender_id: record.sender_id,
                sender_name: identity.name,
                sender_image: identity.image,
                timestamp: record.timestamp,
                is_read: record.is_read,
            }
        })
        .collect()
}
