//! In-memory [`Backend`] for tests and offline demos.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use speakin_types::UserId;
use speakin_types::api::NotificationRecord;
use speakin_types::models::{Message, TutorDetails, UserProfile};

use crate::client::Backend;
use crate::error::NetworkError;

#[derive(Default)]
struct State {
    chat_users: HashMap<UserId, Vec<UserId>>,
    histories: HashMap<(UserId, UserId), Vec<Message>>,
    users: HashMap<UserId, UserProfile>,
    failing_users: HashSet<UserId>,
    failing_history: HashSet<UserId>,
    notifications: HashMap<UserId, Vec<NotificationRecord>>,
    counts: HashMap<UserId, u32>,
    fail_clear: bool,
    user_lookups: Vec<UserId>,
    history_gates: HashMap<UserId, Arc<Notify>>,
}

#[derive(Default, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

fn unavailable(path: String) -> NetworkError {
    NetworkError::Status {
        url: path,
        status: 500,
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn add_student(&self, id: UserId, name: &str) {
        self.add_profile(UserProfile {
            id,
            name: name.to_string(),
            user_type: "student".into(),
            profile_image: None,
            tutor_details: None,
        });
    }

    pub fn add_tutor(&self, id: UserId, name: &str, speakin_name: &str) {
        self.add_profile(UserProfile {
            id,
            name: name.to_string(),
            user_type: "tutor".into(),
            profile_image: Some(format!("https://cdn.example/{}.png", id)),
            tutor_details: Some(TutorDetails {
                speakin_name: Some(speakin_name.to_string()),
            }),
        });
    }

    pub fn add_profile(&self, profile: UserProfile) {
        self.with(|s| s.users.insert(profile.id, profile));
    }

    pub fn fail_user(&self, id: UserId) {
        self.with(|s| s.failing_users.insert(id));
    }

    pub fn set_chat_users(&self, user_id: UserId, ids: Vec<UserId>) {
        self.with(|s| s.chat_users.insert(user_id, ids));
    }

    pub fn set_history(&self, user_id: UserId, counterpart_id: UserId, history: Vec<Message>) {
        self.with(|s| s.histories.insert((user_id, counterpart_id), history));
    }

    pub fn fail_history(&self, counterpart_id: UserId, failing: bool) {
        self.with(|s| {
            if failing {
                s.failing_history.insert(counterpart_id);
            } else {
                s.failing_history.remove(&counterpart_id);
            }
        });
    }

    /// Hold history responses for `counterpart_id` until the returned
    /// handle is notified.
    pub fn gate_history(&self, counterpart_id: UserId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with(|s| s.history_gates.insert(counterpart_id, gate.clone()));
        gate
    }

    pub fn set_notifications(&self, user_id: UserId, records: Vec<NotificationRecord>) {
        self.with(|s| s.notifications.insert(user_id, records));
    }

    pub fn set_count(&self, user_id: UserId, count: u32) {
        self.with(|s| s.counts.insert(user_id, count));
    }

    pub fn fail_clear(&self, failing: bool) {
        self.with(|s| s.fail_clear = failing);
    }

    /// Every id passed to `user()`, in call order.
    pub fn user_lookups(&self) -> Vec<UserId> {
        self.with(|s| s.user_lookups.clone())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn chat_users(&self, user_id: UserId) -> Result<Vec<UserId>, NetworkError> {
        Ok(self.with(|s| s.chat_users.get(&user_id).cloned().unwrap_or_default()))
    }

    async fn history(
        &self,
        user_id: UserId,
        counterpart_id: UserId,
    ) -> Result<Vec<Message>, NetworkError> {
        let gate = self.with(|s| s.history_gates.get(&counterpart_id).cloned());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.with(|s| {
            if s.failing_history.contains(&counterpart_id) {
                return Err(unavailable(format!(
                    "messages/history/{}/{}/",
                    user_id, counterpart_id
                )));
            }
            Ok(s.histories
                .get(&(user_id, counterpart_id))
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn user(&self, id: UserId) -> Result<UserProfile, NetworkError> {
        self.with(|s| {
            s.user_lookups.push(id);
            if s.failing_users.contains(&id) {
                return Err(unavailable(format!("users/{}/", id)));
            }
            s.users.get(&id).cloned().ok_or(NetworkError::Status {
                url: format!("users/{}/", id),
                status: 404,
            })
        })
    }

    async fn notifications(
        &self,
        user_id: UserId,
    ) -> Result<Vec<NotificationRecord>, NetworkError> {
        Ok(self.with(|s| s.notifications.get(&user_id).cloned().unwrap_or_default()))
    }

    async fn notification_count(&self, user_id: UserId) -> Result<u32, NetworkError> {
        Ok(self.with(|s| s.counts.get(&user_id).copied().unwrap_or(0)))
    }

    async fn clear_notifications(&self, user_id: UserId) -> Result<(), NetworkError> {
        self.with(|s| {
            if s.fail_clear {
                return Err(unavailable(format!("notifications/clear/{}/", user_id)));
            }
            s.notifications.remove(&user_id);
            s.counts.insert(user_id, 0);
            Ok(())
        })
    }
}
