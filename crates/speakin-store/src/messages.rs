use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use speakin_types::UserId;
use speakin_types::models::Message;

use crate::{ECHO_SKEW_SECS, Stale};

/// Identifies one selection of a counterpart. Every selection mints a fresh
/// `conn_id`, so re-selecting the same counterpart still supersedes results
/// that belong to the previous socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub counterpart_id: UserId,
    pub conn_id: Uuid,
    pub bound_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(counterpart_id: UserId) -> Self {
        Self {
            counterpart_id,
            conn_id: Uuid::new_v4(),
            bound_at: Utc::now(),
        }
    }

    pub fn matches(&self, other: &Binding) -> bool {
        self.counterpart_id == other.counterpart_id && self.conn_id == other.conn_id
    }
}

/// Ordered message log for the active conversation.
///
/// The log is always history followed by live messages in arrival order.
/// Live messages that land before history are held in `live` and end up
/// after it once history is applied.
#[derive(Debug, Default)]
pub struct MessageStore {
    binding: Option<Binding>,
    history: Option<Vec<Message>>,
    live: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    /// Discard everything and bind to a new selection.
    pub fn reset(&mut self, binding: Binding) {
        self.binding = Some(binding);
        self.history = None;
        self.live.clear();
    }

    fn check(&self, binding: &Binding) -> Result<(), Stale> {
        match &self.binding {
            Some(current) if current.matches(binding) => Ok(()),
            _ => Err(Stale),
        }
    }

    pub fn history_loaded(&self) -> bool {
        self.history.is_some()
    }

    /// Install the history for `binding`. Returns how many already-received
    /// live messages were found in the history and dropped as duplicates.
    pub fn apply_history(
        &mut self,
        binding: &Binding,
        history: Vec<Message>,
    ) -> Result<usize, Stale> {
        self.check(binding)?;

        let not_before = binding.bound_at - TimeDelta::seconds(ECHO_SKEW_SECS);
        let dropped = drop_echoed(&history, &mut self.live, not_before);
        if dropped > 0 {
            debug!(
                "Dropped {} live message(s) already present in history for {}",
                dropped, binding.counterpart_id
            );
        }

        self.history = Some(history);
        Ok(dropped)
    }

    /// Append a message received on the live channel.
    pub fn push_live(&mut self, binding: &Binding, message: Message) -> Result<(), Stale> {
        self.check(binding)?;
        self.live.push(message);
        Ok(())
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.history.iter().flatten().chain(self.live.iter())
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.as_ref().map_or(0, Vec::len) + self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remove live messages that the server already returned in `history`.
///
/// Anything the server persisted after the binding was also delivered live,
/// so echoed messages can only be the oldest live messages and must form the
/// tail of `history`, in the same order. The longest such overlap whose
/// history rows are no older than `not_before` is dropped. Anything else is
/// kept, even if it repeats an earlier message word for word.
fn drop_echoed(history: &[Message], live: &mut Vec<Message>, not_before: DateTime<Utc>) -> usize {
    let max = history.len().min(live.len());
    let overlap = (1..=max)
        .rev()
        .find(|&k| {
            history[history.len() - k..]
                .iter()
                .zip(&live[..k])
                .all(|(h, l)| {
                    h.timestamp >= not_before && h.sender_id == l.sender_id && h.content == l.content
                })
        })
        .unwrap_or(0);

    live.drain(..overlap);
    overlap
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_557_600 + secs, 0).unwrap()
    }

    fn msg(sender: UserId, recipient: UserId, content: &str, ts: DateTime<Utc>) -> Message {
        Message::live(sender, recipient, content, ts)
    }

    fn binding_at(counterpart_id: UserId, bound_at: DateTime<Utc>) -> Binding {
        Binding {
            counterpart_id,
            conn_id: Uuid::new_v4(),
            bound_at,
        }
    }

    #[test]
    fn history_then_live_in_arrival_order() {
        let mut store = MessageStore::new();
        let b = binding_at(42, at(100));
        store.reset(b.clone());

        store.apply_history(&b, vec![msg(1, 42, "hi", at(0))]).unwrap();
        store.push_live(&b, msg(42, 1, "yo", at(101))).unwrap();
        store.push_live(&b, msg(1, 42, "sup", at(102))).unwrap();

        let contents: Vec<&str> = store.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "yo", "sup"]);
    }

    #[test]
    fn live_before_history_is_kept_after_history() {
        let mut store = MessageStore::new();
        let b = binding_at(42, at(100));
        store.reset(b.clone());

        store.push_live(&b, msg(42, 1, "early", at(101))).unwrap();
        store.push_live(&b, msg(1, 42, "reply", at(102))).unwrap();
        assert!(!store.history_loaded());
        assert_eq!(store.len(), 2);

        store
            .apply_history(&b, vec![msg(1, 42, "old", at(0)), msg(42, 1, "older", at(1))])
            .unwrap();

        let contents: Vec<&str> = store.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["old", "older", "early", "reply"]);
    }

    #[test]
    fn live_message_already_in_history_is_not_duplicated() {
        let mut store = MessageStore::new();
        let b = binding_at(42, at(100));
        store.reset(b.clone());

        store.push_live(&b, msg(42, 1, "yo", at(101))).unwrap();
        let dropped = store
            .apply_history(&b, vec![msg(1, 42, "hi", at(0)), msg(42, 1, "yo", at(100))])
            .unwrap();

        assert_eq!(dropped, 1);
        let contents: Vec<&str> = store.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "yo"]);
    }

    #[test]
    fn old_history_with_same_text_is_not_treated_as_echo() {
        let mut store = MessageStore::new();
        let b = binding_at(42, at(10_000));
        store.reset(b.clone());

        store.push_live(&b, msg(42, 1, "ok", at(10_001))).unwrap();
        let dropped = store.apply_history(&b, vec![msg(42, 1, "ok", at(0))]).unwrap();

        assert_eq!(dropped, 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn repeated_text_just_after_binding_is_kept() {
        let mut store = MessageStore::new();
        let b = binding_at(42, at(100));
        store.reset(b.clone());

        // History was read before the second "ok" was persisted.
        store.push_live(&b, msg(42, 1, "ok", at(101))).unwrap();
        let dropped = store.apply_history(&b, vec![msg(42, 1, "ok", at(90))]).unwrap();

        assert_eq!(dropped, 0);
        let contents: Vec<&str> = store.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["ok", "ok"]);
    }

    #[test]
    fn only_the_echoed_prefix_of_live_is_dropped() {
        let mut store = MessageStore::new();
        let b = binding_at(42, at(100));
        store.reset(b.clone());

        store.push_live(&b, msg(42, 1, "a", at(101))).unwrap();
        store.push_live(&b, msg(1, 42, "b", at(102))).unwrap();
        store.push_live(&b, msg(42, 1, "a", at(103))).unwrap();

        // The listing caught the first two live messages but not the third.
        let dropped = store
            .apply_history(
                &b,
                vec![
                    msg(1, 42, "hi", at(0)),
                    msg(42, 1, "a", at(100)),
                    msg(1, 42, "b", at(101)),
                ],
            )
            .unwrap();

        assert_eq!(dropped, 2);
        let contents: Vec<&str> = store.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "a", "b", "a"]);
    }

    #[test]
    fn stale_binding_never_mutates_the_store() {
        let mut store = MessageStore::new();
        let a = binding_at(1, at(0));
        let b = binding_at(2, at(1));
        store.reset(a.clone());
        store.reset(b.clone());

        assert_eq!(store.apply_history(&a, vec![msg(9, 1, "a", at(0))]), Err(Stale));
        assert_eq!(store.push_live(&a, msg(1, 9, "late", at(2))), Err(Stale));
        assert!(store.is_empty());

        store.apply_history(&b, vec![msg(2, 9, "b", at(0))]).unwrap();
        assert_eq!(store.to_vec()[0].content, "b");
    }

    #[test]
    fn reselecting_same_counterpart_supersedes_previous_binding() {
        let mut store = MessageStore::new();
        let first = binding_at(7, at(0));
        let second = binding_at(7, at(1));
        store.reset(first.clone());
        store.reset(second.clone());

        assert_eq!(store.push_live(&first, msg(7, 1, "ghost", at(2))), Err(Stale));
        assert!(store.push_live(&second, msg(7, 1, "real", at(2))).is_ok());
    }
}
