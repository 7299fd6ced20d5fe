use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

use speakin_types::api::NotificationEntry;

use crate::{ECHO_SKEW_SECS, Stale};

/// Tag for one bulk load. Only the latest ticket may apply its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
    started_at: DateTime<Utc>,
}

/// Notifications, newest first, with the unread counter.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    entries: VecDeque<NotificationEntry>,
    unread: u32,
    fetch_seq: u64,
    in_flight: Option<u64>,
    /// Pushed while a bulk load was in flight, oldest first.
    pushed_since_fetch: Vec<NotificationEntry>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> impl Iterator<Item = &NotificationEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<NotificationEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn set_unread(&mut self, count: u32) {
        self.unread = count;
    }

    /// A pushed notification: newest first, one more unread.
    pub fn prepend(&mut self, entry: NotificationEntry) {
        if self.in_flight.is_some() {
            self.pushed_since_fetch.push(entry.clone());
        }
        self.entries.push_front(entry);
        self.unread = self.unread.saturating_add(1);
    }

    pub fn begin_fetch(&mut self, started_at: DateTime<Utc>) -> FetchTicket {
        self.fetch_seq += 1;
        self.in_flight = Some(self.fetch_seq);
        self.pushed_since_fetch.clear();
        FetchTicket {
            seq: self.fetch_seq,
            started_at,
        }
    }

    /// Replace the feed with a bulk listing. Pushes received while the load
    /// was in flight that the listing does not contain stay on top.
    ///
    /// A push only counts as listed if a row with the same sender and text
    /// is no older than the start of the load, less the skew allowance.
    pub fn apply_fetch(
        &mut self,
        ticket: FetchTicket,
        fetched: Vec<NotificationEntry>,
    ) -> Result<usize, Stale> {
        if self.in_flight != Some(ticket.seq) {
            return Err(Stale);
        }
        self.in_flight = None;

        let not_before = ticket.started_at - TimeDelta::seconds(ECHO_SKEW_SECS);
        let mut pushed = std::mem::take(&mut self.pushed_since_fetch);
        let mut used = vec![false; fetched.len()];
        pushed.retain(|p| {
            let hit = (0..fetched.len()).find(|&i| {
                !used[i]
                    && fetched[i].timestamp >= not_before
                    && fetched[i].sender_id == p.sender_id
                    && fetched[i].message == p.message
            });
            match hit {
                Some(i) => {
                    used[i] = true;
                    false
                }
                None => true,
            }
        });

        self.entries = pushed.into_iter().rev().chain(fetched).collect();
        Ok(self.entries.len())
    }

    pub fn fetch_failed(&mut self, ticket: FetchTicket) -> Result<(), Stale> {
        if self.in_flight != Some(ticket.seq) {
            return Err(Stale);
        }
        self.in_flight = None;
        self.pushed_since_fetch.clear();
        Ok(())
    }

    /// Empty the feed and zero the counter. Any bulk load still in flight is
    /// invalidated so it cannot bring cleared entries back.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.unread = 0;
        self.in_flight = None;
        self.pushed_since_fetch.clear();
    }
}
