//! In-memory state owned by the socket managers. Nothing here is persisted;
//! every store is discarded with its owner.

pub mod feed;
pub mod messages;
pub mod roster;

pub use feed::{FetchTicket, NotificationFeed};
pub use messages::{Binding, MessageStore};
pub use roster::Roster;

/// How far a server timestamp may lag the local clock and still count as
/// the same event as something seen live.
const ECHO_SKEW_SECS: i64 = 5;

/// A result arrived for a binding or fetch that has since been superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("result belongs to a superseded request")]
pub struct Stale;
