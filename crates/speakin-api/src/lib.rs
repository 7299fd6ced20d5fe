//! REST side of the messaging client: the backend contract, its HTTP
//! implementation, history/roster loading and sender enrichment.

pub mod client;
pub mod enrich;
pub mod error;
pub mod history;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod token;

pub use client::{ApiClient, Backend};
pub use error::{EnrichmentError, NetworkError};
pub use history::{HistoryLoader, RosterLoad};
pub use token::SessionToken;
