use speakin_types::UserId;

/// A REST call failed. Scoped to the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The backend rejected the session token. The embedding app is expected
    /// to drop its credentials.
    #[error("{url} rejected the session token (HTTP 403)")]
    Forbidden { url: String },

    #[error("malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// A profile lookup used for display enrichment failed.
///
/// Callers always recover from this with a fallback value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not resolve user {user_id}: {source}")]
pub struct EnrichmentError {
    pub user_id: UserId,
    #[source]
    pub source: NetworkError,
}
