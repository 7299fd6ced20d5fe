use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Holder for the current access token.
///
/// Owned by the auth layer; the REST client and the socket managers only
/// read it, once per request or connection attempt.
#[derive(Clone)]
pub struct SessionToken {
    inner: Arc<RwLock<String>>,
}

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token.into())),
        }
    }

    pub fn current(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a refreshed token. Open sockets keep the token they were
    /// opened with.
    pub fn replace(&self, token: impl Into<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = token.into();
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_is_visible_to_clones() {
        let token = SessionToken::new("first");
        let reader = token.clone();
        token.replace("second");
        assert_eq!(reader.current(), "second");
    }

    #[test]
    fn debug_never_prints_the_token() {
        let token = SessionToken::new("secret-value");
        assert!(!format!("{:?}", token).contains("secret-value"));
    }
}
