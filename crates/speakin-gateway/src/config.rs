use std::time::Duration;

use url::Url;

use speakin_types::UserId;

use crate::error::TransportError;

/// Where the sockets live and how they are kept alive.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base of the socket routes, e.g. `ws://host:8003/ws/`.
    pub ws_base: Url,
    /// Ping period; `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
}

impl GatewayConfig {
    pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);

    pub fn new(mut ws_base: Url) -> Self {
        if !ws_base.path().ends_with('/') {
            let path = format!("{}/", ws_base.path());
            ws_base.set_path(&path);
        }
        Self {
            ws_base,
            heartbeat_interval: Some(Self::DEFAULT_HEARTBEAT),
        }
    }

    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// `{ws_base}chat/{counterpart_id}/?token={token}`
    pub fn chat_url(&self, counterpart_id: UserId, token: &str) -> Result<Url, TransportError> {
        self.route(&format!("chat/{}/", counterpart_id), token)
    }

    /// `{ws_base}notifications/?token={token}`
    pub fn notifications_url(&self, token: &str) -> Result<Url, TransportError> {
        self.route("notifications/", token)
    }

    fn route(&self, path: &str, token: &str) -> Result<Url, TransportError> {
        let mut url = self
            .ws_base
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{}{}: {}", self.ws_base, path, e)))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

/// Render a socket URL for logs with the token hidden.
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return shown.to_string();
    }
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> GatewayConfig {
        GatewayConfig::new(Url::parse(base).unwrap())
    }

    #[test]
    fn chat_url_embeds_counterpart_and_token() {
        let url = config("ws://127.0.0.1:8003/ws/").chat_url(42, "abc").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8003/ws/chat/42/?token=abc");
    }

    #[test]
    fn notifications_url_tolerates_missing_trailing_slash() {
        let url = config("wss://api.example.com/ws").notifications_url("abc").unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/ws/notifications/?token=abc");
    }

    #[test]
    fn token_is_query_encoded() {
        let url = config("ws://h/ws/").chat_url(1, "a b&c").unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn redact_hides_token() {
        let url = config("ws://h/ws/").chat_url(1, "secret").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.ends_with("chat/1/?token=***"));
    }
}
