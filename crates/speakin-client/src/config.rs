use std::time::Duration;

use anyhow::{Context, bail};
use url::Url;

use speakin_types::UserId;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/";
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8003/ws/";
const DEFAULT_HEARTBEAT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub ws_url: Url,
    pub access_token: String,
    pub user_id: UserId,
    /// Conversation to open on start.
    pub counterpart_id: Option<UserId>,
    pub heartbeat: Option<Duration>,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_url = var("SPEAKIN_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let api_url = Url::parse(&api_url).context("SPEAKIN_API_URL is not a valid URL")?;

        let ws_url = var("SPEAKIN_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.into());
        let ws_url = Url::parse(&ws_url).context("SPEAKIN_WS_URL is not a valid URL")?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            bail!("SPEAKIN_WS_URL must use ws:// or wss://, got {}", ws_url.scheme());
        }

        let access_token = var("SPEAKIN_ACCESS_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("SPEAKIN_ACCESS_TOKEN is required")?;

        let user_id: UserId = var("SPEAKIN_USER_ID")
            .context("SPEAKIN_USER_ID is required")?
            .trim()
            .parse()
            .context("SPEAKIN_USER_ID must be a number")?;

        let counterpart_id = match var("SPEAKIN_COUNTERPART_ID") {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse()
                    .context("SPEAKIN_COUNTERPART_ID must be a number")?,
            ),
            _ => None,
        };

        let heartbeat_secs: u64 = var("SPEAKIN_HEARTBEAT_SECS")
            .unwrap_or_else(|| DEFAULT_HEARTBEAT_SECS.to_string())
            .trim()
            .parse()
            .context("SPEAKIN_HEARTBEAT_SECS must be a whole number of seconds")?;
        let heartbeat = (heartbeat_secs > 0).then(|| Duration::from_secs(heartbeat_secs));

        Ok(Self {
            api_url,
            ws_url,
            access_token,
            user_id,
            counterpart_id,
            heartbeat,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<ClientConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = load(&[("SPEAKIN_ACCESS_TOKEN", "abc"), ("SPEAKIN_USER_ID", "1")]).unwrap();
        assert_eq!(config.api_url.as_str(), DEFAULT_API_URL);
        assert_eq!(config.ws_url.as_str(), DEFAULT_WS_URL);
        assert_eq!(config.user_id, 1);
        assert_eq!(config.counterpart_id, None);
        assert_eq!(config.heartbeat, Some(Duration::from_secs(15)));
    }

    #[test]
    fn zero_heartbeat_disables_it() {
        let config = load(&[
            ("SPEAKIN_ACCESS_TOKEN", "abc"),
            ("SPEAKIN_USER_ID", "1"),
            ("SPEAKIN_HEARTBEAT_SECS", "0"),
            ("SPEAKIN_COUNTERPART_ID", "42"),
        ])
        .unwrap();
        assert_eq!(config.heartbeat, None);
        assert_eq!(config.counterpart_id, Some(42));
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = load(&[("SPEAKIN_USER_ID", "1")]).unwrap_err();
        assert!(err.to_string().contains("SPEAKIN_ACCESS_TOKEN"));
    }

    #[test]
    fn non_numeric_user_id_is_an_error() {
        let err = load(&[("SPEAKIN_ACCESS_TOKEN", "abc"), ("SPEAKIN_USER_ID", "me")]).unwrap_err();
        assert!(err.to_string().contains("SPEAKIN_USER_ID"));
    }

    #[test]
    fn http_socket_url_is_rejected() {
        let err = load(&[
            ("SPEAKIN_ACCESS_TOKEN", "abc"),
            ("SPEAKIN_USER_ID", "1"),
            ("SPEAKIN_WS_URL", "http://localhost/ws/"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("ws://"));
    }
}
