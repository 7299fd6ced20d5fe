use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use speakin_types::UserId;
use speakin_types::api::{NotificationCount, NotificationRecord};
use speakin_types::ids;
use speakin_types::models::{Message, UserProfile};

use crate::error::NetworkError;
use crate::token::SessionToken;

/// The REST calls the messaging client depends on.
///
/// `ApiClient` talks to the real gateway; tests substitute an in-memory
/// implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /messages/chat-users/{userId}/`
    async fn chat_users(&self, user_id: UserId) -> Result<Vec<UserId>, NetworkError>;

    /// `GET /messages/history/{userId}/{counterpartId}/`, oldest first.
    async fn history(
        &self,
        user_id: UserId,
        counterpart_id: UserId,
    ) -> Result<Vec<Message>, NetworkError>;

    /// `GET /users/{id}/`
    async fn user(&self, id: UserId) -> Result<UserProfile, NetworkError>;

    /// `GET /notifications/{userId}/`, newest first.
    async fn notifications(&self, user_id: UserId)
    -> Result<Vec<NotificationRecord>, NetworkError>;

    /// `GET /notifications/count/{userId}/`
    async fn notification_count(&self, user_id: UserId) -> Result<u32, NetworkError>;

    /// `DELETE /notifications/clear/{userId}/`
    async fn clear_notifications(&self, user_id: UserId) -> Result<(), NetworkError>;
}

/// HTTP implementation of [`Backend`] against the API gateway.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    token: SessionToken,
}

#[derive(Deserialize)]
struct IdRow(#[serde(deserialize_with = "ids::lenient")] UserId);

impl ApiClient {
    pub fn new(mut base: Url, token: SessionToken) -> Self {
        // Url::join drops the last path segment unless it ends with '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http: Client::new(),
            base,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, NetworkError> {
        self.base.join(path).map_err(|e| NetworkError::Request {
            url: format!("{}{}", self.base, path),
            reason: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(self.token.current())
            .send()
            .await
            .map_err(|e| NetworkError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let resp = check_status(&url, resp)?;
        resp.json::<T>().await.map_err(|e| NetworkError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), NetworkError> {
        let url = self.endpoint(path)?;
        debug!("DELETE {}", url);

        let resp = self
            .http
            .delete(url.clone())
            .bearer_auth(self.token.current())
            .send()
            .await
            .map_err(|e| NetworkError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        check_status(&url, resp).map(|_| ())
    }
}

fn check_status(url: &Url, resp: Response) -> Result<Response, NetworkError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    warn!("{} returned {}", url, status);
    if status == StatusCode::FORBIDDEN {
        return Err(NetworkError::Forbidden {
            url: url.to_string(),
        });
    }
    Err(NetworkError::Status {
        url: url.to_string(),
        status: status.as_u16(),
    })
}

#[async_trait]
impl Backend for ApiClient {
    async fn chat_users(&self, user_id: UserId) -> Result<Vec<UserId>, NetworkError> {
        let rows: Vec<IdRow> = self
            .get_json(&format!("messages/chat-users/{}/", user_id))
            .await?;
        Ok(rows.into_iter().map(|IdRow(id)| id).collect())
    }

    async fn history(
        &self,
        user_id: UserId,
        counterpart_id: UserId,
    ) -> Result<Vec<Message>, NetworkError> {
        self.get_json(&format!("messages/history/{}/{}/", user_id, counterpart_id))
            .await
    }

    async fn user(&self, id: UserId) -> Result<UserProfile, NetworkError> {
        self.get_json(&format!("users/{}/", id)).await
    }

    async fn notifications(
        &self,
        user_id: UserId,
    ) -> Result<Vec<NotificationRecord>, NetworkError> {
        self.get_json(&format!("notifications/{}/", user_id)).await
    }

    async fn notification_count(&self, user_id: UserId) -> Result<u32, NetworkError> {
        let body: NotificationCount = self
            .get_json(&format!("notifications/count/{}/", user_id))
            .await?;
        Ok(body.count)
    }

    async fn clear_notifications(&self, user_id: UserId) -> Result<(), NetworkError> {
        self.delete(&format!("notifications/clear/{}/", user_id)).await
    }
}
