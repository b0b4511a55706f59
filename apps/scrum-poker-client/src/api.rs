use reqwest::{Client, StatusCode};
use scrum_poker_core::SessionId;
use serde::Deserialize;

use crate::config::ServerEndpoint;
use crate::error::ApiError;

/// Plain HTTP calls made before a session channel exists.
#[derive(Debug, Clone)]
pub struct SessionApi {
    http: Client,
    endpoint: ServerEndpoint,
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    uuid: SessionId,
}

impl SessionApi {
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self {
            http: Client::new(),
            endpoint,
        }
    }

    pub async fn create_session(&self) -> Result<SessionId, ApiError> {
        let res = self
            .http
            .post(self.endpoint.create_session_url()?)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ApiError::UnexpectedStatus(res.status().as_u16()));
        }
        Ok(res.json::<CreatedSession>().await?.uuid)
    }

    /// Succeeds only if the session currently exists on the server.
    pub async fn check_session(&self, session_id: &SessionId) -> Result<(), ApiError> {
        let res = self
            .http
            .get(self.endpoint.session_url(session_id)?)
            .send()
            .await?;
        match res.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(session_id.clone())),
            status => Err(ApiError::UnexpectedStatus(status.as_u16())),
        }
    }
}
