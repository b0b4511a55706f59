use scrum_poker_core::{ClientId, SessionId};
use url::Url;

use crate::error::ApiError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3001";

/// Base address of a scrum-poker server and the routes derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    base: Url,
}

impl ServerEndpoint {
    /// Accepts `http(s)://host[:port][/prefix]`; a bare `host:port` is taken
    /// as plain http.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        let mut base = Url::parse(&with_scheme)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    pub fn create_session_url(&self) -> Result<Url, ApiError> {
        Ok(self.base.join("api/sessions/create")?)
    }

    pub fn session_url(&self, session_id: &SessionId) -> Result<Url, ApiError> {
        Ok(self.base.join(&format!("api/sessions/{session_id}"))?)
    }

    /// Streaming channel scoped to `(session, client)`, on the websocket
    /// scheme matching the base scheme.
    pub fn channel_url(
        &self,
        session_id: &SessionId,
        client_id: &ClientId,
    ) -> Result<Url, ApiError> {
        let mut url = self
            .base
            .join(&format!("api/sessions/{session_id}/join/{client_id}"))?;
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        if url.set_scheme(scheme).is_err() {
            return Err(ApiError::InvalidUrl(url::ParseError::RelativeUrlWithoutBase));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn channel_url_switches_to_websocket_scheme() {
        let endpoint = ServerEndpoint::parse("http://localhost:3001").expect("endpoint");
        let url = endpoint
            .channel_url(&SessionId::from("s1"), &ClientId::from("c1"))
            .expect("url");
        assert_eq!(url.as_str(), "ws://localhost:3001/api/sessions/s1/join/c1");

        let secure = ServerEndpoint::parse("https://poker.example.com/team/").expect("endpoint");
        let url = secure
            .channel_url(&SessionId::from("s1"), &ClientId::from("c1"))
            .expect("url");
        assert_eq!(
            url.as_str(),
            "wss://poker.example.com/team/api/sessions/s1/join/c1"
        );
    }

    #[test_timeout::timeout]
    fn bare_host_defaults_to_http() {
        let endpoint = ServerEndpoint::parse("127.0.0.1:3001").expect("endpoint");
        assert_eq!(
            endpoint.create_session_url().expect("url").as_str(),
            "http://127.0.0.1:3001/api/sessions/create"
        );
    }
}
