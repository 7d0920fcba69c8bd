//! HTTPS client for the Robot web service.
//!
//! Thin request/response plumbing: authenticates with HTTP Basic auth,
//! sends form bodies, and hands the body to [`super::wire`] for decoding.
//! No retries happen here.

use super::wire;
use super::{Transport, TransportError};
use crate::core::firewall::{FirewallConfig, FirewallTemplate, FirewallUpdate, TemplateDraft};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;
use tracing::debug;

/// Default endpoint of the web service.
pub const DEFAULT_BASE_URL: &str = "https://robot-ws.your-server.de";

/// Raw HTTP client for the Robot web service.
#[derive(Debug, Clone)]
pub struct RobotClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl RobotClient {
    /// Create a client against the default endpoint.
    pub fn new(username: String, password: String) -> Result<Self, TransportError> {
        Self::with_base_url(
            username,
            password,
            DEFAULT_BASE_URL.to_string(),
            Duration::from_secs(30),
        )
    }

    /// Create a client with a custom base URL (for testing with mock servers).
    pub fn with_base_url(
        username: String,
        password: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("robofw/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, %url, "Robot request");
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Sends a request and returns the body of a successful response.
    async fn send(&self, request: RequestBuilder) -> Result<String, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(format!("failed to read response: {e}")))?;

        if status >= 400 {
            debug!(status, "Robot error response");
            return Err(wire::decode_error(status, &body));
        }

        Ok(body)
    }
}

#[async_trait]
impl Transport for RobotClient {
    async fn get_firewall(&self, server: &str) -> Result<FirewallConfig, TransportError> {
        let body = self
            .send(self.request(Method::GET, &format!("/firewall/{server}")))
            .await?;
        wire::decode_firewall(&body)
    }

    async fn update_firewall(
        &self,
        server: &str,
        update: &FirewallUpdate,
    ) -> Result<FirewallConfig, TransportError> {
        let form = wire::encode_update(update);
        let body = self
            .send(
                self.request(Method::POST, &format!("/firewall/{server}"))
                    .form(&form),
            )
            .await?;
        wire::decode_firewall(&body)
    }

    async fn delete_firewall(&self, server: &str) -> Result<FirewallConfig, TransportError> {
        let body = self
            .send(self.request(Method::DELETE, &format!("/firewall/{server}")))
            .await?;
        wire::decode_firewall(&body)
    }

    async fn list_templates(&self) -> Result<Vec<FirewallTemplate>, TransportError> {
        let body = self
            .send(self.request(Method::GET, "/firewall/template"))
            .await?;
        wire::decode_templates(&body)
    }

    async fn get_template(&self, id: u32) -> Result<FirewallTemplate, TransportError> {
        let body = self
            .send(self.request(Method::GET, &format!("/firewall/template/{id}")))
            .await?;
        wire::decode_template(&body)
    }

    async fn create_template(
        &self,
        draft: &TemplateDraft,
    ) -> Result<FirewallTemplate, TransportError> {
        let form = wire::encode_template(draft);
        let body = self
            .send(self.request(Method::POST, "/firewall/template").form(&form))
            .await?;
        wire::decode_template(&body)
    }

    async fn update_template(
        &self,
        id: u32,
        draft: &TemplateDraft,
    ) -> Result<FirewallTemplate, TransportError> {
        let form = wire::encode_template(draft);
        let body = self
            .send(
                self.request(Method::POST, &format!("/firewall/template/{id}"))
                    .form(&form),
            )
            .await?;
        wire::decode_template(&body)
    }

    async fn apply_template(
        &self,
        server: &str,
        template_id: u32,
    ) -> Result<FirewallConfig, TransportError> {
        let form = [("template_id", template_id.to_string())];
        let body = self
            .send(
                self.request(Method::POST, &format!("/firewall/{server}"))
                    .form(&form),
            )
            .await?;
        wire::decode_firewall(&body)
    }

    async fn delete_template(&self, id: u32) -> Result<(), TransportError> {
        self.send(self.request(Method::DELETE, &format!("/firewall/template/{id}")))
            .await?;
        Ok(())
    }

    async fn probe_read_access(&self) -> Result<(), TransportError> {
        self.send(self.request(Method::GET, "/server")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client = RobotClient::new("user".into(), "secret".into()).unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn client_custom_base_url_trims_slash() {
        let client = RobotClient::with_base_url(
            "user".into(),
            "secret".into(),
            "http://localhost:8080/".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let client = RobotClient::with_base_url(
            "user".into(),
            "secret".into(),
            "http://127.0.0.1:9".into(),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.get_firewall("1").await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
