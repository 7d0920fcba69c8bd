//! Detection of the caller's public IP address
//!
//! Used when a command should allow "my IP" instead of explicit addresses.

use crate::core::error::{Error, Result};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

/// Default service answering with the caller's address as plain text.
pub const DEFAULT_MY_IP_URL: &str = "https://api.ipify.org";

#[async_trait]
pub trait PublicIpResolver: Send + Sync {
    async fn resolve(&self) -> Result<IpAddr>;
}

/// Asks an HTTP echo service for the address requests come from.
#[derive(Debug, Clone)]
pub struct HttpIpResolver {
    http: reqwest::Client,
    url: String,
}

impl HttpIpResolver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PublicIpResolver for HttpIpResolver {
    async fn resolve(&self) -> Result<IpAddr> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("public IP lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "public IP lookup failed: HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("public IP lookup failed: {e}")))?;
        let ip = parse_ip_body(&body)?;
        debug!(%ip, url = %self.url, "Detected public IP");
        Ok(ip)
    }
}

fn parse_ip_body(body: &str) -> Result<IpAddr> {
    body.trim().parse().map_err(|_| {
        Error::Transport(format!(
            "public IP service returned '{}'",
            crate::utils::truncate_string(body.trim(), 40)
        ))
    })
}

/// Always answers with the same address.
#[derive(Debug, Clone, Copy)]
pub struct StaticIpResolver(pub IpAddr);

#[async_trait]
impl PublicIpResolver for StaticIpResolver {
    async fn resolve(&self) -> Result<IpAddr> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(
            parse_ip_body("203.0.113.5\n").unwrap(),
            "203.0.113.5".parse::<IpAddr>().unwrap()
        );
        assert!(parse_ip_body("2001:db8::1").unwrap().is_ipv6());
    }

    #[test]
    fn test_parse_rejects_html() {
        let err = parse_ip_body("<html>rate limited</html>").unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let ip: IpAddr = "198.51.100.7".parse().unwrap();
        assert_eq!(StaticIpResolver(ip).resolve().await.unwrap(), ip);
    }
}
