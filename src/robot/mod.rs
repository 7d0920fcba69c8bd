//! Robot web service transport
//!
//! The engine talks to the provider only through the [`Transport`] trait:
//!
//! - [`client`]: HTTPS implementation on top of `reqwest`
//! - [`wire`]: JSON response decoding and form-encoded request bodies
//! - [`memory`]: in-process implementation for tests
//!
//! Transport errors are raw; [`crate::core::error::classify`] maps them onto
//! the engine's error taxonomy.

pub mod client;
pub mod memory;
pub mod wire;

use crate::core::firewall::{FirewallConfig, FirewallTemplate, FirewallUpdate, TemplateDraft};
use async_trait::async_trait;
use thiserror::Error;

pub use client::RobotClient;
pub use memory::MemoryTransport;

/// Unclassified failure of a transport call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The service answered with an error document
    #[error("API error {code} (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never completed
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        TransportError::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Firewall endpoints of the provider.
///
/// Every call is a single request/response; implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_firewall(&self, server: &str) -> Result<FirewallConfig, TransportError>;

    /// Replaces status, flags and both rule lists in one request.
    async fn update_firewall(
        &self,
        server: &str,
        update: &FirewallUpdate,
    ) -> Result<FirewallConfig, TransportError>;

    /// Deletes the firewall configuration of a server outright.
    async fn delete_firewall(&self, server: &str) -> Result<FirewallConfig, TransportError>;

    async fn list_templates(&self) -> Result<Vec<FirewallTemplate>, TransportError>;

    async fn get_template(&self, id: u32) -> Result<FirewallTemplate, TransportError>;

    async fn create_template(
        &self,
        draft: &TemplateDraft,
    ) -> Result<FirewallTemplate, TransportError>;

    async fn update_template(
        &self,
        id: u32,
        draft: &TemplateDraft,
    ) -> Result<FirewallTemplate, TransportError>;

    async fn apply_template(
        &self,
        server: &str,
        template_id: u32,
    ) -> Result<FirewallConfig, TransportError>;

    async fn delete_template(&self, id: u32) -> Result<(), TransportError>;

    /// A cheap read-only call used to tell "bad credentials" apart from
    /// "credentials lack the ordering permission".
    async fn probe_read_access(&self) -> Result<(), TransportError>;
}
