use crate::core::firewall::Direction;
use crate::robot::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Core error types for robofw
///
/// The first seven variants form the closed taxonomy every provider or
/// transport failure is classified into. The rest are raised locally before
/// any network call is made.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials were rejected by the web service
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Read calls work but a write needing the "ordering" permission was refused
    #[error("Ordering permission missing for {operation}")]
    OrderingPermissionMissing { operation: String },

    /// Too many rules in one direction, detected locally or by the provider
    #[error(
        "Firewall rule limit exceeded for {direction} rules: {current} existing + {attempted} new = {total} (max {max})"
    )]
    RuleLimitExceeded {
        direction: Direction,
        current: usize,
        attempted: usize,
        total: usize,
        max: usize,
    },

    /// The provider rejected the submitted rule set
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        /// Names of all rules in the failed batch
        rules: Vec<String>,
    },

    /// Referenced server, template or firewall does not exist
    #[error("{resource} not found: {message}")]
    NotFound { resource: String, message: String },

    /// The firewall stayed busy; nothing was written
    #[error("Firewall of server {server} still in process after {}s", .waited.as_secs())]
    Timeout { server: String, waited: Duration },

    /// Network or decoding failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Missing or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Error::NotFound {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Whether the failed operation can be retried as-is.
    ///
    /// Only readiness timeouts qualify: no mutation was attempted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Short stable name of the error class, used in audit entries and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "unauthorized",
            Error::OrderingPermissionMissing { .. } => "ordering_permission_missing",
            Error::RuleLimitExceeded { .. } => "rule_limit_exceeded",
            Error::InvalidInput { .. } => "invalid_input",
            Error::NotFound { .. } => "not_found",
            Error::Timeout { .. } => "timeout",
            Error::Transport(_) => "transport",
            Error::Validation { .. } => "validation",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }

    /// Returns a user-facing explanation with remediation steps.
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            Error::Unauthorized(_) => {
                ErrorTranslation::new("The Robot web service rejected your credentials")
                    .with_suggestion(
                        "Check the web service user (not your Robot login): robofw config show",
                    )
                    .with_suggestion(
                        "Store new credentials: robofw config set-credentials --user <user>",
                    )
                    .with_suggestion("Or set ROBOFW_USER and ROBOFW_PASSWORD")
                    .with_help("https://robot.hetzner.com/preferences/index")
            }
            Error::OrderingPermissionMissing { operation } => ErrorTranslation::new(format!(
                "Your web service user can read data but may not perform '{operation}'"
            ))
            .with_suggestion("Enable the ordering permission for the web service user in Robot")
            .with_suggestion("Settings > Web service and app settings > enable ordering")
            .with_help("https://robot.hetzner.com/preferences/index"),
            Error::RuleLimitExceeded {
                direction,
                current,
                attempted,
                total,
                max,
            } => ErrorTranslation::new(format!(
                "Cannot add {attempted} {direction} rule(s): {current} already in use, {total} would exceed the limit of {max}"
            ))
            .with_suggestion(format!(
                "List rules: robofw rules list <server> --direction {direction}"
            ))
            .with_suggestion(format!(
                "Delete rules: robofw rules delete <server> --direction {direction} --name <name>"
            ))
            .with_suggestion("Retry the command once enough slots are free"),
            Error::InvalidInput { message, rules } => {
                let mut t =
                    ErrorTranslation::new(format!("The provider rejected the rule set: {message}"))
                        .with_suggestion("This is usually a duplicate or conflicting rule")
                        .with_suggestion("Compare with the live rules: robofw rules list <server>");
                if !rules.is_empty() {
                    t = t.with_suggestion(format!(
                        "Rules in the failed batch: {}",
                        rules.join(", ")
                    ));
                }
                t
            }
            Error::NotFound { resource, .. } => {
                ErrorTranslation::new(format!("{resource} does not exist"))
                    .with_suggestion("Check the server number or IP: robofw rules list <server>")
                    .with_suggestion("List templates: robofw template list")
            }
            Error::Timeout { server, .. } => ErrorTranslation::new(format!(
                "The firewall of server {server} is still applying a previous change"
            ))
            .with_suggestion("No change was made; it is safe to retry")
            .with_suggestion(format!("Wait for it explicitly: robofw wait {server}"))
            .with_suggestion("Increase wait_timeout_secs in the configuration"),
            Error::Transport(_) => {
                ErrorTranslation::new("Could not talk to the Robot web service")
                    .with_suggestion("Check your network connection")
                    .with_suggestion("Verify base_url: robofw config show")
                    .with_suggestion(
                        "The change may or may not have been applied; list rules before retrying",
                    )
            }
            Error::Validation { field, message } => {
                ErrorTranslation::new(format!("Invalid {field}: {message}"))
                    .with_suggestion("Use CIDR notation: 203.0.113.5 or 203.0.113.0/24")
                    .with_suggestion("Ports: 22, 80-443 or 25,465")
                    .with_suggestion(
                        "Rules with a protocol need an IP version (--ip-version ipv4|ipv6)",
                    )
            }
            Error::Config(message) => {
                ErrorTranslation::new(format!("Configuration problem: {message}"))
                    .with_suggestion("Run robofw config set-credentials --user <user>")
            }
            Error::Io(e) => ErrorTranslation::new(format!("File operation failed: {e}")),
            Error::Serialization(e) => ErrorTranslation::new(format!("Malformed JSON: {e}"))
                .with_suggestion("Check the file against the documented format"),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// What the failed call was about; fills in the parts of an error the provider
/// does not report.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Human name of the addressed resource ("server 123", "template 7")
    pub resource: String,
    /// Server the call targeted, if any
    pub server: Option<String>,
    /// Rule names of the submitted batch, if the call carried rules
    pub rules: Vec<String>,
    /// Local limit arithmetic for the submitted batch
    pub limit: Option<LimitSnapshot>,
}

/// Counts reported when the provider rejects a batch for size.
#[derive(Debug, Clone, Copy)]
pub struct LimitSnapshot {
    pub direction: Direction,
    pub current: usize,
    pub attempted: usize,
    pub max: usize,
}

impl ErrorContext {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }

    pub fn server(server: &str) -> Self {
        Self {
            resource: format!("server {server}"),
            server: Some(server.to_string()),
            ..Self::default()
        }
    }

    pub fn with_rules(mut self, rules: Vec<String>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_limit(mut self, limit: LimitSnapshot) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Provider code for a rule set over the per-direction limit.
pub const RULE_LIMIT_CODE: &str = "FIREWALL_RULE_LIMIT_EXCEEDED";

/// Maps a transport failure onto the closed error taxonomy.
///
/// `Unauthorized` is returned as-is; telling it apart from a missing ordering
/// permission needs a second call and is done by the reconciler.
pub fn classify(err: TransportError, ctx: &ErrorContext) -> Error {
    match err {
        TransportError::Network(message) | TransportError::Decode(message) => {
            Error::Transport(message)
        }
        TransportError::Api {
            status,
            code,
            message,
        } => match code.as_str() {
            "UNAUTHORIZED" => Error::Unauthorized(message),
            RULE_LIMIT_CODE => {
                let limit = ctx.limit.unwrap_or(LimitSnapshot {
                    direction: Direction::Input,
                    current: 0,
                    attempted: 0,
                    max: crate::core::firewall::MAX_RULES_PER_DIRECTION,
                });
                Error::RuleLimitExceeded {
                    direction: limit.direction,
                    current: limit.current,
                    attempted: limit.attempted,
                    total: limit.current + limit.attempted,
                    max: limit.max,
                }
            }
            "INVALID_INPUT" => Error::InvalidInput {
                message,
                rules: ctx.rules.clone(),
            },
            "NOT_FOUND"
            | "SERVER_NOT_FOUND"
            | "FIREWALL_NOT_FOUND"
            | "FIREWALL_TEMPLATE_NOT_FOUND"
            | "FIREWALL_PORT_NOT_FOUND"
            | "FIREWALL_NOT_AVAILABLE" => Error::not_found(ctx.resource.clone(), message),
            "FIREWALL_IN_PROCESS" => Error::Timeout {
                server: ctx.server.clone().unwrap_or_default(),
                waited: Duration::ZERO,
            },
            _ if status == 401 => Error::Unauthorized(message),
            _ if status == 404 => Error::not_found(ctx.resource.clone(), message),
            _ => Error::Transport(format!("{code} (HTTP {status}): {message}")),
        },
    }
}

pub type Result<T> = std::result::Result<T, Error>;
