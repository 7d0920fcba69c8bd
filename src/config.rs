use crate::core::error::{Error, Result};
use crate::core::firewall::MAX_RULES_PER_DIRECTION;
use crate::core::readiness::ReadinessWaiter;
use crate::myip::{DEFAULT_MY_IP_URL, HttpIpResolver, PublicIpResolver, StaticIpResolver};
use crate::robot::client::DEFAULT_BASE_URL;
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_USER: &str = "ROBOFW_USER";
pub const ENV_PASSWORD: &str = "ROBOFW_PASSWORD";
pub const ENV_BASE_URL: &str = "ROBOFW_BASE_URL";
pub const ENV_MY_IP: &str = "ROBOFW_MY_IP";

/// Web service credentials and engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Web service user (not the Robot login)
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Delay between readiness polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound for one readiness wait
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_my_ip_url")]
    pub my_ip_url: String,
    /// Fixed "my IP" address; skips the lookup behind NAT or a VPN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_ip: Option<IpAddr>,
    /// Clamped to the provider's own limit on load
    #[serde(default = "default_max_rules")]
    pub max_rules_per_direction: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            password: None,
            poll_interval_secs: default_poll_interval(),
            wait_timeout_secs: default_wait_timeout(),
            request_timeout_secs: default_request_timeout(),
            my_ip_url: default_my_ip_url(),
            my_ip: None,
            max_rules_per_direction: default_max_rules(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_wait_timeout() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

fn default_my_ip_url() -> String {
    DEFAULT_MY_IP_URL.to_string()
}

fn default_max_rules() -> usize {
    MAX_RULES_PER_DIRECTION
}

/// Username and password, both present.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

impl AppConfig {
    /// Applies `ROBOFW_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`; empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(user) = get(ENV_USER) {
            self.username = Some(user);
        }
        if let Some(password) = get(ENV_PASSWORD) {
            self.password = Some(password);
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(ip) = get(ENV_MY_IP) {
            match ip.trim().parse() {
                Ok(ip) => self.my_ip = Some(ip),
                Err(_) => tracing::warn!(value = %ip, "Ignoring {ENV_MY_IP}: not an IP address"),
            }
        }
        self
    }

    /// Clamps values that would make the engine misbehave.
    pub fn sanitized(mut self) -> Self {
        self.poll_interval_secs = self.poll_interval_secs.clamp(1, 300);
        self.wait_timeout_secs = self.wait_timeout_secs.clamp(1, 3600);
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 600);
        self.max_rules_per_direction = self
            .max_rules_per_direction
            .clamp(1, MAX_RULES_PER_DIRECTION);
        self
    }

    /// # Errors
    ///
    /// `Error::Config` naming the missing part.
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, _) => Err(Error::Config(format!(
                "no web service user configured (set {ENV_USER} or run 'robofw config set-credentials')"
            ))),
            (Some(_), None) => Err(Error::Config(format!(
                "no web service password configured (set {ENV_PASSWORD} or run 'robofw config set-credentials')"
            ))),
        }
    }

    pub fn waiter(&self) -> ReadinessWaiter {
        ReadinessWaiter::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.wait_timeout_secs),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured address when set, otherwise a lookup at `my_ip_url`.
    ///
    /// # Errors
    ///
    /// `Error::Transport` if the HTTP client cannot be built.
    pub fn ip_resolver(&self) -> Result<Arc<dyn PublicIpResolver>> {
        match self.my_ip {
            Some(ip) => Ok(Arc::new(StaticIpResolver(ip))),
            None => Ok(Arc::new(HttpIpResolver::new(
                self.my_ip_url.clone(),
                self.request_timeout(),
            )?)),
        }
    }

    /// Copy safe for display, with the password masked.
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

/// Default location of `config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config atomically with owner-only permissions.
///
/// # Security
///
/// On Unix systems, files are created with mode 0o600 (user read/write only)
/// because the file holds the web service password.
pub async fn save_config_to(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(config)?;
    crate::utils::write_private_file(path, json.as_bytes()).await?;
    Ok(())
}

/// Loads a config file; a missing file yields the defaults.
///
/// # Errors
///
/// Unreadable or malformed files are reported rather than silently replaced,
/// since saving over them would lose the stored credentials.
pub async fn load_config_from(path: &Path) -> Result<AppConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let config: AppConfig = serde_json::from_str(&json)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
            Ok(config.sanitized())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Loads the config from `path` (or the default location) and applies the
/// environment overrides.
pub async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => load_config_from(&path).await?,
        None => AppConfig::default(),
    };
    Ok(config.with_env_overrides())
}
