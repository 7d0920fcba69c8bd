//! Firewall rule data structures
//!
//! This module defines the in-memory representation of a Robot firewall:
//! individual [`Rule`]s, the per-direction [`RuleLists`], a server's live
//! [`FirewallConfig`] and account-level [`FirewallTemplate`]s.
//!
//! # Rule Structure
//!
//! A [`Rule`] carries at most one source and one destination network, which is
//! all the provider's schema allows. Multi-valued intent is turned into several
//! rules by [`crate::core::expand`].
//!
//! Optional match fields are `Option<_>`: `None` means "no constraint". The
//! wire codec in [`crate::robot::wire`] omits them from outbound payloads.
//!
//! # Limits
//!
//! The provider accepts at most [`MAX_RULES_PER_DIRECTION`] rules per direction.
//!
//! # Example
//!
//! ```
//! use robofw::core::firewall::{Action, IpVersion, Protocol, Rule};
//!
//! let rule = Rule::new("Allow SSH", Action::Accept)
//!     .with_ip_version(IpVersion::V4)
//!     .with_protocol(Protocol::Tcp)
//!     .with_dest_port("22".parse().unwrap());
//! assert_eq!(rule.dest_port.as_ref().unwrap().as_str(), "22");
//! ```

use crate::core::error::Error;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of rules the provider accepts in one direction.
pub const MAX_RULES_PER_DIRECTION: usize = 10;

/// IP family a rule applies to.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum IpVersion {
    #[serde(rename = "ipv4")]
    #[strum(to_string = "ipv4", serialize = "v4", serialize = "4")]
    V4,
    #[serde(rename = "ipv6")]
    #[strum(to_string = "ipv6", serialize = "v6", serialize = "6")]
    V6,
}

impl IpVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            IpVersion::V4 => "ipv4",
            IpVersion::V6 => "ipv6",
        }
    }

    /// Returns the IP family of a network.
    pub fn of(network: &IpNetwork) -> Self {
        if network.is_ipv4() {
            IpVersion::V4
        } else {
            IpVersion::V6
        }
    }
}

/// Rule action (Accept or Discard)
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Let the packet through
    #[default]
    #[strum(serialize = "accept")]
    Accept,
    /// Drop the packet silently
    #[strum(serialize = "discard")]
    Discard,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Discard => "discard",
        }
    }

    /// Single-character abbreviation for compact table output
    pub const fn as_char(self) -> &'static str {
        match self {
            Action::Accept => "A",
            Action::Discard => "D",
        }
    }
}

/// Layer-4 protocol filter. An unset protocol is `Option::None` on the rule.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
    #[strum(serialize = "icmp")]
    Icmp,
    #[strum(serialize = "esp")]
    Esp,
    #[strum(serialize = "gre")]
    Gre,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Esp => "esp",
            Protocol::Gre => "gre",
        }
    }
}

/// Traffic direction; each direction has an independent rule list and limit.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Traffic to the server
    #[default]
    #[strum(serialize = "input")]
    Input,
    /// Traffic from the server
    #[strum(serialize = "output")]
    Output,
}

/// Provider-side firewall state.
///
/// `InProcess` is transient: a previous change is still being rolled out and
/// no mutation may be issued until it clears.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum FirewallStatus {
    #[default]
    #[serde(rename = "active")]
    #[strum(serialize = "active")]
    Active,
    #[serde(rename = "disabled")]
    #[strum(serialize = "disabled")]
    Disabled,
    #[serde(rename = "in process")]
    #[strum(to_string = "in process", serialize = "in_process")]
    InProcess,
}

impl FirewallStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            FirewallStatus::Active => "active",
            FirewallStatus::Disabled => "disabled",
            FirewallStatus::InProcess => "in process",
        }
    }
}

/// A port or port-range specification such as `22`, `32768-65535` or `25,465`.
///
/// Validated on construction; whitespace around separators is removed so two
/// specs that mean the same thing compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortSpec(String);

impl PortSpec {
    pub fn single(port: u16) -> Self {
        Self(port.to_string())
    }

    pub fn range(start: u16, end: u16) -> Self {
        if start == end {
            Self::single(start)
        } else {
            Self(format!("{start}-{end}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::validators::validate_port_spec(s)
            .map(Self)
            .map_err(|message| Error::validation("port", message))
    }
}

impl TryFrom<String> for PortSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortSpec> for String {
    fn from(spec: PortSpec) -> Self {
        spec.0
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One packet-filter rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    /// Display and identity key
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_version: Option<IpVersion>,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default, rename = "src_ip")]
    pub source_ip: Option<IpNetwork>,
    #[serde(default, rename = "dst_ip")]
    pub dest_ip: Option<IpNetwork>,
    #[serde(default, rename = "src_port")]
    pub source_port: Option<PortSpec>,
    #[serde(default, rename = "dst_port")]
    pub dest_port: Option<PortSpec>,
    /// TCP flag expression, e.g. `ack` or `syn|fin`
    #[serde(default)]
    pub tcp_flags: Option<String>,
}

impl Rule {
    /// Creates a rule matching everything, with the given name and action.
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            ip_version: None,
            action,
            protocol: None,
            source_ip: None,
            dest_ip: None,
            source_port: None,
            dest_port: None,
            tcp_flags: None,
        }
    }

    pub fn with_ip_version(mut self, version: IpVersion) -> Self {
        self.ip_version = Some(version);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_source_ip(mut self, network: IpNetwork) -> Self {
        self.source_ip = Some(network);
        self
    }

    pub fn with_dest_ip(mut self, network: IpNetwork) -> Self {
        self.dest_ip = Some(network);
        self
    }

    pub fn with_source_port(mut self, ports: PortSpec) -> Self {
        self.source_port = Some(ports);
        self
    }

    pub fn with_dest_port(mut self, ports: PortSpec) -> Self {
        self.dest_port = Some(ports);
        self
    }

    pub fn with_tcp_flags(mut self, flags: impl Into<String>) -> Self {
        self.tcp_flags = Some(flags.into());
        self
    }

    /// Short one-line description used in logs and error reports.
    pub fn summary(&self) -> String {
        format!(
            "{} {} {} {} -> {}:{}",
            self.action,
            self.ip_version.map_or("any", IpVersion::as_str),
            self.protocol.map_or("*", Protocol::as_str),
            self.source_ip.map_or_else(|| "any".to_string(), |n| n.to_string()),
            self.dest_ip.map_or_else(|| "any".to_string(), |n| n.to_string()),
            self.dest_port.as_ref().map_or("*", PortSpec::as_str),
        )
    }
}

/// Ordered input and output rule lists. Order is evaluation priority.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleLists {
    #[serde(default)]
    pub input: Vec<Rule>,
    #[serde(default)]
    pub output: Vec<Rule>,
}

impl RuleLists {
    pub fn get(&self, direction: Direction) -> &[Rule] {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut Vec<Rule> {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    pub fn len(&self) -> usize {
        self.input.len() + self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    /// Names of every rule in both directions, input first.
    pub fn names(&self) -> Vec<String> {
        self.input
            .iter()
            .chain(&self.output)
            .map(|r| r.name.clone())
            .collect()
    }
}

/// A server's live firewall configuration as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallConfig {
    #[serde(default)]
    pub server_ip: Option<String>,
    #[serde(default)]
    pub server_number: Option<u32>,
    #[serde(default)]
    pub status: FirewallStatus,
    #[serde(default, rename = "whitelist_hos")]
    pub whitelist_provider_services: bool,
    #[serde(default)]
    pub filter_ipv6: bool,
    /// Switch port the firewall is attached to (`main`, `kvm`)
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub rules: RuleLists,
}

/// The full-replace payload of an update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallUpdate {
    pub status: FirewallStatus,
    #[serde(rename = "whitelist_hos")]
    pub whitelist_provider_services: bool,
    pub filter_ipv6: bool,
    pub rules: RuleLists,
}

impl FirewallUpdate {
    /// Keeps the flags of `config` and replaces its rules.
    ///
    /// A transient `InProcess` status is never sent back; it is submitted as
    /// `Active`.
    pub fn replacing_rules(config: &FirewallConfig, rules: RuleLists) -> Self {
        let status = match config.status {
            FirewallStatus::Disabled => FirewallStatus::Disabled,
            FirewallStatus::Active | FirewallStatus::InProcess => FirewallStatus::Active,
        };
        Self {
            status,
            whitelist_provider_services: config.whitelist_provider_services,
            filter_ipv6: config.filter_ipv6,
            rules,
        }
    }
}

/// An account-level reusable firewall configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallTemplate {
    pub id: u32,
    pub name: String,
    #[serde(default, rename = "whitelist_hos")]
    pub whitelist_provider_services: bool,
    #[serde(default)]
    pub filter_ipv6: bool,
    #[serde(default)]
    pub is_default: bool,
    /// Empty when the template came from a list call
    #[serde(default)]
    pub rules: RuleLists,
}

/// Contents of a template that does not exist yet (create/update payload).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateDraft {
    pub name: String,
    #[serde(default, rename = "whitelist_hos")]
    pub whitelist_provider_services: bool,
    #[serde(default)]
    pub filter_ipv6: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub rules: RuleLists,
}

impl TemplateDraft {
    /// An empty template.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            whitelist_provider_services: true,
            filter_ipv6: false,
            is_default: false,
            rules: RuleLists::default(),
        }
    }
}

impl From<FirewallTemplate> for TemplateDraft {
    fn from(template: FirewallTemplate) -> Self {
        Self {
            name: template.name,
            whitelist_provider_services: template.whitelist_provider_services,
            filter_ipv6: template.filter_ipv6,
            is_default: template.is_default,
            rules: template.rules,
        }
    }
}
