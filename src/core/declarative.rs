//! Declarative firewall documents
//!
//! A document states the complete desired firewall of one server. Rule blocks
//! may list several source and destination networks; they are expanded into
//! single-address provider rules before anything is compared or sent.
//!
//! ```json
//! {
//!   "status": "active",
//!   "whitelist_hos": true,
//!   "filter_ipv6": false,
//!   "rules": {
//!     "input": [
//!       {
//!         "name": "ssh",
//!         "protocol": "tcp",
//!         "source_ips": ["203.0.113.5", "198.51.100.0/24"],
//!         "destination_port": "22",
//!         "action": "accept"
//!       }
//!     ]
//!   }
//! }
//! ```
//!
//! With `template_id` set the template is applied instead and `rules` must be
//! empty.

use crate::core::auto_rules::strip_rule_lists;
use crate::core::error::{Error, Result};
use crate::core::expand::expand;
use crate::core::firewall::{
    Action, Direction, FirewallConfig, FirewallStatus, FirewallTemplate, IpVersion, PortSpec,
    Protocol, Rule, RuleLists,
};
use crate::core::reconciler::DesiredFirewall;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::Path;
use strum::IntoEnumIterator;

/// One rule block, possibly covering several address pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleBlock {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_version: Option<IpVersion>,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub source_ips: Vec<String>,
    #[serde(default)]
    pub destination_ips: Vec<String>,
    #[serde(default)]
    pub source_port: Option<PortSpec>,
    #[serde(default)]
    pub destination_port: Option<PortSpec>,
    #[serde(default)]
    pub tcp_flags: Option<String>,
}

impl RuleBlock {
    /// Expands the block into normalised provider rules.
    pub fn expand(&self) -> Result<Vec<Rule>> {
        let template = Rule {
            name: self.name.clone(),
            ip_version: self.ip_version,
            action: self.action,
            protocol: self.protocol,
            source_ip: None,
            dest_ip: None,
            source_port: self.source_port.clone(),
            dest_port: self.destination_port.clone(),
            tcp_flags: self.tcp_flags.clone(),
        };
        expand(&template, &self.source_ips, &self.destination_ips)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleBlocks {
    #[serde(default)]
    pub input: Vec<RuleBlock>,
    #[serde(default)]
    pub output: Vec<RuleBlock>,
}

/// A complete declarative firewall description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallDocument {
    #[serde(default)]
    pub status: FirewallStatus,
    #[serde(default = "default_true", rename = "whitelist_hos")]
    pub whitelist_provider_services: bool,
    #[serde(default)]
    pub filter_ipv6: bool,
    #[serde(default)]
    pub template_id: Option<u32>,
    #[serde(default)]
    pub rules: RuleBlocks,
}

fn default_true() -> bool {
    true
}

impl FirewallDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Expands every block into the desired state.
    ///
    /// # Errors
    ///
    /// `Validation` for a transient status, for rules next to a template, or
    /// for any block that does not expand into valid rules.
    pub fn to_desired(&self) -> Result<DesiredFirewall> {
        if self.status == FirewallStatus::InProcess {
            return Err(Error::validation(
                "status",
                "desired status must be 'active' or 'disabled'",
            ));
        }
        if self.template_id.is_some()
            && !(self.rules.input.is_empty() && self.rules.output.is_empty())
        {
            return Err(Error::validation(
                "template_id",
                "a document with template_id cannot also list rules",
            ));
        }

        let mut rules = RuleLists::default();
        for (direction, blocks) in [
            (Direction::Input, &self.rules.input),
            (Direction::Output, &self.rules.output),
        ] {
            let list = rules.get_mut(direction);
            for block in blocks {
                list.extend(block.expand()?);
            }
        }

        Ok(DesiredFirewall {
            status: self.status,
            whitelist_provider_services: self.whitelist_provider_services,
            filter_ipv6: self.filter_ipv6,
            rules,
            template_id: self.template_id,
        })
    }
}

impl DesiredFirewall {
    /// The state a template would leave a server in.
    pub fn from_template(template: &FirewallTemplate) -> Self {
        Self {
            status: FirewallStatus::Active,
            whitelist_provider_services: template.whitelist_provider_services,
            filter_ipv6: template.filter_ipv6,
            rules: strip_rule_lists(&template.rules),
            template_id: Some(template.id),
        }
    }
}

/// Difference between the live firewall and a desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Unified line diff, `- ` removed, `+ ` added, `  ` unchanged
    pub diff: String,
    pub additions: usize,
    pub removals: usize,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.additions > 0 || self.removals > 0
    }
}

fn render(
    status: FirewallStatus,
    whitelist: bool,
    filter_ipv6: bool,
    rules: &RuleLists,
) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "status: {status}");
    let _ = writeln!(text, "whitelist_hos: {whitelist}");
    let _ = writeln!(text, "filter_ipv6: {filter_ipv6}");
    for direction in Direction::iter() {
        for rule in rules.get(direction) {
            let flags = rule
                .tcp_flags
                .as_deref()
                .map(|f| format!(" flags={f}"))
                .unwrap_or_default();
            let _ = writeln!(
                text,
                "{direction}: {} [{}{flags}]",
                rule.name,
                rule.summary()
            );
        }
    }
    text
}

/// Compares the user rules and flags of `live` with `desired`.
///
/// Auto rules are left out on both sides; the provider keeps them regardless.
pub fn plan(live: &FirewallConfig, desired: &DesiredFirewall) -> Plan {
    let old_text = render(
        live.status,
        live.whitelist_provider_services,
        live.filter_ipv6,
        &strip_rule_lists(&live.rules),
    );
    let new_text = render(
        desired.status,
        desired.whitelist_provider_services,
        desired.filter_ipv6,
        &strip_rule_lists(&desired.rules),
    );

    let diff = similar::TextDiff::from_lines(&old_text, &new_text);
    let mut result = String::new();
    let (mut additions, mut removals) = (0, 0);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => {
                removals += 1;
                "- "
            }
            similar::ChangeTag::Insert => {
                additions += 1;
                "+ "
            }
            similar::ChangeTag::Equal => "  ",
        };
        let _ = write!(result, "{sign}{change}");
    }

    Plan {
        diff: result,
        additions,
        removals,
    }
}
