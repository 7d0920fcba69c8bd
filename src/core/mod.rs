//! Core firewall reconciliation functionality
//!
//! This module contains the rule model and the engine that turns declared
//! intent into a provider-accepted rule set. It provides:
//!
//! - [`firewall`]: Data structures for rules, rule lists, firewalls and templates
//! - [`normalize`]: CIDR canonicalisation and IP version detection
//! - [`rule_constraints`]: Business rules for valid field combinations
//! - [`auto_rules`]: Recognition and stripping of provider-injected rules
//! - [`dedup`]: Duplicate detection by name or effect
//! - [`expand`]: Cartesian expansion of multi-address rules
//! - [`limits`]: Pre-flight per-direction rule limit
//! - [`readiness`]: Polling until the firewall leaves `in process`
//! - [`builders`]: Convenience rules (SSH, HTTPS, MOSH, HTTP block)
//! - [`reconciler`]: The read-validate-transform-write pipeline
//! - [`templates`]: Template files and template drafts
//! - [`declarative`]: Declarative firewall documents and plans
//! - [`error`]: Error taxonomy and classification of provider errors

pub mod auto_rules;
pub mod builders;
pub mod declarative;
pub mod dedup;
pub mod error;
pub mod expand;
pub mod firewall;
pub mod limits;
pub mod normalize;
pub mod readiness;
pub mod reconciler;
pub mod rule_constraints;
pub mod templates;

#[cfg(test)]
pub mod test_helpers;
