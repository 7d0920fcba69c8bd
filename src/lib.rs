//! robofw - Robot firewall reconciliation
//!
//! Manages the stateless packet filter of dedicated servers through the
//! provider's firewall web service, keeping every submitted rule set
//! well-formed, duplicate-free and within the provider's limits.
//!
//! # Architecture
//!
//! - [`core`] - Rule model and the reconciliation engine
//! - [`robot`] - Web service transport (HTTPS client and in-memory stand-in)
//! - [`myip`] - Detection of the caller's public IP
//! - [`audit`] - Audit log of every attempted mutation
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Credentials and tuning, file plus environment
//! - [`display`] - Plain-text tables and error reports
//! - [`utils`] - Utility functions (XDG directories, atomic writes)
//!
//! # Safety Features
//!
//! - Provider-injected rules are never sent back
//! - Pre-flight rule limit check with remediation steps
//! - No write while the firewall is still applying a change
//! - Idempotent convenience commands (duplicates are skipped)
//! - Writes are never retried automatically

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod display;
pub mod myip;
pub mod robot;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::firewall::{Action, Direction, FirewallConfig, IpVersion, Protocol, Rule};
pub use core::reconciler::{DesiredFirewall, Reconciler, RuleSelector, Sources};
