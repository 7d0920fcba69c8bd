//! Shared test utilities for core module tests
//!
//! Provides common fixtures to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::firewall::{Action, IpVersion, PortSpec, Protocol, Rule};
use crate::core::readiness::ReadinessWaiter;
use crate::core::reconciler::Reconciler;
use crate::myip::StaticIpResolver;
use crate::robot::MemoryTransport;
pub use crate::robot::memory::provider_mail_block as mail_block_rule;
use std::sync::Arc;
use std::time::Duration;

/// Address the static resolver reports as "my IP".
pub const MY_IP: &str = "203.0.113.5";

/// A normalised accept/tcp/22 rule from `ip/32`.
///
/// This is the canonical helper for creating test rules.
pub fn ssh_rule(name: &str, ip: &str) -> Rule {
    Rule::new(name, Action::Accept)
        .with_ip_version(IpVersion::V4)
        .with_protocol(Protocol::Tcp)
        .with_source_ip(format!("{ip}/32").parse().expect("valid test address"))
        .with_dest_port(PortSpec::single(22))
}

/// `count` distinct user rules named `rule N`.
pub fn user_rules(count: usize) -> Vec<Rule> {
    (0..count)
        .map(|i| ssh_rule(&format!("rule {i}"), &format!("10.0.{}.{}", i / 250, i % 250 + 1)))
        .collect()
}

/// A reconciler over `transport` with a fast waiter and a fixed public IP.
///
/// Use with `#[tokio::test(start_paused = true)]` so polling costs no time.
pub fn reconciler(transport: MemoryTransport) -> Reconciler<MemoryTransport> {
    Reconciler::new(transport)
        .with_waiter(ReadinessWaiter::new(
            Duration::from_secs(5),
            Duration::from_secs(60),
        ))
        .with_ip_resolver(Arc::new(StaticIpResolver(
            MY_IP.parse().expect("valid test address"),
        )))
}
