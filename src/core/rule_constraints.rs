//! Rule constraint functions for firewall rules
//!
//! This module centralizes the provider's rules about valid field combinations.
//! They are checked locally before any payload leaves the machine, because the
//! web service only answers with a generic `INVALID_INPUT`.
//!
//! # Examples
//!
//! ```
//! use robofw::core::firewall::{IpVersion, Protocol};
//! use robofw::core::rule_constraints::*;
//!
//! assert!(protocol_supports_ports(Protocol::Tcp));
//! assert!(!protocol_supports_ports(Protocol::Icmp));
//! assert!(!protocol_allowed_for_version(Protocol::Icmp, IpVersion::V6));
//! ```

use super::error::{Error, Result};
use super::firewall::{IpVersion, Protocol, Rule};

// ═══════════════════════════════════════════════════════════════════════════
// Protocol Constraints
// ═══════════════════════════════════════════════════════════════════════════

/// Returns `true` if the protocol supports port filtering.
///
/// An unset protocol also accepts ports (the provider then matches TCP and UDP).
#[inline]
pub fn protocol_supports_ports(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::Tcp | Protocol::Udp)
}

/// Returns `true` if TCP flag matching is meaningful for the protocol.
#[inline]
pub fn protocol_supports_tcp_flags(protocol: Protocol) -> bool {
    protocol == Protocol::Tcp
}

// ═══════════════════════════════════════════════════════════════════════════
// Protocol / IP Version Constraints
// ═══════════════════════════════════════════════════════════════════════════

/// Returns `true` if the provider can filter `protocol` for `version`.
///
/// The provider never filters ICMPv6, so `icmp` is IPv4-only.
#[inline]
pub fn protocol_allowed_for_version(protocol: Protocol, version: IpVersion) -> bool {
    !(protocol == Protocol::Icmp && version == IpVersion::V6)
}

/// Checks every field-combination constraint of a single rule.
///
/// # Errors
///
/// Returns `Error::Validation` naming the offending field when:
/// - a protocol is set without an IP version
/// - `icmp` is combined with IPv6
/// - ports are set for a protocol without ports
/// - TCP flags are set for anything but `tcp`
pub fn check_rule(rule: &Rule) -> Result<()> {
    let Some(protocol) = rule.protocol else {
        if rule.tcp_flags.is_some() {
            return Err(flags_error(rule));
        }
        return Ok(());
    };

    let Some(version) = rule.ip_version else {
        return Err(Error::validation(
            "ip_version",
            format!(
                "rule '{}' filters on {protocol} and therefore needs an IP version",
                rule.name
            ),
        ));
    };

    if !protocol_allowed_for_version(protocol, version) {
        return Err(Error::validation(
            "protocol",
            format!("rule '{}': ICMP can only be filtered for IPv4", rule.name),
        ));
    }

    if !protocol_supports_ports(protocol)
        && (rule.source_port.is_some() || rule.dest_port.is_some())
    {
        return Err(Error::validation(
            "port",
            format!("rule '{}': {protocol} has no ports", rule.name),
        ));
    }

    if rule.tcp_flags.is_some() && !protocol_supports_tcp_flags(protocol) {
        return Err(flags_error(rule));
    }

    Ok(())
}

fn flags_error(rule: &Rule) -> Error {
    Error::validation(
        "tcp_flags",
        format!("rule '{}': TCP flags need protocol tcp", rule.name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::{Action, PortSpec};

    fn tcp_rule() -> Rule {
        Rule::new("t", Action::Accept)
            .with_ip_version(IpVersion::V4)
            .with_protocol(Protocol::Tcp)
    }

    #[test]
    fn test_protocol_requires_version() {
        let rule = Rule::new("p", Action::Accept).with_protocol(Protocol::Udp);
        assert!(matches!(
            check_rule(&rule),
            Err(Error::Validation { field, .. }) if field == "ip_version"
        ));
    }

    #[test]
    fn test_icmp_v6_rejected() {
        let rule = Rule::new("ping", Action::Accept)
            .with_ip_version(IpVersion::V6)
            .with_protocol(Protocol::Icmp);
        assert!(check_rule(&rule).is_err());
        let rule = rule.with_ip_version(IpVersion::V4);
        assert!(check_rule(&rule).is_ok());
    }

    #[test]
    fn test_ports_only_for_tcp_udp() {
        assert!(check_rule(&tcp_rule().with_dest_port(PortSpec::single(22))).is_ok());
        let gre = Rule::new("gre", Action::Accept)
            .with_ip_version(IpVersion::V4)
            .with_protocol(Protocol::Gre)
            .with_dest_port(PortSpec::single(22));
        assert!(check_rule(&gre).is_err());
        // Unset protocol may carry ports
        let any = Rule::new("any", Action::Accept).with_dest_port(PortSpec::single(53));
        assert!(check_rule(&any).is_ok());
    }

    #[test]
    fn test_tcp_flags_only_for_tcp() {
        assert!(check_rule(&tcp_rule().with_tcp_flags("ack")).is_ok());
        let udp = Rule::new("u", Action::Accept)
            .with_ip_version(IpVersion::V4)
            .with_protocol(Protocol::Udp)
            .with_tcp_flags("ack");
        assert!(check_rule(&udp).is_err());
        let unset = Rule::new("x", Action::Accept).with_tcp_flags("ack");
        assert!(check_rule(&unset).is_err());
    }

    #[test]
    fn test_unconstrained_rule_is_valid() {
        assert!(check_rule(&Rule::new("all", Action::Discard)).is_ok());
    }
}
