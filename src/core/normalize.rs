//! Rule normalisation
//!
//! Turns partial user input into canonical rules: bare addresses get a host
//! mask (`/32` or `/128`) and the IP version is derived from the addresses
//! unless it was set explicitly.

use crate::core::error::{Error, Result};
use crate::core::firewall::{IpVersion, Rule};
use crate::core::rule_constraints;
use ipnetwork::IpNetwork;

/// Parses an IP or CIDR string. Empty input means "no constraint".
///
/// # Examples
///
/// ```
/// use robofw::core::normalize::normalize_cidr;
///
/// assert_eq!(normalize_cidr("203.0.113.5").unwrap().unwrap().to_string(), "203.0.113.5/32");
/// assert_eq!(normalize_cidr("2001:db8::1").unwrap().unwrap().to_string(), "2001:db8::1/128");
/// assert_eq!(normalize_cidr("10.0.0.0/8").unwrap().unwrap().to_string(), "10.0.0.0/8");
/// assert!(normalize_cidr("").unwrap().is_none());
/// ```
pub fn normalize_cidr(input: &str) -> Result<Option<IpNetwork>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // IpNetwork already applies the full host mask when no prefix is given
    trimmed
        .parse::<IpNetwork>()
        .map(Some)
        .map_err(|e| Error::validation("ip", format!("'{trimmed}' is not an IP or CIDR: {e}")))
}

/// String form of [`normalize_cidr`]; empty stays empty.
pub fn canonical_cidr(input: &str) -> Result<String> {
    Ok(normalize_cidr(input)?.map(|n| n.to_string()).unwrap_or_default())
}

/// IP version implied by the rule's addresses, if any.
///
/// # Errors
///
/// Returns `Err` if source and destination belong to different families.
pub fn detect_ip_version(rule: &Rule) -> Result<Option<IpVersion>> {
    let source = rule.source_ip.as_ref().map(IpVersion::of);
    let dest = rule.dest_ip.as_ref().map(IpVersion::of);

    match (source, dest) {
        (Some(s), Some(d)) if s != d => Err(Error::validation(
            "ip",
            format!("source is {s} but destination is {d}"),
        )),
        (Some(v), _) | (None, Some(v)) => Ok(Some(v)),
        (None, None) => Ok(None),
    }
}

/// Canonicalises a rule and checks it against the provider's constraints.
///
/// The detected IP version is stored on the rule unless one was set
/// explicitly; an explicit version that contradicts the addresses is an error.
pub fn normalize_rule(mut rule: Rule) -> Result<Rule> {
    rule.name = crate::validators::validate_rule_name(&rule.name)
        .map_err(|message| Error::validation("name", message))?;

    if let Some(flags) = rule.tcp_flags.take() {
        let flags = crate::validators::validate_tcp_flags(&flags)
            .map_err(|message| Error::validation("tcp_flags", message))?;
        rule.tcp_flags = Some(flags);
    }

    match (rule.ip_version, detect_ip_version(&rule)?) {
        (Some(explicit), Some(detected)) if explicit != detected => {
            return Err(Error::validation(
                "ip_version",
                format!(
                    "rule '{}' is {explicit} but its addresses are {detected}",
                    rule.name
                ),
            ));
        }
        (None, detected) => rule.ip_version = detected,
        _ => {}
    }

    rule_constraints::check_rule(&rule)?;
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::{Action, Protocol};
    use proptest::prelude::*;

    #[test]
    fn test_canonical_cidr() {
        assert_eq!(canonical_cidr("1.1.1.1").unwrap(), "1.1.1.1/32");
        assert_eq!(canonical_cidr(" 2001:db8::/32 ").unwrap(), "2001:db8::/32");
        assert_eq!(canonical_cidr("").unwrap(), "");
        assert!(canonical_cidr("1.1.1.1/33").is_err());
        assert!(canonical_cidr("example.com").is_err());
    }

    #[test]
    fn test_version_detected_from_source() {
        let rule = Rule::new("v6", Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_source_ip("2001:db8::1/128".parse().unwrap());
        let rule = normalize_rule(rule).unwrap();
        assert_eq!(rule.ip_version, Some(IpVersion::V6));
    }

    #[test]
    fn test_explicit_version_conflict_rejected() {
        let rule = Rule::new("clash", Action::Accept)
            .with_ip_version(IpVersion::V6)
            .with_source_ip("10.0.0.1/32".parse().unwrap());
        assert!(matches!(
            normalize_rule(rule),
            Err(Error::Validation { field, .. }) if field == "ip_version"
        ));
    }

    #[test]
    fn test_mixed_families_rejected() {
        let rule = Rule::new("mixed", Action::Accept)
            .with_source_ip("10.0.0.1/32".parse().unwrap())
            .with_dest_ip("2001:db8::1/128".parse().unwrap());
        assert!(detect_ip_version(&rule).is_err());
    }

    #[test]
    fn test_tcp_flags_canonicalised() {
        let rule = Rule::new("est", Action::Accept)
            .with_ip_version(IpVersion::V4)
            .with_protocol(Protocol::Tcp)
            .with_tcp_flags("ACK");
        assert_eq!(normalize_rule(rule).unwrap().tcp_flags.as_deref(), Some("ack"));
    }

    proptest! {
        #[test]
        fn prop_bare_ipv4_gets_host_mask(a: u8, b: u8, c: u8, d: u8) {
            let text = format!("{a}.{b}.{c}.{d}");
            prop_assert_eq!(canonical_cidr(&text).unwrap(), format!("{text}/32"));
        }

        #[test]
        fn prop_bare_ipv6_gets_host_mask(bits: u128) {
            let addr = std::net::Ipv6Addr::from(bits);
            let net = normalize_cidr(&addr.to_string()).unwrap().unwrap();
            prop_assert_eq!(net.prefix(), 128);
            prop_assert!(net.is_ipv6());
        }

        #[test]
        fn prop_explicit_prefix_passes_through(a in any::<u8>(), prefix in 0u8..=32) {
            let text = format!("{a}.0.0.0/{prefix}");
            prop_assert_eq!(canonical_cidr(&text).unwrap(), text);
        }
    }
}
