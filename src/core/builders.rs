//! Convenience rule builders
//!
//! Each builder turns a short intent ("allow SSH from these addresses") into
//! normalised provider rules with deterministic names, so re-running the same
//! command produces rules the deduplicator recognises.
//!
//! With an empty source list a builder emits one unrestricted rule per IP
//! version, because a protocol filter needs an explicit version.

use crate::core::error::Result;
use crate::core::firewall::{Action, IpVersion, PortSpec, Protocol, Rule};
use crate::core::normalize::{normalize_cidr, normalize_rule};
use ipnetwork::IpNetwork;
use strum::IntoEnumIterator;

pub const SSH_PORT: u16 = 22;
pub const HTTPS_PORT: u16 = 443;
pub const HTTP_PORT: u16 = 80;
pub const MOSH_PORTS: (u16, u16) = (60000, 61000);

/// Ephemeral port range return traffic arrives on.
pub const ESTABLISHED_PORTS: (u16, u16) = (32768, 65535);
pub const ESTABLISHED_NAME: &str = "TCP established";

/// Resolved source addresses, or one `None` per IP version when unrestricted.
fn sources(list: &[String]) -> Result<Vec<(Option<IpNetwork>, IpVersion)>> {
    if list.is_empty() {
        return Ok(IpVersion::iter().map(|v| (None, v)).collect());
    }
    list.iter()
        .map(|s| {
            let network = normalize_cidr(s)?;
            // normalize_cidr only yields None for empty input
            let version = network.as_ref().map_or(IpVersion::V4, IpVersion::of);
            Ok((network, version))
        })
        .collect()
}

fn label(source: Option<IpNetwork>, version: IpVersion) -> String {
    match source {
        Some(network) => format!("from {network}"),
        None => format!("({version})"),
    }
}

fn accept_from(
    name: String,
    protocol: Protocol,
    ports: PortSpec,
    source: Option<IpNetwork>,
    version: IpVersion,
) -> Result<Rule> {
    let mut rule = Rule::new(name, Action::Accept)
        .with_ip_version(version)
        .with_protocol(protocol)
        .with_dest_port(ports);
    rule.source_ip = source;
    normalize_rule(rule)
}

/// One accept/tcp/22 rule per source.
pub fn allow_ssh(source_ips: &[String]) -> Result<Vec<Rule>> {
    sources(source_ips)?
        .into_iter()
        .map(|(source, version)| ssh_rule(source, version))
        .collect()
}

fn ssh_rule(source: Option<IpNetwork>, version: IpVersion) -> Result<Rule> {
    accept_from(
        format!("Allow SSH {}", label(source, version)),
        Protocol::Tcp,
        PortSpec::single(SSH_PORT),
        source,
        version,
    )
}

/// One accept/tcp/443 rule per source.
pub fn allow_https(source_ips: &[String]) -> Result<Vec<Rule>> {
    sources(source_ips)?
        .into_iter()
        .map(|(source, version)| {
            accept_from(
                format!("Allow HTTPS {}", label(source, version)),
                Protocol::Tcp,
                PortSpec::single(HTTPS_PORT),
                source,
                version,
            )
        })
        .collect()
}

/// Per source an SSH rule and a UDP 60000-61000 rule, then one
/// IPv4 "TCP established" rule for the whole batch.
pub fn allow_mosh(source_ips: &[String]) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();
    for (source, version) in sources(source_ips)? {
        rules.push(ssh_rule(source, version)?);
        rules.push(accept_from(
            format!("Allow MOSH {}", label(source, version)),
            Protocol::Udp,
            PortSpec::range(MOSH_PORTS.0, MOSH_PORTS.1),
            source,
            version,
        )?);
    }
    rules.push(tcp_established()?);
    Ok(rules)
}

/// Accepts TCP return traffic of connections the server opened.
pub fn tcp_established() -> Result<Rule> {
    normalize_rule(
        Rule::new(ESTABLISHED_NAME, Action::Accept)
            .with_ip_version(IpVersion::V4)
            .with_protocol(Protocol::Tcp)
            .with_dest_port(PortSpec::range(ESTABLISHED_PORTS.0, ESTABLISHED_PORTS.1))
            .with_tcp_flags("ack"),
    )
}

/// One discard/tcp/80 rule for each IP version.
pub fn block_http() -> Result<Vec<Rule>> {
    IpVersion::iter()
        .map(|version| {
            normalize_rule(
                Rule::new(format!("Block HTTP ({version})"), Action::Discard)
                    .with_ip_version(version)
                    .with_protocol(Protocol::Tcp)
                    .with_dest_port(PortSpec::single(HTTP_PORT)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_allow_ssh_per_source() {
        let rules = allow_ssh(&ips(&["203.0.113.5", "2001:db8::1"])).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "Allow SSH from 203.0.113.5/32");
        assert_eq!(rules[0].ip_version, Some(IpVersion::V4));
        assert_eq!(rules[1].ip_version, Some(IpVersion::V6));
        assert_eq!(rules[1].source_ip.unwrap().to_string(), "2001:db8::1/128");
        assert!(rules.iter().all(|r| r.dest_port == Some(PortSpec::single(22))));
    }

    #[test]
    fn test_empty_sources_give_one_rule_per_version() {
        let rules = allow_https(&[]).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "Allow HTTPS (ipv4)");
        assert_eq!(rules[1].name, "Allow HTTPS (ipv6)");
        assert!(rules.iter().all(|r| r.source_ip.is_none()));
    }

    #[test]
    fn test_mosh_adds_established_once() {
        let rules = allow_mosh(&ips(&["1.1.1.1", "2.2.2.2"])).unwrap();
        assert_eq!(rules.len(), 5);
        let established: Vec<_> = rules.iter().filter(|r| r.name == ESTABLISHED_NAME).collect();
        assert_eq!(established.len(), 1);
        assert_eq!(established[0].tcp_flags.as_deref(), Some("ack"));
        assert_eq!(established[0].dest_port.as_ref().unwrap().as_str(), "32768-65535");
        assert_eq!(
            rules.iter().filter(|r| r.protocol == Some(Protocol::Udp)).count(),
            2
        );
    }

    #[test]
    fn test_block_http_both_versions() {
        let rules = block_http().unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.action == Action::Discard));
        assert_eq!(rules[0].ip_version, Some(IpVersion::V4));
        assert_eq!(rules[1].ip_version, Some(IpVersion::V6));
    }

    #[test]
    fn test_builders_are_deterministic() {
        let a = allow_mosh(&ips(&["10.0.0.0/8"])).unwrap();
        let b = allow_mosh(&ips(&["10.0.0.0/8"])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_source_rejected() {
        assert!(allow_ssh(&ips(&["not-an-ip"])).is_err());
    }
}
