//! Expansion of multi-valued rules
//!
//! A provider rule holds one source and one destination network. A rule
//! declared with address lists becomes the cartesian product of single-address
//! rules, each normalised on its own.

use crate::core::error::Result;
use crate::core::firewall::Rule;
use crate::core::normalize::{normalize_cidr, normalize_rule};

/// Expands `template` over every (source, destination) pair.
///
/// With both lists empty the template maps to exactly one rule without address
/// constraints. When more than one rule results, names get a ` #n` suffix
/// (1-based, in product order) so every rule keeps a distinct identity and a
/// repeated expansion produces the same names.
///
/// Names only depend on the template name and the position in the product.
/// A later batch that reuses the name with other addresses produces the same
/// names, and dedup by name then skips it as already present.
///
/// # Examples
///
/// ```
/// use robofw::core::expand::expand;
/// use robofw::core::firewall::{Action, Protocol, Rule};
///
/// let template = Rule::new("web", Action::Accept).with_protocol(Protocol::Tcp);
/// let rules = expand(&template, &["1.1.1.1".into(), "2.2.2.2".into()], &[]).unwrap();
/// assert_eq!(rules.len(), 2);
/// assert_eq!(rules[0].name, "web #1");
/// assert_eq!(rules[1].source_ip.unwrap().to_string(), "2.2.2.2/32");
/// ```
pub fn expand(template: &Rule, sources: &[String], dests: &[String]) -> Result<Vec<Rule>> {
    let sources = parse_all(sources)?;
    let dests = parse_all(dests)?;
    let total = sources.len() * dests.len();

    let mut rules = Vec::with_capacity(total);
    for (i, (source, dest)) in sources
        .iter()
        .flat_map(|s| dests.iter().map(move |d| (*s, *d)))
        .enumerate()
    {
        let mut rule = template.clone();
        rule.source_ip = source.or(template.source_ip);
        rule.dest_ip = dest.or(template.dest_ip);
        if total > 1 && !rule.name.is_empty() {
            rule.name = format!("{} #{}", template.name, i + 1);
        }
        rules.push(normalize_rule(rule)?);
    }

    Ok(rules)
}

/// Parses an address list; an empty list stands for a single "any".
fn parse_all(list: &[String]) -> Result<Vec<Option<ipnetwork::IpNetwork>>> {
    if list.is_empty() {
        return Ok(vec![None]);
    }
    list.iter().map(|s| normalize_cidr(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::{Action, IpVersion, PortSpec, Protocol};
    use proptest::prelude::*;

    fn tcp_template() -> Rule {
        Rule::new("svc", Action::Accept)
            .with_protocol(Protocol::Tcp)
            .with_dest_port(PortSpec::single(8080))
    }

    #[test]
    fn test_empty_lists_yield_single_rule() {
        let template = Rule::new("all", Action::Discard);
        let rules = expand(&template, &[], &[]).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "all");
        assert!(rules[0].source_ip.is_none());
        assert!(rules[0].dest_ip.is_none());
    }

    #[test]
    fn test_two_sources_no_dests() {
        let sources = vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()];
        let rules = expand(&tcp_template(), &sources, &[]).unwrap();
        assert_eq!(rules.len(), 2);
        for (rule, ip) in rules.iter().zip(["1.1.1.1/32", "2.2.2.2/32"]) {
            assert_eq!(rule.source_ip.unwrap().to_string(), ip);
            assert_eq!(rule.protocol, Some(Protocol::Tcp));
            assert_eq!(rule.dest_port, Some(PortSpec::single(8080)));
            assert_eq!(rule.ip_version, Some(IpVersion::V4));
        }
    }

    #[test]
    fn test_each_rule_detects_its_own_version() {
        let sources = vec!["1.1.1.1".to_string(), "2001:db8::1".to_string()];
        let rules = expand(&tcp_template(), &sources, &[]).unwrap();
        assert_eq!(rules[0].ip_version, Some(IpVersion::V4));
        assert_eq!(rules[1].ip_version, Some(IpVersion::V6));
    }

    #[test]
    fn test_invalid_address_fails_whole_expansion() {
        let sources = vec!["1.1.1.1".to_string(), "nope".to_string()];
        assert!(expand(&tcp_template(), &sources, &[]).is_err());
    }

    #[test]
    fn test_product_names_are_stable() {
        let s = vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()];
        let d = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let first = expand(&tcp_template(), &s, &d).unwrap();
        let second = expand(&tcp_template(), &s, &d).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[3].name, "svc #4");
        assert_eq!(first[3].dest_ip.unwrap().to_string(), "10.0.0.2/32");
    }

    proptest! {
        #[test]
        fn prop_product_size(n in 0usize..5, m in 0usize..5) {
            let s: Vec<String> = (0..n).map(|i| format!("10.0.0.{i}")).collect();
            let d: Vec<String> = (0..m).map(|i| format!("10.1.0.{i}")).collect();
            let template = tcp_template().with_ip_version(IpVersion::V4);
            let rules = expand(&template, &s, &d).unwrap();
            prop_assert_eq!(rules.len(), n.max(1) * m.max(1));
        }
    }
}
