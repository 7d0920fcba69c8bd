//! Duplicate detection
//!
//! Two rules are duplicates when they share a (non-empty) name, or when every
//! field the provider matches on is equal. Duplicates are skipped, never
//! reported as errors, which makes the convenience commands idempotent.

use crate::core::firewall::Rule;

/// Returns `true` if `a` and `b` are the same named rule or have the same effect.
///
/// The functional comparison covers action, protocol, source and destination
/// address, destination port, IP version and TCP flags. Unnamed rules never
/// match by name.
pub fn is_duplicate(a: &Rule, b: &Rule) -> bool {
    let same_name = !a.name.is_empty() && a.name == b.name;
    same_name || functionally_equal(a, b)
}

/// Field-by-field comparison of everything that decides which packets match.
pub fn functionally_equal(a: &Rule, b: &Rule) -> bool {
    a.action == b.action
        && a.protocol == b.protocol
        && a.source_ip == b.source_ip
        && a.dest_ip == b.dest_ip
        && a.dest_port == b.dest_port
        && a.ip_version == b.ip_version
        && a.tcp_flags == b.tcp_flags
}

/// Returns `true` if `candidate` duplicates any rule in `existing`.
pub fn exists(existing: &[Rule], candidate: &Rule) -> bool {
    existing.iter().any(|r| is_duplicate(r, candidate))
}

/// Splits candidates into rules to add and rules to skip.
///
/// A candidate is skipped if it duplicates an existing rule or a candidate
/// accepted earlier in the same batch, so a rule shared by several requests in
/// one batch is added at most once.
pub fn partition_new(existing: &[Rule], candidates: Vec<Rule>) -> (Vec<Rule>, Vec<Rule>) {
    let mut fresh: Vec<Rule> = Vec::with_capacity(candidates.len());
    let mut skipped = Vec::new();

    for candidate in candidates {
        if exists(existing, &candidate) || exists(&fresh, &candidate) {
            skipped.push(candidate);
        } else {
            fresh.push(candidate);
        }
    }

    (fresh, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::{Action, PortSpec};
    use crate::core::test_helpers::ssh_rule;

    #[test]
    fn test_same_name_is_duplicate_even_if_fields_drift() {
        let a = ssh_rule("ssh", "1.1.1.1");
        let mut b = ssh_rule("ssh", "2.2.2.2");
        b.dest_port = Some(PortSpec::single(2222));
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_functional_match_under_different_name() {
        let a = ssh_rule("ssh", "1.1.1.1");
        let b = ssh_rule("ssh-renamed", "1.1.1.1");
        assert!(is_duplicate(&a, &b));
    }

    #[test]
    fn test_source_port_is_not_compared() {
        let a = ssh_rule("a", "1.1.1.1");
        let b = ssh_rule("b", "1.1.1.1").with_source_port(PortSpec::single(1024));
        assert!(functionally_equal(&a, &b));
    }

    #[test]
    fn test_different_effect_is_not_duplicate() {
        let a = ssh_rule("a", "1.1.1.1");
        let mut b = ssh_rule("b", "1.1.1.1");
        b.action = Action::Discard;
        assert!(!is_duplicate(&a, &b));
        let c = ssh_rule("c", "1.1.1.2");
        assert!(!is_duplicate(&a, &c));
    }

    #[test]
    fn test_unnamed_rules_compare_functionally_only() {
        let a = ssh_rule("", "1.1.1.1");
        let b = ssh_rule("", "2.2.2.2");
        assert!(!is_duplicate(&a, &b));
    }

    #[test]
    fn test_partition_dedups_within_batch() {
        let existing = vec![ssh_rule("old", "1.1.1.1")];
        let candidates = vec![
            ssh_rule("dup-of-existing", "1.1.1.1"),
            ssh_rule("new", "2.2.2.2"),
            ssh_rule("new-again", "2.2.2.2"),
        ];
        let (fresh, skipped) = partition_new(&existing, candidates);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].name, "new");
        assert_eq!(skipped.len(), 2);
    }
}
