//! Provider-injected ("auto") rules
//!
//! The provider adds some rules on its own, currently a block of outbound
//! mail ports. They are shown to the user like any other rule but are never
//! sent back: the provider re-injects them itself and rejects or duplicates
//! rule sets that contain them.

use crate::core::firewall::{Action, Protocol, Rule, RuleLists};

/// Name of the mail-port block the provider injects.
pub const MAIL_BLOCK_NAME: &str = "Block mail ports";

/// Destination ports of the mail-port block.
pub const MAIL_BLOCK_PORTS: &str = "25,465";

/// Returns `true` if the rule carries the signature of a provider-injected rule.
///
/// # Examples
///
/// ```
/// use robofw::core::auto_rules::is_auto_rule;
/// use robofw::core::firewall::{Action, Protocol, Rule};
///
/// let mail = Rule::new("Block mail ports", Action::Discard)
///     .with_protocol(Protocol::Tcp)
///     .with_dest_port("25,465".parse().unwrap());
/// assert!(is_auto_rule(&mail));
/// assert!(!is_auto_rule(&Rule::new("Block mail ports", Action::Accept)));
/// ```
pub fn is_auto_rule(rule: &Rule) -> bool {
    rule.name == MAIL_BLOCK_NAME
        && rule.action == Action::Discard
        && rule.protocol == Some(Protocol::Tcp)
        && rule
            .dest_port
            .as_ref()
            .is_some_and(|p| p.as_str() == MAIL_BLOCK_PORTS)
}

/// Removes every auto rule from a list, keeping the order of the rest.
pub fn strip_auto_rules(rules: &[Rule]) -> Vec<Rule> {
    rules.iter().filter(|r| !is_auto_rule(r)).cloned().collect()
}

/// Strips auto rules from both directions.
///
/// Applied to every outbound payload regardless of which direction the caller
/// touched.
pub fn strip_rule_lists(rules: &RuleLists) -> RuleLists {
    RuleLists {
        input: strip_auto_rules(&rules.input),
        output: strip_auto_rules(&rules.output),
    }
}

/// Number of non-auto rules in a list.
pub fn user_rule_count(rules: &[Rule]) -> usize {
    rules.iter().filter(|r| !is_auto_rule(r)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{mail_block_rule, ssh_rule};

    #[test]
    fn test_signature_requires_every_field() {
        assert!(is_auto_rule(&mail_block_rule()));

        let mut renamed = mail_block_rule();
        renamed.name = "my mail block".to_string();
        assert!(!is_auto_rule(&renamed));

        let mut udp = mail_block_rule();
        udp.protocol = Some(Protocol::Udp);
        assert!(!is_auto_rule(&udp));

        let mut other_ports = mail_block_rule();
        other_ports.dest_port = Some("25".parse().unwrap());
        assert!(!is_auto_rule(&other_ports));
    }

    #[test]
    fn test_strip_keeps_order() {
        let rules = vec![
            ssh_rule("a", "1.1.1.1"),
            mail_block_rule(),
            ssh_rule("b", "2.2.2.2"),
        ];
        let stripped = strip_auto_rules(&rules);
        let names: Vec<_> = stripped.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(user_rule_count(&rules), 2);
    }

    #[test]
    fn test_strip_both_directions() {
        let lists = RuleLists {
            input: vec![mail_block_rule()],
            output: vec![mail_block_rule(), ssh_rule("out", "3.3.3.3")],
        };
        let stripped = strip_rule_lists(&lists);
        assert!(stripped.input.is_empty());
        assert_eq!(stripped.output.len(), 1);
    }
}
