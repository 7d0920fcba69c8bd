//! Plain-text rendering for the CLI
//!
//! Tables show the live rule lists exactly as the provider reports them,
//! auto rules included and marked, so the user can see which slots are taken.

use crate::core::auto_rules::is_auto_rule;
use crate::core::error::Error;
use crate::core::firewall::{
    Direction, FirewallConfig, FirewallTemplate, IpVersion, PortSpec, Protocol, Rule, RuleLists,
};
use crate::core::reconciler::ReconcileReport;
use crate::utils::truncate_string;
use std::fmt::Write;
use strum::IntoEnumIterator;

const NAME_WIDTH: usize = 32;

fn cell<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn rule_row(index: usize, rule: &Rule) -> String {
    let name = if rule.name.is_empty() {
        "(unnamed)".to_string()
    } else {
        truncate_string(&rule.name, NAME_WIDTH)
    };
    let marker = if is_auto_rule(rule) { " (auto)" } else { "" };
    format!(
        "{index:>3}  {:<1}  {:<4}  {:<5}  {:<22} {:<22} {:<11} {:<11} {:<8} {name}{marker}",
        rule.action.as_char(),
        rule.ip_version.map_or("any", IpVersion::as_str),
        rule.protocol.map_or("*", Protocol::as_str),
        cell(rule.source_ip),
        cell(rule.dest_ip),
        cell(rule.source_port.as_ref().map(PortSpec::as_str)),
        cell(rule.dest_port.as_ref().map(PortSpec::as_str)),
        cell(rule.tcp_flags.as_deref()),
    )
}

/// Firewall header and the rule table of each shown direction.
pub fn firewall_table(server: &str, config: &FirewallConfig, only: Option<Direction>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Firewall of server {server}: {} (whitelist provider services: {}, filter IPv6: {})",
        config.status,
        yes_no(config.whitelist_provider_services),
        yes_no(config.filter_ipv6),
    );

    rule_tables(&mut out, &config.rules, only);
    out
}

fn rule_tables(out: &mut String, lists: &RuleLists, only: Option<Direction>) {
    for direction in Direction::iter().filter(|d| only.is_none_or(|o| o == *d)) {
        let rules = lists.get(direction);
        let _ = writeln!(out);
        let _ = writeln!(out, "{direction} ({} rule(s))", rules.len());
        if rules.is_empty() {
            let _ = writeln!(out, "  (none)");
            continue;
        }
        let _ = writeln!(
            out,
            "{:>3}  {:<1}  {:<4}  {:<5}  {:<22} {:<22} {:<11} {:<11} {:<8} NAME",
            "#", "A", "VER", "PROTO", "SOURCE", "DESTINATION", "SRC PORT", "DST PORT", "FLAGS"
        );
        for (index, rule) in rules.iter().enumerate() {
            let _ = writeln!(out, "{}", rule_row(index, rule));
        }
    }
}

/// Template header and its rule tables.
pub fn template_details(template: &FirewallTemplate) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Template {}: {} (default: {}, whitelist provider services: {}, filter IPv6: {})",
        template.id,
        template.name,
        yes_no(template.is_default),
        yes_no(template.whitelist_provider_services),
        yes_no(template.filter_ipv6),
    );
    rule_tables(&mut out, &template.rules, None);
    out
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Human summary of an additive operation.
pub fn report_summary(server: &str, report: &ReconcileReport) -> String {
    let mut out = String::new();
    if report.is_noop() {
        let _ = writeln!(
            out,
            "No change on server {server}: all {} rule(s) already present",
            report.skipped.len()
        );
    } else {
        let _ = writeln!(
            out,
            "Added {} {} rule(s) to server {server}, skipped {}",
            report.added.len(),
            report.direction,
            report.skipped.len()
        );
    }
    for rule in &report.added {
        let _ = writeln!(out, "  + {}", rule.name);
    }
    for rule in &report.skipped {
        let _ = writeln!(out, "  = {} (already present)", rule.name);
    }
    out
}

pub fn templates_table(templates: &[FirewallTemplate]) -> String {
    if templates.is_empty() {
        return "No firewall templates\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:>8}  {:<7}  NAME", "ID", "DEFAULT");
    for template in templates {
        let _ = writeln!(
            out,
            "{:>8}  {:<7}  {}",
            template.id,
            yes_no(template.is_default),
            template.name
        );
    }
    out
}

/// Error message followed by remediation steps.
pub fn error_report(err: &Error) -> String {
    let translation = err.translate();
    let mut out = format!("Error: {}\n", translation.user_message);
    if translation.user_message != err.to_string() {
        let _ = writeln!(out, "  ({err})");
    }
    for suggestion in &translation.suggestions {
        let _ = writeln!(out, "  - {suggestion}");
    }
    if let Some(url) = &translation.help_url {
        let _ = writeln!(out, "  See {url}");
    }
    if err.is_retryable() {
        let _ = writeln!(out, "  This operation can be retried safely.");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::FirewallStatus;
    use crate::robot::memory::provider_mail_block;

    fn config() -> FirewallConfig {
        FirewallConfig {
            server_ip: None,
            server_number: Some(7),
            status: FirewallStatus::Active,
            whitelist_provider_services: true,
            filter_ipv6: false,
            port: None,
            rules: RuleLists {
                input: vec![],
                output: vec![provider_mail_block()],
            },
        }
    }

    #[test]
    fn test_table_marks_auto_rules() {
        let text = firewall_table("7", &config(), None);
        assert!(text.contains("Block mail ports (auto)"));
        assert!(text.contains("input (0 rule(s))"));
        assert!(text.contains("25,465"));
    }

    #[test]
    fn test_table_direction_filter() {
        let text = firewall_table("7", &config(), Some(Direction::Input));
        assert!(!text.contains("output"));
    }

    #[test]
    fn test_template_details_show_rules() {
        let template = FirewallTemplate {
            id: 12,
            name: "baseline".into(),
            whitelist_provider_services: true,
            filter_ipv6: false,
            is_default: true,
            rules: config().rules,
        };
        let text = template_details(&template);
        assert!(text.starts_with("Template 12: baseline (default: yes"));
        assert!(text.contains("output (1 rule(s))"));
    }

    #[test]
    fn test_error_report_lists_suggestions() {
        let text = error_report(&Error::Timeout {
            server: "7".into(),
            waited: std::time::Duration::from_secs(300),
        });
        assert!(text.contains("robofw wait 7"));
        assert!(text.contains("retried safely"));
    }
}
