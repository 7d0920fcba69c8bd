//! Wire format of the Robot web service
//!
//! Responses are JSON documents wrapped in a single-key envelope
//! (`{"firewall": {...}}`, `{"firewall_template": {...}}`,
//! `{"error": {...}}`). Requests are `application/x-www-form-urlencoded`
//! with bracketed keys such as `rules[input][0][dst_port]`.
//!
//! Enum-like strings are parsed here, at the boundary; an unknown value fails
//! the decode instead of travelling into the engine.

use super::TransportError;
use crate::core::firewall::{
    Action, FirewallConfig, FirewallStatus, FirewallTemplate, FirewallUpdate, IpVersion, PortSpec,
    Protocol, Rule, RuleLists, TemplateDraft,
};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
struct FirewallEnvelope {
    firewall: WireFirewall,
}

#[derive(Debug, Deserialize)]
struct WireFirewall {
    #[serde(default)]
    server_ip: Option<String>,
    #[serde(default)]
    server_number: Option<u32>,
    status: String,
    #[serde(default)]
    filter_ipv6: bool,
    #[serde(default)]
    whitelist_hos: bool,
    #[serde(default)]
    port: Option<String>,
    #[serde(default)]
    rules: WireRuleLists,
}

#[derive(Debug, Default, Deserialize)]
struct WireRuleLists {
    #[serde(default)]
    input: Vec<WireRule>,
    #[serde(default)]
    output: Vec<WireRule>,
}

#[derive(Debug, Deserialize)]
struct WireRule {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ip_version: Option<String>,
    action: String,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    src_ip: Option<String>,
    #[serde(default)]
    dst_ip: Option<String>,
    #[serde(default)]
    src_port: Option<String>,
    #[serde(default)]
    dst_port: Option<String>,
    #[serde(default)]
    tcp_flags: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateEnvelope {
    firewall_template: WireTemplate,
}

#[derive(Debug, Deserialize)]
struct WireTemplate {
    id: u32,
    name: String,
    #[serde(default)]
    filter_ipv6: bool,
    #[serde(default)]
    whitelist_hos: bool,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    rules: WireRuleLists,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    status: Option<u16>,
    code: String,
    #[serde(default)]
    message: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════════════════════

/// `null` and `""` both mean "not set".
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_field<T: FromStr>(field: &str, value: Option<String>) -> Result<Option<T>, TransportError>
where
    T::Err: std::fmt::Display,
{
    present(value)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| TransportError::Decode(format!("{field} '{v}': {e}")))
        })
        .transpose()
}

impl TryFrom<WireRule> for Rule {
    type Error = TransportError;

    fn try_from(wire: WireRule) -> Result<Self, Self::Error> {
        Ok(Rule {
            name: wire.name.unwrap_or_default(),
            ip_version: parse_field::<IpVersion>("ip_version", wire.ip_version)?,
            action: Action::from_str(&wire.action)
                .map_err(|e| TransportError::Decode(format!("action '{}': {e}", wire.action)))?,
            protocol: parse_field::<Protocol>("protocol", wire.protocol)?,
            source_ip: parse_field::<IpNetwork>("src_ip", wire.src_ip)?,
            dest_ip: parse_field::<IpNetwork>("dst_ip", wire.dst_ip)?,
            source_port: parse_field::<PortSpec>("src_port", wire.src_port)?,
            dest_port: parse_field::<PortSpec>("dst_port", wire.dst_port)?,
            tcp_flags: present(wire.tcp_flags),
        })
    }
}

impl TryFrom<WireRuleLists> for RuleLists {
    type Error = TransportError;

    fn try_from(wire: WireRuleLists) -> Result<Self, Self::Error> {
        Ok(RuleLists {
            input: wire
                .input
                .into_iter()
                .map(Rule::try_from)
                .collect::<Result<_, _>>()?,
            output: wire
                .output
                .into_iter()
                .map(Rule::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<WireFirewall> for FirewallConfig {
    type Error = TransportError;

    fn try_from(wire: WireFirewall) -> Result<Self, Self::Error> {
        Ok(FirewallConfig {
            server_ip: wire.server_ip,
            server_number: wire.server_number,
            status: FirewallStatus::from_str(&wire.status)
                .map_err(|e| TransportError::Decode(format!("status '{}': {e}", wire.status)))?,
            whitelist_provider_services: wire.whitelist_hos,
            filter_ipv6: wire.filter_ipv6,
            port: wire.port,
            rules: wire.rules.try_into()?,
        })
    }
}

impl TryFrom<WireTemplate> for FirewallTemplate {
    type Error = TransportError;

    fn try_from(wire: WireTemplate) -> Result<Self, Self::Error> {
        Ok(FirewallTemplate {
            id: wire.id,
            name: wire.name,
            whitelist_provider_services: wire.whitelist_hos,
            filter_ipv6: wire.filter_ipv6,
            is_default: wire.is_default,
            rules: wire.rules.try_into()?,
        })
    }
}

fn from_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, TransportError> {
    serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))
}

/// Decodes a `{"firewall": ...}` response.
pub fn decode_firewall(body: &str) -> Result<FirewallConfig, TransportError> {
    from_json::<FirewallEnvelope>(body)?.firewall.try_into()
}

/// Decodes a `{"firewall_template": ...}` response.
pub fn decode_template(body: &str) -> Result<FirewallTemplate, TransportError> {
    from_json::<TemplateEnvelope>(body)?
        .firewall_template
        .try_into()
}

/// Decodes the template list, an array of template envelopes.
pub fn decode_templates(body: &str) -> Result<Vec<FirewallTemplate>, TransportError> {
    from_json::<Vec<TemplateEnvelope>>(body)?
        .into_iter()
        .map(|env| env.firewall_template.try_into())
        .collect()
}

/// Turns a non-success response into a transport error.
///
/// Bodies that are not an error document still yield an `Api` error with a
/// synthetic code so the HTTP status is preserved for classification.
pub fn decode_error(http_status: u16, body: &str) -> TransportError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => TransportError::Api {
            status: env.error.status.unwrap_or(http_status),
            code: env.error.code,
            message: env.error.message,
        },
        Err(_) => TransportError::Api {
            status: http_status,
            code: format!("HTTP_{http_status}"),
            message: body.chars().take(200).collect(),
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Encoding
// ═══════════════════════════════════════════════════════════════════════════

/// Form body of a firewall update.
///
/// Unset rule fields are omitted rather than sent as empty strings.
pub fn encode_update(update: &FirewallUpdate) -> Vec<(String, String)> {
    let mut form = vec![
        ("status".to_string(), update.status.as_str().to_string()),
        (
            "whitelist_hos".to_string(),
            update.whitelist_provider_services.to_string(),
        ),
        ("filter_ipv6".to_string(), update.filter_ipv6.to_string()),
    ];
    encode_rules(&mut form, &update.rules);
    form
}

/// Form body of a template create or update.
pub fn encode_template(draft: &TemplateDraft) -> Vec<(String, String)> {
    let mut form = vec![
        ("name".to_string(), draft.name.clone()),
        (
            "whitelist_hos".to_string(),
            draft.whitelist_provider_services.to_string(),
        ),
        ("filter_ipv6".to_string(), draft.filter_ipv6.to_string()),
        ("is_default".to_string(), draft.is_default.to_string()),
    ];
    encode_rules(&mut form, &draft.rules);
    form
}

fn encode_rules(form: &mut Vec<(String, String)>, rules: &RuleLists) {
    for (direction, list) in [("input", &rules.input), ("output", &rules.output)] {
        for (i, rule) in list.iter().enumerate() {
            let mut push = |field: &str, value: String| {
                form.push((format!("rules[{direction}][{i}][{field}]"), value));
            };

            push("name", rule.name.clone());
            push("action", rule.action.as_str().to_string());
            if let Some(v) = rule.ip_version {
                push("ip_version", v.as_str().to_string());
            }
            if let Some(p) = rule.protocol {
                push("protocol", p.as_str().to_string());
            }
            if let Some(ip) = rule.source_ip {
                push("src_ip", ip.to_string());
            }
            if let Some(ip) = rule.dest_ip {
                push("dst_ip", ip.to_string());
            }
            if let Some(port) = &rule.source_port {
                push("src_port", port.to_string());
            }
            if let Some(port) = &rule.dest_port {
                push("dst_port", port.to_string());
            }
            if let Some(flags) = &rule.tcp_flags {
                push("tcp_flags", flags.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREWALL: &str = r#"{
        "firewall": {
            "server_ip": "203.0.113.10",
            "server_number": 321,
            "status": "in process",
            "filter_ipv6": false,
            "whitelist_hos": true,
            "port": "main",
            "rules": {
                "input": [
                    {"ip_version": "ipv4", "name": "ssh", "dst_ip": null, "src_ip": "1.1.1.1",
                     "dst_port": "22", "src_port": null, "protocol": "tcp", "tcp_flags": null,
                     "action": "accept"},
                    {"ip_version": null, "name": "Block mail ports", "dst_ip": "", "src_ip": null,
                     "dst_port": "25,465", "src_port": null, "protocol": "tcp", "tcp_flags": null,
                     "action": "discard"}
                ],
                "output": []
            }
        }
    }"#;

    #[test]
    fn test_decode_firewall() {
        let fw = decode_firewall(FIREWALL).unwrap();
        assert_eq!(fw.server_number, Some(321));
        assert_eq!(fw.status, FirewallStatus::InProcess);
        assert!(fw.whitelist_provider_services);
        assert_eq!(fw.rules.input.len(), 2);

        let ssh = &fw.rules.input[0];
        assert_eq!(ssh.source_ip.unwrap().to_string(), "1.1.1.1/32");
        assert_eq!(ssh.ip_version, Some(IpVersion::V4));
        assert!(ssh.dest_ip.is_none());

        let mail = &fw.rules.input[1];
        assert!(mail.dest_ip.is_none());
        assert!(crate::core::auto_rules::is_auto_rule(mail));
    }

    #[test]
    fn test_unknown_enum_value_fails_decode() {
        let body = FIREWALL.replace("\"accept\"", "\"maybe\"");
        assert!(matches!(
            decode_firewall(&body),
            Err(TransportError::Decode(msg)) if msg.contains("maybe")
        ));
    }

    #[test]
    fn test_decode_templates_list() {
        let body = r#"[
            {"firewall_template": {"id": 1, "name": "base", "filter_ipv6": false,
                                   "whitelist_hos": true, "is_default": true}},
            {"firewall_template": {"id": 2, "name": "web", "filter_ipv6": true,
                                   "whitelist_hos": false, "is_default": false}}
        ]"#;
        let templates = decode_templates(body).unwrap();
        assert_eq!(templates.len(), 2);
        assert!(templates[0].is_default);
        assert!(templates[1].rules.is_empty());
    }

    #[test]
    fn test_decode_error_document() {
        let body = r#"{"error": {"status": 404, "code": "SERVER_NOT_FOUND", "message": "Server not found"}}"#;
        assert_eq!(
            decode_error(404, body),
            TransportError::api(404, "SERVER_NOT_FOUND", "Server not found")
        );
        assert!(matches!(
            decode_error(502, "<html>bad gateway</html>"),
            TransportError::Api { status: 502, code, .. } if code == "HTTP_502"
        ));
    }

    #[test]
    fn test_encode_update_omits_unset_fields() {
        let rule = Rule::new("ssh", Action::Accept)
            .with_ip_version(IpVersion::V4)
            .with_protocol(Protocol::Tcp)
            .with_dest_port(PortSpec::single(22));
        let update = FirewallUpdate {
            status: FirewallStatus::Active,
            whitelist_provider_services: true,
            filter_ipv6: false,
            rules: RuleLists {
                input: vec![rule],
                output: vec![Rule::new("out", Action::Accept)],
            },
        };
        let form = encode_update(&update);
        let has = |k: &str, v: &str| form.iter().any(|(fk, fv)| fk == k && fv == v);

        assert!(has("status", "active"));
        assert!(has("whitelist_hos", "true"));
        assert!(has("rules[input][0][dst_port]", "22"));
        assert!(has("rules[input][0][ip_version]", "ipv4"));
        assert!(has("rules[output][0][action]", "accept"));
        assert!(!form.iter().any(|(k, _)| k == "rules[input][0][src_ip]"));
        assert!(!form.iter().any(|(k, _)| k == "rules[output][0][protocol]"));
    }

    #[test]
    fn test_encode_template() {
        let draft = TemplateDraft::empty("base");
        let form = encode_template(&draft);
        assert_eq!(form[0], ("name".to_string(), "base".to_string()));
        assert!(form.iter().any(|(k, v)| k == "is_default" && v == "false"));
    }
}
