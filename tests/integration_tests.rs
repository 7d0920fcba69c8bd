//! Integration tests for robofw
//!
//! These tests drive the public API end to end against `MemoryTransport`:
//! declarative files, templates on disk, permission failures and the config
//! and audit files. No network access is needed.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use robofw::audit::{AuditEvent, AuditLog, EventType};
use robofw::config::{self, AppConfig, ENV_PASSWORD, ENV_USER};
use robofw::core::auto_rules::is_auto_rule;
use robofw::core::declarative::{self, FirewallDocument};
use robofw::core::firewall::{FirewallStatus, PortSpec, RuleLists, TemplateDraft};
use robofw::core::readiness::ReadinessWaiter;
use robofw::core::templates;
use robofw::myip::StaticIpResolver;
use robofw::robot::memory::{active_firewall, provider_mail_block};
use robofw::robot::{MemoryTransport, TransportError};
use robofw::{
    Action, Direction, Error, IpVersion, Protocol, Reconciler, Rule, RuleSelector, Sources,
};
use std::sync::Arc;
use std::time::Duration;

const SERVER: &str = "321";

fn server() -> MemoryTransport {
    MemoryTransport::new()
        .with_firewall(SERVER, active_firewall(321, RuleLists::default()))
        .with_auto_rule(Direction::Output)
}

fn reconciler(transport: MemoryTransport) -> Reconciler<MemoryTransport> {
    Reconciler::new(transport)
        .with_waiter(ReadinessWaiter::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
        ))
        .with_ip_resolver(Arc::new(StaticIpResolver("198.51.100.20".parse().unwrap())))
}

const DOCUMENT: &str = r#"{
    "status": "active",
    "whitelist_hos": true,
    "rules": {
        "input": [
            {
                "name": "ssh",
                "protocol": "tcp",
                "source_ips": ["192.0.2.10", "192.0.2.11/32"],
                "destination_port": "22"
            },
            { "name": "icmp", "ip_version": "ipv4", "protocol": "icmp" }
        ],
        "output": [
            { "name": "all out", "action": "accept" }
        ]
    }
}"#;

#[tokio::test(start_paused = true)]
async fn test_declarative_file_apply_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firewall.json");
    tokio::fs::write(&path, DOCUMENT).await.unwrap();

    let desired = FirewallDocument::load(&path).await.unwrap().to_desired().unwrap();
    assert_eq!(desired.rules.input.len(), 3);
    assert_eq!(desired.rules.input[0].name, "ssh #1");
    assert_eq!(desired.rules.input[1].name, "ssh #2");

    let rec = reconciler(server());
    let first = rec.reconcile(SERVER, &desired).await.unwrap();
    assert!(first.changed);
    assert!(first.config.rules.output.iter().any(is_auto_rule));

    let writes = rec.transport().write_count();
    let second = rec.reconcile(SERVER, &desired).await.unwrap();
    assert!(!second.changed);
    assert_eq!(rec.transport().write_count(), writes);
}

#[tokio::test(start_paused = true)]
async fn test_plan_before_and_after_apply() {
    let desired = FirewallDocument::from_json(DOCUMENT)
        .unwrap()
        .to_desired()
        .unwrap();
    let rec = reconciler(server());

    let live = rec.list_rules(SERVER, None).await.unwrap();
    let plan = declarative::plan(&live, &desired);
    assert!(plan.has_changes());
    assert_eq!(plan.removals, 0);
    assert!(plan.additions >= 4);

    rec.reconcile(SERVER, &desired).await.unwrap();

    let live = rec.list_rules(SERVER, None).await.unwrap();
    let plan = declarative::plan(&live, &desired);
    assert!(!plan.has_changes(), "unexpected diff:\n{}", plan.diff);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_document_is_rejected_locally() {
    let ips: Vec<String> = (1..=11).map(|i| format!("\"192.0.2.{i}\"")).collect();
    let json = format!(
        r#"{{ "rules": {{ "input": [ {{ "name": "many", "source_ips": [{}] }} ] }} }}"#,
        ips.join(",")
    );
    let desired = FirewallDocument::from_json(&json).unwrap().to_desired().unwrap();

    let rec = reconciler(server());
    let err = rec.reconcile(SERVER, &desired).await.unwrap_err();
    assert!(matches!(err, Error::RuleLimitExceeded { total: 11, .. }));
    assert_eq!(rec.transport().write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_ordering_permission_is_detected() {
    let rec = reconciler(server());
    rec.transport().deny_writes(true);

    let err = rec.block_http(SERVER).await.unwrap_err();
    assert!(
        matches!(err, Error::OrderingPermissionMissing { .. }),
        "got {err:?}"
    );
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_bad_credentials_stay_unauthorized() {
    let rec = reconciler(server());
    rec.transport().deny_writes(false);

    let err = rec.block_http(SERVER).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_rejected_batch_reports_all_rule_names() {
    let rec = reconciler(server());
    rec.transport().fail_next_write(TransportError::api(
        400,
        "INVALID_INPUT",
        "invalid input",
    ));

    let template = Rule::new("api", Action::Accept)
        .with_protocol(Protocol::Tcp)
        .with_dest_port(PortSpec::single(8443));
    let err = rec
        .add_rule(
            SERVER,
            Direction::Input,
            &template,
            &["192.0.2.1".into(), "192.0.2.2".into()],
            &[],
        )
        .await
        .unwrap_err();

    match err {
        Error::InvalidInput { rules, .. } => {
            assert!(rules.contains(&"api #1".to_string()));
            assert!(rules.contains(&"api #2".to_string()));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_delete_rule_by_name_and_index() {
    let rec = reconciler(server());
    rec.allow_ssh(SERVER, &Sources::Explicit(vec!["192.0.2.1".into(), "192.0.2.2".into()]))
        .await
        .unwrap();

    let removed = rec
        .delete_rule(
            SERVER,
            Direction::Input,
            &RuleSelector::Name("Allow SSH from 192.0.2.1/32".into()),
        )
        .await
        .unwrap();
    assert_eq!(removed.source_ip.unwrap().to_string(), "192.0.2.1/32");

    let live = rec.transport().firewall(SERVER).unwrap();
    assert_eq!(live.rules.input.len(), 1);

    // The provider's mail block sits in the output list and cannot be removed.
    let auto_index = live.rules.output.iter().position(is_auto_rule).unwrap();
    let err = rec
        .delete_rule(SERVER, Direction::Output, &RuleSelector::Index(auto_index))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput { .. }));

    let err = rec
        .delete_rule(SERVER, Direction::Input, &RuleSelector::Index(7))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test(start_paused = true)]
async fn test_unknown_server_is_not_found() {
    let rec = reconciler(server());
    let err = rec.allow_https("999", &Sources::Explicit(vec![])).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
    assert_eq!(rec.transport().write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_https_from_anywhere_covers_both_ip_versions() {
    let rec = reconciler(server());
    let report = rec
        .allow_https(SERVER, &Sources::Explicit(vec![]))
        .await
        .unwrap();

    let versions: Vec<_> = report.added.iter().map(|r| r.ip_version).collect();
    assert_eq!(versions, vec![Some(IpVersion::V4), Some(IpVersion::V6)]);
    assert!(report.added.iter().all(|r| r.source_ip.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_template_export_and_reimport() {
    let rec = reconciler(server());
    rec.allow_ssh(SERVER, &Sources::MyIp).await.unwrap();
    let template = rec
        .create_template_from_server(SERVER, "from server")
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template.json");
    templates::save_draft(&path, &TemplateDraft::from(template.clone()))
        .await
        .unwrap();

    let mut draft = templates::load_draft(&path).await.unwrap();
    draft.name = "copy".into();
    let copy = rec.create_template(&draft).await.unwrap();

    assert_ne!(copy.id, template.id);
    assert_eq!(copy.rules, template.rules);
    assert!(!copy.rules.output.iter().any(is_auto_rule));
}

#[tokio::test(start_paused = true)]
async fn test_reset_then_apply_template_restores_rules() {
    let rec = reconciler(server().with_template(TemplateDraft {
        rules: RuleLists {
            input: vec![provider_mail_block()],
            output: vec![],
        },
        ..TemplateDraft::empty("only auto")
    }));
    rec.allow_ssh(SERVER, &Sources::MyIp).await.unwrap();

    let reset = rec.reset_to_empty(SERVER).await.unwrap();
    assert_eq!(reset.status, FirewallStatus::Disabled);

    let templates = rec.list_templates().await.unwrap();
    assert_eq!(templates.len(), 1);
    rec.apply_template(SERVER, templates[0].id).await.unwrap();
}

#[tokio::test]
async fn test_config_file_roundtrip_with_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let saved = AppConfig {
        username: Some("#ws+abc".into()),
        password: Some("from-file".into()),
        ..AppConfig::default()
    };
    config::save_config_to(&path, &saved).await.unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let loaded = config::load_config_from(&path).await.unwrap();
    assert_eq!(loaded, saved);

    let overridden = loaded.with_overrides(|key| match key {
        k if k == ENV_PASSWORD => Some("from-env".to_string()),
        k if k == ENV_USER => Some(String::new()),
        _ => None,
    });
    let credentials = overridden.credentials().unwrap();
    assert_eq!(credentials.username, "#ws+abc");
    assert_eq!(credentials.password, "from-env");
    assert!(!format!("{credentials:?}").contains("from-env"));
}

#[tokio::test]
async fn test_audit_log_appends_events() {
    let dir = tempfile::tempdir().unwrap();
    let log = AuditLog::at(dir.path().join("audit.log"));

    log.log(&AuditEvent::new(
        EventType::AllowSsh,
        Some(SERVER),
        true,
        serde_json::json!({ "added": ["Allow SSH from 192.0.2.1/32"] }),
        None,
    ))
    .await
    .unwrap();
    log.log(&AuditEvent::new(
        EventType::ResetFirewall,
        Some(SERVER),
        false,
        serde_json::json!({}),
        Some("Unauthorized".into()),
    ))
    .await
    .unwrap();

    let events = log.read_recent(10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| e.event_type == EventType::ResetFirewall && !e.success));
}
