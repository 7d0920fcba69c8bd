//! Reconciliation engine
//!
//! Every operation is one fresh read-modify-write cycle against the provider:
//!
//! 1. wait until the firewall is ready (the readiness poll doubles as the read)
//! 2. build candidate rules (builders or expansion, already normalised)
//! 3. drop candidates that duplicate live rules and report them as skipped
//! 4. strip provider-injected rules from both directions
//! 5. check the per-direction limit, prepend the new rules
//! 6. submit the full rule set and classify any failure
//!
//! Two contracts are kept apart on purpose. The additive operations
//! ([`Reconciler::allow_ssh`], [`Reconciler::add_rule`], ...) merge into the
//! live rules and are idempotent. [`Reconciler::reconcile`] replaces the
//! user rules wholesale with a desired state and never merges.
//!
//! Nothing is cached between operations and no write is retried.

use crate::core::auto_rules::{is_auto_rule, strip_rule_lists};
use crate::core::builders;
use crate::core::dedup::partition_new;
use crate::core::error::{Error, ErrorContext, Result, RULE_LIMIT_CODE, classify};
use crate::core::expand::expand;
use crate::core::firewall::{
    Direction, FirewallConfig, FirewallStatus, FirewallTemplate, FirewallUpdate, Rule, RuleLists,
    TemplateDraft, MAX_RULES_PER_DIRECTION,
};
use crate::core::limits;
use crate::core::normalize::normalize_rule;
use crate::core::readiness::ReadinessWaiter;
use crate::core::templates;
use crate::myip::PublicIpResolver;
use crate::robot::{Transport, TransportError};
use serde::Serialize;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

/// Where allowed traffic may come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sources {
    /// Explicit addresses or networks; empty means "anywhere"
    Explicit(Vec<String>),
    /// The caller's own public address
    MyIp,
}

/// Identifies a rule in the live list of one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSelector {
    Name(String),
    /// Zero-based position in the live list, auto rules included
    Index(usize),
}

/// Outcome of an additive operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub direction: Direction,
    pub added: Vec<Rule>,
    /// Candidates that duplicated an existing rule or an earlier candidate
    pub skipped: Vec<Rule>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
    }
}

/// The complete desired firewall of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredFirewall {
    pub status: FirewallStatus,
    pub whitelist_provider_services: bool,
    pub filter_ipv6: bool,
    /// Already expanded; auto rules are ignored
    pub rules: RuleLists,
    /// When set the template is applied instead of `rules`
    pub template_id: Option<u32>,
}

impl Default for DesiredFirewall {
    fn default() -> Self {
        Self {
            status: FirewallStatus::Active,
            whitelist_provider_services: true,
            filter_ipv6: false,
            rules: RuleLists::default(),
            template_id: None,
        }
    }
}

/// Outcome of a declarative apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub config: FirewallConfig,
    /// `false` when the live state already matched and nothing was written
    pub changed: bool,
}

/// Drives every firewall operation through one transport.
pub struct Reconciler<T> {
    transport: T,
    waiter: ReadinessWaiter,
    max_rules: usize,
    ip_resolver: Option<Arc<dyn PublicIpResolver>>,
}

impl<T: Transport> Reconciler<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            waiter: ReadinessWaiter::default(),
            max_rules: MAX_RULES_PER_DIRECTION,
            ip_resolver: None,
        }
    }

    pub fn with_waiter(mut self, waiter: ReadinessWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn with_max_rules(mut self, max_rules: usize) -> Self {
        self.max_rules = max_rules;
        self
    }

    pub fn with_ip_resolver(mut self, resolver: Arc<dyn PublicIpResolver>) -> Self {
        self.ip_resolver = Some(resolver);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ---- additive operations -------------------------------------------

    /// Accepts SSH from each source.
    pub async fn allow_ssh(&self, server: &str, sources: &Sources) -> Result<ReconcileReport> {
        let ips = self.resolve_sources(sources).await?;
        let rules = builders::allow_ssh(&ips)?;
        self.add_rules(server, Direction::Input, rules).await
    }

    /// Accepts HTTPS from each source.
    pub async fn allow_https(&self, server: &str, sources: &Sources) -> Result<ReconcileReport> {
        let ips = self.resolve_sources(sources).await?;
        let rules = builders::allow_https(&ips)?;
        self.add_rules(server, Direction::Input, rules).await
    }

    /// Accepts SSH and MOSH from each source plus TCP return traffic.
    pub async fn allow_mosh(&self, server: &str, sources: &Sources) -> Result<ReconcileReport> {
        let ips = self.resolve_sources(sources).await?;
        let rules = builders::allow_mosh(&ips)?;
        self.add_rules(server, Direction::Input, rules).await
    }

    /// Discards plain HTTP on both IP versions.
    pub async fn block_http(&self, server: &str) -> Result<ReconcileReport> {
        self.add_rules(server, Direction::Input, builders::block_http()?)
            .await
    }

    /// Adds `rule` once per (source, destination) pair.
    pub async fn add_rule(
        &self,
        server: &str,
        direction: Direction,
        rule: &Rule,
        source_ips: &[String],
        dest_ips: &[String],
    ) -> Result<ReconcileReport> {
        let rules = expand(rule, source_ips, dest_ips)?;
        self.add_rules(server, direction, rules).await
    }

    /// Merges normalised `candidates` in front of the live rules of `direction`.
    ///
    /// # Errors
    ///
    /// `RuleLimitExceeded` before any write when the new rules do not fit;
    /// classified provider errors otherwise.
    pub async fn add_rules(
        &self,
        server: &str,
        direction: Direction,
        candidates: Vec<Rule>,
    ) -> Result<ReconcileReport> {
        let config = self.waiter.wait_until_ready(&self.transport, server).await?;

        let (fresh, skipped) = partition_new(config.rules.get(direction), candidates);
        for rule in &skipped {
            debug!(server, %direction, rule = %rule.name, "Rule already present, skipping");
        }

        let mut report = ReconcileReport {
            direction,
            added: Vec::new(),
            skipped,
        };
        if fresh.is_empty() {
            info!(server, %direction, skipped = report.skipped.len(), "Nothing to add");
            return Ok(report);
        }

        let mut rules = strip_rule_lists(&config.rules);
        let existing = rules.get(direction).len();
        limits::validate(direction, existing, fresh.len(), self.max_rules)?;

        rules.get_mut(direction).splice(0..0, fresh.iter().cloned());
        let update = FirewallUpdate::replacing_rules(&config, rules);
        let ctx = ErrorContext::server(server)
            .with_rules(update.rules.names())
            .with_limit(limits::snapshot(
                direction,
                existing,
                fresh.len(),
                self.max_rules,
            ));

        self.submit(server, &update, &ctx, "update firewall").await?;
        info!(
            server,
            %direction,
            added = fresh.len(),
            skipped = report.skipped.len(),
            "Firewall rules added"
        );
        report.added = fresh;
        Ok(report)
    }

    /// Removes one user rule and returns it.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matches the selector, `InvalidInput` if the
    /// selected rule was injected by the provider.
    pub async fn delete_rule(
        &self,
        server: &str,
        direction: Direction,
        selector: &RuleSelector,
    ) -> Result<Rule> {
        let config = self.waiter.wait_until_ready(&self.transport, server).await?;
        let live = config.rules.get(direction);

        let index = match selector {
            RuleSelector::Name(name) => live.iter().position(|r| &r.name == name).ok_or_else(|| {
                Error::not_found(
                    format!("{direction} rule"),
                    format!("no rule named '{name}' on server {server}"),
                )
            })?,
            RuleSelector::Index(index) if *index < live.len() => *index,
            RuleSelector::Index(index) => {
                return Err(Error::not_found(
                    format!("{direction} rule"),
                    format!(
                        "index {index} out of range, server {server} has {} {direction} rule(s)",
                        live.len()
                    ),
                ));
            }
        };

        let target = live[index].clone();
        if is_auto_rule(&target) {
            return Err(Error::InvalidInput {
                message: format!(
                    "'{}' is injected by the provider and cannot be deleted",
                    target.name
                ),
                rules: vec![target.name],
            });
        }

        let mut rules = strip_rule_lists(&config.rules);
        *rules.get_mut(direction) = live
            .iter()
            .enumerate()
            .filter(|(i, r)| *i != index && !is_auto_rule(r))
            .map(|(_, r)| r.clone())
            .collect();

        let update = FirewallUpdate::replacing_rules(&config, rules);
        let ctx = self.replacement_ctx(ErrorContext::server(server), &update.rules);
        self.submit(server, &update, &ctx, "update firewall").await?;

        info!(server, %direction, rule = %target.name, "Firewall rule deleted");
        Ok(target)
    }

    // ---- reads ---------------------------------------------------------

    /// The live configuration, auto rules included.
    ///
    /// With a direction, the other direction's list is left empty.
    pub async fn list_rules(
        &self,
        server: &str,
        direction: Option<Direction>,
    ) -> Result<FirewallConfig> {
        let mut config = self
            .transport
            .get_firewall(server)
            .await
            .map_err(|e| classify(e, &ErrorContext::server(server)))?;

        if let Some(keep) = direction {
            for other in Direction::iter().filter(|d| *d != keep) {
                config.rules.get_mut(other).clear();
            }
        }
        Ok(config)
    }

    pub async fn wait_until_ready(&self, server: &str) -> Result<FirewallConfig> {
        self.waiter.wait_until_ready(&self.transport, server).await
    }

    // ---- authoritative operations ---------------------------------------

    /// Makes the server's firewall match `desired` exactly.
    ///
    /// User rules are replaced wholesale, with no merge against the live
    /// state. A desired template is applied as-is.
    pub async fn reconcile(&self, server: &str, desired: &DesiredFirewall) -> Result<ApplyOutcome> {
        if let Some(template_id) = desired.template_id {
            let config = self.apply_template(server, template_id).await?;
            return Ok(ApplyOutcome {
                config,
                changed: true,
            });
        }

        let rules = self.prepare_rule_lists(&desired.rules)?;
        let config = self.waiter.wait_until_ready(&self.transport, server).await?;

        if strip_rule_lists(&config.rules) == rules
            && config.status == desired.status
            && config.whitelist_provider_services == desired.whitelist_provider_services
            && config.filter_ipv6 == desired.filter_ipv6
        {
            info!(server, "Firewall already matches desired state");
            return Ok(ApplyOutcome {
                config,
                changed: false,
            });
        }

        let update = FirewallUpdate {
            status: desired.status,
            whitelist_provider_services: desired.whitelist_provider_services,
            filter_ipv6: desired.filter_ipv6,
            rules,
        };
        let ctx = self.replacement_ctx(ErrorContext::server(server), &update.rules);
        let config = self.submit(server, &update, &ctx, "update firewall").await?;

        info!(
            server,
            input = update.rules.input.len(),
            output = update.rules.output.len(),
            "Firewall replaced with desired state"
        );
        Ok(ApplyOutcome {
            config,
            changed: true,
        })
    }

    /// Replaces the server's rules and flags with a template's.
    ///
    /// Templates skip dedup and limit checks; the provider validates them.
    pub async fn apply_template(&self, server: &str, template_id: u32) -> Result<FirewallConfig> {
        self.waiter.wait_until_ready(&self.transport, server).await?;

        let ctx = ErrorContext {
            resource: format!("server {server} or template {template_id}"),
            server: Some(server.to_string()),
            ..ErrorContext::default()
        };
        let result = self.transport.apply_template(server, template_id).await;
        let ctx = match &result {
            Err(TransportError::Api { code, .. }) if code == RULE_LIMIT_CODE => {
                self.template_limit_ctx(ctx, template_id).await
            }
            _ => ctx,
        };
        let config = self.check_write(result, &ctx, "apply template").await?;

        info!(server, template_id, "Firewall template applied");
        Ok(config)
    }

    /// Deletes the firewall configuration of the server outright.
    pub async fn reset_to_empty(&self, server: &str) -> Result<FirewallConfig> {
        self.waiter.wait_until_ready(&self.transport, server).await?;

        let result = self.transport.delete_firewall(server).await;
        let config = self
            .check_write(result, &ErrorContext::server(server), "delete firewall")
            .await?;

        info!(server, "Firewall reset");
        Ok(config)
    }

    // ---- templates -----------------------------------------------------

    /// Every template of the account, without rules.
    pub async fn list_templates(&self) -> Result<Vec<FirewallTemplate>> {
        self.transport
            .list_templates()
            .await
            .map_err(|e| classify(e, &ErrorContext::resource("firewall templates")))
    }

    pub async fn get_template(&self, id: u32) -> Result<FirewallTemplate> {
        self.transport
            .get_template(id)
            .await
            .map_err(|e| classify(e, &template_ctx(id)))
    }

    pub async fn create_template(&self, draft: &TemplateDraft) -> Result<FirewallTemplate> {
        let draft = templates::prepare_draft(draft, self.max_rules)?;
        let ctx = self.replacement_ctx(
            ErrorContext::resource(format!("template '{}'", draft.name)),
            &draft.rules,
        );

        let result = self.transport.create_template(&draft).await;
        let template = self.check_write(result, &ctx, "create template").await?;

        info!(id = template.id, name = %template.name, "Firewall template created");
        Ok(template)
    }

    /// Snapshots a server's current user rules and flags as a new template.
    pub async fn create_template_from_server(
        &self,
        server: &str,
        name: &str,
    ) -> Result<FirewallTemplate> {
        let config = self.list_rules(server, None).await?;
        let draft = templates::draft_from_config(name, &config);
        self.create_template(&draft).await
    }

    pub async fn update_template(
        &self,
        id: u32,
        draft: &TemplateDraft,
    ) -> Result<FirewallTemplate> {
        let draft = templates::prepare_draft(draft, self.max_rules)?;
        let ctx = self.replacement_ctx(template_ctx(id), &draft.rules);

        let result = self.transport.update_template(id, &draft).await;
        let template = self.check_write(result, &ctx, "update template").await?;

        info!(id, name = %template.name, "Firewall template updated");
        Ok(template)
    }

    pub async fn delete_template(&self, id: u32) -> Result<()> {
        let result = self.transport.delete_template(id).await;
        self.check_write(result, &template_ctx(id), "delete template")
            .await?;

        info!(id, "Firewall template deleted");
        Ok(())
    }

    // ---- internals -----------------------------------------------------

    async fn resolve_sources(&self, sources: &Sources) -> Result<Vec<String>> {
        match sources {
            Sources::Explicit(list) => Ok(list.clone()),
            Sources::MyIp => {
                let resolver = self.ip_resolver.as_ref().ok_or_else(|| {
                    Error::Config("public IP detection is not available".to_string())
                })?;
                let ip = resolver.resolve().await?;
                info!(%ip, "Using detected public IP");
                Ok(vec![ip.to_string()])
            }
        }
    }

    /// Strips auto rules, normalises and limit-checks a desired rule set.
    fn prepare_rule_lists(&self, rules: &RuleLists) -> Result<RuleLists> {
        let mut prepared = RuleLists::default();
        for direction in Direction::iter() {
            let list = rules
                .get(direction)
                .iter()
                .filter(|r| !is_auto_rule(r))
                .cloned()
                .map(normalize_rule)
                .collect::<Result<Vec<_>>>()?;
            limits::validate(direction, 0, list.len(), self.max_rules)?;
            *prepared.get_mut(direction) = list;
        }
        Ok(prepared)
    }

    /// Attaches the names and limit counts of a rule set that replaces
    /// everything before it.
    fn replacement_ctx(&self, ctx: ErrorContext, rules: &RuleLists) -> ErrorContext {
        ctx.with_rules(rules.names())
            .with_limit(limits::replacement_snapshot(rules, self.max_rules))
    }

    /// Rule names and counts for a rejected template, when it can still be read.
    async fn template_limit_ctx(&self, ctx: ErrorContext, template_id: u32) -> ErrorContext {
        match self.transport.get_template(template_id).await {
            Ok(template) => {
                let rules = strip_rule_lists(&template.rules);
                self.replacement_ctx(ctx, &rules)
            }
            Err(err) => {
                debug!(template_id, error = %err, "Template unreadable after limit rejection");
                ctx
            }
        }
    }

    async fn submit(
        &self,
        server: &str,
        update: &FirewallUpdate,
        ctx: &ErrorContext,
        operation: &str,
    ) -> Result<FirewallConfig> {
        debug!(
            server,
            input = update.rules.input.len(),
            output = update.rules.output.len(),
            "Submitting firewall update"
        );
        let result = self.transport.update_firewall(server, update).await;
        self.check_write(result, ctx, operation).await
    }

    /// Classifies a failed write, telling a missing ordering permission
    /// apart from bad credentials with a read-only probe.
    async fn check_write<R>(
        &self,
        result: std::result::Result<R, TransportError>,
        ctx: &ErrorContext,
        operation: &str,
    ) -> Result<R> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => classify(err, ctx),
        };

        let err = match err {
            Error::Unauthorized(message) => {
                if self.transport.probe_read_access().await.is_ok() {
                    Error::OrderingPermissionMissing {
                        operation: operation.to_string(),
                    }
                } else {
                    Error::Unauthorized(message)
                }
            }
            other => other,
        };

        warn!(operation, kind = err.kind(), error = %err, "Write rejected");
        Err(err)
    }
}

fn template_ctx(id: u32) -> ErrorContext {
    ErrorContext::resource(format!("template {id}"))
}
