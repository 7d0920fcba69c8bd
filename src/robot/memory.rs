//! In-process transport
//!
//! Behaves like the web service closely enough to drive the engine without a
//! network: it keeps firewalls and templates in memory, can report scripted
//! `in process` states, re-injects the provider's auto rule after updates and
//! records every call for inspection.

use super::{Transport, TransportError};
use crate::core::auto_rules::{MAIL_BLOCK_NAME, MAIL_BLOCK_PORTS, is_auto_rule};
use crate::core::firewall::{
    Action, Direction, FirewallConfig, FirewallStatus, FirewallTemplate, FirewallUpdate, Protocol,
    Rule, RuleLists, TemplateDraft,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetFirewall(String),
    UpdateFirewall(String, FirewallUpdate),
    DeleteFirewall(String),
    ListTemplates,
    GetTemplate(u32),
    CreateTemplate(TemplateDraft),
    UpdateTemplate(u32, TemplateDraft),
    ApplyTemplate(String, u32),
    DeleteTemplate(u32),
    ProbeReadAccess,
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::UpdateFirewall(..)
                | Call::DeleteFirewall(_)
                | Call::CreateTemplate(_)
                | Call::UpdateTemplate(..)
                | Call::ApplyTemplate(..)
                | Call::DeleteTemplate(_)
        )
    }
}

#[derive(Debug, Default)]
struct State {
    firewalls: HashMap<String, FirewallConfig>,
    templates: BTreeMap<u32, FirewallTemplate>,
    next_template_id: u32,
    /// Statuses reported by upcoming `get_firewall` calls, per server
    scripted_statuses: HashMap<String, VecDeque<FirewallStatus>>,
    auto_rule_direction: Option<Direction>,
    next_write_error: Option<TransportError>,
    writes_denied: bool,
    read_access: bool,
    calls: Vec<Call>,
}

/// In-memory stand-in for the Robot web service.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// The rule the provider injects on its own.
pub fn provider_mail_block() -> Rule {
    Rule {
        name: MAIL_BLOCK_NAME.to_string(),
        ip_version: None,
        action: Action::Discard,
        protocol: Some(Protocol::Tcp),
        source_ip: None,
        dest_ip: None,
        source_port: None,
        dest_port: MAIL_BLOCK_PORTS.parse().ok(),
        tcp_flags: None,
    }
}

/// An active firewall with the given rules.
pub fn active_firewall(server_number: u32, rules: RuleLists) -> FirewallConfig {
    FirewallConfig {
        server_ip: None,
        server_number: Some(server_number),
        status: FirewallStatus::Active,
        whitelist_provider_services: true,
        filter_ipv6: false,
        port: Some("main".to_string()),
        rules,
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_template_id: 1,
                read_access: true,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces the firewall of `server`.
    pub fn with_firewall(self, server: &str, config: FirewallConfig) -> Self {
        self.state().firewalls.insert(server.to_string(), config);
        self
    }

    /// Re-inject the provider's mail-port block into `direction` after every write.
    pub fn with_auto_rule(self, direction: Direction) -> Self {
        self.state().auto_rule_direction = Some(direction);
        self
    }

    pub fn with_template(self, draft: TemplateDraft) -> Self {
        {
            let mut state = self.state();
            let id = state.next_template_id;
            state.next_template_id += 1;
            state.templates.insert(id, template_from(id, draft));
        }
        self
    }

    /// The next `get_firewall` calls for `server` report these statuses, in order.
    pub fn script_statuses(
        &self,
        server: &str,
        statuses: impl IntoIterator<Item = FirewallStatus>,
    ) {
        self.state()
            .scripted_statuses
            .entry(server.to_string())
            .or_default()
            .extend(statuses);
    }

    /// The next write call fails with `err`.
    pub fn fail_next_write(&self, err: TransportError) {
        self.state().next_write_error = Some(err);
    }

    /// Rejects all writes with `UNAUTHORIZED`; `read_access` decides the probe result.
    pub fn deny_writes(&self, read_access: bool) {
        let mut state = self.state();
        state.writes_denied = true;
        state.read_access = read_access;
    }

    pub fn firewall(&self, server: &str) -> Option<FirewallConfig> {
        self.state().firewalls.get(server).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Every update payload sent so far.
    pub fn updates(&self) -> Vec<FirewallUpdate> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::UpdateFirewall(_, update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.state().calls.iter().filter(|c| c.is_write()).count()
    }
}

fn template_from(id: u32, draft: TemplateDraft) -> FirewallTemplate {
    FirewallTemplate {
        id,
        name: draft.name,
        whitelist_provider_services: draft.whitelist_provider_services,
        filter_ipv6: draft.filter_ipv6,
        is_default: draft.is_default,
        rules: draft.rules,
    }
}

fn server_not_found(server: &str) -> TransportError {
    TransportError::api(404, "SERVER_NOT_FOUND", format!("Server {server} not found"))
}

fn template_not_found(id: u32) -> TransportError {
    TransportError::api(
        404,
        "FIREWALL_TEMPLATE_NOT_FOUND",
        format!("Firewall template {id} not found"),
    )
}

impl State {
    /// Common gate for every write: scripted failure, then permission check.
    fn check_write(&mut self) -> Result<(), TransportError> {
        if let Some(err) = self.next_write_error.take() {
            return Err(err);
        }
        if self.writes_denied {
            return Err(TransportError::api(401, "UNAUTHORIZED", "Unauthorized"));
        }
        Ok(())
    }

    fn inject_auto_rule(&self, rules: &mut RuleLists) {
        if let Some(direction) = self.auto_rule_direction {
            let list = rules.get_mut(direction);
            if !list.iter().any(is_auto_rule) {
                list.push(provider_mail_block());
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get_firewall(&self, server: &str) -> Result<FirewallConfig, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::GetFirewall(server.to_string()));

        let scripted = state
            .scripted_statuses
            .get_mut(server)
            .and_then(VecDeque::pop_front);
        let mut config = state
            .firewalls
            .get(server)
            .cloned()
            .ok_or_else(|| server_not_found(server))?;
        if let Some(status) = scripted {
            config.status = status;
        }
        Ok(config)
    }

    async fn update_firewall(
        &self,
        server: &str,
        update: &FirewallUpdate,
    ) -> Result<FirewallConfig, TransportError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::UpdateFirewall(server.to_string(), update.clone()));
        state.check_write()?;

        let mut rules = update.rules.clone();
        state.inject_auto_rule(&mut rules);

        let config = state
            .firewalls
            .get_mut(server)
            .ok_or_else(|| server_not_found(server))?;
        config.status = update.status;
        config.whitelist_provider_services = update.whitelist_provider_services;
        config.filter_ipv6 = update.filter_ipv6;
        config.rules = rules;
        Ok(config.clone())
    }

    async fn delete_firewall(&self, server: &str) -> Result<FirewallConfig, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::DeleteFirewall(server.to_string()));
        state.check_write()?;

        let config = state
            .firewalls
            .get_mut(server)
            .ok_or_else(|| server_not_found(server))?;
        config.status = FirewallStatus::Disabled;
        config.rules = RuleLists::default();
        Ok(config.clone())
    }

    async fn list_templates(&self) -> Result<Vec<FirewallTemplate>, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::ListTemplates);
        Ok(state
            .templates
            .values()
            .map(|t| FirewallTemplate {
                rules: RuleLists::default(),
                ..t.clone()
            })
            .collect())
    }

    async fn get_template(&self, id: u32) -> Result<FirewallTemplate, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::GetTemplate(id));
        state
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| template_not_found(id))
    }

    async fn create_template(
        &self,
        draft: &TemplateDraft,
    ) -> Result<FirewallTemplate, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::CreateTemplate(draft.clone()));
        state.check_write()?;

        let id = state.next_template_id;
        state.next_template_id += 1;
        let template = template_from(id, draft.clone());
        state.templates.insert(id, template.clone());
        Ok(template)
    }

    async fn update_template(
        &self,
        id: u32,
        draft: &TemplateDraft,
    ) -> Result<FirewallTemplate, TransportError> {
        let mut state = self.state();
        state.calls.push(Call::UpdateTemplate(id, draft.clone()));
        state.check_write()?;

        let slot = state
            .templates
            .get_mut(&id)
            .ok_or_else(|| template_not_found(id))?;
        *slot = template_from(id, draft.clone());
        Ok(slot.clone())
    }

    async fn apply_template(
        &self,
        server: &str,
        template_id: u32,
    ) -> Result<FirewallConfig, TransportError> {
        let mut state = self.state();
        state
            .calls
            .push(Call::ApplyTemplate(server.to_string(), template_id));
        state.check_write()?;

        let template = state
            .templates
            .get(&template_id)
            .cloned()
            .ok_or_else(|| template_not_found(template_id))?;
        let mut rules = template.rules;
        state.inject_auto_rule(&mut rules);

        let config = state
            .firewalls
            .get_mut(server)
            .ok_or_else(|| server_not_found(server))?;
        config.status = FirewallStatus::Active;
        config.whitelist_provider_services = template.whitelist_provider_services;
        config.filter_ipv6 = template.filter_ipv6;
        config.rules = rules;
        Ok(config.clone())
    }

    async fn delete_template(&self, id: u32) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(Call::DeleteTemplate(id));
        state.check_write()?;

        state
            .templates
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| template_not_found(id))
    }

    async fn probe_read_access(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(Call::ProbeReadAccess);
        if state.read_access {
            Ok(())
        } else {
            Err(TransportError::api(401, "UNAUTHORIZED", "Unauthorized"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_statuses_are_consumed_in_order() {
        let transport =
            MemoryTransport::new().with_firewall("1", active_firewall(1, RuleLists::default()));
        transport.script_statuses("1", [FirewallStatus::InProcess, FirewallStatus::InProcess]);

        assert_eq!(transport.get_firewall("1").await.unwrap().status, FirewallStatus::InProcess);
        assert_eq!(transport.get_firewall("1").await.unwrap().status, FirewallStatus::InProcess);
        assert_eq!(transport.get_firewall("1").await.unwrap().status, FirewallStatus::Active);
    }

    #[tokio::test]
    async fn test_update_reinjects_auto_rule() {
        let transport = MemoryTransport::new()
            .with_firewall("1", active_firewall(1, RuleLists::default()))
            .with_auto_rule(Direction::Output);
        let update = FirewallUpdate {
            status: FirewallStatus::Active,
            whitelist_provider_services: true,
            filter_ipv6: false,
            rules: RuleLists::default(),
        };
        let config = transport.update_firewall("1", &update).await.unwrap();
        assert_eq!(config.rules.output.len(), 1);
        assert!(is_auto_rule(&config.rules.output[0]));
    }

    #[tokio::test]
    async fn test_unknown_server_is_not_found() {
        let transport = MemoryTransport::new();
        let err = transport.get_firewall("404").await.unwrap_err();
        assert!(matches!(err, TransportError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_denied_writes_are_recorded() {
        let transport = MemoryTransport::new();
        transport.deny_writes(true);
        assert!(transport.delete_template(1).await.is_err());
        assert!(transport.probe_read_access().await.is_ok());
        assert_eq!(transport.write_count(), 1);
    }
}
