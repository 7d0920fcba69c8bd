//! Firewall template files
//!
//! Templates live on the provider's side; this module only moves them in and
//! out of local JSON files and prepares drafts for submission. A template file
//! is a [`TemplateDraft`] serialised with the provider's field names:
//!
//! ```json
//! {
//!   "name": "web",
//!   "whitelist_hos": true,
//!   "filter_ipv6": false,
//!   "rules": { "input": [ { "name": "https", "ip_version": "ipv4", "protocol": "tcp", "dst_port": "443" } ] }
//! }
//! ```

use crate::core::auto_rules::strip_rule_lists;
use crate::core::error::{Error, Result};
use crate::core::firewall::{Direction, FirewallConfig, RuleLists, TemplateDraft};
use crate::core::limits;
use crate::core::normalize::normalize_rule;
use std::path::Path;
use strum::IntoEnumIterator;

/// A draft holding the server's user rules and flags.
pub fn draft_from_config(name: &str, config: &FirewallConfig) -> TemplateDraft {
    TemplateDraft {
        name: name.to_string(),
        whitelist_provider_services: config.whitelist_provider_services,
        filter_ipv6: config.filter_ipv6,
        is_default: false,
        rules: strip_rule_lists(&config.rules),
    }
}

/// Validates the name, strips auto rules, normalises every rule and checks
/// the per-direction limit.
pub fn prepare_draft(draft: &TemplateDraft, max_rules: usize) -> Result<TemplateDraft> {
    let name = crate::validators::validate_template_name(&draft.name)
        .map_err(|message| Error::validation("template name", message))?;

    let stripped = strip_rule_lists(&draft.rules);
    let mut rules = RuleLists::default();
    for direction in Direction::iter() {
        let list = stripped
            .get(direction)
            .iter()
            .cloned()
            .map(normalize_rule)
            .collect::<Result<Vec<_>>>()?;
        limits::validate(direction, 0, list.len(), max_rules)?;
        *rules.get_mut(direction) = list;
    }

    Ok(TemplateDraft {
        name,
        rules,
        ..draft.clone()
    })
}

/// Reads a template file.
pub async fn load_draft(path: &Path) -> Result<TemplateDraft> {
    let json = tokio::fs::read_to_string(path).await?;
    let draft: TemplateDraft = serde_json::from_str(&json)?;
    Ok(draft)
}

/// Writes a template file atomically.
pub async fn save_draft(path: &Path, draft: &TemplateDraft) -> Result<()> {
    let json = serde_json::to_string_pretty(draft)?;
    crate::utils::write_private_file(path, json.as_bytes()).await?;
    Ok(())
}
