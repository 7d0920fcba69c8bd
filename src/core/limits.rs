//! Pre-flight rule limit check

use crate::core::error::{Error, LimitSnapshot, Result};
use crate::core::firewall::{Direction, RuleLists};

/// Rejects a batch that would push `direction` past `max` rules.
///
/// `existing` must already exclude provider-injected rules, and `to_add` must
/// count only new, non-duplicate rules.
///
/// # Errors
///
/// Returns `Error::RuleLimitExceeded` carrying current, attempted, resulting
/// and maximum counts.
///
/// # Examples
///
/// ```
/// use robofw::core::firewall::Direction;
/// use robofw::core::limits::validate;
///
/// assert!(validate(Direction::Input, 9, 1, 10).is_ok());
/// assert!(validate(Direction::Input, 9, 2, 10).is_err());
/// ```
pub fn validate(direction: Direction, existing: usize, to_add: usize, max: usize) -> Result<()> {
    let total = existing + to_add;
    if total > max {
        tracing::warn!(
            %direction,
            existing,
            to_add,
            max,
            "Rule limit would be exceeded"
        );
        return Err(Error::RuleLimitExceeded {
            direction,
            current: existing,
            attempted: to_add,
            total,
            max,
        });
    }
    Ok(())
}

/// Same arithmetic, packaged for error classification of the provider's answer.
pub fn snapshot(direction: Direction, existing: usize, to_add: usize, max: usize) -> LimitSnapshot {
    LimitSnapshot {
        direction,
        current: existing,
        attempted: to_add,
        max,
    }
}

/// Snapshot of a full-replace rule set, taken for its fullest direction.
///
/// Nothing of the replaced set survives, so `current` is zero. Ties go to
/// `input`.
pub fn replacement_snapshot(rules: &RuleLists, max: usize) -> LimitSnapshot {
    let direction = if rules.output.len() > rules.input.len() {
        Direction::Output
    } else {
        Direction::Input
    };
    snapshot(direction, 0, rules.get(direction).len(), max)
}
