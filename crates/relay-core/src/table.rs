//! The `(role, action)` dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use relay_contracts::{
    agent::Role,
    command::Action,
    error::{RelayError, RelayResult},
};

use crate::traits::RoleHandler;

/// Maps each supported `(role, action)` pair to its handler.
#[derive(Default, Clone)]
pub struct DispatchTable {
    entries: HashMap<(Role, Action), Arc<dyn RoleHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `(role, action)`.
    ///
    /// Rejects pairs the role does not support and pairs registered twice.
    pub fn register(
        &mut self,
        role: Role,
        action: Action,
        handler: Arc<dyn RoleHandler>,
    ) -> RelayResult<()> {
        if !role.supports(action) {
            return Err(RelayError::Config {
                reason: format!("role {} cannot handle action {}", role, action.as_str()),
            });
        }
        if self.entries.contains_key(&(role, action)) {
            return Err(RelayError::Config {
                reason: format!(
                    "handler for ({}, {}) registered twice",
                    role,
                    action.as_str()
                ),
            });
        }
        self.entries.insert((role, action), handler);
        Ok(())
    }

    pub fn lookup(&self, role: Role, action: Action) -> RelayResult<Arc<dyn RoleHandler>> {
        self.entries
            .get(&(role, action))
            .cloned()
            .ok_or_else(|| RelayError::UnsupportedAction {
                action: action.as_str().to_string(),
                role: role.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use relay_contracts::command::Command;

    use super::*;
    use crate::outcome::RoleOutcome;

    struct Noop;

    #[async_trait]
    impl RoleHandler for Noop {
        async fn handle(&self, _cmd: &Command) -> RelayResult<RoleOutcome> {
            Ok(RoleOutcome::new("noop", "success"))
        }
    }

    #[test]
    fn lookup_finds_registered_pair() {
        let mut table = DispatchTable::new();
        table.register(Role::Reviewer, Action::Review, Arc::new(Noop)).unwrap();
        assert!(table.lookup(Role::Reviewer, Action::Review).is_ok());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unsupported_pair_reports_action_and_role() {
        let table = DispatchTable::new();
        let err = table.lookup(Role::Reviewer, Action::Intake).err().unwrap();
        assert_eq!(err.code(), "unsupported_action");
        assert_eq!(err.to_string(), "action intake not supported for role reviewer");
    }

    #[test]
    fn register_rejects_pairs_outside_the_role() {
        let mut table = DispatchTable::new();
        let err = table
            .register(Role::Builder, Action::Review, Arc::new(Noop))
            .unwrap_err();
        assert!(matches!(err, RelayError::Config { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut table = DispatchTable::new();
        table.register(Role::Builder, Action::Implement, Arc::new(Noop)).unwrap();
        assert!(table
            .register(Role::Builder, Action::Implement, Arc::new(Noop))
            .is_err());
        assert_eq!(table.len(), 1);
    }
}
