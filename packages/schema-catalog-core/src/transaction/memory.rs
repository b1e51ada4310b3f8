//! Single-session transaction manager with test hooks.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::transaction::{Authorization, LockMode, TransactionManager};

/// Failure the next lock request will report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedAbort {
    Deadlock,
    Unilateral,
}

/// In-memory transaction manager for one session.
///
/// Locks never conflict; denials and aborts are injected explicitly.
#[derive(Debug)]
pub struct MemoryTransactions {
    user: String,
    locks: HashMap<ClassId, LockMode>,
    savepoints: Vec<String>,
    denied: HashSet<(String, Authorization)>,
    /// Injected failure and the number of lock requests to let through first
    pending_abort: Option<(InjectedAbort, usize)>,
    aborts_to_savepoint: usize,
    aborted: bool,
}

impl MemoryTransactions {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            locks: HashMap::new(),
            savepoints: Vec::new(),
            denied: HashSet::new(),
            pending_abort: None,
            aborts_to_savepoint: 0,
            aborted: false,
        }
    }

    /// Denies `auth` on the named class.
    pub fn deny(&mut self, class_name: &str, auth: Authorization) {
        self.denied.insert((class_name.to_string(), auth));
    }

    /// Fails the lock request after `after` successful ones.
    pub fn inject_abort(&mut self, abort: InjectedAbort, after: usize) {
        self.pending_abort = Some((abort, after));
    }

    /// Number of savepoint rollbacks requested by the catalog.
    pub fn savepoint_rollbacks(&self) -> usize {
        self.aborts_to_savepoint
    }

    /// Returns `true` if the transaction was aborted by the manager.
    pub fn was_aborted(&self) -> bool {
        self.aborted
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = user.into();
    }

    fn acquire(&mut self, class: ClassId, name: &str, mode: LockMode) -> Result<(), SchemaError> {
        if let Some((abort, remaining)) = self.pending_abort.take() {
            if remaining > 0 {
                self.pending_abort = Some((abort, remaining - 1));
            } else {
                warn!(class = name, ?abort, "aborting transaction");
                self.locks.clear();
                self.savepoints.clear();
                self.aborted = true;
                return Err(match abort {
                    InjectedAbort::Deadlock => SchemaError::Deadlock {
                        class: name.to_string(),
                    },
                    InjectedAbort::Unilateral => {
                        SchemaError::UnilaterallyAborted(format!("while locking '{name}'"))
                    }
                });
            }
        }
        let held = self.locks.entry(class).or_insert(mode);
        if mode > *held {
            *held = mode;
        }
        Ok(())
    }
}

impl Default for MemoryTransactions {
    fn default() -> Self {
        Self::new("dba")
    }
}

impl TransactionManager for MemoryTransactions {
    fn fetch_class_for_edit(
        &mut self,
        class: ClassId,
        name: &str,
        mode: LockMode,
        auth: Authorization,
    ) -> Result<(), SchemaError> {
        if self.denied.contains(&(name.to_string(), auth)) {
            return Err(SchemaError::AuthorizationDenied {
                class: name.to_string(),
                required: auth.to_string(),
            });
        }
        self.acquire(class, name, mode)?;
        debug!(class = name, ?mode, "class locked");
        Ok(())
    }

    fn lock_hint(&mut self, classes: &[ClassId], mode: LockMode) -> Result<(), SchemaError> {
        for class in classes {
            let held = self.locks.entry(*class).or_insert(mode);
            if mode > *held {
                *held = mode;
            }
        }
        Ok(())
    }

    fn held_lock(&self, class: ClassId) -> Option<LockMode> {
        self.locks.get(&class).copied()
    }

    fn savepoint(&mut self, name: &str) -> Result<(), SchemaError> {
        self.aborted = false;
        self.savepoints.push(name.to_string());
        Ok(())
    }

    fn abort_to_savepoint(&mut self, name: &str) -> Result<(), SchemaError> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|s| s == name)
            .ok_or_else(|| SchemaError::SavepointNotFound(name.to_string()))?;
        self.savepoints.truncate(pos + 1);
        self.aborts_to_savepoint += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SchemaError> {
        self.locks.clear();
        self.savepoints.clear();
        Ok(())
    }

    fn abort(&mut self) -> Result<(), SchemaError> {
        self.locks.clear();
        self.savepoints.clear();
        self.aborted = true;
        Ok(())
    }

    fn current_user(&self) -> &str {
        &self.user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_upgrade_keeps_strongest() {
        let mut tx = MemoryTransactions::default();
        tx.fetch_class_for_edit(ClassId(1), "t", LockMode::IntentExclusive, Authorization::Select)
            .unwrap();
        tx.fetch_class_for_edit(ClassId(1), "t", LockMode::Exclusive, Authorization::Alter)
            .unwrap();
        tx.fetch_class_for_edit(ClassId(1), "t", LockMode::Shared, Authorization::Select)
            .unwrap();
        assert_eq!(tx.held_lock(ClassId(1)), Some(LockMode::Exclusive));
        tx.commit().unwrap();
        assert_eq!(tx.held_lock(ClassId(1)), None);
    }

    #[test]
    fn test_denied_authorization() {
        let mut tx = MemoryTransactions::default();
        tx.deny("t", Authorization::Alter);
        let err = tx
            .fetch_class_for_edit(ClassId(1), "t", LockMode::Update, Authorization::Alter)
            .unwrap_err();
        assert!(matches!(err, SchemaError::AuthorizationDenied { .. }));
        assert_eq!(tx.held_lock(ClassId(1)), None);
    }

    #[test]
    fn test_injected_deadlock_after_n_locks() {
        let mut tx = MemoryTransactions::default();
        tx.inject_abort(InjectedAbort::Deadlock, 1);
        assert!(tx
            .fetch_class_for_edit(ClassId(1), "a", LockMode::Update, Authorization::Alter)
            .is_ok());
        let err = tx
            .fetch_class_for_edit(ClassId(2), "b", LockMode::Update, Authorization::Alter)
            .unwrap_err();
        assert!(err.is_unilateral_abort());
        assert!(tx.was_aborted());
        assert_eq!(tx.held_lock(ClassId(1)), None);
    }
}
