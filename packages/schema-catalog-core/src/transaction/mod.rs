//! Transaction and lock manager contract consumed by the catalog.

mod memory;

pub use memory::{InjectedAbort, MemoryTransactions};

use std::fmt;

use crate::error::SchemaError;
use crate::ids::ClassId;

/// Class lock modes, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    IntentShared,
    IntentExclusive,
    Shared,
    SharedIntentExclusive,
    Update,
    Exclusive,
}

/// Authorization required for a class operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authorization {
    Select,
    Alter,
    Index,
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Authorization::Select => "SELECT",
            Authorization::Alter => "ALTER",
            Authorization::Index => "INDEX",
        };
        write!(f, "{name}")
    }
}

/// Locking, authorization and savepoint services.
///
/// Every call may block until the lock is granted; a deadlock victim gets
/// [`SchemaError::Deadlock`] or [`SchemaError::UnilaterallyAborted`] after
/// the manager has already rolled the transaction back.
pub trait TransactionManager {
    /// Locks the class in `mode` after checking `auth`.
    ///
    /// # Arguments
    /// * `class` - Class to lock
    /// * `name` - Class name, for error messages
    /// * `mode` - Requested lock mode
    /// * `auth` - Authorization the current user must hold
    fn fetch_class_for_edit(
        &mut self,
        class: ClassId,
        name: &str,
        mode: LockMode,
        auth: Authorization,
    ) -> Result<(), SchemaError>;

    /// Pre-locks a set of classes to reduce lock escalation later.
    fn lock_hint(&mut self, classes: &[ClassId], mode: LockMode) -> Result<(), SchemaError>;

    /// Strongest lock currently held on the class.
    fn held_lock(&self, class: ClassId) -> Option<LockMode>;

    /// Sets a named savepoint.
    fn savepoint(&mut self, name: &str) -> Result<(), SchemaError>;

    /// Rolls back to a named savepoint.
    fn abort_to_savepoint(&mut self, name: &str) -> Result<(), SchemaError>;

    /// Commits the transaction and releases locks.
    fn commit(&mut self) -> Result<(), SchemaError>;

    /// Aborts the transaction and releases locks.
    fn abort(&mut self) -> Result<(), SchemaError>;

    /// Name of the user running the transaction.
    fn current_user(&self) -> &str;
}
