//! Locking and re-flattening the class lattice around an edit.
//!
//! Superclasses are locked before subclasses, and a subclass is flattened
//! only after every class it inherits from inside the edit set has a
//! pending definition.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::catalog::SchemaCatalog;
use crate::ddl::CommitOptions;
use crate::domain::HierarchyView;
use crate::error::SchemaError;
use crate::flatten::flatten;
use crate::ids::ClassId;
use crate::storage::StorageEngine;
use crate::template::Template;
use crate::transaction::{Authorization, TransactionManager};

/// Phases of one class edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    Init,
    LockSupers,
    FlattenSelf,
    LockSubs,
    FlattenSubs,
    InstallAll,
    Commit,
    Abort,
}

/// Tracks the phase of a running edit for logging and for deciding how
/// far cleanup has to go.
#[derive(Debug)]
pub(crate) struct EditCoordinator {
    phase: EditPhase,
    target: String,
}

impl EditCoordinator {
    pub(crate) fn new(target: &str) -> Self {
        Self {
            phase: EditPhase::Init,
            target: target.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> EditPhase {
        self.phase
    }

    pub(crate) fn advance(&mut self, next: EditPhase) {
        debug!(class = %self.target, from = ?self.phase, to = ?next, "edit phase");
        self.phase = next;
    }

    /// Moves to `Abort`; returns the phase the edit failed in.
    pub(crate) fn abort(&mut self, err: &SchemaError) -> EditPhase {
        let failed = self.phase;
        warn!(class = %self.target, phase = ?failed, error = %err, "class edit aborted");
        self.phase = EditPhase::Abort;
        failed
    }
}

impl<S: StorageEngine, T: TransactionManager> SchemaCatalog<S, T> {
    /// Every class reachable upwards from `supers`, `supers` included.
    fn ancestors_of(&self, target: Option<ClassId>, name: &str, supers: &[ClassId]) -> Result<Vec<ClassId>, SchemaError> {
        let view = self.view();
        let mut out: Vec<ClassId> = Vec::new();
        let mut stack: Vec<ClassId> = supers.to_vec();
        while let Some(current) = stack.pop() {
            if Some(current) == target {
                return Err(SchemaError::CycleDetected {
                    class: name.to_string(),
                    through: self.class_name(current),
                });
            }
            if out.contains(&current) {
                continue;
            }
            out.push(current);
            stack.extend(view.superclasses_of(current));
        }
        Ok(out)
    }

    /// Locks superclasses added to or removed from the template, with
    /// their own ancestors.
    ///
    /// # Returns
    /// All ancestors of the template's new inheritance list.
    pub(crate) fn lock_superclasses(
        &mut self,
        template: &Template,
        options: &CommitOptions,
    ) -> Result<Vec<ClassId>, SchemaError> {
        let current_supers = match template.current {
            Some(id) => self.class_by_id(id)?.inheritance.clone(),
            None => Vec::new(),
        };
        let ancestors = self.ancestors_of(template.current, &template.name, &template.inheritance)?;

        let changed: Vec<ClassId> = template
            .inheritance
            .iter()
            .filter(|c| !current_supers.contains(c))
            .chain(current_supers.iter().filter(|c| !template.inheritance.contains(c)))
            .copied()
            .collect();
        if !options.lock_hierarchy || changed.is_empty() {
            return Ok(ancestors);
        }

        let mut to_lock = changed.clone();
        for sup in self.ancestors_of(template.current, &template.name, &changed)? {
            if !to_lock.contains(&sup) {
                to_lock.push(sup);
            }
        }
        self.transactions.lock_hint(&to_lock, options.edit_lock)?;
        for class in &to_lock {
            let name = self.class_name(*class);
            self.transactions
                .fetch_class_for_edit(*class, &name, options.edit_lock, Authorization::Select)?;
        }
        debug!(class = %template.name, locked = to_lock.len(), "locked superclasses");
        Ok(ancestors)
    }

    /// Locks every class below `target` and orders them so that each
    /// class follows all of its superclasses in the set.
    ///
    /// A subclass that is also an ancestor of the target closes a cycle.
    pub(crate) fn lock_subclasses(
        &mut self,
        target: ClassId,
        ancestors: &[ClassId],
        options: &CommitOptions,
    ) -> Result<Vec<ClassId>, SchemaError> {
        let mut found: Vec<ClassId> = Vec::new();
        let mut stack = self.class_by_id(target)?.users.clone();
        while let Some(sub) = stack.pop() {
            if sub == target || ancestors.contains(&sub) {
                return Err(SchemaError::CycleDetected {
                    class: self.class_name(target),
                    through: self.class_name(sub),
                });
            }
            if found.contains(&sub) {
                continue;
            }
            found.push(sub);
            stack.extend(self.class_by_id(sub)?.users.iter().copied());
        }
        if found.is_empty() {
            return Ok(found);
        }

        self.transactions.lock_hint(&found, options.edit_lock)?;
        for sub in &found {
            let name = self.class_name(*sub);
            self.transactions
                .fetch_class_for_edit(*sub, &name, options.edit_lock, Authorization::Select)?;
        }

        let members: HashSet<ClassId> = found.iter().copied().collect();
        let mut ordered: Vec<ClassId> = Vec::with_capacity(found.len());
        while ordered.len() < found.len() {
            let before = ordered.len();
            for sub in &found {
                if ordered.contains(sub) {
                    continue;
                }
                let ready = self
                    .class_by_id(*sub)?
                    .inheritance
                    .iter()
                    .all(|sup| !members.contains(sup) || ordered.contains(sup));
                if ready {
                    ordered.push(*sub);
                }
            }
            if ordered.len() == before {
                return Err(SchemaError::CycleDetected {
                    class: self.class_name(target),
                    through: self.class_name(found[0]),
                });
            }
        }
        debug!(class = %self.class_name(target), subclasses = ordered.len(), "locked subclasses");
        Ok(ordered)
    }

    /// Re-flattens each subclass against the pending definitions above it.
    ///
    /// On failure every pending subclass edit is released before the
    /// error is returned.
    pub(crate) fn flatten_subclasses(&mut self, subs: &[ClassId], auto_resolve: bool) -> Result<(), SchemaError> {
        for sub in subs {
            if let Err(err) = self.flatten_subclass(*sub, auto_resolve) {
                self.abort_subclasses(subs);
                return Err(err);
            }
        }
        Ok(())
    }

    fn flatten_subclass(&mut self, sub: ClassId, auto_resolve: bool) -> Result<(), SchemaError> {
        let class = self.class_by_id(sub)?;
        let template = Template::from_class(class, |id| self.class_name(id))?;
        let flat = flatten(&template, &self.view(), auto_resolve)?;
        debug!(class = %flat.name, "flattened subclass");
        self.pending.insert(sub, flat);
        Ok(())
    }

    /// Releases the pending edits of the given subclasses.
    pub(crate) fn abort_subclasses(&mut self, subs: &[ClassId]) {
        for sub in subs {
            if self.pending.remove(*sub).is_some() {
                debug!(class = %self.class_name(*sub), "released pending subclass edit");
            }
        }
    }

    /// Updates the subclass lists of superclasses after `class` changed
    /// its inheritance from `old` to `new`.
    pub(crate) fn update_back_references(
        &mut self,
        class: ClassId,
        old: &[ClassId],
        new: &[ClassId],
    ) -> Result<(), SchemaError> {
        for removed in old.iter().filter(|c| !new.contains(c)) {
            if let Some(sup) = self.state.classes.get_mut(removed) {
                sup.users.retain(|u| *u != class);
            }
        }
        for added in new.iter().filter(|c| !old.contains(c)) {
            let sup = self.class_by_id_mut(*added)?;
            if !sup.users.contains(&class) {
                sup.users.push(class);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_records_failed_phase() {
        let mut coordinator = EditCoordinator::new("t");
        coordinator.advance(EditPhase::LockSupers);
        coordinator.advance(EditPhase::FlattenSelf);
        let failed = coordinator.abort(&SchemaError::ClassAlreadyExists("t".to_string()));
        assert_eq!(failed, EditPhase::FlattenSelf);
        assert_eq!(coordinator.phase(), EditPhase::Abort);
    }
}
