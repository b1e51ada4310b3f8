//! In-flight edits of one DDL operation.

use std::collections::BTreeMap;

use crate::class::Class;
use crate::domain::HierarchyView;
use crate::flatten::FlattenContext;
use crate::ids::ClassId;
use crate::template::FlatTemplate;

/// Flattened templates of every class checked out by the running DDL
/// operation.
///
/// A class has at most one pending edit. The map is emptied when the
/// operation commits or aborts; a non-empty map between operations is a
/// bug.
#[derive(Debug, Default)]
pub struct PendingEdits {
    edits: BTreeMap<ClassId, FlatTemplate>,
}

impl PendingEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, class: ClassId) -> Option<&FlatTemplate> {
        self.edits.get(&class)
    }

    pub fn contains(&self, class: ClassId) -> bool {
        self.edits.contains_key(&class)
    }

    /// Attaches a pending edit, replacing any earlier one for the class.
    pub fn insert(&mut self, class: ClassId, flat: FlatTemplate) {
        self.edits.insert(class, flat);
    }

    pub fn remove(&mut self, class: ClassId) -> Option<FlatTemplate> {
        self.edits.remove(&class)
    }

    pub fn clear(&mut self) {
        self.edits.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }
}

/// Read-only view combining committed classes with pending edits.
pub struct CatalogView<'a> {
    pub(crate) classes: &'a BTreeMap<ClassId, Class>,
    pub(crate) pending: &'a PendingEdits,
}

impl HierarchyView for CatalogView<'_> {
    fn superclasses_of(&self, class: ClassId) -> Vec<ClassId> {
        if let Some(flat) = self.pending.get(class) {
            return flat.inheritance.clone();
        }
        self.classes
            .get(&class)
            .map(|c| c.inheritance.clone())
            .unwrap_or_default()
    }
}

impl FlattenContext for CatalogView<'_> {
    fn committed(&self, class: ClassId) -> Option<&Class> {
        self.classes.get(&class)
    }

    fn pending(&self, class: ClassId) -> Option<&FlatTemplate> {
        self.pending.get(class)
    }
}
