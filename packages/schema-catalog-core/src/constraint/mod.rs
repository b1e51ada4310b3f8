//! Class-level constraints and their index bookkeeping.

mod allocator;
mod property;

pub use allocator::{OnlineIndexPhase, ONLINE_BUILD_MAX_LOCK};
pub use property::PropertyList;

use serde::{Deserialize, Serialize};

use crate::ids::{AttrId, BTreeId, ClassId};

/// Constraint type.
///
/// Variant order is the order disk structures are allocated in: primary
/// keys exist before the foreign keys that may reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ReverseUnique,
    Index,
    ReverseIndex,
    ForeignKey,
    NotNull,
}

/// Whether one B-tree serves a whole hierarchy or a single class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintScope {
    Global,
    Local,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 7] = [
        ConstraintKind::PrimaryKey,
        ConstraintKind::Unique,
        ConstraintKind::ReverseUnique,
        ConstraintKind::Index,
        ConstraintKind::ReverseIndex,
        ConstraintKind::ForeignKey,
        ConstraintKind::NotNull,
    ];

    /// Key of the constraint group in a class property list.
    pub fn property_key(self) -> &'static str {
        match self {
            ConstraintKind::Unique => "*U",
            ConstraintKind::ReverseUnique => "*RU",
            ConstraintKind::PrimaryKey => "*P",
            ConstraintKind::ForeignKey => "*FK",
            ConstraintKind::Index => "*I",
            ConstraintKind::ReverseIndex => "*RI",
            ConstraintKind::NotNull => "*N",
        }
    }

    pub fn from_property_key(key: &str) -> Option<ConstraintKind> {
        Self::ALL.into_iter().find(|kind| kind.property_key() == key)
    }

    /// Prefix of generated constraint names.
    pub fn name_prefix(self) -> &'static str {
        match self {
            ConstraintKind::Unique => "u_",
            ConstraintKind::ReverseUnique => "ru_",
            ConstraintKind::PrimaryKey => "pk_",
            ConstraintKind::ForeignKey => "fk_",
            ConstraintKind::Index => "i_",
            ConstraintKind::ReverseIndex => "ri_",
            ConstraintKind::NotNull => "n_",
        }
    }

    pub fn is_unique_family(self) -> bool {
        matches!(
            self,
            ConstraintKind::Unique | ConstraintKind::ReverseUnique | ConstraintKind::PrimaryKey
        )
    }

    /// Returns `true` if the constraint is backed by a B-tree.
    pub fn has_index(self) -> bool {
        self != ConstraintKind::NotNull
    }

    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            ConstraintKind::ReverseUnique | ConstraintKind::ReverseIndex
        )
    }

    /// Returns `true` if subclasses inherit the constraint.
    pub fn is_inheritable(self) -> bool {
        self.is_unique_family() || self == ConstraintKind::ForeignKey
    }

    /// Scope of the constraint on a class.
    pub fn scope(self, class_is_partition: bool) -> ConstraintScope {
        match self {
            ConstraintKind::Unique | ConstraintKind::ReverseUnique | ConstraintKind::PrimaryKey
                if !class_is_partition =>
            {
                ConstraintScope::Global
            }
            _ => ConstraintScope::Local,
        }
    }
}

/// Build state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexStatus {
    #[default]
    Normal,
    /// Created empty; DML continues until the load pass completes
    OnlineBuilding,
}

/// One column of a constraint key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    pub name: String,
    /// Resolved when the class representation is installed
    pub id: Option<AttrId>,
    pub descending: bool,
    pub prefix_length: Option<u32>,
}

impl KeyColumn {
    pub fn asc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            descending: false,
            prefix_length: None,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            descending: true,
            ..Self::asc(name)
        }
    }

    pub fn with_prefix(mut self, length: u32) -> Self {
        self.prefix_length = Some(length);
        self
    }
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    Cascade,
    #[default]
    Restrict,
    NoAction,
    SetNull,
}

/// Foreign key target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Referenced class; `None` references the defining class itself
    pub ref_class: Option<ClassId>,
    pub ref_class_name: String,
    /// B-tree of the referenced primary key, set at allocation
    pub ref_pk_btree: Option<BTreeId>,
    pub delete_action: ReferentialAction,
    pub update_action: ReferentialAction,
}

impl ForeignKeyInfo {
    pub fn references(class_name: impl Into<String>) -> Self {
        Self {
            ref_class: None,
            ref_class_name: class_name.into(),
            ref_pk_btree: None,
            delete_action: ReferentialAction::default(),
            update_action: ReferentialAction::default(),
        }
    }
}

/// Reverse reference kept on a primary key for each foreign key using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub class: ClassId,
    pub name: String,
    pub btree: Option<BTreeId>,
}

/// A UNIQUE, PRIMARY KEY, FOREIGN KEY, INDEX or NOT NULL rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub name: String,
    pub columns: Vec<KeyColumn>,
    /// Class that defined the constraint; `None` while that class is new
    pub origin: Option<ClassId>,
    /// Physical index; `None` until allocated
    pub btree: Option<BTreeId>,
    /// Name of a constraint in the same class whose index this one reuses
    pub shared_with: Option<String>,
    pub status: IndexStatus,
    pub filter_predicate: Option<String>,
    pub function_expression: Option<String>,
    pub foreign_key: Option<ForeignKeyInfo>,
    pub referrers: Vec<ForeignKeyRef>,
    pub comment: Option<String>,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, name: impl Into<String>, columns: Vec<KeyColumn>) -> Self {
        Self {
            kind,
            name: name.into(),
            columns,
            origin: None,
            btree: None,
            shared_with: None,
            status: IndexStatus::Normal,
            filter_predicate: None,
            function_expression: None,
            foreign_key: None,
            referrers: Vec::new(),
            comment: None,
        }
    }

    /// Constraint of `kind` over ascending columns; the name is generated
    /// when the constraint is added to a template.
    pub fn on_columns(kind: ConstraintKind, columns: &[&str]) -> Self {
        Self::new(kind, "", columns.iter().map(|c| KeyColumn::asc(*c)).collect())
    }

    pub fn unique(columns: &[&str]) -> Self {
        Self::on_columns(ConstraintKind::Unique, columns)
    }

    pub fn primary_key(columns: &[&str]) -> Self {
        Self::on_columns(ConstraintKind::PrimaryKey, columns)
    }

    pub fn index(columns: &[&str]) -> Self {
        Self::on_columns(ConstraintKind::Index, columns)
    }

    pub fn not_null(column: &str) -> Self {
        Self::on_columns(ConstraintKind::NotNull, &[column])
    }

    /// Foreign key over `columns` referencing the primary key of `class_name`.
    pub fn foreign_key(columns: &[&str], class_name: &str) -> Self {
        let mut fk = Self::on_columns(ConstraintKind::ForeignKey, columns);
        fk.foreign_key = Some(ForeignKeyInfo::references(class_name));
        fk
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Generates `<prefix><class>_<col>[_d]...`. Descending columns are
    /// marked only for non-reverse kinds.
    pub fn default_name(kind: ConstraintKind, class_name: &str, columns: &[KeyColumn]) -> String {
        let mut name = format!("{}{}", kind.name_prefix(), class_name);
        for column in columns {
            name.push('_');
            name.push_str(&column.name.to_lowercase());
            if column.descending && !kind.is_reverse() {
                name.push_str("_d");
            }
        }
        name
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn covers(&self, attribute: &str) -> bool {
        self.columns.iter().any(|c| c.name == attribute)
    }

    /// Returns `true` if both constraints index the same key.
    pub fn same_key(&self, other: &Constraint) -> bool {
        self.kind.is_reverse() == other.kind.is_reverse()
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name && a.descending == b.descending)
            && self.filter_predicate == other.filter_predicate
            && self.function_expression == other.function_expression
    }

    pub fn scope(&self, class_is_partition: bool) -> ConstraintScope {
        self.kind.scope(class_is_partition)
    }

    /// Returns `true` if `class` owns the physical index: it defined the
    /// constraint or the constraint is local to it.
    pub fn is_owned_by(&self, class: ClassId, class_is_partition: bool) -> bool {
        self.origin.is_none()
            || self.origin == Some(class)
            || self.scope(class_is_partition) == ConstraintScope::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let cols = vec![KeyColumn::asc("A"), KeyColumn::desc("b")];
        assert_eq!(
            Constraint::default_name(ConstraintKind::Unique, "t", &cols),
            "u_t_a_b_d"
        );
        assert_eq!(
            Constraint::default_name(ConstraintKind::ReverseIndex, "t", &cols),
            "ri_t_a_b"
        );
    }

    #[test]
    fn test_scope_policy() {
        assert_eq!(ConstraintKind::Unique.scope(false), ConstraintScope::Global);
        assert_eq!(ConstraintKind::Unique.scope(true), ConstraintScope::Local);
        assert_eq!(ConstraintKind::PrimaryKey.scope(false), ConstraintScope::Global);
        assert_eq!(ConstraintKind::Index.scope(false), ConstraintScope::Local);
        assert_eq!(ConstraintKind::ForeignKey.scope(false), ConstraintScope::Local);
    }

    #[test]
    fn test_ownership() {
        let mut c = Constraint::new(ConstraintKind::Unique, "u", vec![KeyColumn::asc("a")]);
        c.origin = Some(ClassId(1));
        assert!(c.is_owned_by(ClassId(1), false));
        assert!(!c.is_owned_by(ClassId(2), false));
        assert!(c.is_owned_by(ClassId(2), true));
    }
}
