//! Serialized constraint property list.
//!
//! Layout: `{ "<kind key>": { "<constraint name>": <constraint> } }`.
//! This is the durable record of the constraint to B-tree mapping; the
//! typed constraint list is decoded from it whenever it is needed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::constraint::{Constraint, ConstraintKind, ForeignKeyRef};
use crate::error::SchemaError;

/// Constraint property list attached to a class or template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyList {
    map: Map<String, JsonValue>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(|group| match group {
            JsonValue::Object(entries) => entries.is_empty(),
            _ => true,
        })
    }

    /// Builds a property list from decoded constraints.
    pub fn from_constraints<'a>(
        constraints: impl IntoIterator<Item = &'a Constraint>,
    ) -> Result<Self, SchemaError> {
        let mut list = Self::new();
        for constraint in constraints {
            list.put(constraint)?;
        }
        Ok(list)
    }

    /// Inserts or replaces a constraint.
    pub fn put(&mut self, constraint: &Constraint) -> Result<(), SchemaError> {
        let encoded = serde_json::to_value(constraint)?;
        let group = self
            .map
            .entry(constraint.kind.property_key())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        match group {
            JsonValue::Object(entries) => {
                entries.insert(constraint.name.clone(), encoded);
                Ok(())
            }
            _ => Err(SchemaError::DataCorruption(format!(
                "property group '{}' is not a map",
                constraint.kind.property_key()
            ))),
        }
    }

    /// Finds a constraint by kind and name.
    pub fn find(&self, kind: ConstraintKind, name: &str) -> Result<Option<Constraint>, SchemaError> {
        match self
            .map
            .get(kind.property_key())
            .and_then(|group| group.get(name))
        {
            Some(encoded) => Ok(Some(serde_json::from_value(encoded.clone())?)),
            None => Ok(None),
        }
    }

    /// Finds a constraint of any kind by name.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Constraint>, SchemaError> {
        for kind in ConstraintKind::ALL {
            if let Some(found) = self.find(kind, name)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Removes a constraint, returning `true` if it existed.
    pub fn remove(&mut self, kind: ConstraintKind, name: &str) -> bool {
        let removed = match self.map.get_mut(kind.property_key()) {
            Some(JsonValue::Object(entries)) => entries.remove(name).is_some(),
            _ => false,
        };
        if self.group_is_empty(kind) {
            self.map.remove(kind.property_key());
        }
        removed
    }

    fn group_is_empty(&self, kind: ConstraintKind) -> bool {
        match self.map.get(kind.property_key()) {
            Some(JsonValue::Object(entries)) => entries.is_empty(),
            _ => true,
        }
    }

    /// Decodes all constraints in allocation order (by kind, then name).
    pub fn constraints(&self) -> Result<Vec<Constraint>, SchemaError> {
        let mut out = Vec::new();
        for kind in ConstraintKind::ALL {
            if let Some(JsonValue::Object(entries)) = self.map.get(kind.property_key()) {
                for encoded in entries.values() {
                    out.push(serde_json::from_value::<Constraint>(encoded.clone())?);
                }
            }
        }
        Ok(out)
    }

    pub fn primary_key(&self) -> Result<Option<Constraint>, SchemaError> {
        Ok(self
            .constraints()?
            .into_iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey))
    }

    /// Records a foreign key referencing the primary key `pk_name`.
    pub fn put_foreign_key_ref(&mut self, pk_name: &str, reference: ForeignKeyRef) -> Result<(), SchemaError> {
        let Some(mut pk) = self.find(ConstraintKind::PrimaryKey, pk_name)? else {
            return Ok(());
        };
        pk.referrers
            .retain(|r| !(r.class == reference.class && r.name == reference.name));
        pk.referrers.push(reference);
        self.put(&pk)
    }

    /// Removes a foreign key reference from every primary key.
    pub fn drop_foreign_key_ref(&mut self, class: crate::ids::ClassId, fk_name: &str) -> Result<(), SchemaError> {
        if let Some(mut pk) = self.primary_key()? {
            let before = pk.referrers.len();
            pk.referrers.retain(|r| !(r.class == class && r.name == fk_name));
            if pk.referrers.len() != before {
                self.put(&pk)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::KeyColumn;
    use crate::ids::{BTreeId, ClassId};

    fn unique(name: &str) -> Constraint {
        Constraint::new(ConstraintKind::Unique, name, vec![KeyColumn::asc("a")])
    }

    #[test]
    fn test_put_find_drop() {
        let mut props = PropertyList::new();
        assert!(props.is_empty());
        let mut c = unique("u_t_a");
        c.btree = Some(BTreeId(9));
        props.put(&c).unwrap();

        let found = props.find(ConstraintKind::Unique, "u_t_a").unwrap().unwrap();
        assert_eq!(found.btree, Some(BTreeId(9)));
        assert!(props.find(ConstraintKind::Index, "u_t_a").unwrap().is_none());
        assert!(props.find_by_name("u_t_a").unwrap().is_some());

        assert!(props.remove(ConstraintKind::Unique, "u_t_a"));
        assert!(!props.remove(ConstraintKind::Unique, "u_t_a"));
        assert!(props.is_empty());
    }

    #[test]
    fn test_constraints_in_allocation_order() {
        let mut props = PropertyList::new();
        let mut fk = Constraint::new(ConstraintKind::ForeignKey, "fk_a", vec![KeyColumn::asc("a")]);
        fk.foreign_key = Some(crate::constraint::ForeignKeyInfo::references("t"));
        props.put(&fk).unwrap();
        props
            .put(&Constraint::new(ConstraintKind::PrimaryKey, "pk_t", vec![KeyColumn::asc("id")]))
            .unwrap();
        props.put(&unique("u_b")).unwrap();
        let kinds: Vec<_> = props.constraints().unwrap().into_iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ConstraintKind::PrimaryKey, ConstraintKind::Unique, ConstraintKind::ForeignKey]
        );
    }

    #[test]
    fn test_foreign_key_refs() {
        let mut props = PropertyList::new();
        props
            .put(&Constraint::new(ConstraintKind::PrimaryKey, "pk_t", vec![KeyColumn::asc("id")]))
            .unwrap();
        let reference = ForeignKeyRef {
            class: ClassId(4),
            name: "fk_c_t".to_string(),
            btree: None,
        };
        props.put_foreign_key_ref("pk_t", reference.clone()).unwrap();
        props.put_foreign_key_ref("pk_t", reference).unwrap();
        assert_eq!(props.primary_key().unwrap().unwrap().referrers.len(), 1);

        props.drop_foreign_key_ref(ClassId(4), "fk_c_t").unwrap();
        assert!(props.primary_key().unwrap().unwrap().referrers.is_empty());
    }
}
