//! Constraint flattening.

use tracing::debug;

use crate::constraint::{Constraint, ConstraintScope};
use crate::error::SchemaError;
use crate::template::{FlatTemplate, Template};

use super::FlattenContext;

/// Combines local constraints with those inherited from each superclass.
///
/// Inherited constraints keep their origin. A global constraint carries
/// the B-tree of its origin; a constraint that is local to this class
/// (every constraint of a partition, every foreign key) keeps the B-tree
/// the class already had for it, or starts unallocated.
pub(crate) fn flatten_properties<C: FlattenContext + ?Sized>(
    template: &Template,
    flat: &FlatTemplate,
    ctx: &C,
) -> Result<Vec<Constraint>, SchemaError> {
    let is_partition = flat.is_partition();
    let previous = match flat.current.and_then(|id| ctx.committed(id)) {
        Some(class) => class.constraints()?,
        None => Vec::new(),
    };

    let mut out: Vec<Constraint> = Vec::new();
    for constraint in template.properties.constraints()? {
        if let Some(column) = constraint
            .columns
            .iter()
            .find(|col| flat.find_attribute(&col.name).is_none())
        {
            return Err(SchemaError::AttributeInConstraint {
                class: flat.name.clone(),
                attribute: column.name.clone(),
                constraint: constraint.name.clone(),
            });
        }
        out.push(constraint);
    }

    for &sup in &flat.inheritance {
        let Some(def) = ctx.definition(sup) else {
            return Err(SchemaError::ClassNotFound {
                class: ctx.class_name(sup),
            });
        };
        for constraint in def.constraints()? {
            if !constraint.kind.is_inheritable() && !is_partition {
                continue;
            }
            // every column must still resolve to the same definition here
            let same_columns = constraint.columns.iter().all(|col| {
                match (def.find_any_attribute(&col.name), flat.find_attribute(&col.name)) {
                    (Some(theirs), Some(ours)) => theirs.origin == ours.origin,
                    _ => false,
                }
            });
            if !same_columns {
                continue;
            }

            let origin = constraint.origin.or(Some(sup));
            if let Some(existing) = out.iter().find(|c| c.name == constraint.name) {
                if existing.origin == origin {
                    // reached again through another inheritance path
                    continue;
                }
                return Err(SchemaError::ConstraintExists {
                    class: flat.name.clone(),
                    constraint: constraint.name,
                });
            }

            let mut inherited = constraint;
            inherited.origin = origin;
            inherited.referrers.clear();
            for column in inherited.columns.iter_mut() {
                column.id = None;
            }
            if is_partition || inherited.scope(is_partition) == ConstraintScope::Local {
                inherited.btree = previous
                    .iter()
                    .find(|p| p.name == inherited.name && p.kind == inherited.kind)
                    .and_then(|p| p.btree);
                inherited.shared_with = None;
            }
            debug!(
                class = %flat.name,
                constraint = %inherited.name,
                btree = ?inherited.btree,
                "inherited constraint"
            );
            out.push(inherited);
        }
    }
    Ok(out)
}
