//! Attribute id retention for inherited attributes.
//!
//! Inherited attributes lose their id when materialized. Before storage
//! order is computed, each one is matched against the class's current
//! representation so that its stored values survive, including when the
//! defining superclass renamed it in the same operation. A local
//! attribute shadowing an inherited one is a new attribute and never
//! takes over the inherited id.

use tracing::debug;

use crate::class::{Attribute, Class};
use crate::template::FlatTemplate;

use super::FlattenContext;

fn is_match(a: &Attribute, b: &Attribute) -> bool {
    a.namespace == b.namespace && a.name == b.name && a.origin == b.origin && a.domain.same_type(&b.domain)
}

fn all_attributes(class: &Class) -> impl Iterator<Item = &Attribute> {
    class
        .attributes
        .iter()
        .chain(class.shared_attributes.iter())
        .chain(class.class_attributes.iter())
}

pub(crate) fn retain_former_ids<C: FlattenContext + ?Sized>(flat: &mut FlatTemplate, ctx: &C) {
    let Some(current) = flat.current.and_then(|id| ctx.committed(id)) else {
        return;
    };
    let self_id = flat.current;

    for att in flat.attributes.iter_mut().chain(flat.class_attributes.iter_mut()) {
        if att.id.is_some() || att.origin.is_none() || att.origin == self_id {
            continue;
        }
        if let Some(found) = all_attributes(current).find(|a| is_match(a, att)) {
            att.id = found.id;
            continue;
        }

        // renamed in a superclass that is being edited right now
        let Some(origin) = att.origin else {
            continue;
        };
        let (Some(super_new), Some(super_old)) = (ctx.pending(origin), ctx.committed(origin)) else {
            continue;
        };
        let Some(new_def) = super_new
            .attributes
            .iter()
            .chain(super_new.class_attributes.iter())
            .find(|a| is_match(a, att))
        else {
            continue;
        };
        let Some(old_def) = all_attributes(super_old)
            .find(|a| a.namespace == new_def.namespace && a.id.is_some() && a.id == new_def.id)
        else {
            continue;
        };
        if old_def.name == att.name {
            continue;
        }
        let mut previous = att.clone();
        previous.name = old_def.name.clone();
        if let Some(found) = all_attributes(current).find(|a| is_match(a, &previous)) {
            debug!(
                class = %flat.name,
                attribute = %att.name,
                former = %old_def.name,
                "retained id of attribute renamed in superclass"
            );
            att.id = found.id;
        }
    }
}
