//! Template flattening.
//!
//! Merges the local definitions of a [`Template`] with the components its
//! superclasses provide, applying the inheritance rules, and produces the
//! [`FlatTemplate`] that gets installed.

mod candidate;
mod former_ids;
mod properties;
mod resolve;

use tracing::{debug, warn};

use crate::class::{
    Class, ClassDefinition, Component, MethodFile, NameSpace, Resolution, ResolutionSpace,
};
use crate::domain::{DomainComparator, HierarchyView};
use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::template::{FlatTemplate, Template};

use candidate::Candidate;
use resolve::Resolver;

/// Catalog access needed while flattening.
///
/// A class that is being edited in the same operation is seen through
/// its pending flat template; every other class through its committed
/// definition.
pub trait FlattenContext: HierarchyView {
    fn committed(&self, class: ClassId) -> Option<&Class>;

    fn pending(&self, class: ClassId) -> Option<&FlatTemplate>;

    fn definition(&self, class: ClassId) -> Option<&dyn ClassDefinition> {
        match self.pending(class) {
            Some(flat) => Some(flat as &dyn ClassDefinition),
            None => self.committed(class).map(|c| c as &dyn ClassDefinition),
        }
    }

    fn class_name(&self, class: ClassId) -> String {
        self.committed(class)
            .map(|c| c.name.clone())
            .or_else(|| self.pending(class).map(|f| f.name.clone()))
            .unwrap_or_else(|| class.to_string())
    }
}

/// Flattens a template against its superclasses.
///
/// # Arguments
/// * `template` - Definition being edited
/// * `ctx` - Catalog view, including pending edits of other classes
/// * `auto_resolve` - Record resolutions for equal-domain conflicts
///   instead of failing
pub fn flatten<C: FlattenContext + ?Sized>(
    template: &Template,
    ctx: &C,
    auto_resolve: bool,
) -> Result<FlatTemplate, SchemaError> {
    let mut flat = FlatTemplate {
        name: template.name.clone(),
        class_type: template.class_type,
        current: template.current,
        inheritance: template.inheritance.clone(),
        attributes: Vec::new(),
        class_attributes: Vec::new(),
        methods: Vec::new(),
        class_methods: Vec::new(),
        method_files: flatten_method_files(template, ctx),
        query_specs: template.query_specs.clone(),
        resolutions: filter_resolutions(template, ctx)?,
        constraints: Vec::new(),
        partition: template.partition.clone(),
        triggers: template.triggers.clone(),
        comment: template.comment.clone(),
        reuse_oid: template.reuse_oid,
    };

    let comparator = DomainComparator::new(ctx, template.current, &template.inheritance);
    let resolver = Resolver::new(ctx, comparator, &template.name, auto_resolve);
    for space in [ResolutionSpace::Instance, ResolutionSpace::Class] {
        let candidates = candidate::collect(template, ctx, &flat.resolutions, space)?;
        let winners = resolver.resolve_all(candidates, &mut flat.resolutions, space)?;
        materialize(&mut flat, winners);
    }

    former_ids::retain_former_ids(&mut flat, ctx);
    flat.constraints = properties::flatten_properties(template, &flat, ctx)?;

    debug!(
        class = %flat.name,
        attributes = flat.attributes.len(),
        methods = flat.methods.len(),
        constraints = flat.constraints.len(),
        "flattened template"
    );
    Ok(flat)
}

/// Local method files first, then those of each superclass not yet present.
fn flatten_method_files<C: FlattenContext + ?Sized>(template: &Template, ctx: &C) -> Vec<MethodFile> {
    let mut files = template.method_files.clone();
    for &sup in &template.inheritance {
        let Some(def) = ctx.definition(sup) else {
            continue;
        };
        for file in def.method_files() {
            if !files.iter().any(|f| f.name == file.name) {
                files.push(file.clone());
            }
        }
    }
    files
}

/// Returns `true` if the class definition provides `name` in `space`.
fn defines(def: &dyn ClassDefinition, name: &str, space: ResolutionSpace) -> bool {
    match space {
        ResolutionSpace::Instance => {
            def.ordered_attributes().iter().any(|a| a.name == name)
                || def.methods().iter().any(|m| m.name == name)
        }
        ResolutionSpace::Class => {
            def.class_attributes().iter().any(|a| a.name == name)
                || def.class_methods().iter().any(|m| m.name == name)
        }
    }
}

/// Drops resolutions shadowed by local definitions or whose target no
/// longer exists.
///
/// A stale resolution that was already part of the committed class is
/// removed with a warning; a new one is rejected.
fn filter_resolutions<C: FlattenContext + ?Sized>(
    template: &Template,
    ctx: &C,
) -> Result<Vec<Resolution>, SchemaError> {
    let original: &[Resolution] = template
        .current
        .and_then(|id| ctx.committed(id))
        .map(|c| c.resolutions.as_slice())
        .unwrap_or(&[]);

    let mut kept = Vec::new();
    for res in &template.resolutions {
        if template.has_local(res.visible_name(), res.space) {
            warn!(class = %template.name, name = %res.visible_name(), "dropping resolution shadowed by local definition");
            continue;
        }
        let valid = template.inheritance.contains(&res.class)
            && ctx
                .definition(res.class)
                .is_some_and(|def| defines(def, &res.name, res.space));
        if valid {
            kept.push(res.clone());
        } else if original.contains(res) {
            warn!(
                class = %template.name,
                name = %res.name,
                superclass = %ctx.class_name(res.class),
                "dropping stale resolution"
            );
        } else {
            return Err(SchemaError::InvalidResolution {
                class: template.name.clone(),
                name: res.name.clone(),
                superclass: ctx.class_name(res.class),
            });
        }
    }
    Ok(kept)
}

/// Converts winning candidates back into components, in definition order.
fn materialize(flat: &mut FlatTemplate, mut winners: Vec<Candidate>) {
    winners.sort_by_key(|c| c.order);
    for winner in winners {
        let Candidate {
            name,
            mut component,
            order,
            is_local,
            ..
        } = winner;
        component.set_name(&name);
        component.set_order(order);
        match component {
            Component::Attribute(mut att) => {
                if !is_local {
                    att.id = None;
                }
                if att.namespace == NameSpace::ClassAttribute {
                    flat.class_attributes.push(att);
                } else {
                    flat.attributes.push(att);
                }
            }
            Component::Method(mut method) => {
                if !is_local {
                    method.id = None;
                }
                if method.namespace == NameSpace::ClassMethod {
                    flat.class_methods.push(method);
                } else {
                    flat.methods.push(method);
                }
            }
        }
    }
}
