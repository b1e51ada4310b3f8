//! Candidate gathering.

use crate::class::{Attribute, ClassDefinition, Component, Method, Resolution, ResolutionSpace};
use crate::error::SchemaError;
use crate::ids::ClassId;
use crate::template::Template;

use super::FlattenContext;

/// One definition competing for a name during flattening.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    /// Name the candidate competes for; the alias for alias candidates
    pub name: String,
    /// Set when a resolution renamed this candidate away from `name`
    pub alias: Option<String>,
    pub component: Component,
    /// Direct superclass it came from; the class itself for locals
    pub source: Option<ClassId>,
    /// Class that defined the component
    pub origin: Option<ClassId>,
    /// Definition order within its kind (attributes and methods count separately)
    pub order: u32,
    pub is_local: bool,
    pub is_alias: bool,
    pub is_requested: bool,
}

impl Candidate {
    fn new(component: Component, source: Option<ClassId>, order: u32, is_local: bool) -> Self {
        let origin = component.origin().or(source);
        Self {
            name: component.name().to_string(),
            alias: None,
            component,
            source,
            origin,
            order,
            is_local,
            is_alias: false,
            is_requested: false,
        }
    }

    pub fn is_method(&self) -> bool {
        self.component.namespace().is_method()
    }
}

/// Adds an inherited candidate, applying the resolution that names it.
fn add_inherited(
    out: &mut Vec<Candidate>,
    component: Component,
    source: ClassId,
    order: u32,
    resolutions: &[Resolution],
    space: ResolutionSpace,
) {
    let mut candidate = Candidate::new(component, Some(source), order, false);
    let resolution = resolutions
        .iter()
        .find(|r| r.class == source && r.space == space && r.name == candidate.name);
    match resolution.map(|r| r.alias.clone()) {
        None => out.push(candidate),
        Some(None) => {
            candidate.is_requested = true;
            out.push(candidate);
        }
        Some(Some(alias)) => {
            let mut renamed = candidate.clone();
            renamed.name = alias.clone();
            renamed.is_alias = true;
            candidate.alias = Some(alias);
            out.push(candidate);
            out.push(renamed);
        }
    }
}

fn attributes_in(def: &dyn ClassDefinition, space: ResolutionSpace) -> Vec<&Attribute> {
    match space {
        ResolutionSpace::Instance => def.ordered_attributes(),
        ResolutionSpace::Class => def.class_attributes().iter().collect(),
    }
}

fn methods_in(def: &dyn ClassDefinition, space: ResolutionSpace) -> &[Method] {
    match space {
        ResolutionSpace::Instance => def.methods(),
        ResolutionSpace::Class => def.class_methods(),
    }
}

/// Builds the raw candidate list for one resolution space.
///
/// Superclasses contribute left to right; local definitions come last.
/// Attribute and method order counters run across all sources.
pub(crate) fn collect<C: FlattenContext + ?Sized>(
    template: &Template,
    ctx: &C,
    resolutions: &[Resolution],
    space: ResolutionSpace,
) -> Result<Vec<Candidate>, SchemaError> {
    let mut out = Vec::new();
    let mut att_order = 0u32;
    let mut meth_order = 0u32;

    for &sup in &template.inheritance {
        let def = ctx.definition(sup).ok_or_else(|| SchemaError::ClassNotFound {
            class: ctx.class_name(sup),
        })?;
        for att in attributes_in(def, space) {
            add_inherited(&mut out, Component::Attribute(att.clone()), sup, att_order, resolutions, space);
            att_order += 1;
        }
        for method in methods_in(def, space) {
            add_inherited(&mut out, Component::Method(method.clone()), sup, meth_order, resolutions, space);
            meth_order += 1;
        }
    }

    let (local_atts, local_methods) = match space {
        ResolutionSpace::Instance => (&template.attributes, &template.methods),
        ResolutionSpace::Class => (&template.class_attributes, &template.class_methods),
    };
    for att in local_atts {
        out.push(Candidate::new(Component::Attribute(att.clone()), template.current, att_order, true));
        att_order += 1;
    }
    for method in local_methods {
        out.push(Candidate::new(Component::Method(method.clone()), template.current, meth_order, true));
        meth_order += 1;
    }
    Ok(out)
}
