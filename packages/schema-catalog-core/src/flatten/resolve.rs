//! Conflict resolution between like-named candidates.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::class::{Resolution, ResolutionSpace};
use crate::domain::{DomainComparator, DomainComparison};
use crate::error::SchemaError;
use crate::ids::ClassId;

use super::candidate::Candidate;
use super::FlattenContext;

/// Picks one winner per name.
pub(crate) struct Resolver<'a, C: FlattenContext + ?Sized> {
    ctx: &'a C,
    comparator: DomainComparator<'a, C>,
    class_name: &'a str,
    auto_resolve: bool,
}

impl<'a, C: FlattenContext + ?Sized> Resolver<'a, C> {
    pub fn new(ctx: &'a C, comparator: DomainComparator<'a, C>, class_name: &'a str, auto_resolve: bool) -> Self {
        Self {
            ctx,
            comparator,
            class_name,
            auto_resolve,
        }
    }

    fn source_name(&self, candidate: &Candidate) -> String {
        match candidate.source {
            Some(source) if !candidate.is_local => self.ctx.class_name(source),
            _ => self.class_name.to_string(),
        }
    }

    fn compare(&self, a: &Candidate, b: &Candidate) -> DomainComparison {
        self.comparator.compare_components(&a.component, &b.component)
    }

    /// Resolves every name group and returns the winners.
    ///
    /// Resolutions added by auto-resolution are appended to `resolutions`;
    /// resolutions that turned out to be implied are removed from it.
    pub fn resolve_all(
        &self,
        candidates: Vec<Candidate>,
        resolutions: &mut Vec<Resolution>,
        space: ResolutionSpace,
    ) -> Result<Vec<Candidate>, SchemaError> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<Candidate>> = Vec::new();
        for candidate in candidates {
            match index.get(&candidate.name) {
                Some(&slot) => groups[slot].push(candidate),
                None => {
                    index.insert(candidate.name.clone(), groups.len());
                    groups.push(vec![candidate]);
                }
            }
        }

        let mut winners = Vec::with_capacity(groups.len());
        for mut group in groups {
            let winner = self.resolve_group(&group, resolutions, space)?;
            self.prune_implied(&group, resolutions, space);
            if let Some(winner) = winner {
                winners.push(group.swap_remove(winner));
            }
        }
        Ok(winners)
    }

    /// Removes a requested resolution when nothing competed for its name.
    fn prune_implied(&self, group: &[Candidate], resolutions: &mut Vec<Resolution>, space: ResolutionSpace) {
        let Some(requested) = group.iter().find(|c| c.is_requested) else {
            return;
        };
        let origins: HashSet<_> = group
            .iter()
            .filter(|c| c.alias.is_none() && !c.is_local)
            .map(|c| c.origin)
            .collect();
        if origins.len() > 1 {
            return;
        }
        let before = resolutions.len();
        resolutions.retain(|r| {
            !(r.space == space && r.alias.is_none() && Some(r.class) == requested.source && r.name == requested.name)
        });
        if resolutions.len() != before {
            warn!(class = %self.class_name, name = %requested.name, "dropping resolution implied by flattening");
        }
    }

    /// Applies the inheritance rules to one group of like-named candidates.
    ///
    /// Returns the index of the winner, or `None` if every candidate was
    /// aliased away.
    fn resolve_group(
        &self,
        group: &[Candidate],
        resolutions: &mut Vec<Resolution>,
        space: ResolutionSpace,
    ) -> Result<Option<usize>, SchemaError> {
        let name = group[0].name.clone();
        let class = self.class_name.to_string();

        self.check_attribute_method_overlap(group, &name)?;
        self.check_alias_conflict(group, &name)?;
        let aliased = self.most_specific_alias(group, &name)?;

        let local = group.iter().position(|c| c.is_local);
        let requested = match local {
            Some(_) => None,
            None => group.iter().position(|c| c.is_requested),
        };
        let mut winner = local.or(requested);
        let mut conflict = None;

        for (i, c) in group.iter().enumerate().filter(|(_, c)| c.alias.is_none()) {
            let Some(w) = winner else {
                winner = Some(i);
                continue;
            };
            if i == w || c.origin == group[w].origin {
                continue;
            }
            match self.compare(c, &group[w]) {
                DomainComparison::Incompatible => {
                    return Err(match local {
                        None => SchemaError::IncompatibleDomains {
                            name,
                            first: self.source_name(&group[w]),
                            second: self.source_name(c),
                            class,
                        },
                        Some(_) => SchemaError::IncompatibleShadow {
                            name,
                            source_class: self.source_name(c),
                            class,
                        },
                    });
                }
                DomainComparison::MoreSpecific => {
                    if local.is_some() {
                        return Err(SchemaError::IncompatibleShadow {
                            name,
                            source_class: self.source_name(c),
                            class,
                        });
                    }
                    if Some(w) != requested || self.auto_resolve {
                        winner = Some(i);
                        conflict = None;
                    } else {
                        return Err(SchemaError::ResolutionOverride {
                            name,
                            requested: self.source_name(&group[w]),
                            other: self.source_name(c),
                            class,
                        });
                    }
                }
                DomainComparison::Equal => {
                    if local.is_none() && Some(w) != requested {
                        conflict = Some(i);
                    }
                }
                DomainComparison::LessSpecific => {}
            }
        }

        if let Some(alias) = aliased {
            let Some(w) = winner else {
                return Err(SchemaError::MissingAliasSubstitute {
                    name,
                    source_class: self.source_name(&group[alias]),
                    class,
                });
            };
            match self.compare(&group[w], &group[alias]) {
                DomainComparison::Incompatible if Some(w) == local => {
                    return Err(SchemaError::IncompatibleAliasLocalSub {
                        name,
                        source_class: self.source_name(&group[alias]),
                        class,
                    });
                }
                DomainComparison::Incompatible => {
                    return Err(SchemaError::IncompatibleAliasSubstitute {
                        name,
                        substitute: self.source_name(&group[w]),
                        source_class: self.source_name(&group[alias]),
                        class,
                    });
                }
                DomainComparison::LessSpecific => {
                    return Err(SchemaError::LessSpecificAliasSubstitute {
                        name,
                        source_class: self.source_name(&group[alias]),
                        substitute: self.source_name(&group[w]),
                        class,
                    });
                }
                _ => {}
            }
        }

        if let (Some(c), Some(w)) = (conflict, winner) {
            if !self.auto_resolve {
                return Err(SchemaError::AttributeNameConflict {
                    name,
                    first: self.source_name(&group[w]),
                    second: self.source_name(&group[c]),
                });
            }
            if let Some(source) = group[w].source {
                auto_resolve_conflict(resolutions, source, &name, space);
                warn!(
                    class = %self.class_name,
                    %name,
                    winner = %self.source_name(&group[w]),
                    other = %self.source_name(&group[c]),
                    "auto-resolved inheritance conflict"
                );
            }
        }

        if let Some(w) = winner {
            debug!(class = %self.class_name, %name, source = %self.source_name(&group[w]), "resolved candidate");
        }
        Ok(winner)
    }

    fn check_attribute_method_overlap(&self, group: &[Candidate], name: &str) -> Result<(), SchemaError> {
        let attribute = group.iter().find(|c| !c.is_method());
        let method = group.iter().find(|c| c.is_method());
        if let (Some(att), Some(method)) = (attribute, method) {
            return Err(SchemaError::IncompatibleComponents {
                name: name.to_string(),
                first: self.source_name(att),
                second: self.source_name(method),
            });
        }
        Ok(())
    }

    /// An alias name may be used once and may not collide with any other
    /// candidate of that name.
    fn check_alias_conflict(&self, group: &[Candidate], name: &str) -> Result<(), SchemaError> {
        let mut alias: Option<&Candidate> = None;
        let mut normal: Option<&Candidate> = None;
        for c in group.iter().filter(|c| c.alias.is_none()) {
            if c.is_alias {
                if alias.is_some() {
                    return Err(SchemaError::MultipleAlias {
                        alias: name.to_string(),
                    });
                }
                alias = Some(c);
            } else if normal.map_or(true, |n| !n.is_local) {
                normal = Some(c);
            }
        }
        match (alias, normal) {
            (Some(alias), Some(normal)) if normal.is_local => Err(SchemaError::AliasComponentExists {
                alias: name.to_string(),
                name: alias.component.name().to_string(),
            }),
            (Some(alias), Some(normal)) => Err(SchemaError::AliasComponentInherited {
                alias: name.to_string(),
                name: alias.component.name().to_string(),
                source_class: self.source_name(alias),
                other: self.source_name(normal),
            }),
            _ => Ok(()),
        }
    }

    /// Finds the most specific of the candidates renamed away from this
    /// name; their domains must be mutually compatible.
    fn most_specific_alias(&self, group: &[Candidate], name: &str) -> Result<Option<usize>, SchemaError> {
        let mut most: Option<usize> = None;
        for (i, c) in group.iter().enumerate().filter(|(_, c)| c.alias.is_some()) {
            let Some(m) = most else {
                most = Some(i);
                continue;
            };
            if c.origin == group[m].origin {
                continue;
            }
            match self.compare(c, &group[m]) {
                DomainComparison::Incompatible => {
                    return Err(SchemaError::IncompatibleDomains {
                        name: name.to_string(),
                        first: self.source_name(&group[m]),
                        second: self.source_name(c),
                        class: self.class_name.to_string(),
                    });
                }
                DomainComparison::MoreSpecific => most = Some(i),
                DomainComparison::Equal | DomainComparison::LessSpecific => {}
            }
        }
        Ok(most)
    }
}

/// Points the plain resolution for `name` at `source`, adding one if needed.
fn auto_resolve_conflict(
    resolutions: &mut Vec<Resolution>,
    source: ClassId,
    name: &str,
    space: ResolutionSpace,
) {
    match resolutions
        .iter_mut()
        .find(|r| r.space == space && r.name == name && r.alias.is_none())
    {
        Some(existing) => existing.class = source,
        None => resolutions.push(Resolution {
            class: source,
            name: name.to_string(),
            alias: None,
            space,
        }),
    }
}
