//! Domain compatibility rules used when resolving inherited components.

use std::collections::HashSet;

use crate::class::{Attribute, Component, Method, MethodSignature, NameSpace};
use crate::domain::{Domain, ObjectClass};
use crate::ids::ClassId;

/// Result of comparing `d1` against `d2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainComparison {
    Equal,
    /// `d1` is a subtype of `d2`
    MoreSpecific,
    /// `d2` is a subtype of `d1`
    LessSpecific,
    Incompatible,
}

/// Read access to the class lattice.
pub trait HierarchyView {
    /// Direct superclasses of `class`.
    ///
    /// Implementations return the pending inheritance list when the class is
    /// being edited so that in-flight changes are visible.
    fn superclasses_of(&self, class: ClassId) -> Vec<ClassId>;
}

/// Compares domains relative to the class being defined.
///
/// `self_class` is the id of the class being flattened (`None` if it is
/// brand new) and `self_supers` its pending inheritance list. Self
/// references are compared by walking `self_supers` instead of the
/// committed hierarchy.
pub struct DomainComparator<'a, H: HierarchyView + ?Sized> {
    hierarchy: &'a H,
    self_class: Option<ClassId>,
    self_supers: &'a [ClassId],
}

/// Object class with self references resolved where possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Any,
    Class(ClassId),
    Pending,
}

impl<'a, H: HierarchyView + ?Sized> DomainComparator<'a, H> {
    pub fn new(hierarchy: &'a H, self_class: Option<ClassId>, self_supers: &'a [ClassId]) -> Self {
        Self {
            hierarchy,
            self_class,
            self_supers,
        }
    }

    fn target(&self, class: &ObjectClass) -> Target {
        match class {
            ObjectClass::Any => Target::Any,
            ObjectClass::Class(id) => Target::Class(*id),
            ObjectClass::SelfRef => match self.self_class {
                Some(id) => Target::Class(id),
                None => Target::Pending,
            },
        }
    }

    /// Returns `true` if `sup` is reachable upwards from `supers`.
    ///
    /// Immediate superclasses are checked before recursing.
    fn find_superclass(&self, supers: &[ClassId], sup: ClassId, seen: &mut HashSet<ClassId>) -> bool {
        if supers.contains(&sup) {
            return true;
        }
        for &parent in supers {
            if seen.insert(parent) {
                let grand = self.superclasses_of(parent);
                if self.find_superclass(&grand, sup, seen) {
                    return true;
                }
            }
        }
        false
    }

    fn superclasses_of(&self, class: ClassId) -> Vec<ClassId> {
        if Some(class) == self.self_class {
            self.self_supers.to_vec()
        } else {
            self.hierarchy.superclasses_of(class)
        }
    }

    /// Returns `true` if `sub` is a direct or transitive subclass of `sup`.
    pub fn is_subclass(&self, sub: ClassId, sup: ClassId) -> bool {
        let supers = self.superclasses_of(sub);
        self.find_superclass(&supers, sup, &mut HashSet::new())
    }

    fn pending_is_subclass(&self, sup: ClassId) -> bool {
        self.find_superclass(self.self_supers, sup, &mut HashSet::new())
    }

    /// Compares `d1` against `d2`.
    pub fn compare(&self, d1: &Domain, d2: &Domain) -> DomainComparison {
        match (d1, d2) {
            (Domain::Object(c1), Domain::Object(c2)) => {
                self.compare_objects(self.target(c1), self.target(c2))
            }
            _ if d1.same_type(d2) => DomainComparison::Equal,
            _ => DomainComparison::Incompatible,
        }
    }

    fn compare_objects(&self, t1: Target, t2: Target) -> DomainComparison {
        match (t1, t2) {
            (a, b) if a == b => DomainComparison::Equal,
            (Target::Any, _) => DomainComparison::LessSpecific,
            (_, Target::Any) => DomainComparison::MoreSpecific,
            (Target::Pending, Target::Class(sup)) => {
                if self.pending_is_subclass(sup) {
                    DomainComparison::MoreSpecific
                } else {
                    DomainComparison::Incompatible
                }
            }
            (Target::Class(sup), Target::Pending) => {
                if self.pending_is_subclass(sup) {
                    DomainComparison::LessSpecific
                } else {
                    DomainComparison::Incompatible
                }
            }
            (Target::Class(c1), Target::Class(c2)) => {
                if self.is_subclass(c1, c2) {
                    DomainComparison::MoreSpecific
                } else if self.is_subclass(c2, c1) {
                    DomainComparison::LessSpecific
                } else {
                    DomainComparison::Incompatible
                }
            }
            _ => DomainComparison::Incompatible,
        }
    }

    /// Compares argument lists; any difference is incompatible.
    pub fn compare_arguments(
        &self,
        sig1: Option<&MethodSignature>,
        sig2: Option<&MethodSignature>,
    ) -> DomainComparison {
        let (sig1, sig2) = match (sig1, sig2) {
            (None, None) => return DomainComparison::Equal,
            (Some(a), Some(b)) => (a, b),
            _ => return DomainComparison::Incompatible,
        };
        if sig1.arguments.len() != sig2.arguments.len() {
            return DomainComparison::Incompatible;
        }
        let all_equal = sig1
            .arguments
            .iter()
            .zip(&sig2.arguments)
            .all(|pair| match pair {
                (None, None) => true,
                (Some(a), Some(b)) => self.compare(a, b) == DomainComparison::Equal,
                _ => false,
            });
        if all_equal {
            DomainComparison::Equal
        } else {
            DomainComparison::Incompatible
        }
    }

    /// Compares two methods by return domain, then arguments.
    pub fn compare_methods(&self, m1: &Method, m2: &Method) -> DomainComparison {
        if m1.namespace != m2.namespace {
            return DomainComparison::Incompatible;
        }
        let r1 = m1.signature.as_ref().and_then(|s| s.return_domain.as_ref());
        let r2 = m2.signature.as_ref().and_then(|s| s.return_domain.as_ref());
        // a missing return domain is compatible with anything
        let status = match (r1, r2) {
            (Some(a), Some(b)) => self.compare(a, b),
            _ => DomainComparison::Equal,
        };
        if status == DomainComparison::Incompatible {
            return status;
        }
        match self.compare_arguments(m1.signature.as_ref(), m2.signature.as_ref()) {
            DomainComparison::Equal => status,
            _ => DomainComparison::Incompatible,
        }
    }

    /// Compares two attributes. Instance and shared attributes may be
    /// mixed; class attributes only compare with class attributes.
    pub fn compare_attributes(&self, a1: &Attribute, a2: &Attribute) -> DomainComparison {
        let class_level =
            |a: &Attribute| a.namespace == NameSpace::ClassAttribute;
        if a1.namespace == a2.namespace || (!class_level(a1) && !class_level(a2)) {
            self.compare(&a1.domain, &a2.domain)
        } else {
            DomainComparison::Incompatible
        }
    }

    /// Compares two components of any kind.
    pub fn compare_components(&self, c1: &Component, c2: &Component) -> DomainComparison {
        match (c1, c2) {
            (Component::Attribute(a1), Component::Attribute(a2)) => self.compare_attributes(a1, a2),
            (Component::Method(m1), Component::Method(m2)) => self.compare_methods(m1, m2),
            _ => DomainComparison::Incompatible,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct Lattice(HashMap<ClassId, Vec<ClassId>>);

    impl HierarchyView for Lattice {
        fn superclasses_of(&self, class: ClassId) -> Vec<ClassId> {
            self.0.get(&class).cloned().unwrap_or_default()
        }
    }

    fn lattice() -> Lattice {
        // 1 <- 2 <- 3, 4 unrelated
        let mut map = HashMap::new();
        map.insert(ClassId(2), vec![ClassId(1)]);
        map.insert(ClassId(3), vec![ClassId(2)]);
        Lattice(map)
    }

    fn obj(id: u32) -> Domain {
        Domain::Object(ObjectClass::Class(ClassId(id)))
    }

    #[test]
    fn test_object_specificity() {
        let lattice = lattice();
        let cmp = DomainComparator::new(&lattice, None, &[]);
        assert_eq!(cmp.compare(&obj(3), &obj(1)), DomainComparison::MoreSpecific);
        assert_eq!(cmp.compare(&obj(1), &obj(3)), DomainComparison::LessSpecific);
        assert_eq!(cmp.compare(&obj(3), &obj(4)), DomainComparison::Incompatible);
        assert_eq!(cmp.compare(&obj(2), &obj(2)), DomainComparison::Equal);
        assert_eq!(
            cmp.compare(&Domain::Object(ObjectClass::Any), &obj(2)),
            DomainComparison::LessSpecific
        );
    }

    #[test]
    fn test_pending_class_uses_template_supers() {
        let lattice = lattice();
        let supers = [ClassId(3)];
        let cmp = DomainComparator::new(&lattice, None, &supers);
        let pending = Domain::Object(ObjectClass::SelfRef);
        assert_eq!(cmp.compare(&pending, &obj(1)), DomainComparison::MoreSpecific);
        assert_eq!(cmp.compare(&obj(2), &pending), DomainComparison::LessSpecific);
        assert_eq!(cmp.compare(&pending, &obj(4)), DomainComparison::Incompatible);
        assert_eq!(cmp.compare(&pending, &Domain::Integer), DomainComparison::Incompatible);
    }

    #[test]
    fn test_scalar_and_collection_types() {
        let lattice = lattice();
        let cmp = DomainComparator::new(&lattice, None, &[]);
        assert_eq!(
            cmp.compare(&Domain::Varchar(10), &Domain::Varchar(20)),
            DomainComparison::Equal
        );
        assert_eq!(
            cmp.compare(&Domain::Set(vec![Domain::Integer]), &Domain::Set(vec![Domain::Float])),
            DomainComparison::Equal
        );
        assert_eq!(cmp.compare(&Domain::Integer, &Domain::Float), DomainComparison::Incompatible);
    }

    #[test]
    fn test_method_argument_counts() {
        let lattice = lattice();
        let cmp = DomainComparator::new(&lattice, None, &[]);
        let m1 = Method::new("area", "f_area").argument(Domain::Integer);
        let m2 = Method::new("area", "g_area")
            .argument(Domain::Integer)
            .argument(Domain::Integer);
        assert_eq!(cmp.compare_methods(&m1, &m2), DomainComparison::Incompatible);

        let m3 = Method::new("area", "h_area").argument(Domain::Integer).returning(obj(3));
        let m4 = Method::new("area", "k_area").argument(Domain::Integer).returning(obj(1));
        assert_eq!(cmp.compare_methods(&m3, &m4), DomainComparison::MoreSpecific);
    }

    #[test]
    fn test_class_attribute_does_not_mix() {
        let lattice = lattice();
        let cmp = DomainComparator::new(&lattice, None, &[]);
        let a = Attribute::new("x", Domain::Integer);
        let shared = Attribute::with_namespace("x", Domain::Integer, NameSpace::SharedAttribute);
        let class_att = Attribute::with_namespace("x", Domain::Integer, NameSpace::ClassAttribute);
        assert_eq!(cmp.compare_attributes(&a, &shared), DomainComparison::Equal);
        assert_eq!(cmp.compare_attributes(&a, &class_att), DomainComparison::Incompatible);
    }
}
