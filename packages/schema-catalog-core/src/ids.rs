//! Stable handles for catalog entities.
//!
//! Classes, attributes and disk structures reference each other through
//! these ids instead of pointers; a missing id is expressed as `Option`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Class object identifier.
    ClassId(u32),
    "class#"
);
define_id!(
    /// Attribute identifier, unique across all namespaces of one class.
    AttrId(u32),
    "att#"
);
define_id!(
    /// Method identifier.
    MethodId(u32),
    "meth#"
);
define_id!(
    /// Physical B-tree identifier.
    BTreeId(u64),
    "btree#"
);
define_id!(
    /// Heap file identifier.
    HeapId(u64),
    "heap#"
);
