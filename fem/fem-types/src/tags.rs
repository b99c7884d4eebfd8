//! Strongly typed tags for model entities.
//!
//! Every registry in the kernel is keyed by an integer tag that is unique
//! within that registry. Wrapping the raw integer in a newtype keeps a node
//! tag from being passed where an element tag is expected.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

macro_rules! define_tag {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $name(pub i32);

        impl $name {
            /// Create a new tag.
            #[must_use]
            pub const fn new(tag: i32) -> Self {
                Self(tag)
            }

            /// Get the raw tag value.
            #[must_use]
            pub const fn raw(self) -> i32 {
                self.0
            }
        }

        impl From<i32> for $name {
            fn from(tag: i32) -> Self {
                Self(tag)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

define_tag!(
    /// Tag of a node in the mesh.
    NodeTag,
    "Node"
);

define_tag!(
    /// Tag of an element in the mesh.
    ElementTag,
    "Element"
);

define_tag!(
    /// Tag of a single- or multi-freedom constraint.
    ///
    /// Single-freedom and multi-freedom constraints live in separate
    /// registries, so the same raw value may be used once in each.
    ConstraintTag,
    "Constraint"
);

define_tag!(
    /// Tag of a load pattern.
    PatternTag,
    "Pattern"
);

define_tag!(
    /// Tag of a node locker.
    LockerTag,
    "Locker"
);

define_tag!(
    /// Tag of a nodal or elemental load inside a load pattern.
    LoadTag,
    "Load"
);

/// Registry that owns an entity, used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Registry {
    /// Node registry of the mesh.
    Node,
    /// Element registry of the mesh.
    Element,
    /// Single-freedom constraints.
    SingleFreedom,
    /// Multi-freedom constraints.
    MultiFreedom,
    /// Load patterns.
    LoadPattern,
    /// Node lockers.
    NodeLocker,
    /// Nodal loads of one pattern.
    NodalLoad,
    /// Elemental loads of one pattern.
    ElementalLoad,
}

impl std::fmt::Display for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Node => "node",
            Self::Element => "element",
            Self::SingleFreedom => "single-freedom constraint",
            Self::MultiFreedom => "multi-freedom constraint",
            Self::LoadPattern => "load pattern",
            Self::NodeLocker => "node locker",
            Self::NodalLoad => "nodal load",
            Self::ElementalLoad => "elemental load",
        };
        f.write_str(name)
    }
}
