//! Semantic types.
//!
//! A type is either one of the builtin primitives or a class checked in
//! the current session. There is no subtyping: two types are compatible
//! only when they are equal.

use std::fmt;

use crate::hir::ClassId;
use crate::sym::Sym;

/// Builtin primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prim {
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Immutable text, passed around as a host handle.
    String,
}

impl Prim {
    pub const ALL: [Prim; 3] = [Prim::Int, Prim::Float, Prim::String];

    pub fn name(self) -> &'static str {
        match self {
            Prim::Int => "Int",
            Prim::Float => "Float",
            Prim::String => "String",
        }
    }

    pub fn from_name(name: &str) -> Option<Prim> {
        Prim::ALL.into_iter().find(|prim| prim.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Class { id: ClassId, name: Sym },
    Builtin(Prim),
}

impl Ty {
    pub const INT: Ty = Ty::Builtin(Prim::Int);
    pub const FLOAT: Ty = Ty::Builtin(Prim::Float);
    pub const STRING: Ty = Ty::Builtin(Prim::String);

    pub fn name(&self) -> &'static str {
        match self {
            Ty::Class { name, .. } => name.as_str(),
            Ty::Builtin(prim) => prim.name(),
        }
    }
}

impl From<Prim> for Ty {
    fn from(prim: Prim) -> Self {
        Ty::Builtin(prim)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip_through_names() {
        for prim in Prim::ALL {
            assert_eq!(Prim::from_name(prim.name()), Some(prim));
        }
        assert_eq!(Prim::from_name("Bool"), None);
    }

    #[test]
    fn class_types_compare_by_identity() {
        let name = Sym::intern("Point");
        let a = Ty::Class { id: ClassId(0), name };
        let b = Ty::Class { id: ClassId(1), name };
        assert_ne!(a, b);
        assert_eq!(a, Ty::Class { id: ClassId(0), name });
        assert_eq!(a.to_string(), "Point");
        assert_ne!(Ty::INT, Ty::FLOAT);
    }
}
