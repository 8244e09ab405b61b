//! Builtin methods of the primitive types.
//!
//! This module only describes the builtins visible at the nz language
//! level. It does not execute anything: the code generator lowers each
//! [`Intrinsic`] either to inline wasm instructions or to a host import
//! in module [`HOST_MODULE`], and the class loader provides the host side.

use crate::sym::Sym;
use crate::types::Prim;

/// Wasm import module of every host-implemented builtin.
pub const HOST_MODULE: &str = "nz";

/// The primitive operation behind a builtin method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    IntAdd,
    IntSub,
    IntMul,
    IntDiv,
    IntPow,
    IntParse,
    IntMax,
    IntMin,
    IntFromFloat,
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatDiv,
    FloatParse,
    FloatFromInt,
    StringConcat,
    StringFromInt,
    StringFromFloat,
    StringLength,
}

impl Intrinsic {
    /// True when the operation is a plain wasm instruction sequence.
    pub fn is_inline(self) -> bool {
        matches!(
            self,
            Intrinsic::IntAdd
                | Intrinsic::IntSub
                | Intrinsic::IntMul
                | Intrinsic::IntDiv
                | Intrinsic::IntFromFloat
                | Intrinsic::FloatAdd
                | Intrinsic::FloatSub
                | Intrinsic::FloatMul
                | Intrinsic::FloatDiv
                | Intrinsic::FloatFromInt
        )
    }
}

/// Signature and lowering of one builtin method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinMethod {
    /// Type the method belongs to.
    pub owner: Prim,

    /// Name at the nz level (`+`, `parse`, ...).
    pub name: &'static str,

    /// Static methods are called as `Int.parse s`; instance methods take
    /// the receiver as an implicit first argument.
    pub is_static: bool,

    /// Parameter types, not counting the receiver.
    pub params: &'static [Prim],

    pub ret: Prim,

    pub op: Intrinsic,
}

impl BuiltinMethod {
    /// Field name of the host import, or `None` for inline intrinsics.
    pub fn host_import(&self) -> Option<String> {
        if self.op.is_inline() {
            None
        } else {
            Some(format!("{}.{}", self.owner.name(), self.name))
        }
    }

    /// Wasm-level parameter types: the receiver (if any), then the parameters.
    pub fn wasm_params(&self) -> impl Iterator<Item = Prim> + '_ {
        let receiver = (!self.is_static).then_some(self.owner);
        receiver.into_iter().chain(self.params.iter().copied())
    }
}

const fn instance(owner: Prim, name: &'static str, params: &'static [Prim], ret: Prim, op: Intrinsic) -> BuiltinMethod {
    BuiltinMethod {
        owner,
        name,
        is_static: false,
        params,
        ret,
        op,
    }
}

const fn stat(owner: Prim, name: &'static str, params: &'static [Prim], ret: Prim, op: Intrinsic) -> BuiltinMethod {
    BuiltinMethod {
        owner,
        name,
        is_static: true,
        params,
        ret,
        op,
    }
}

use Prim::{Float, Int, String as Str};

/// Every builtin method, grouped by owner.
pub const BUILTINS: &[BuiltinMethod] = &[
    instance(Int, "+", &[Int], Int, Intrinsic::IntAdd),
    instance(Int, "-", &[Int], Int, Intrinsic::IntSub),
    instance(Int, "*", &[Int], Int, Intrinsic::IntMul),
    instance(Int, "/", &[Int], Int, Intrinsic::IntDiv),
    instance(Int, "^", &[Int], Int, Intrinsic::IntPow),
    stat(Int, "parse", &[Str], Int, Intrinsic::IntParse),
    stat(Int, "max", &[Int, Int], Int, Intrinsic::IntMax),
    stat(Int, "min", &[Int, Int], Int, Intrinsic::IntMin),
    stat(Int, "fromFloat", &[Float], Int, Intrinsic::IntFromFloat),
    instance(Float, "+", &[Float], Float, Intrinsic::FloatAdd),
    instance(Float, "-", &[Float], Float, Intrinsic::FloatSub),
    instance(Float, "*", &[Float], Float, Intrinsic::FloatMul),
    instance(Float, "/", &[Float], Float, Intrinsic::FloatDiv),
    stat(Float, "parse", &[Str], Float, Intrinsic::FloatParse),
    stat(Float, "fromInt", &[Int], Float, Intrinsic::FloatFromInt),
    instance(Str, "+", &[Str], Str, Intrinsic::StringConcat),
    stat(Str, "fromInt", &[Int], Str, Intrinsic::StringFromInt),
    stat(Str, "fromFloat", &[Float], Str, Intrinsic::StringFromFloat),
    stat(Str, "length", &[Str], Int, Intrinsic::StringLength),
];

/// Look up a builtin method by owner and name.
///
/// The table is small, so this is a linear scan.
pub fn lookup(owner: Prim, name: Sym) -> Option<&'static BuiltinMethod> {
    BUILTINS
        .iter()
        .find(|method| method.owner == owner && method.name == name.as_str())
}

/// The builtin implementing `op`.
pub fn by_intrinsic(op: Intrinsic) -> Option<&'static BuiltinMethod> {
    BUILTINS.iter().find(|method| method.op == op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_per_owner() {
        let mut seen = HashSet::new();
        for method in BUILTINS {
            assert!(
                seen.insert((method.owner, method.name)),
                "duplicate builtin {}.{}",
                method.owner.name(),
                method.name
            );
        }
    }

    #[test]
    fn every_intrinsic_has_exactly_one_method() {
        let ops: HashSet<_> = BUILTINS.iter().map(|method| method.op).collect();
        assert_eq!(ops.len(), BUILTINS.len());
    }

    #[test]
    fn finds_int_addition_and_parse() {
        let add = lookup(Prim::Int, Sym::intern("+")).expect("Int.+");
        assert!(!add.is_static);
        assert_eq!(add.op, Intrinsic::IntAdd);
        assert_eq!(add.host_import(), None);

        let parse = lookup(Prim::Int, Sym::intern("parse")).expect("Int.parse");
        assert!(parse.is_static);
        assert_eq!(parse.params, &[Prim::String]);
        assert_eq!(parse.host_import().as_deref(), Some("Int.parse"));
        assert!(lookup(Prim::String, Sym::intern("parse")).is_none());
    }

    #[test]
    fn wasm_params_include_the_receiver() {
        let concat = by_intrinsic(Intrinsic::StringConcat).expect("String.+");
        assert_eq!(concat.wasm_params().collect::<Vec<_>>(), vec![Prim::String, Prim::String]);
        let max = by_intrinsic(Intrinsic::IntMax).expect("Int.max");
        assert_eq!(max.wasm_params().collect::<Vec<_>>(), vec![Prim::Int, Prim::Int]);
    }
}
