//! Untyped syntax tree for one module.
//!
//! Nothing here is bound or typed; names are plain symbols.

use std::fmt;

use crate::loc::Loc;
use crate::path::{ModulePath, RelPath};
use crate::sym::Sym;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub loc: Loc,
    pub imports: Vec<Import>,
    pub class: Class,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub loc: Loc,
    pub path: ImportPath,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportPath {
    Global(ModulePath),
    Relative(RelPath),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub loc: Loc,
    pub name: Sym,
    pub head: Head,
    pub members: Vec<Method>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Head {
    Slots(Loc, Vec<Slot>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub loc: Loc,
    pub mutable: bool,
    pub ty: Type,
    pub name: Sym,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub loc: Loc,
    pub is_static: bool,
    pub return_ty: Type,
    pub name: Sym,
    pub parameters: Vec<Parameter>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub loc: Loc,
    pub ty: Type,
    pub name: Sym,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Access(Loc, Sym),
    /// `Name[T, ...]`; reserved for generics.
    Inst(Loc, Sym, Vec<Type>),
}

impl Type {
    pub fn loc(&self) -> Loc {
        match self {
            Type::Access(loc, _) | Type::Inst(loc, _, _) => *loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub loc: Loc,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Access(Sym),
    StaticAccess {
        class: Sym,
        method: Sym,
    },
    OperatorCall {
        left: Box<Expr>,
        op: Sym,
        right: Box<Expr>,
    },
    Call {
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    GetProperty {
        target: Box<Expr>,
        name: Sym,
    },
    Let {
        pattern: Pattern,
        value: Box<Expr>,
        then: Box<Expr>,
    },
    Seq {
        first: Box<Expr>,
        then: Box<Expr>,
    },
    Literal(LiteralValue),
    /// `"head{expr}text{expr}text"`.
    Quote {
        head: String,
        parts: Vec<(Expr, String)>,
    },
}

impl Expr {
    pub fn new(loc: Loc, kind: ExprKind) -> Self {
        Expr { loc, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ignore(Loc),
    Single(Loc, Sym),
    Destruct(Loc, Vec<Pattern>),
}

impl Pattern {
    pub fn loc(&self) -> Loc {
        match self {
            Pattern::Ignore(loc) | Pattern::Single(loc, _) | Pattern::Destruct(loc, _) => *loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Int(value) => write!(f, "{value}"),
            LiteralValue::Float(value) => write!(f, "{value:?}"),
            LiteralValue::Str(value) => write!(f, "{value:?}"),
        }
    }
}
