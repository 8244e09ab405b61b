//! Checked classes and the typed expression tree.
//!
//! A [`Klass`] is built in two steps by the type checker: first its shape
//! (slots and method signatures, bodies absent), then the method bodies.
//! Classes live in a [`ClassTable`] owned by the compiler session and are
//! referenced by [`ClassId`].

use std::collections::HashMap;

use crate::ast::LiteralValue;
use crate::builtins::BuiltinMethod;
use crate::error::{CompileResult, ErrorKind, raise};
use crate::loc::Loc;
use crate::path::ModulePath;
use crate::sym::Sym;
use crate::types::Ty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Every class checked in one session, indexed by [`ClassId`].
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<Klass>,
}

impl ClassTable {
    pub fn new() -> Self {
        ClassTable::default()
    }

    /// Id the next pushed class will get.
    pub fn next_id(&self) -> ClassId {
        ClassId(self.classes.len() as u32)
    }

    pub fn push(&mut self, klass: Klass) -> ClassId {
        debug_assert_eq!(klass.id, self.next_id());
        let id = klass.id;
        self.classes.push(klass);
        id
    }

    /// Drop `id` and every class added after it.
    pub fn truncate(&mut self, id: ClassId) {
        self.classes.truncate(id.0 as usize);
    }

    pub fn get(&self, id: ClassId) -> &Klass {
        &self.classes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut Klass {
        &mut self.classes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberId {
    Slot(usize),
    Method(usize),
}

/// A member found by name.
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    Slot(usize, &'a Slot),
    Method(usize, &'a Method),
}

#[derive(Debug, Clone)]
pub struct Klass {
    pub id: ClassId,
    pub name: Sym,
    /// Logical path of the defining module.
    pub module: ModulePath,
    pub loc: Loc,
    pub slots: Vec<Slot>,
    pub methods: Vec<Method>,
    // Slots and methods share one namespace.
    members: HashMap<Sym, MemberId>,
}

impl Klass {
    pub fn new(id: ClassId, name: Sym, module: ModulePath, loc: Loc) -> Self {
        Klass {
            id,
            name,
            module,
            loc,
            slots: Vec::new(),
            methods: Vec::new(),
            members: HashMap::new(),
        }
    }

    pub fn ty(&self) -> Ty {
        Ty::Class {
            id: self.id,
            name: self.name,
        }
    }

    fn claim(&mut self, loc: Loc, name: Sym, member: MemberId) -> CompileResult<()> {
        if self.members.contains_key(&name) {
            return raise(loc, ErrorKind::DuplicateMember(name));
        }
        self.members.insert(name, member);
        Ok(())
    }

    pub fn add_slot(&mut self, slot: Slot) -> CompileResult<()> {
        self.claim(slot.loc, slot.name, MemberId::Slot(self.slots.len()))?;
        self.slots.push(slot);
        Ok(())
    }

    pub fn add_method(&mut self, method: Method) -> CompileResult<()> {
        self.claim(method.loc, method.name, MemberId::Method(self.methods.len()))?;
        self.methods.push(method);
        Ok(())
    }

    pub fn member(&self, name: Sym) -> Option<Member<'_>> {
        Some(match *self.members.get(&name)? {
            MemberId::Slot(index) => Member::Slot(index, &self.slots[index]),
            MemberId::Method(index) => Member::Method(index, &self.methods[index]),
        })
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub loc: Loc,
    pub mutable: bool,
    pub ty: Ty,
    pub name: Sym,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub loc: Loc,
    pub is_static: bool,
    pub return_ty: Ty,
    pub name: Sym,
    pub params: Vec<Param>,
    /// Absent until the class's bodies have been checked.
    pub body: Option<TExpr>,
}

impl Method {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub loc: Loc,
    pub ty: Ty,
    pub name: Sym,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub class: ClassId,
    pub index: usize,
    pub name: Sym,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: ClassId,
    pub index: usize,
    pub name: Sym,
}

/// The target of a resolved call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Callee {
    Method(MethodRef),
    Builtin(&'static BuiltinMethod),
}

impl Callee {
    pub fn name(&self) -> &'static str {
        match self {
            Callee::Method(method) => method.name.as_str(),
            Callee::Builtin(builtin) => builtin.name,
        }
    }
}

/// A let-bound local, numbered from 0 in binding order within one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct TExpr {
    pub loc: Loc,
    pub ty: Ty,
    pub kind: TExprKind,
}

impl TExpr {
    pub fn new(loc: Loc, ty: Ty, kind: TExprKind) -> Self {
        TExpr { loc, ty, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TExprKind {
    Local {
        id: LocalId,
        name: Sym,
    },
    Parameter {
        index: usize,
        name: Sym,
    },
    /// The implicit receiver of an instance method.
    Receiver,
    GetSlot {
        target: Box<TExpr>,
        slot: SlotRef,
    },
    MethodCall {
        target: Box<TExpr>,
        method: Callee,
        args: Vec<TExpr>,
    },
    StaticMethodCall {
        method: Callee,
        args: Vec<TExpr>,
    },
    Let {
        pattern: TPattern,
        value: Box<TExpr>,
        then: Box<TExpr>,
    },
    Seq {
        first: Box<TExpr>,
        then: Box<TExpr>,
    },
    Literal(LiteralValue),
    Quote {
        head: String,
        parts: Vec<(TExpr, String)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TPattern {
    Ignore(Loc),
    Single {
        loc: Loc,
        name: Sym,
        ty: Ty,
        id: LocalId,
    },
}

impl TExpr {
    /// Visit this expression and all of its sub-expressions, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TExpr)) {
        visit(self);
        match &self.kind {
            TExprKind::Local { .. } | TExprKind::Parameter { .. } | TExprKind::Receiver | TExprKind::Literal(_) => {}
            TExprKind::GetSlot { target, .. } => target.walk(visit),
            TExprKind::MethodCall { target, args, .. } => {
                target.walk(visit);
                args.iter().for_each(|arg| arg.walk(visit));
            }
            TExprKind::StaticMethodCall { args, .. } => args.iter().for_each(|arg| arg.walk(visit)),
            TExprKind::Let { value, then, .. } => {
                value.walk(visit);
                then.walk(visit);
            }
            TExprKind::Seq { first, then } => {
                first.walk(visit);
                then.walk(visit);
            }
            TExprKind::Quote { parts, .. } => parts.iter().for_each(|(part, _)| part.walk(visit)),
        }
    }
}
