//! Name resolution and type checking.
//!
//! Each module is checked in two phases. The shape phase resolves slot and
//! signature types and registers the class in the [`ClassTable`]; the fill
//! phase checks every method body against its declared return type and
//! produces the typed expression tree. Modules are checked in dependency
//! order, so imported classes are always complete.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{self, ExprKind, LiteralValue, Pattern};
use crate::builtins;
use crate::error::{CompileResult, ErrorKind, raise};
use crate::hir::{
    Callee, ClassId, ClassTable, Klass, LocalId, Member, Method, MethodRef, Param, Slot, SlotRef, TExpr, TExprKind,
    TPattern,
};
use crate::loc::Loc;
use crate::path::ModulePath;
use crate::sym::Sym;
use crate::types::{Prim, Ty};

/// Check one parsed module whose imports are already in `table`.
///
/// On success the class is in `table` with every body filled in. On
/// failure the table is left as it was.
pub fn check_module(
    table: &mut ClassTable,
    module: &ModulePath,
    ast: &ast::Module,
    imports: &[(Loc, ClassId)],
) -> CompileResult<ClassId> {
    let id = table.next_id();
    let own = Ty::Class {
        id,
        name: ast.class.name,
    };
    let types = TypeScope::new(table, ast.class.name, own, imports)?;
    let klass = shape(&types, id, module, &ast.class)?;
    table.push(klass);

    let bodies = match fill(table, id, &types, &ast.class) {
        Ok(bodies) => bodies,
        Err(err) => {
            table.truncate(id);
            return Err(err);
        }
    };
    let klass = table.get_mut(id);
    for (method, body) in klass.methods.iter_mut().zip(bodies) {
        method.body = Some(body);
    }
    debug!(class = %klass.name, members = klass.member_count(), "checked class");
    Ok(id)
}

/// Type names visible in one module.
struct TypeScope {
    own: (Sym, Ty),
    imports: HashMap<Sym, Ty>,
}

impl TypeScope {
    fn new(table: &ClassTable, own_name: Sym, own: Ty, imports: &[(Loc, ClassId)]) -> CompileResult<Self> {
        let mut by_name = HashMap::new();
        for &(loc, id) in imports {
            let class = table.get(id);
            if let Some(previous) = by_name.insert(class.name, class.ty()) {
                if previous != class.ty() {
                    return raise(loc, ErrorKind::NameAlreadyBound(class.name));
                }
            }
        }
        Ok(TypeScope {
            own: (own_name, own),
            imports: by_name,
        })
    }

    /// Imports first, then the class itself, then the builtins.
    fn lookup(&self, name: Sym) -> Option<Ty> {
        if let Some(ty) = self.imports.get(&name) {
            return Some(*ty);
        }
        if name == self.own.0 {
            return Some(self.own.1);
        }
        Prim::from_name(name.as_str()).map(Ty::Builtin)
    }

    fn resolve(&self, ty: &ast::Type) -> CompileResult<Ty> {
        match ty {
            ast::Type::Access(loc, name) => match self.lookup(*name) {
                Some(ty) => Ok(ty),
                None => raise(*loc, ErrorKind::CantBind(*name)),
            },
            ast::Type::Inst(loc, _, _) => raise(*loc, ErrorKind::NotImplemented("generic types")),
        }
    }
}

fn shape(types: &TypeScope, id: ClassId, module: &ModulePath, class: &ast::Class) -> CompileResult<Klass> {
    let mut klass = Klass::new(id, class.name, module.clone(), class.loc);
    let ast::Head::Slots(_, slots) = &class.head;
    for slot in slots {
        klass.add_slot(Slot {
            loc: slot.loc,
            mutable: slot.mutable,
            ty: types.resolve(&slot.ty)?,
            name: slot.name,
        })?;
    }
    for method in &class.members {
        let mut params: Vec<Param> = Vec::with_capacity(method.parameters.len());
        for parameter in &method.parameters {
            if params.iter().any(|param| param.name == parameter.name) {
                return raise(parameter.loc, ErrorKind::NameAlreadyBound(parameter.name));
            }
            params.push(Param {
                loc: parameter.loc,
                ty: types.resolve(&parameter.ty)?,
                name: parameter.name,
            });
        }
        klass.add_method(Method {
            loc: method.loc,
            is_static: method.is_static,
            return_ty: types.resolve(&method.return_ty)?,
            name: method.name,
            params,
            body: None,
        })?;
    }
    Ok(klass)
}

fn fill(table: &ClassTable, id: ClassId, types: &TypeScope, class: &ast::Class) -> CompileResult<Vec<TExpr>> {
    let klass = table.get(id);
    class
        .members
        .iter()
        .zip(&klass.methods)
        .map(|(syntax, method)| {
            let mut checker = BodyChecker::new(table, klass, types, method);
            checker.check(&syntax.body, &mut Expectation::Exactly(method.return_ty))
        })
        .collect()
}

/// What the context wants from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expectation {
    /// The type must be exactly this.
    Exactly(Ty),
    /// Record the type; every later use must agree with the first.
    Infer(Option<Ty>),
    /// The value is discarded.
    Void,
}

impl Expectation {
    fn accept(&mut self, loc: Loc, actual: Ty) -> CompileResult<()> {
        match self {
            Expectation::Exactly(expected) if *expected != actual => raise(
                loc,
                ErrorKind::TypeMismatch {
                    expected: *expected,
                    actual,
                },
            ),
            Expectation::Infer(Some(first)) if *first != actual => raise(
                loc,
                ErrorKind::InferConflict {
                    first: *first,
                    second: actual,
                },
            ),
            Expectation::Infer(slot) => {
                *slot = Some(actual);
                Ok(())
            }
            Expectation::Exactly(_) | Expectation::Void => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    Parameter(usize),
    Local(LocalId),
}

/// Names in scope in one method body. Shadowing is not allowed.
#[derive(Debug, Default)]
struct Scope {
    entries: Vec<(Sym, Binding, Ty)>,
}

impl Scope {
    fn lookup(&self, name: Sym) -> Option<(Binding, Ty)> {
        self.entries
            .iter()
            .rev()
            .find(|(bound, _, _)| *bound == name)
            .map(|(_, binding, ty)| (*binding, *ty))
    }

    fn bind(&mut self, loc: Loc, name: Sym, binding: Binding, ty: Ty) -> CompileResult<()> {
        if self.lookup(name).is_some() {
            return raise(loc, ErrorKind::NameAlreadyBound(name));
        }
        self.entries.push((name, binding, ty));
        Ok(())
    }

    fn unbind(&mut self, name: Sym) {
        if let Some(index) = self.entries.iter().rposition(|(bound, _, _)| *bound == name) {
            self.entries.remove(index);
        }
    }
}

struct Signature {
    is_static: bool,
    params: Vec<Ty>,
    ret: Ty,
}

impl Signature {
    fn of(method: &Method) -> Self {
        Signature {
            is_static: method.is_static,
            params: method.params.iter().map(|param| param.ty).collect(),
            ret: method.return_ty,
        }
    }
}

enum Found {
    Slot(SlotRef, Ty),
    Method(Callee, Signature),
}

struct BodyChecker<'a> {
    table: &'a ClassTable,
    class: &'a Klass,
    types: &'a TypeScope,
    method: &'a Method,
    scope: Scope,
    next_local: u32,
}

impl<'a> BodyChecker<'a> {
    fn new(table: &'a ClassTable, class: &'a Klass, types: &'a TypeScope, method: &'a Method) -> Self {
        let mut scope = Scope::default();
        for (index, param) in method.params.iter().enumerate() {
            scope.entries.push((param.name, Binding::Parameter(index), param.ty));
        }
        BodyChecker {
            table,
            class,
            types,
            method,
            scope,
            next_local: 0,
        }
    }

    fn infer(&mut self, expr: &ast::Expr) -> CompileResult<TExpr> {
        self.check(expr, &mut Expectation::Infer(None))
    }

    fn check(&mut self, expr: &ast::Expr, expect: &mut Expectation) -> CompileResult<TExpr> {
        let loc = expr.loc;
        let texpr = match &expr.kind {
            ExprKind::Let { pattern, value, then } => return self.check_let(loc, pattern, value, then, expect),
            ExprKind::Seq { first, then } => {
                let first = self.check(first, &mut Expectation::Void)?;
                let then = self.check(then, expect)?;
                let ty = then.ty;
                let kind = TExprKind::Seq {
                    first: Box::new(first),
                    then: Box::new(then),
                };
                return Ok(TExpr::new(loc, ty, kind));
            }
            ExprKind::Access(name) => self.access(loc, *name)?,
            ExprKind::StaticAccess { class, method } => self.static_call(loc, *class, *method, &[])?,
            ExprKind::OperatorCall { left, op, right } => {
                let target = self.infer(left)?;
                self.instance_call(loc, target, *op, std::slice::from_ref(&**right))?
            }
            ExprKind::Call { target, args } => self.call(loc, target, args)?,
            ExprKind::GetProperty { target, name } => {
                let target = self.infer(target)?;
                self.get_property(loc, target, *name)?
            }
            ExprKind::Literal(value) => TExpr::new(loc, literal_type(value), TExprKind::Literal(value.clone())),
            ExprKind::Quote { head, parts } => {
                let mut checked = Vec::with_capacity(parts.len());
                for (part, text) in parts {
                    let part = self.check(part, &mut Expectation::Exactly(Ty::STRING))?;
                    checked.push((part, text.clone()));
                }
                let kind = TExprKind::Quote {
                    head: head.clone(),
                    parts: checked,
                };
                TExpr::new(loc, Ty::STRING, kind)
            }
        };
        expect.accept(loc, texpr.ty)?;
        Ok(texpr)
    }

    fn check_let(
        &mut self,
        loc: Loc,
        pattern: &Pattern,
        value: &ast::Expr,
        then: &ast::Expr,
        expect: &mut Expectation,
    ) -> CompileResult<TExpr> {
        let value = self.infer(value)?;
        let (pattern, bound) = self.bind(pattern, value.ty)?;
        let then = self.check(then, expect);
        if let Some(name) = bound {
            self.scope.unbind(name);
        }
        let then = then?;
        Ok(TExpr::new(
            loc,
            then.ty,
            TExprKind::Let {
                pattern,
                value: Box::new(value),
                then: Box::new(then),
            },
        ))
    }

    fn bind(&mut self, pattern: &Pattern, ty: Ty) -> CompileResult<(TPattern, Option<Sym>)> {
        match pattern {
            Pattern::Ignore(loc) => Ok((TPattern::Ignore(*loc), None)),
            Pattern::Single(loc, name) => {
                let id = LocalId(self.next_local);
                self.scope.bind(*loc, *name, Binding::Local(id), ty)?;
                self.next_local += 1;
                let pattern = TPattern::Single {
                    loc: *loc,
                    name: *name,
                    ty,
                    id,
                };
                Ok((pattern, Some(*name)))
            }
            Pattern::Destruct(loc, _) => raise(*loc, ErrorKind::NotImplemented("destructuring patterns")),
        }
    }

    fn receiver(&self, loc: Loc, member: Sym) -> CompileResult<TExpr> {
        if self.method.is_static {
            return raise(loc, ErrorKind::InstanceWithoutReceiver(member));
        }
        Ok(TExpr::new(loc, self.class.ty(), TExprKind::Receiver))
    }

    fn access(&mut self, loc: Loc, name: Sym) -> CompileResult<TExpr> {
        if let Some((binding, ty)) = self.scope.lookup(name) {
            let kind = match binding {
                Binding::Parameter(index) => TExprKind::Parameter { index, name },
                Binding::Local(id) => TExprKind::Local { id, name },
            };
            return Ok(TExpr::new(loc, ty, kind));
        }
        let class = self.class;
        match class.member(name) {
            Some(Member::Slot(index, slot)) => {
                let target = self.receiver(loc, name)?;
                let slot_ref = SlotRef {
                    class: class.id,
                    index,
                    name,
                };
                let kind = TExprKind::GetSlot {
                    target: Box::new(target),
                    slot: slot_ref,
                };
                Ok(TExpr::new(loc, slot.ty, kind))
            }
            Some(Member::Method(..)) => self.own_call(loc, name, &[]),
            None => raise(loc, ErrorKind::CantBind(name)),
        }
    }

    fn call(&mut self, loc: Loc, target: &ast::Expr, args: &[ast::Expr]) -> CompileResult<TExpr> {
        match &target.kind {
            ExprKind::GetProperty { target: receiver, name } => {
                let receiver = self.infer(receiver)?;
                self.instance_call(loc, receiver, *name, args)
            }
            ExprKind::StaticAccess { class, method } => self.static_call(loc, *class, *method, args),
            ExprKind::Access(name) if self.scope.lookup(*name).is_none() => self.own_call(loc, *name, args),
            _ => raise(target.loc, ErrorKind::NotCallable),
        }
    }

    fn find(&self, ty: Ty, name: Sym) -> Option<Found> {
        match ty {
            Ty::Builtin(prim) => {
                let builtin = builtins::lookup(prim, name)?;
                let signature = Signature {
                    is_static: builtin.is_static,
                    params: builtin.params.iter().copied().map(Ty::Builtin).collect(),
                    ret: Ty::Builtin(builtin.ret),
                };
                Some(Found::Method(Callee::Builtin(builtin), signature))
            }
            Ty::Class { id, .. } => Some(match self.table.get(id).member(name)? {
                Member::Slot(index, slot) => Found::Slot(SlotRef { class: id, index, name }, slot.ty),
                Member::Method(index, method) => Found::Method(
                    Callee::Method(MethodRef { class: id, index, name }),
                    Signature::of(method),
                ),
            }),
        }
    }

    fn instance_call(&mut self, loc: Loc, target: TExpr, name: Sym, args: &[ast::Expr]) -> CompileResult<TExpr> {
        let (callee, signature) = match self.find(target.ty, name) {
            Some(Found::Method(callee, signature)) => (callee, signature),
            Some(Found::Slot(..)) => return raise(loc, ErrorKind::NotAMethod(name)),
            None => return raise(loc, ErrorKind::NoSuchMember { ty: target.ty, name }),
        };
        if signature.is_static {
            return raise(loc, ErrorKind::StaticThroughInstance(name));
        }
        let args = self.check_args(loc, name, &signature, args)?;
        let kind = TExprKind::MethodCall {
            target: Box::new(target),
            method: callee,
            args,
        };
        Ok(TExpr::new(loc, signature.ret, kind))
    }

    fn static_call(&mut self, loc: Loc, class: Sym, name: Sym, args: &[ast::Expr]) -> CompileResult<TExpr> {
        let Some(ty) = self.types.lookup(class) else {
            return raise(loc, ErrorKind::CantBind(class));
        };
        let (callee, signature) = match self.find(ty, name) {
            Some(Found::Method(callee, signature)) => (callee, signature),
            Some(Found::Slot(..)) => return raise(loc, ErrorKind::NotAMethod(name)),
            None => return raise(loc, ErrorKind::NoSuchMember { ty, name }),
        };
        if !signature.is_static {
            return raise(loc, ErrorKind::InstanceWithoutReceiver(name));
        }
        let args = self.check_args(loc, name, &signature, args)?;
        Ok(TExpr::new(loc, signature.ret, TExprKind::StaticMethodCall { method: callee, args }))
    }

    /// A call of a method of the class being checked, by bare name.
    fn own_call(&mut self, loc: Loc, name: Sym, args: &[ast::Expr]) -> CompileResult<TExpr> {
        let class = self.class;
        let (index, method) = match class.member(name) {
            Some(Member::Method(index, method)) => (index, method),
            Some(Member::Slot(..)) => return raise(loc, ErrorKind::NotAMethod(name)),
            None => return raise(loc, ErrorKind::CantBind(name)),
        };
        let callee = Callee::Method(MethodRef {
            class: class.id,
            index,
            name,
        });
        let signature = Signature::of(method);
        let receiver = if method.is_static {
            None
        } else {
            Some(self.receiver(loc, name)?)
        };
        let args = self.check_args(loc, name, &signature, args)?;
        let kind = match receiver {
            Some(target) => TExprKind::MethodCall {
                target: Box::new(target),
                method: callee,
                args,
            },
            None => TExprKind::StaticMethodCall { method: callee, args },
        };
        Ok(TExpr::new(loc, signature.ret, kind))
    }

    fn check_args(&mut self, loc: Loc, name: Sym, signature: &Signature, args: &[ast::Expr]) -> CompileResult<Vec<TExpr>> {
        if args.len() != signature.params.len() {
            return raise(
                loc,
                ErrorKind::WrongArgumentCount {
                    method: name,
                    expected: signature.params.len(),
                    actual: args.len(),
                },
            );
        }
        args.iter()
            .zip(&signature.params)
            .map(|(arg, ty)| self.check(arg, &mut Expectation::Exactly(*ty)))
            .collect()
    }

    fn get_property(&mut self, loc: Loc, target: TExpr, name: Sym) -> CompileResult<TExpr> {
        match self.find(target.ty, name) {
            Some(Found::Slot(slot, ty)) => Ok(TExpr::new(
                loc,
                ty,
                TExprKind::GetSlot {
                    target: Box::new(target),
                    slot,
                },
            )),
            Some(Found::Method(..)) => raise(loc, ErrorKind::NotImplemented("method values")),
            None => raise(loc, ErrorKind::NoSuchMember { ty: target.ty, name }),
        }
    }
}

fn literal_type(value: &LiteralValue) -> Ty {
    match value {
        LiteralValue::Int(_) => Ty::INT,
        LiteralValue::Float(_) => Ty::FLOAT,
        LiteralValue::Str(_) => Ty::STRING,
    }
}
