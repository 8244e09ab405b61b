//! Printing trees for tooling: S-expressions of modules and checked
//! classes, and canonical source text of checked expressions.

use std::fmt::Write;

use crate::ast::{self, ExprKind, Head, ImportPath, LiteralValue, Pattern, Type};
use crate::hir::{Callee, ClassTable, Klass, TExpr, TExprKind, TPattern};

pub fn module_to_sexpr(module: &ast::Module) -> String {
    let mut out = String::from("(module");
    for import in &module.imports {
        match &import.path {
            ImportPath::Global(path) => write!(out, " (import {path})"),
            ImportPath::Relative(rel) => write!(out, " (import {rel})"),
        }
        .ok();
    }
    let class = &module.class;
    write!(out, " (class {}", class.name).ok();
    let Head::Slots(_, slots) = &class.head;
    if !slots.is_empty() {
        out.push_str(" (slots");
        for slot in slots {
            write!(out, " ({} {} {})", slot_keyword(slot.mutable), type_text(&slot.ty), slot.name).ok();
        }
        out.push(')');
    }
    for method in &class.members {
        let params: Vec<String> = method
            .parameters
            .iter()
            .map(|param| format!("({} {})", type_text(&param.ty), param.name))
            .collect();
        write!(
            out,
            " ({} {} {} ({}) {})",
            method_keyword(method.is_static),
            type_text(&method.return_ty),
            method.name,
            params.join(" "),
            expr_sexpr(&method.body)
        )
        .ok();
    }
    out.push_str("))");
    out
}

fn slot_keyword(mutable: bool) -> &'static str {
    if mutable { "var" } else { "val" }
}

fn method_keyword(is_static: bool) -> &'static str {
    if is_static { "fun" } else { "def" }
}

fn type_text(ty: &Type) -> String {
    match ty {
        Type::Access(_, name) => name.to_string(),
        Type::Inst(_, name, args) => {
            let args: Vec<String> = args.iter().map(type_text).collect();
            format!("{name}[{}]", args.join(", "))
        }
    }
}

fn pattern_sexpr(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Ignore(_) => "_".to_string(),
        Pattern::Single(_, name) => name.to_string(),
        Pattern::Destruct(_, parts) => {
            let parts: Vec<String> = parts.iter().map(pattern_sexpr).collect();
            format!("({})", parts.join(" "))
        }
    }
}

fn expr_sexpr(expr: &ast::Expr) -> String {
    match &expr.kind {
        ExprKind::Access(name) => name.to_string(),
        ExprKind::StaticAccess { class, method } => format!("{class}.{method}"),
        ExprKind::OperatorCall { left, op, right } => {
            format!("({op} {} {})", expr_sexpr(left), expr_sexpr(right))
        }
        ExprKind::Call { target, args } => {
            let mut out = format!("(call {}", expr_sexpr(target));
            for arg in args {
                out.push(' ');
                out.push_str(&expr_sexpr(arg));
            }
            out.push(')');
            out
        }
        ExprKind::GetProperty { target, name } => format!("(. {} {name})", expr_sexpr(target)),
        ExprKind::Let { pattern, value, then } => format!(
            "(let {} {} {})",
            pattern_sexpr(pattern),
            expr_sexpr(value),
            expr_sexpr(then)
        ),
        ExprKind::Seq { first, then } => format!("(seq {} {})", expr_sexpr(first), expr_sexpr(then)),
        ExprKind::Literal(value) => value.to_string(),
        ExprKind::Quote { head, parts } => {
            let mut out = format!("(quote {head:?}");
            for (part, text) in parts {
                write!(out, " {} {text:?}", expr_sexpr(part)).ok();
            }
            out.push(')');
            out
        }
    }
}

/// A checked class with its member types, without locations.
pub fn class_to_sexpr(table: &ClassTable, klass: &Klass) -> String {
    let mut out = format!("(class {} {}", klass.module, klass.name);
    for slot in &klass.slots {
        write!(out, " ({} {} {})", slot_keyword(slot.mutable), slot.ty, slot.name).ok();
    }
    for method in &klass.methods {
        let params: Vec<String> = method
            .params
            .iter()
            .map(|param| format!("({} {})", param.ty, param.name))
            .collect();
        write!(
            out,
            " ({} {} {} ({})",
            method_keyword(method.is_static),
            method.return_ty,
            method.name,
            params.join(" ")
        )
        .ok();
        if let Some(body) = &method.body {
            out.push(' ');
            out.push_str(&texpr_sexpr(table, body));
        }
        out.push(')');
    }
    out.push(')');
    out
}

fn callee_text(table: &ClassTable, callee: &Callee) -> String {
    match callee {
        Callee::Method(method) => format!("{}.{}", table.get(method.class).name, method.name),
        Callee::Builtin(builtin) => format!("{}.{}", builtin.owner.name(), builtin.name),
    }
}

/// A checked expression with the type of every node.
pub fn texpr_sexpr(table: &ClassTable, expr: &TExpr) -> String {
    let ty = expr.ty;
    match &expr.kind {
        TExprKind::Local { name, .. } => format!("(local {name} {ty})"),
        TExprKind::Parameter { name, .. } => format!("(param {name} {ty})"),
        TExprKind::Receiver => format!("(self {ty})"),
        TExprKind::GetSlot { target, slot } => format!("(slot {} {} {ty})", slot.name, texpr_sexpr(table, target)),
        TExprKind::MethodCall { target, method, args } => {
            let mut out = format!("(call {} {}", callee_text(table, method), texpr_sexpr(table, target));
            for arg in args {
                out.push(' ');
                out.push_str(&texpr_sexpr(table, arg));
            }
            write!(out, " {ty})").ok();
            out
        }
        TExprKind::StaticMethodCall { method, args } => {
            let mut out = format!("(static {}", callee_text(table, method));
            for arg in args {
                out.push(' ');
                out.push_str(&texpr_sexpr(table, arg));
            }
            write!(out, " {ty})").ok();
            out
        }
        TExprKind::Let { pattern, value, then } => {
            let pattern = match pattern {
                TPattern::Ignore(_) => "_".to_string(),
                TPattern::Single { name, ty, .. } => format!("({name} {ty})"),
            };
            format!(
                "(let {pattern} {} {})",
                texpr_sexpr(table, value),
                texpr_sexpr(table, then)
            )
        }
        TExprKind::Seq { first, then } => {
            format!("(seq {} {})", texpr_sexpr(table, first), texpr_sexpr(table, then))
        }
        TExprKind::Literal(value) => value.to_string(),
        TExprKind::Quote { head, parts } => {
            let mut out = format!("(quote {head:?}");
            for (part, text) in parts {
                write!(out, " {} {text:?}", texpr_sexpr(table, part)).ok();
            }
            out.push(')');
            out
        }
    }
}

/// Canonical source text of a method body, one line per statement,
/// each indented by `depth` tabs.
///
/// Parsing and checking the result in the same class yields the same
/// typed tree.
pub fn expr_to_source(table: &ClassTable, expr: &TExpr, depth: usize) -> String {
    let indent = "\t".repeat(depth);
    let mut lines = Vec::new();
    let mut current = expr;
    loop {
        match &current.kind {
            TExprKind::Let { pattern, value, then } => {
                let name = match pattern {
                    TPattern::Ignore(_) => "_".to_string(),
                    TPattern::Single { name, .. } => name.to_string(),
                };
                lines.push(format!("{indent}{name} = {}", line(table, value)));
                current = then;
            }
            TExprKind::Seq { first, then } => {
                lines.push(format!("{indent}{}", line(table, first)));
                current = then;
            }
            _ => {
                lines.push(format!("{indent}{}", line(table, current)));
                return lines.join("\n");
            }
        }
    }
}

fn is_operator(name: &str) -> bool {
    !name.starts_with(|ch: char| ch.is_ascii_alphanumeric())
}

fn operator_parts<'a>(expr: &'a TExpr) -> Option<(&'a TExpr, &'static str, &'a TExpr)> {
    match &expr.kind {
        TExprKind::MethodCall { target, method, args } if is_operator(method.name()) && args.len() == 1 => {
            Some((target, method.name(), &args[0]))
        }
        _ => None,
    }
}

/// One expression as the content of a line. Operators associate to the
/// right, so only an operator call on the left needs parentheses.
fn line(table: &ClassTable, expr: &TExpr) -> String {
    if let Some((left, op, right)) = operator_parts(expr) {
        let left = if operator_parts(left).is_some() {
            format!("({})", line(table, left))
        } else {
            call(table, left)
        };
        return format!("{left} {op} {}", line(table, right));
    }
    call(table, expr)
}

/// A call with its arguments, or an atom.
fn call(table: &ClassTable, expr: &TExpr) -> String {
    let (head, args) = match &expr.kind {
        TExprKind::MethodCall { target, method, args } if operator_parts(expr).is_none() => {
            let head = match target.kind {
                TExprKind::Receiver => method.name().to_string(),
                _ => format!("{}.{}", atom(table, target), method.name()),
            };
            (head, args)
        }
        TExprKind::StaticMethodCall { method, args } => {
            let head = match method {
                // Only the current class can have a lowercase name here.
                Callee::Method(method) if !table.get(method.class).name.starts_with_uppercase() => {
                    method.name.to_string()
                }
                Callee::Method(method) => format!("{}.{}", table.get(method.class).name, method.name),
                Callee::Builtin(builtin) => format!("{}.{}", builtin.owner.name(), builtin.name),
            };
            (head, args)
        }
        _ => return atom(table, expr),
    };
    let mut out = head;
    for arg in args {
        out.push(' ');
        out.push_str(&atom(table, arg));
    }
    out
}

fn atom(table: &ClassTable, expr: &TExpr) -> String {
    match &expr.kind {
        TExprKind::Local { name, .. } | TExprKind::Parameter { name, .. } => name.to_string(),
        TExprKind::Receiver => "self".to_string(),
        TExprKind::GetSlot { target, slot } => match target.kind {
            TExprKind::Receiver => slot.name.to_string(),
            _ => format!("{}.{}", atom(table, target), slot.name),
        },
        TExprKind::Literal(value) => literal(value),
        TExprKind::Quote { head, parts } => {
            let mut out = format!("\"{}", escape(head));
            for (part, text) in parts {
                write!(out, "{{{}}}{}", line(table, part), escape(text)).ok();
            }
            out.push('"');
            out
        }
        TExprKind::MethodCall { args, .. } | TExprKind::StaticMethodCall { args, .. } if args.is_empty() => {
            call(table, expr)
        }
        _ => format!("({})", line(table, expr)),
    }
}

fn literal(value: &LiteralValue) -> String {
    match value {
        LiteralValue::Int(value) => value.to_string(),
        LiteralValue::Float(value) => format!("{value:?}"),
        LiteralValue::Str(text) => format!("\"{}\"", escape(text)),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '{' => out.push_str("\\{"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            ch => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::ClassId;
    use crate::parser::parse_module;
    use crate::path::ModulePath;
    use crate::sym::Sym;
    use crate::typecheck::check_module;
    use proptest::prelude::*;

    const HEADER: &str = "slots\n\tval Int size\n\nfun Int helper(Int n)\n\tn\n\n";

    fn check(table: &mut ClassTable, name: &str, source: &str) -> ClassId {
        let ast = parse_module(source, Sym::intern(name)).expect("parse");
        check_module(table, &ModulePath::parse(name), &ast, &[]).expect("check")
    }

    fn body(table: &ClassTable, id: ClassId, method: &str) -> TExpr {
        let klass = table.get(id);
        let method = klass.methods.iter().find(|m| m.name.as_str() == method).expect("method");
        method.body.clone().expect("body")
    }

    /// Check `body` as a method of a fresh class, print it, and check the
    /// printed text again.
    fn round_trip(signature: &str, text: &str) -> (String, String, String) {
        let mut table = ClassTable::new();
        let first = check(&mut table, "x", &format!("{HEADER}{signature}\n{text}"));
        let printed = expr_to_source(&table, &body(&table, first, "m"), 1);

        let mut again = ClassTable::new();
        let second = check(&mut again, "x", &format!("{HEADER}{signature}\n{printed}"));
        (
            texpr_sexpr(&table, &body(&table, first, "m")),
            texpr_sexpr(&again, &body(&again, second, "m")),
            printed,
        )
    }

    #[test]
    fn module_sexpr_shows_structure() {
        let source = "import\n\t..lib.util\nslots\n\tval Int a\n\nfun Int x(Int y)\n\tb = y + 1\n\tInt.max b a.c";
        let module = parse_module(source, Sym::intern("x")).expect("parse");
        assert_eq!(
            module_to_sexpr(&module),
            "(module (import ../lib/util) (class x (slots (val Int a)) \
             (fun Int x ((Int y)) (let b (+ y 1) (call Int.max b (. a c))))))"
        );
    }

    #[test]
    fn class_sexpr_has_types_and_no_locations() {
        let mut table = ClassTable::new();
        let id = check(&mut table, "x", "slots\n\tval Int a\n\ndef Int get(Int y)\n\ta + y");
        assert_eq!(
            class_to_sexpr(&table, table.get(id)),
            "(class x x (val Int a) (def Int get ((Int y)) \
             (call Int.+ (slot a (self x) Int) (param y Int) Int)))"
        );
    }

    #[test]
    fn prints_canonical_lines() {
        let mut table = ClassTable::new();
        let id = check(
            &mut table,
            "x",
            "fun Int m(Int a, String s)\n\tb = (a + 1) * Int.max a 2\n\t_ = \"n={s}\\\"\"\n\tb",
        );
        assert_eq!(
            expr_to_source(&table, &body(&table, id, "m"), 1),
            "\tb = (a + 1) * Int.max a 2\n\t_ = \"n={s}\\\"\"\n\tb"
        );
    }

    #[test]
    fn round_trips_receivers_and_own_calls() {
        let (first, second, printed) = round_trip("def Int m(Int a)", "\thelper (size + a)\n\tsize");
        assert_eq!(first, second);
        assert_eq!(printed, "\thelper (size + a)\n\tsize");
    }

    fn int_expr() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            (0i64..1000).prop_map(|value| value.to_string()),
            Just("a".to_string()),
            Just("size".to_string()),
            Just("String.length s".to_string()),
        ];
        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                (inner.clone(), prop::sample::select(vec!["+", "-", "*"]), inner.clone())
                    .prop_map(|(left, op, right)| format!("({left}) {op} ({right})")),
                (inner.clone(), inner.clone()).prop_map(|(left, right)| format!("Int.max ({left}) ({right})")),
                inner.clone().prop_map(|arg| format!("helper ({arg})")),
                inner.prop_map(|arg| format!("String.length \"v{{String.fromInt ({arg})}}\"")),
            ]
        })
    }

    proptest! {
        #[test]
        fn printed_bodies_check_to_the_same_tree(
            first in int_expr(),
            second in int_expr(),
            bind in any::<bool>(),
        ) {
            let text = if bind {
                format!("\tv = {first}\n\tv + ({second})")
            } else {
                format!("\t{first}\n\t{second}")
            };
            let (before, after, printed) = round_trip("def Int m(Int a, String s)", &text);
            prop_assert_eq!(before, after);

            let (_, _, reprinted) = round_trip("def Int m(Int a, String s)", &printed);
            prop_assert_eq!(printed, reprinted);
        }
    }
}
