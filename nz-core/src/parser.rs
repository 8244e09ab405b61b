//! Recursive-descent parser building one module's untyped AST.
//!
//! Tokens are pulled from the [`Lexer`] as needed. Block structure comes
//! entirely from `Indent`/`Dedent`/`Newline` tokens: every line of a block
//! is either a plain expression (`Seq`) or a declaration `pattern = value`
//! (`Let`) scoping over the rest of the block.

use crate::ast::{
    Class, Expr, ExprKind, Head, Import, ImportPath, Method, Module, Parameter, Pattern, Slot, Type,
};
use crate::error::{CompileResult, ErrorKind, raise};
use crate::lexer::{Lexed, Lexer, Token};
use crate::loc::Loc;
use crate::path::{ModulePath, RelPath};
use crate::sym::Sym;

/// Parse a module whose class is called `name`.
pub fn parse_module(source: &str, name: Sym) -> CompileResult<Module> {
    Parser::new(source).parse_module(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Line,
    /// Like `Line`, but `=` is forbidden because we're already in one.
    ExprOnly,
    /// Ends at `)`.
    Paren,
    /// Ends at the `}` closing an interpolation hole.
    Quote,
}

enum Next {
    NewlineAfterEquals(Pattern),
    NewlineAfterStatement,
    CtxEnded,
}

struct Parser {
    lexer: Lexer,
    peeked: Option<Lexed>,
}

impl Parser {
    fn new(source: &str) -> Self {
        Parser {
            lexer: Lexer::new(source),
            peeked: None,
        }
    }

    fn next(&mut self) -> CompileResult<Lexed> {
        match self.peeked.take() {
            Some(lexed) => Ok(lexed),
            None => self.lexer.next_token(),
        }
    }

    fn peek(&mut self) -> CompileResult<&Token> {
        let lexed = match self.peeked.take() {
            Some(lexed) => lexed,
            None => self.lexer.next_token()?,
        };
        Ok(&self.peeked.insert(lexed).token)
    }

    fn try_take(&mut self, token: &Token) -> CompileResult<bool> {
        if self.peek()? == token {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> CompileResult<Loc> {
        let lexed = self.next()?;
        if lexed.token == token {
            Ok(lexed.loc)
        } else {
            raise(
                lexed.loc,
                ErrorKind::Expected {
                    expected,
                    found: lexed.token,
                },
            )
        }
    }

    fn expect_name(&mut self) -> CompileResult<(Sym, Loc)> {
        let lexed = self.next()?;
        match lexed.token {
            Token::Name(name) => Ok((name, lexed.loc)),
            found => raise(
                lexed.loc,
                ErrorKind::Expected {
                    expected: "a name",
                    found,
                },
            ),
        }
    }

    fn parse_module(mut self, name: Sym) -> CompileResult<Module> {
        let imports = if self.try_take(&Token::Import)? {
            self.parse_imports()?
        } else {
            Vec::new()
        };
        let class = self.parse_class(name)?;
        Ok(Module {
            loc: Loc::new(0, self.lexer.pos()),
            imports,
            class,
        })
    }

    fn parse_imports(&mut self) -> CompileResult<Vec<Import>> {
        self.expect(Token::Indent, "an indented block of imports")?;
        let mut imports = Vec::new();
        loop {
            imports.push(self.parse_import()?);
            let lexed = self.next()?;
            match lexed.token {
                Token::Newline => continue,
                Token::Dedent => return Ok(imports),
                other => return raise(lexed.loc, ErrorKind::Unexpected(other)),
            }
        }
    }

    fn parse_import(&mut self) -> CompileResult<Import> {
        let mut ancestors = 0;
        let mut loc: Option<Loc> = None;
        loop {
            let step = match self.peek()? {
                Token::Dot => 1,
                Token::DotDot => 2,
                _ => break,
            };
            let lexed = self.next()?;
            loc = Some(loc.map_or(lexed.loc, |l| l.to(lexed.loc)));
            ancestors += step;
        }

        let mut segments = Vec::new();
        let starts_with_segment = matches!(self.peek()?, Token::Name(_) | Token::TyName(_));
        if starts_with_segment || ancestors == 0 {
            loop {
                let lexed = self.next()?;
                match lexed.token {
                    Token::Name(segment) | Token::TyName(segment) => segments.push(segment),
                    found => {
                        return raise(
                            lexed.loc,
                            ErrorKind::Expected {
                                expected: "a module name",
                                found,
                            },
                        );
                    }
                }
                loc = Some(loc.map_or(lexed.loc, |l| l.to(lexed.loc)));
                if !self.try_take(&Token::Dot)? {
                    break;
                }
            }
        }

        let path = ModulePath::new(segments);
        Ok(Import {
            loc: loc.unwrap_or(Loc::ZERO),
            path: if ancestors == 0 {
                ImportPath::Global(path)
            } else {
                ImportPath::Relative(RelPath::new(ancestors, path))
            },
        })
    }

    fn parse_class(&mut self, name: Sym) -> CompileResult<Class> {
        let start = self.lexer.pos();
        let head = self.parse_head()?;
        let mut members = Vec::new();
        loop {
            let lexed = self.next()?;
            let is_static = match lexed.token {
                Token::Fun => true,
                Token::Def => false,
                Token::Eof => break,
                other => return raise(lexed.loc, ErrorKind::Unexpected(other)),
            };
            members.push(self.parse_method(lexed.loc, is_static)?);
        }
        Ok(Class {
            loc: Loc::new(start, self.lexer.pos()),
            name,
            head,
            members,
        })
    }

    fn parse_head(&mut self) -> CompileResult<Head> {
        if *self.peek()? != Token::Slots {
            return Ok(Head::Slots(Loc::new(self.lexer.pos(), self.lexer.pos()), Vec::new()));
        }
        let start = self.next()?.loc;
        self.expect(Token::Indent, "an indented block of slots")?;
        let mut slots = Vec::new();
        loop {
            slots.push(self.parse_slot()?);
            let lexed = self.next()?;
            match lexed.token {
                Token::Newline => continue,
                Token::Dedent => break,
                other => return raise(lexed.loc, ErrorKind::Unexpected(other)),
            }
        }
        let end = slots.last().map_or(start, |slot: &Slot| slot.loc);
        Ok(Head::Slots(start.to(end), slots))
    }

    fn parse_slot(&mut self) -> CompileResult<Slot> {
        let lexed = self.next()?;
        let mutable = match lexed.token {
            Token::Var => true,
            Token::Val => false,
            found => {
                return raise(
                    lexed.loc,
                    ErrorKind::Expected {
                        expected: "`val` or `var`",
                        found,
                    },
                );
            }
        };
        let ty = self.parse_type()?;
        let (name, name_loc) = self.expect_name()?;
        Ok(Slot {
            loc: lexed.loc.to(name_loc),
            mutable,
            ty,
            name,
        })
    }

    fn parse_method(&mut self, start: Loc, is_static: bool) -> CompileResult<Method> {
        let return_ty = self.parse_type()?;
        let lexed = self.next()?;
        let name = match lexed.token {
            Token::Name(name) | Token::Operator(name) => name,
            found => {
                return raise(
                    lexed.loc,
                    ErrorKind::Expected {
                        expected: "a method name",
                        found,
                    },
                );
            }
        };
        self.expect(Token::LParen, "`(`")?;
        let mut parameters = Vec::new();
        if !self.try_take(&Token::RParen)? {
            loop {
                let ty = self.parse_type()?;
                let (name, name_loc) = self.expect_name()?;
                parameters.push(Parameter {
                    loc: ty.loc().to(name_loc),
                    ty,
                    name,
                });
                let lexed = self.next()?;
                match lexed.token {
                    Token::Comma => continue,
                    Token::RParen => break,
                    found => {
                        return raise(
                            lexed.loc,
                            ErrorKind::Expected {
                                expected: "`,` or `)`",
                                found,
                            },
                        );
                    }
                }
            }
        }
        self.expect(Token::Indent, "an indented method body")?;
        let body = self.parse_block()?;
        Ok(Method {
            loc: start.to(body.loc),
            is_static,
            return_ty,
            name,
            parameters,
            body,
        })
    }

    fn parse_type(&mut self) -> CompileResult<Type> {
        let lexed = self.next()?;
        let name = match lexed.token {
            Token::TyName(name) => name,
            found => {
                return raise(
                    lexed.loc,
                    ErrorKind::Expected {
                        expected: "a type name",
                        found,
                    },
                );
            }
        };
        if !self.try_take(&Token::LBracket)? {
            return Ok(Type::Access(lexed.loc, name));
        }
        let mut args = Vec::new();
        let end = loop {
            args.push(self.parse_type()?);
            let close = self.next()?;
            match close.token {
                Token::Comma => continue,
                Token::RBracket => break close.loc,
                found => {
                    return raise(
                        close.loc,
                        ErrorKind::Expected {
                            expected: "`,` or `]`",
                            found,
                        },
                    );
                }
            }
        };
        Ok(Type::Inst(lexed.loc.to(end), name, args))
    }

    /// Parse lines up to and including the `Dedent` closing the block.
    fn parse_block(&mut self) -> CompileResult<Expr> {
        let (expr, next) = self.parse_expr(Ctx::Line)?;
        match next {
            Next::NewlineAfterEquals(pattern) => {
                let rest = self.parse_block()?;
                let loc = pattern.loc().to(rest.loc);
                Ok(Expr::new(
                    loc,
                    ExprKind::Let {
                        pattern,
                        value: Box::new(expr),
                        then: Box::new(rest),
                    },
                ))
            }
            Next::NewlineAfterStatement => {
                let rest = self.parse_block()?;
                let loc = expr.loc.to(rest.loc);
                Ok(Expr::new(
                    loc,
                    ExprKind::Seq {
                        first: Box::new(expr),
                        then: Box::new(rest),
                    },
                ))
            }
            Next::CtxEnded => Ok(expr),
        }
    }

    fn parse_expr(&mut self, ctx: Ctx) -> CompileResult<(Expr, Next)> {
        let mut parts: Vec<Expr> = Vec::new();
        loop {
            let Lexed { token, loc } = self.next()?;
            match token {
                Token::Equals if ctx == Ctx::Line => {
                    let pattern = parts_to_pattern(loc, parts)?;
                    let (value, next) = self.parse_expr(Ctx::ExprOnly)?;
                    return match next {
                        Next::CtxEnded => raise(loc, ErrorKind::BlockCantEndInDeclare),
                        _ => Ok((value, Next::NewlineAfterEquals(pattern))),
                    };
                }
                Token::Underscore if ctx == Ctx::Line && parts.is_empty() => {
                    let equals = self.next()?;
                    if equals.token != Token::Equals {
                        return raise(equals.loc, ErrorKind::Unexpected(equals.token));
                    }
                    let (value, next) = self.parse_expr(Ctx::ExprOnly)?;
                    return match next {
                        Next::CtxEnded => raise(equals.loc, ErrorKind::BlockCantEndInDeclare),
                        _ => Ok((value, Next::NewlineAfterEquals(Pattern::Ignore(loc)))),
                    };
                }
                Token::Operator(op) => {
                    if parts.is_empty() {
                        return raise(loc, ErrorKind::UnaryOperator(op));
                    }
                    let left = finish_parts(parts, loc)?;
                    let right_ctx = if ctx == Ctx::Line { Ctx::ExprOnly } else { ctx };
                    let (right, next) = self.parse_expr(right_ctx)?;
                    let loc = left.loc.to(right.loc);
                    let call = ExprKind::OperatorCall {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    };
                    return Ok((Expr::new(loc, call), next));
                }
                Token::Newline if matches!(ctx, Ctx::Line | Ctx::ExprOnly) => {
                    return Ok((finish_parts(parts, loc)?, Next::NewlineAfterStatement));
                }
                Token::Dedent if matches!(ctx, Ctx::Line | Ctx::ExprOnly) => {
                    return Ok((finish_parts(parts, loc)?, Next::CtxEnded));
                }
                Token::RParen if ctx == Ctx::Paren => {
                    return Ok((finish_parts(parts, loc)?, Next::CtxEnded));
                }
                Token::RBrace if ctx == Ctx::Quote => {
                    return Ok((finish_parts(parts, loc)?, Next::CtxEnded));
                }
                Token::Dot => {
                    let Some(target) = parts.pop() else {
                        return raise(loc, ErrorKind::Unexpected(Token::Dot));
                    };
                    let (name, name_loc) = self.expect_name()?;
                    let loc = target.loc.to(name_loc);
                    parts.push(Expr::new(
                        loc,
                        ExprKind::GetProperty {
                            target: Box::new(target),
                            name,
                        },
                    ));
                }
                Token::Name(name) => parts.push(Expr::new(loc, ExprKind::Access(name))),
                Token::TyName(class) => {
                    self.expect(Token::Dot, "`.` after a type name")?;
                    let (method, name_loc) = self.expect_name()?;
                    parts.push(Expr::new(loc.to(name_loc), ExprKind::StaticAccess { class, method }));
                }
                Token::Literal(value) => parts.push(Expr::new(loc, ExprKind::Literal(value))),
                Token::QuoteStart(head) => parts.push(self.parse_quote(loc, head)?),
                Token::LParen => {
                    let (inner, _) = self.parse_expr(Ctx::Paren)?;
                    parts.push(inner);
                }
                other => return raise(loc, ErrorKind::Unexpected(other)),
            }
        }
    }

    fn parse_quote(&mut self, start: Loc, head: String) -> CompileResult<Expr> {
        let mut parts = Vec::new();
        loop {
            let (expr, _) = self.parse_expr(Ctx::Quote)?;
            debug_assert!(self.peeked.is_none());
            let part = self.lexer.next_quote_part()?;
            parts.push((expr, part.text));
            if part.is_end {
                break;
            }
        }
        let loc = Loc::new(start.start, self.lexer.pos());
        Ok(Expr::new(loc, ExprKind::Quote { head, parts }))
    }
}

/// Fold a line's parts into one expression: `head tail...` is a call.
fn finish_parts(parts: Vec<Expr>, terminator: Loc) -> CompileResult<Expr> {
    let mut parts = parts.into_iter();
    let Some(head) = parts.next() else {
        return raise(terminator, ErrorKind::EmptyExpression);
    };
    let args: Vec<Expr> = parts.collect();
    let Some(last) = args.last() else {
        return Ok(head);
    };
    let loc = head.loc.to(last.loc);
    Ok(Expr::new(
        loc,
        ExprKind::Call {
            target: Box::new(head),
            args,
        },
    ))
}

fn parts_to_pattern(equals: Loc, parts: Vec<Expr>) -> CompileResult<Pattern> {
    let mut patterns = parts
        .into_iter()
        .map(|part| match part.kind {
            ExprKind::Access(name) => Ok(Pattern::Single(part.loc, name)),
            _ => raise(equals, ErrorKind::PrecedingEquals),
        })
        .collect::<CompileResult<Vec<_>>>()?;
    match patterns.len() {
        0 => raise(equals, ErrorKind::PrecedingEquals),
        1 => Ok(patterns.remove(0)),
        _ => {
            let loc = patterns[0].loc().to(patterns[patterns.len() - 1].loc());
            Ok(Pattern::Destruct(loc, patterns))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LiteralValue;

    fn sym(text: &str) -> Sym {
        Sym::intern(text)
    }

    fn parse(source: &str) -> Module {
        parse_module(source, sym("test")).expect("parse should succeed")
    }

    fn parse_err(source: &str) -> ErrorKind {
        parse_module(source, sym("test"))
            .expect_err("parse should fail")
            .kind
    }

    fn body(source: &str) -> ExprKind {
        let module = parse(source);
        module.class.members[0].body.kind.clone()
    }

    #[test]
    fn parses_slots_and_a_static_method() {
        let module = parse("slots\n\tval Int a\n\nfun Int x(Int y)\n\ty");
        let Head::Slots(_, slots) = &module.class.head;
        assert_eq!(slots.len(), 1);
        assert!(!slots[0].mutable);
        assert_eq!(slots[0].name, sym("a"));
        let method = &module.class.members[0];
        assert!(method.is_static);
        assert_eq!(method.name, sym("x"));
        assert_eq!(method.parameters.len(), 1);
        assert_eq!(method.parameters[0].name, sym("y"));
        assert_eq!(method.body.kind, ExprKind::Access(sym("y")));
    }

    #[test]
    fn class_without_header_has_no_slots() {
        let module = parse("def Int x()\n\t1");
        let Head::Slots(_, slots) = &module.class.head;
        assert!(slots.is_empty());
        assert!(!module.class.members[0].is_static);
    }

    #[test]
    fn parses_imports() {
        let module = parse("import\n\t.sibling\n\t..parent.Child\n\t..\n\tglobal.thing\n\nfun Int x()\n\t1");
        let paths: Vec<_> = module.imports.iter().map(|i| i.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                ImportPath::Relative(RelPath::new(1, ModulePath::parse("sibling"))),
                ImportPath::Relative(RelPath::new(2, ModulePath::parse("parent/Child"))),
                ImportPath::Relative(RelPath::new(2, ModulePath::empty())),
                ImportPath::Global(ModulePath::parse("global/thing")),
            ]
        );
    }

    #[test]
    fn operator_splits_the_line() {
        let ExprKind::OperatorCall { left, op, right } = body("fun Int x(String s)\n\t1 + Int.parse s") else {
            panic!("expected operator call");
        };
        assert_eq!(op, sym("+"));
        assert_eq!(left.kind, ExprKind::Literal(LiteralValue::Int(1)));
        let ExprKind::Call { target, args } = right.kind else {
            panic!("expected call");
        };
        assert_eq!(
            target.kind,
            ExprKind::StaticAccess {
                class: sym("Int"),
                method: sym("parse")
            }
        );
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn builds_let_and_seq() {
        let kind = body("fun Int x(Int y)\n\tz = y + y\n\ty\n\tz");
        let ExprKind::Let { pattern, value, then } = kind else {
            panic!("expected let");
        };
        assert!(matches!(pattern, Pattern::Single(_, name) if name == sym("z")));
        assert!(matches!(value.kind, ExprKind::OperatorCall { .. }));
        let ExprKind::Seq { first, then } = then.kind else {
            panic!("expected seq");
        };
        assert_eq!(first.kind, ExprKind::Access(sym("y")));
        assert_eq!(then.kind, ExprKind::Access(sym("z")));
    }

    #[test]
    fn juxtaposed_names_destructure_and_underscore_ignores() {
        let ExprKind::Let { pattern, then, .. } = body("fun Int x(Int y)\n\ta b = y\n\t_ = y\n\ta") else {
            panic!("expected let");
        };
        assert!(matches!(pattern, Pattern::Destruct(_, ref parts) if parts.len() == 2));
        assert!(matches!(then.kind, ExprKind::Let { pattern: Pattern::Ignore(_), .. }));
    }

    #[test]
    fn calls_properties_and_parens() {
        let kind = body("fun Int x(Point p)\n\tp.move (p.x) 2");
        let ExprKind::Call { target, args } = kind else {
            panic!("expected call");
        };
        assert!(matches!(target.kind, ExprKind::GetProperty { name, .. } if name == sym("move")));
        assert!(matches!(args[0].kind, ExprKind::GetProperty { name, .. } if name == sym("x")));
        assert_eq!(args[1].kind, ExprKind::Literal(LiteralValue::Int(2)));
    }

    #[test]
    fn parses_interpolated_quotes() {
        let ExprKind::Quote { head, parts } = body("fun String x(String s)\n\t\"a{s}b{s}\"") else {
            panic!("expected quote");
        };
        assert_eq!(head, "a");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, "b");
        assert_eq!(parts[1].1, "");
    }

    #[test]
    fn parses_generic_types() {
        let module = parse("fun List[Int] x()\n\t1");
        assert!(matches!(&module.class.members[0].return_ty, Type::Inst(_, name, args) if *name == sym("List") && args.len() == 1));
    }

    #[test]
    fn parses_operator_methods() {
        let module = parse("def Int +(Int other)\n\tother");
        assert_eq!(module.class.members[0].name, sym("+"));
    }

    #[test]
    fn rejects_malformed_blocks() {
        assert_eq!(parse_err("fun Int x()\n\ty = 1"), ErrorKind::BlockCantEndInDeclare);
        assert_eq!(parse_err("fun Int x()\n\t= 1\n\t1"), ErrorKind::PrecedingEquals);
        assert_eq!(parse_err("fun Int x()\n\t1 = 1\n\t1"), ErrorKind::PrecedingEquals);
        assert_eq!(parse_err("fun Int x()\n\t()"), ErrorKind::EmptyExpression);
        assert_eq!(parse_err("fun Int x(Int y)\n\t- y"), ErrorKind::UnaryOperator(sym("-")));
        assert!(matches!(parse_err("fun Int x()\n\ta = b = c\n\ta"), ErrorKind::Unexpected(Token::Equals)));
    }

    #[test]
    fn reports_expected_tokens() {
        assert!(matches!(
            parse_err("fun Int x(\n\t1"),
            ErrorKind::Expected { expected: "a type name", .. }
        ));
        assert!(matches!(
            parse_err("fun Int x()\n1"),
            ErrorKind::Expected { expected: "an indented method body", .. }
        ));
        assert!(matches!(parse_err("slots\n\tInt a"), ErrorKind::Expected { expected: "`val` or `var`", .. }));
        assert!(matches!(parse_err("val"), ErrorKind::Unexpected(Token::Val)));
    }

    #[test]
    fn unexpected_token_is_located() {
        let err = parse_module("fun Int x()\n\ta : b", sym("test")).expect_err("parse should fail");
        assert_eq!(err.kind, ErrorKind::Unexpected(Token::Colon));
        assert_eq!(err.loc, Loc::new(15, 16));
    }
}
