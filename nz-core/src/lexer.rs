//! Indentation-aware lexer for nz.
//!
//! Tokens are produced one at a time on demand; the parser pulls them
//! directly. Indentation is tabs only: going one level deeper yields an
//! `Indent`, staying level yields a `Newline`, and going `n` levels
//! shallower yields `n` `Dedent`s (one now, the rest queued). Any
//! indentation still open at the end of input is closed with trailing
//! `Dedent`s before `Eof`.

use std::fmt;

use crate::ast::LiteralValue;
use crate::error::{CompileError, CompileResult, ErrorKind, raise};
use crate::loc::{Loc, Pos};
use crate::sym::Sym;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Value-case name, e.g. `foo`.
    Name(Sym),
    /// Type-case name, e.g. `Foo`.
    TyName(Sym),
    Operator(Sym),
    Literal(LiteralValue),
    /// Text of a quote up to its first `{`.
    QuoteStart(String),
    /// Text of a quote after a `}`; only produced by [`lex`].
    QuotePart { text: String, is_end: bool },

    // Keywords
    Import,
    Fun,
    Def,
    Slots,
    Val,
    Var,
    Equals,
    Underscore,
    Backslash,
    At,
    AtAt,

    // Grouping
    Indent,
    Dedent,
    Newline,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,

    // Punctuation
    Colon,
    Comma,
    Dot,
    DotDot,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(name) | Token::TyName(name) | Token::Operator(name) => write!(f, "{name}"),
            Token::Literal(value) => write!(f, "{value}"),
            Token::QuoteStart(head) => write!(f, "\"{head}{{"),
            Token::QuotePart { text, is_end: true } => write!(f, "}}{text}\""),
            Token::QuotePart { text, is_end: false } => write!(f, "}}{text}{{"),
            Token::Import => f.write_str("import"),
            Token::Fun => f.write_str("fun"),
            Token::Def => f.write_str("def"),
            Token::Slots => f.write_str("slots"),
            Token::Val => f.write_str("val"),
            Token::Var => f.write_str("var"),
            Token::Equals => f.write_str("="),
            Token::Underscore => f.write_str("_"),
            Token::Backslash => f.write_str("\\"),
            Token::At => f.write_str("@"),
            Token::AtAt => f.write_str("@@"),
            Token::Indent => f.write_str("indent"),
            Token::Dedent => f.write_str("dedent"),
            Token::Newline => f.write_str("newline"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::LBrace => f.write_str("{"),
            Token::RBrace => f.write_str("}"),
            Token::Eof => f.write_str("end of file"),
            Token::Colon => f.write_str(":"),
            Token::Comma => f.write_str(","),
            Token::Dot => f.write_str("."),
            Token::DotDot => f.write_str(".."),
        }
    }
}

fn keyword(text: &str) -> Option<Token> {
    Some(match text {
        "import" => Token::Import,
        "fun" => Token::Fun,
        "def" => Token::Def,
        "slots" => Token::Slots,
        "val" => Token::Val,
        "var" => Token::Var,
        "=" => Token::Equals,
        "@" => Token::At,
        "@@" => Token::AtAt,
        _ => return None,
    })
}

/// A token together with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexed {
    pub token: Token,
    pub loc: Loc,
}

/// One piece of quote text, ended either by `"` or by `{`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotePart {
    pub text: String,
    pub is_end: bool,
}

pub struct Lexer {
    // Always ends in '\n'.
    text: String,
    pos: usize,
    indent: usize,
    // Dedents still owed before reading on.
    dedenting: usize,
    // Whether the first line's indentation has been checked.
    started: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let mut text = String::with_capacity(source.len() + 1);
        text.push_str(source);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Lexer {
            text,
            pos: 0,
            indent: 0,
            dedenting: 0,
            started: false,
        }
    }

    pub fn pos(&self) -> Pos {
        self.pos as Pos
    }

    fn loc_from(&self, start: usize) -> Loc {
        Loc::new(start as Pos, self.pos as Pos)
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.text.as_bytes().get(self.pos + offset).copied()
    }

    fn read(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
    }

    /// Skip blank and comment lines, then the tabs of the next line.
    /// Returns where that line starts and its depth.
    fn skip_to_line(&mut self) -> CompileResult<(usize, usize)> {
        loop {
            self.skip_while(|ch| ch == b'\n');
            let start = self.pos;
            self.skip_while(|ch| ch == b'\t');
            if self.peek() == Some(b' ') {
                return raise(Loc::new(start as Pos, self.pos as Pos + 1), ErrorKind::LeadingSpace);
            }
            match self.peek() {
                // Blank and comment lines don't affect indentation.
                Some(b'\n') => {}
                Some(b'|') => self.skip_while(|ch| ch != b'\n'),
                _ => return Ok((start, self.pos - start)),
            }
        }
    }

    pub fn next_token(&mut self) -> CompileResult<Lexed> {
        if !self.started {
            self.started = true;
            let (start, depth) = self.skip_to_line()?;
            if depth != 0 {
                return raise(self.loc_from(start), ErrorKind::TooMuchIndent);
            }
        }
        if self.dedenting != 0 {
            self.dedenting -= 1;
            return Ok(Lexed {
                token: Token::Dedent,
                loc: self.loc_from(self.pos),
            });
        }
        self.take_next()
    }

    fn take_next(&mut self) -> CompileResult<Lexed> {
        while self.peek() == Some(b' ') {
            self.pos += 1;
            if self.peek() == Some(b'\n') {
                return raise(Loc::single_char(self.pos as Pos - 1), ErrorKind::TrailingSpace);
            }
        }

        let start = self.pos;
        let Some(ch) = self.read() else {
            let token = if self.indent != 0 {
                self.indent -= 1;
                Token::Dedent
            } else {
                Token::Eof
            };
            return Ok(Lexed {
                token,
                loc: self.loc_from(start),
            });
        };

        let token = match ch {
            b'\n' => return self.handle_newline(),
            b'|' => {
                self.skip_while(|ch| ch != b'\n');
                return self.take_next();
            }
            b'\\' => Token::Backslash,
            b':' => Token::Colon,
            b',' => Token::Comma,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'_' => Token::Underscore,
            b'-' if self.peek().is_some_and(|ch| ch.is_ascii_digit()) => self.take_number(start)?,
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.pos += 1;
                    Token::DotDot
                } else {
                    Token::Dot
                }
            }
            b'"' => {
                let part = self.next_quote_part()?;
                if part.is_end {
                    Token::Literal(LiteralValue::Str(part.text))
                } else {
                    Token::QuoteStart(part.text)
                }
            }
            b'0'..=b'9' => self.take_number(start)?,
            b'a'..=b'z' => {
                self.skip_while(is_name_char);
                let text = &self.text[start..self.pos];
                keyword(text).unwrap_or_else(|| Token::Name(Sym::intern(text)))
            }
            b'A'..=b'Z' => {
                self.skip_while(is_name_char);
                Token::TyName(Sym::intern(&self.text[start..self.pos]))
            }
            ch if is_operator_char(ch) => {
                self.skip_while(is_operator_char);
                let text = &self.text[start..self.pos];
                keyword(text).unwrap_or_else(|| Token::Operator(Sym::intern(text)))
            }
            _ => {
                let ch = self.text[start..].chars().next().unwrap_or('\0');
                let loc = Loc::new(start as Pos, (start + ch.len_utf8()) as Pos);
                return raise(loc, ErrorKind::UnrecognizedCharacter(ch));
            }
        };
        Ok(Lexed {
            token,
            loc: self.loc_from(start),
        })
    }

    // Called just after a '\n'.
    fn handle_newline(&mut self) -> CompileResult<Lexed> {
        let (line_start, new_indent) = self.skip_to_line()?;
        let old_indent = self.indent;
        self.indent = new_indent;
        let loc = self.loc_from(line_start);
        let token = if new_indent > old_indent {
            if new_indent != old_indent + 1 {
                return raise(loc, ErrorKind::TooMuchIndent);
            }
            Token::Indent
        } else if new_indent == old_indent {
            Token::Newline
        } else {
            self.dedenting = old_indent - new_indent - 1;
            Token::Dedent
        };
        Ok(Lexed { token, loc })
    }

    fn take_number(&mut self, start: usize) -> CompileResult<Token> {
        self.skip_while(|ch| ch.is_ascii_digit());
        let is_float = self.peek() == Some(b'.') && self.peek_at(1) != Some(b'.');
        if is_float {
            self.pos += 1;
            if !self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                return raise(Loc::single_char(self.pos as Pos), ErrorKind::NumberMustHaveDigitsAfterDecimalPoint);
            }
            self.skip_while(|ch| ch.is_ascii_digit());
        }
        let text = &self.text[start..self.pos];
        let out_of_range = || CompileError::new(self.loc_from(start), ErrorKind::NumberOutOfRange(text.to_string()));
        let value = if is_float {
            LiteralValue::Float(text.parse().map_err(|_| out_of_range())?)
        } else {
            LiteralValue::Int(text.parse().map_err(|_| out_of_range())?)
        };
        Ok(Token::Literal(value))
    }

    /// Read quote text up to the closing `"` or the next `{`.
    pub fn next_quote_part(&mut self) -> CompileResult<QuotePart> {
        let mut text = String::new();
        let mut segment = self.pos;
        loop {
            let at = self.pos;
            match self.read() {
                Some(b'"') | Some(b'{') => {
                    text.push_str(&self.text[segment..at]);
                    let is_end = self.text.as_bytes()[at] == b'"';
                    return Ok(QuotePart { text, is_end });
                }
                None | Some(b'\n') => {
                    return raise(Loc::single_char(at as Pos), ErrorKind::UnterminatedQuote);
                }
                Some(b'\\') => {
                    text.push_str(&self.text[segment..at]);
                    let escaped = match self.read() {
                        Some(b'"') => '"',
                        Some(b'{') => '{',
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        _ => {
                            let ch = self.text[at + 1..].chars().next().unwrap_or('\0');
                            return raise(Loc::new(at as Pos, (at + 2) as Pos), ErrorKind::BadEscape(ch));
                        }
                    };
                    text.push(escaped);
                    segment = self.pos;
                }
                Some(_) => {}
            }
        }
    }
}

fn is_name_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric()
}

fn is_operator_char(ch: u8) -> bool {
    matches!(ch, b'@' | b'+' | b'-' | b'*' | b'/' | b'^' | b'?' | b'<' | b'>' | b'=')
}

/// Lex a whole source text eagerly, for tooling.
///
/// Quote text following an interpolation hole is reported as
/// [`Token::QuotePart`]. The trailing `Eof` is not included.
pub fn lex(source: &str) -> CompileResult<Vec<Lexed>> {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    // Number of interpolation holes currently open.
    let mut holes = 0usize;
    loop {
        let lexed = lexer.next_token()?;
        match lexed.token {
            Token::Eof => return Ok(out),
            Token::QuoteStart(_) => {
                holes += 1;
                out.push(lexed);
            }
            Token::RBrace if holes > 0 => {
                out.push(lexed);
                let start = lexer.pos();
                let part = lexer.next_quote_part()?;
                if part.is_end {
                    holes -= 1;
                }
                out.push(Lexed {
                    token: Token::QuotePart {
                        text: part.text,
                        is_end: part.is_end,
                    },
                    loc: Loc::new(start, lexer.pos()),
                });
            }
            _ => out.push(lexed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tokens(source: &str) -> Vec<Token> {
        lex(source)
            .expect("lex should succeed")
            .into_iter()
            .map(|lexed| lexed.token)
            .collect()
    }

    fn lex_err(source: &str) -> ErrorKind {
        lex(source).expect_err("lex should fail").kind
    }

    fn name(text: &str) -> Token {
        Token::Name(Sym::intern(text))
    }

    #[test]
    fn lexes_a_method_header_and_body() {
        assert_eq!(
            tokens("fun Int x(Int y)\n\ty"),
            vec![
                Token::Fun,
                Token::TyName(Sym::intern("Int")),
                name("x"),
                Token::LParen,
                Token::TyName(Sym::intern("Int")),
                name("y"),
                Token::RParen,
                Token::Indent,
                name("y"),
                Token::Dedent,
            ]
        );
    }

    #[test]
    fn drains_multiple_dedents() {
        let toks = tokens("a\n\tb\n\t\tc\nd");
        assert_eq!(
            toks,
            vec![
                name("a"),
                Token::Indent,
                name("b"),
                Token::Indent,
                name("c"),
                Token::Dedent,
                Token::Dedent,
                name("d"),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let toks = tokens("| leading comment\na\n\n\t| inner\n\tb | trailing\nc");
        assert_eq!(
            toks,
            vec![name("a"), Token::Indent, name("b"), Token::Dedent, name("c"), Token::Newline]
        );
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(
            tokens("1 -2 3.5 -0.25"),
            vec![
                Token::Literal(LiteralValue::Int(1)),
                Token::Literal(LiteralValue::Int(-2)),
                Token::Literal(LiteralValue::Float(3.5)),
                Token::Literal(LiteralValue::Float(-0.25)),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn minus_before_space_is_an_operator() {
        assert_eq!(
            tokens("a - 1"),
            vec![
                name("a"),
                Token::Operator(Sym::intern("-")),
                Token::Literal(LiteralValue::Int(1)),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn operators_and_keywords() {
        assert_eq!(
            tokens("x = y + z @ w == v"),
            vec![
                name("x"),
                Token::Equals,
                name("y"),
                Token::Operator(Sym::intern("+")),
                name("z"),
                Token::At,
                name("w"),
                Token::Operator(Sym::intern("==")),
                name("v"),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn dots_and_static_access() {
        assert_eq!(
            tokens("Int.parse s .. ."),
            vec![
                Token::TyName(Sym::intern("Int")),
                Token::Dot,
                name("parse"),
                name("s"),
                Token::DotDot,
                Token::Dot,
                Token::Newline,
            ]
        );
    }

    #[test]
    fn lexes_plain_and_interpolated_quotes() {
        assert_eq!(
            tokens(r#""a\"b\n" "x{y}z""#),
            vec![
                Token::Literal(LiteralValue::Str("a\"b\n".to_string())),
                Token::QuoteStart("x".to_string()),
                name("y"),
                Token::RBrace,
                Token::QuotePart {
                    text: "z".to_string(),
                    is_end: true
                },
                Token::Newline,
            ]
        );
    }

    #[test]
    fn input_ends_by_closing_the_last_line() {
        assert_eq!(tokens("a"), vec![name("a"), Token::Newline]);
        assert_eq!(tokens("a\n\n| done\n"), vec![name("a"), Token::Newline]);
        assert_eq!(tokens("a\n\tb"), vec![name("a"), Token::Indent, name("b"), Token::Dedent]);
        assert_eq!(tokens(""), Vec::<Token>::new());

        let mut lexer = Lexer::new("a");
        let ends: Vec<Token> = (0..4).map(|_| lexer.next_token().expect("token").token).collect();
        assert_eq!(ends, vec![name("a"), Token::Newline, Token::Eof, Token::Eof]);
    }

    #[test]
    fn locations_cover_tokens() {
        let lexed = lex("fun Int x").expect("lex");
        assert_eq!(lexed[0].loc, Loc::new(0, 3));
        assert_eq!(lexed[1].loc, Loc::new(4, 7));
        assert_eq!(lexed[2].loc, Loc::new(8, 9));
    }

    #[test]
    fn rejects_bad_whitespace() {
        assert_eq!(lex_err("a\n b"), ErrorKind::LeadingSpace);
        assert_eq!(lex_err("a \nb"), ErrorKind::TrailingSpace);
        assert_eq!(lex_err("a\n\t\tb"), ErrorKind::TooMuchIndent);
    }

    #[test]
    fn first_line_indentation_is_checked() {
        assert_eq!(lex_err(" a"), ErrorKind::LeadingSpace);
        assert_eq!(lex_err("| c\n a"), ErrorKind::LeadingSpace);
        assert_eq!(lex_err("\n\n\t a"), ErrorKind::LeadingSpace);
        assert_eq!(lex_err("\ta"), ErrorKind::TooMuchIndent);
        assert_eq!(lex_err("| c\n\ta"), ErrorKind::TooMuchIndent);
        assert_eq!(lex("| c\n\ta").expect_err("indented").loc, Loc::new(4, 5));
    }

    #[test]
    fn rejects_bad_literals_and_characters() {
        assert_eq!(lex_err("1."), ErrorKind::NumberMustHaveDigitsAfterDecimalPoint);
        assert_eq!(lex_err("\"abc\nd\""), ErrorKind::UnterminatedQuote);
        assert_eq!(lex_err(r#""a\qb""#), ErrorKind::BadEscape('q'));
        assert_eq!(lex_err("a # b"), ErrorKind::UnrecognizedCharacter('#'));
        assert_eq!(lex_err("a ∑"), ErrorKind::UnrecognizedCharacter('∑'));
    }

    #[test]
    fn unrecognized_character_is_located() {
        let err = lex("ab ~").expect_err("lex should fail");
        assert_eq!(err.loc, Loc::new(3, 4));
    }

    fn indented_source() -> impl Strategy<Value = String> {
        // Each line steps at most one level deeper than the previous one.
        prop::collection::vec((0usize..4, "[a-z][a-z0-9]{0,4}"), 1..20).prop_map(|lines| {
            let mut depth = 0usize;
            let mut out = String::new();
            for (index, (target, word)) in lines.into_iter().enumerate() {
                depth = if index == 0 { 0 } else { target.min(depth + 1) };
                out.push_str(&"\t".repeat(depth));
                out.push_str(&word);
                out.push('\n');
            }
            out
        })
    }

    proptest! {
        #[test]
        fn trailing_newline_is_normalized(source in indented_source()) {
            let trimmed = source.trim_end_matches('\n');
            prop_assert_eq!(lex(trimmed).expect("lex"), lex(&format!("{trimmed}\n")).expect("lex"));
        }

        #[test]
        fn indents_and_dedents_balance(source in indented_source()) {
            let toks = tokens(&source);
            let indents = toks.iter().filter(|t| **t == Token::Indent).count();
            let dedents = toks.iter().filter(|t| **t == Token::Dedent).count();
            prop_assert_eq!(indents, dedents);
        }
    }
}
