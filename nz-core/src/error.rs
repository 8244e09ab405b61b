use std::fmt;

use thiserror::Error;

use crate::lexer::Token;
use crate::loc::{LineIndex, Loc};
use crate::path::{ModulePath, RelPath};
use crate::sources::SourceProvider;
use crate::sym::Sym;
use crate::types::Ty;

/// What went wrong, independent of where.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    // Lexer
    #[error("line may not begin with a space")]
    LeadingSpace,
    #[error("this line has a trailing space character")]
    TrailingSpace,
    #[error("this line is indented multiple times compared to the previous line; use only one indent")]
    TooMuchIndent,
    #[error("unrecognized character `{0}`")]
    UnrecognizedCharacter(char),
    #[error("a number must have digits after the decimal point, e.g. `1.0` and not `1.`")]
    NumberMustHaveDigitsAfterDecimalPoint,
    #[error("number literal `{0}` is out of range")]
    NumberOutOfRange(String),
    #[error("unterminated quote")]
    UnterminatedQuote,
    #[error("bad escape `\\{0}`")]
    BadEscape(char),

    // Parser
    #[error("unexpected token: {0}")]
    Unexpected(Token),
    #[error("expected {expected}, got {found}")]
    Expected { expected: &'static str, found: Token },
    #[error("this expression is empty")]
    EmptyExpression,
    #[error("`=` must be preceded by one or more names")]
    PrecedingEquals,
    #[error("last line of a block can't be a variable declaration")]
    BlockCantEndInDeclare,
    #[error("operator `{0}` has no left-hand side; unary operators are not supported")]
    UnaryOperator(Sym),

    // Module resolution
    #[error("circular dependency on module {0}")]
    CircularDependency(ModulePath),
    #[error("can't find module {rel}: tried {file} and {directory}")]
    ModuleNotFound {
        rel: RelPath,
        file: ModulePath,
        directory: ModulePath,
    },
    #[error("can't find module {rel}: tried {directory}")]
    DirectoryModuleNotFound { rel: RelPath, directory: ModulePath },
    #[error("can't resolve {rel} relative to {base}")]
    CantResolveRelative { rel: RelPath, base: ModulePath },
    #[error("module path is empty")]
    EmptyModulePath,

    // Checker
    #[error("can't bind `{0}`")]
    CantBind(Sym),
    #[error("duplicate member `{0}`")]
    DuplicateMember(Sym),
    #[error("`{0}` is already bound in this scope")]
    NameAlreadyBound(Sym),
    #[error("type {ty} has no member `{name}`")]
    NoSuchMember { ty: Ty, name: Sym },
    #[error("member `{0}` is not a method")]
    NotAMethod(Sym),
    #[error("this expression can't be called")]
    NotCallable,
    #[error("static method `{0}` can't be called through an instance")]
    StaticThroughInstance(Sym),
    #[error("instance method `{0}` needs a receiver")]
    InstanceWithoutReceiver(Sym),
    #[error("method `{method}` takes {expected} arguments, but {actual} were given")]
    WrongArgumentCount {
        method: Sym,
        expected: usize,
        actual: usize,
    },
    #[error("expected type {expected}, but got {actual}")]
    TypeMismatch { expected: Ty, actual: Ty },
    #[error("inferred types disagree: {first} vs {second}")]
    InferConflict { first: Ty, second: Ty },

    // Shared
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

/// An error at a location in some (not yet known) module.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} (at {loc})")]
pub struct CompileError {
    pub loc: Loc,
    pub kind: ErrorKind,
}

impl CompileError {
    pub fn new(loc: Loc, kind: ErrorKind) -> Self {
        CompileError { loc, kind }
    }

    /// Attribute this error to the module whose source `loc` points into.
    pub fn in_module(self, origin: &ModuleOrigin) -> ModuleError {
        ModuleError {
            origin: Some(origin.clone()),
            error: self,
        }
    }

    /// An error with no owning module (e.g. the root module is missing).
    pub fn unattributed(self) -> ModuleError {
        ModuleError {
            origin: None,
            error: self,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

pub(crate) fn raise<T>(loc: Loc, kind: ErrorKind) -> CompileResult<T> {
    Err(CompileError::new(loc, kind))
}

/// The logical and physical path of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOrigin {
    pub logical: ModulePath,
    pub full: ModulePath,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub struct ModuleError {
    pub origin: Option<ModuleOrigin>,
    pub error: CompileError,
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "Error at {} {}: {}", origin.logical, self.error.loc, self.error.kind),
            None => write!(f, "Error: {}", self.error.kind),
        }
    }
}

impl ModuleError {
    pub fn kind(&self) -> &ErrorKind {
        &self.error.kind
    }

    /// Format with line and column, re-reading the owning module's text.
    pub fn render(&self, sources: &dyn SourceProvider) -> String {
        let Some(origin) = &self.origin else {
            return format!("Error: {}", self.error.kind);
        };
        match sources.read(&origin.full) {
            Ok(Some(text)) => {
                let range = LineIndex::new(&text).translate(self.error.loc);
                format!("Error at {} {}: {}", origin.logical, range, self.error.kind)
            }
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error("class {0} is already defined in this session")]
    DuplicateClass(String),
    #[error("failed to link class {class}: {message}")]
    Link { class: String, message: String },
    #[error("no class {0} has been loaded")]
    NoSuchClass(String),
    #[error("class {class} has no method {method}")]
    NoSuchMethod { class: String, method: String },
    #[error("bad arguments for {method}: {message}")]
    BadArguments { method: String, message: String },
    #[error("runtime error in {class}.{method} (line {line}): {message}")]
    Runtime {
        class: String,
        method: String,
        line: u32,
        message: String,
    },
    #[error("object heap exhausted")]
    OutOfMemory,
}

impl CoreError {
    /// One user-facing line per failure.
    pub fn render(&self, sources: &dyn SourceProvider) -> String {
        match self {
            CoreError::Module(error) => error.render(sources),
            other => format!("Error: {other}"),
        }
    }

    /// The compile error kind, if this is a compile error.
    pub fn compile_kind(&self) -> Option<&ErrorKind> {
        match self {
            CoreError::Module(error) => Some(error.kind()),
            _ => None,
        }
    }
}
