//! Core compiler pipeline for the nz language.
//!
//! The pipeline is roughly:
//!
//!   logical module path
//!     -> resolve      (source provider, imports linearized dependencies-first)
//!     -> lexer        (indentation-aware tokens)
//!     -> parser       (untyped AST, one class per module)
//!     -> typecheck    (checked classes and typed expressions)
//!     -> codegen_wasm (one wasm module per class, wasm-encoder)
//!     -> loader       (classes linked and run through wasmi)
//!
//! [`Compiler`] drives the whole pipeline for one session. Higher-level
//! tools (the CLI) should depend on this crate rather than reimplementing
//! the pipeline.

// ---------------------------------------------------------------------
// Error handling, locations and names
// ---------------------------------------------------------------------

pub mod error;
pub mod loc;
pub mod path;
pub mod sym;

// ---------------------------------------------------------------------
// Front-end: sources, lexing, parsing and module resolution
// ---------------------------------------------------------------------

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod sources;

// ---------------------------------------------------------------------
// Semantic layers: types, builtins, checked classes
// ---------------------------------------------------------------------

pub mod builtins;
pub mod hir;
pub mod typecheck;
pub mod types;

// ---------------------------------------------------------------------
// Back-end: code generation, loading and compiler orchestration
// ---------------------------------------------------------------------

pub mod codegen_wasm;
pub mod compiler;
pub mod loader;
pub mod pretty;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompiledModule, Compiler};
pub use error::{CompileError, CoreError, ErrorKind, ModuleError};
pub use loader::Value;
pub use path::ModulePath;
pub use sources::{FsSources, MemorySources, SourceProvider};
