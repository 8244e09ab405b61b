//! The compiler session: resolve, check, generate and load modules.

use std::collections::HashMap;

use tracing::info;

use crate::ast;
use crate::codegen_wasm::{ClassArtifact, generate_class};
use crate::error::{CompileError, CoreError, ErrorKind, ModuleOrigin};
use crate::hir::{ClassId, ClassTable};
use crate::lexer::{self, Lexed};
use crate::loader::{ClassLoader, Value};
use crate::loc::Loc;
use crate::parser::parse_module;
use crate::path::{ModulePath, RelPath};
use crate::resolve::{self, linearize};
use crate::sources::{DIRECTORY_ENTRY, EXTENSION, SourceProvider};
use crate::sym::Sym;
use crate::typecheck::check_module;

/// A module that has been checked, generated and loaded.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub origin: ModuleOrigin,
    pub class: ClassId,
    pub artifact: ClassArtifact,
}

/// One compilation session over a source provider.
///
/// Classes compiled by one session can import each other; every module
/// is compiled and loaded at most once.
pub struct Compiler<S> {
    sources: S,
    classes: ClassTable,
    loader: ClassLoader,
    modules: Vec<CompiledModule>,
    index: HashMap<ModulePath, usize>,
}

impl<S: SourceProvider> Compiler<S> {
    pub fn new(sources: S) -> Result<Self, CoreError> {
        Ok(Compiler {
            sources,
            classes: ClassTable::new(),
            loader: ClassLoader::new()?,
            modules: Vec::new(),
            index: HashMap::new(),
        })
    }

    pub fn sources(&self) -> &S {
        &self.sources
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Compiled modules, dependencies first.
    pub fn modules(&self) -> &[CompiledModule] {
        &self.modules
    }

    pub fn module(&self, logical: &ModulePath) -> Option<&CompiledModule> {
        self.index.get(logical).map(|index| &self.modules[*index])
    }

    fn read(&self, logical: &ModulePath) -> Result<(ModuleOrigin, String), CoreError> {
        match resolve::locate(&self.sources, logical, false)? {
            Some((full, source)) => Ok((
                ModuleOrigin {
                    logical: logical.clone(),
                    full,
                },
                source,
            )),
            None => {
                let kind = match logical.add_extension(EXTENSION) {
                    Some(file) => ErrorKind::ModuleNotFound {
                        rel: RelPath::new(0, logical.clone()),
                        file,
                        directory: logical.add(Sym::intern(DIRECTORY_ENTRY)),
                    },
                    None => ErrorKind::EmptyModulePath,
                };
                Err(CompileError::new(Loc::ZERO, kind).unattributed().into())
            }
        }
    }

    /// Tokens of one module, without following its imports.
    pub fn lex(&self, logical: &ModulePath) -> Result<Vec<Lexed>, CoreError> {
        let (origin, source) = self.read(logical)?;
        Ok(lexer::lex(&source).map_err(|err| err.in_module(&origin))?)
    }

    /// Untyped syntax tree of one module, without following its imports.
    pub fn parse(&self, logical: &ModulePath) -> Result<ast::Module, CoreError> {
        let (origin, source) = self.read(logical)?;
        let Some(name) = logical.last() else {
            return Err(CompileError::new(Loc::ZERO, ErrorKind::EmptyModulePath)
                .unattributed()
                .into());
        };
        Ok(parse_module(&source, name).map_err(|err| err.in_module(&origin))?)
    }

    /// Compile and load `logical` and everything it imports.
    ///
    /// Modules compiled earlier in this session are reused.
    pub fn compile(&mut self, logical: &ModulePath) -> Result<&CompiledModule, CoreError> {
        let resolved = linearize(&self.sources, logical)?;
        let mut ids = Vec::with_capacity(resolved.len());
        for module in &resolved {
            if let Some(done) = self.module(&module.origin.logical) {
                ids.push(done.class);
                continue;
            }
            let imports: Vec<(Loc, ClassId)> = module.imports.iter().map(|(loc, index)| (*loc, ids[*index])).collect();
            let class = check_module(&mut self.classes, &module.origin.logical, &module.ast, &imports)
                .map_err(|err| err.in_module(&module.origin))?;
            let artifact = match generate_class(&self.classes, class, &module.source) {
                Ok(artifact) => artifact,
                Err(err) => {
                    self.classes.truncate(class);
                    return Err(err.in_module(&module.origin).into());
                }
            };
            if let Err(err) = self.loader.define(&artifact) {
                self.classes.truncate(class);
                return Err(err);
            }
            info!(module = %module.origin.logical, "compiled module");

            self.index.insert(module.origin.logical.clone(), self.modules.len());
            self.modules.push(CompiledModule {
                origin: module.origin.clone(),
                class,
                artifact,
            });
            ids.push(class);
        }
        self.module(logical)
            .ok_or_else(|| CoreError::NoSuchClass(logical.to_string()))
    }

    /// Run a method of a compiled module.
    pub fn invoke(&mut self, logical: &ModulePath, method: &str, args: &[Value]) -> Result<Value, CoreError> {
        self.loader.invoke(&logical.to_string(), method, args)
    }

    pub fn new_object(&mut self, logical: &ModulePath, fields: &[Value]) -> Result<Value, CoreError> {
        self.loader.new_object(&logical.to_string(), fields)
    }

    pub fn field(&self, object: &Value, name: &str) -> Result<Value, CoreError> {
        self.loader.field(object, name)
    }

    /// The one-line message for `err`, with line and column.
    pub fn render_error(&self, err: &CoreError) -> String {
        err.render(&self.sources)
    }
}
