//! Module resolution.
//!
//! Starting from a root module, every relative import is followed
//! depth-first and the modules are returned in post-order, so each module
//! comes after everything it imports. A module on the current DFS path
//! that is reached again closes a cycle; a module that is already finished
//! is shared, so diamond-shaped imports read each source only once.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{self, ImportPath};
use crate::error::{CompileError, CoreError, ErrorKind, ModuleOrigin};
use crate::loc::Loc;
use crate::parser::parse_module;
use crate::path::{ModulePath, RelPath};
use crate::sources::{DIRECTORY_ENTRY, EXTENSION, SourceProvider};
use crate::sym::Sym;

/// A located and parsed module.
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub origin: ModuleOrigin,
    pub source: String,
    pub ast: ast::Module,
    /// Import location and index of the imported module in the linearization.
    pub imports: Vec<(Loc, usize)>,
}

/// Resolve `root` and everything it depends on, dependencies first.
pub fn linearize(sources: &dyn SourceProvider, root: &ModulePath) -> Result<Vec<ResolvedModule>, CoreError> {
    let mut resolver = Resolver {
        sources,
        state: HashMap::new(),
        out: Vec::new(),
    };
    resolver.visit(root.clone(), false, None)?;
    Ok(resolver.out)
}

/// Find the source of `logical`: `P.nz`, then `P/main.nz`.
///
/// Returns the full path and the text, or `None` when neither exists.
pub fn locate(
    sources: &dyn SourceProvider,
    logical: &ModulePath,
    directory_only: bool,
) -> Result<Option<(ModulePath, String)>, CoreError> {
    if !directory_only {
        if let Some(file) = logical.add_extension(EXTENSION) {
            if let Some(text) = sources.read(&file)? {
                return Ok(Some((file, text)));
            }
        }
    }
    let directory = logical.add(Sym::intern(DIRECTORY_ENTRY));
    Ok(sources.read(&directory)?.map(|text| (directory, text)))
}

enum State {
    Visiting,
    Done(usize),
}

/// Who asked for a module: the importing module and its import.
struct Importer<'a> {
    origin: &'a ModuleOrigin,
    loc: Loc,
    rel: &'a RelPath,
}

impl Importer<'_> {
    fn error(&self, kind: ErrorKind) -> CoreError {
        CompileError::new(self.loc, kind).in_module(self.origin).into()
    }
}

struct Resolver<'s> {
    sources: &'s dyn SourceProvider,
    state: HashMap<ModulePath, State>,
    out: Vec<ResolvedModule>,
}

impl Resolver<'_> {
    fn visit(&mut self, logical: ModulePath, directory_only: bool, from: Option<Importer<'_>>) -> Result<usize, CoreError> {
        let fail = |kind: ErrorKind| -> CoreError {
            match &from {
                Some(importer) => importer.error(kind),
                None => CompileError::new(Loc::ZERO, kind).unattributed().into(),
            }
        };

        match self.state.get(&logical) {
            Some(State::Done(index)) => return Ok(*index),
            Some(State::Visiting) => return Err(fail(ErrorKind::CircularDependency(logical))),
            None => {}
        }
        let Some(name) = logical.last() else {
            return Err(fail(ErrorKind::EmptyModulePath));
        };
        self.state.insert(logical.clone(), State::Visiting);

        let Some((full, source)) = locate(self.sources, &logical, directory_only)? else {
            let rel = match &from {
                Some(importer) => importer.rel.clone(),
                None => RelPath::new(0, logical.clone()),
            };
            let directory = logical.add(Sym::intern(DIRECTORY_ENTRY));
            let kind = match logical.add_extension(EXTENSION) {
                Some(file) if !directory_only => ErrorKind::ModuleNotFound { rel, file, directory },
                _ => ErrorKind::DirectoryModuleNotFound { rel, directory },
            };
            return Err(fail(kind));
        };
        debug!(logical = %logical, full = %full, "loaded module");

        let origin = ModuleOrigin { logical, full };
        let ast = parse_module(&source, name).map_err(|err| err.in_module(&origin))?;

        let mut imports = Vec::with_capacity(ast.imports.len());
        for import in &ast.imports {
            let rel = match &import.path {
                ImportPath::Relative(rel) => rel,
                ImportPath::Global(_) => {
                    let err = CompileError::new(import.loc, ErrorKind::NotImplemented("global imports"));
                    return Err(err.in_module(&origin).into());
                }
            };
            let importer = Importer {
                origin: &origin,
                loc: import.loc,
                rel,
            };
            let Some(target) = origin.full.resolve(rel) else {
                return Err(importer.error(ErrorKind::CantResolveRelative {
                    rel: rel.clone(),
                    base: origin.logical.clone(),
                }));
            };
            let index = self.visit(target, rel.is_parents_only(), Some(importer))?;
            imports.push((import.loc, index));
        }

        let index = self.out.len();
        self.state.insert(origin.logical.clone(), State::Done(index));
        self.out.push(ResolvedModule {
            origin,
            source,
            ast,
            imports,
        });
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemorySources;
    use std::cell::RefCell;

    /// Counts reads per path.
    struct Counting {
        inner: MemorySources,
        reads: RefCell<HashMap<ModulePath, usize>>,
    }

    impl SourceProvider for Counting {
        fn read(&self, path: &ModulePath) -> std::io::Result<Option<String>> {
            *self.reads.borrow_mut().entry(path.clone()).or_default() += 1;
            self.inner.read(path)
        }
    }

    fn logicals(modules: &[ResolvedModule]) -> Vec<String> {
        modules.iter().map(|m| m.origin.logical.to_string()).collect()
    }

    fn resolve_err(sources: &MemorySources, root: &str) -> crate::error::ModuleError {
        match linearize(sources, &ModulePath::parse(root)) {
            Err(CoreError::Module(err)) => err,
            other => panic!("expected a module error, got {other:?}"),
        }
    }

    const BODY: &str = "fun Int x()\n\t1\n";

    #[test]
    fn dependencies_come_first() {
        let sources = MemorySources::new()
            .with("app/main.nz", format!("import\n\t.util\n\t..lib\n{BODY}"))
            .with("app/util.nz", format!("import\n\t.lib2\n{BODY}"))
            .with("app/lib2.nz", BODY)
            .with("lib.nz", BODY);
        let modules = linearize(&sources, &ModulePath::parse("app")).expect("resolve");
        assert_eq!(logicals(&modules), vec!["app/lib2", "app/util", "lib", "app"]);
        assert_eq!(modules[3].origin.full, ModulePath::parse("app/main.nz"));
        assert_eq!(modules[3].imports.iter().map(|(_, i)| *i).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(modules[3].ast.class.name, Sym::intern("app"));
    }

    #[test]
    fn diamond_reads_each_module_once() {
        let inner = MemorySources::new()
            .with("top.nz", format!("import\n\t.left\n\t.right\n{BODY}"))
            .with("left.nz", format!("import\n\t.base\n{BODY}"))
            .with("right.nz", format!("import\n\t.base\n{BODY}"))
            .with("base.nz", BODY);
        let counting = Counting {
            inner,
            reads: RefCell::new(HashMap::new()),
        };
        let modules = linearize(&counting, &ModulePath::parse("top")).expect("resolve");
        assert_eq!(logicals(&modules), vec!["base", "left", "right", "top"]);
        assert_eq!(counting.reads.borrow()[&ModulePath::parse("base.nz")], 1);
        assert!(counting.reads.borrow().values().all(|count| *count == 1));
    }

    #[test]
    fn direct_and_indirect_cycles_fail() {
        let sources = MemorySources::new()
            .with("a.nz", format!("import\n\t.b\n{BODY}"))
            .with("b.nz", format!("import\n\t.a\n{BODY}"))
            .with("self.nz", format!("import\n\t.self\n{BODY}"));

        let err = resolve_err(&sources, "b");
        assert_eq!(err.kind(), &ErrorKind::CircularDependency(ModulePath::parse("b")));
        let origin = err.origin.expect("attributed to the importer");
        assert_eq!(origin.logical, ModulePath::parse("a"));

        let err = resolve_err(&sources, "self");
        assert_eq!(err.kind(), &ErrorKind::CircularDependency(ModulePath::parse("self")));
    }

    #[test]
    fn missing_modules_name_both_forms() {
        let sources = MemorySources::new().with("a.nz", format!("import\n\t.gone\n{BODY}"));
        let err = resolve_err(&sources, "a");
        assert_eq!(
            err.kind(),
            &ErrorKind::ModuleNotFound {
                rel: RelPath::new(1, ModulePath::parse("gone")),
                file: ModulePath::parse("gone.nz"),
                directory: ModulePath::parse("gone/main.nz"),
            }
        );
        assert_eq!(err.error.loc, Loc::new(8, 13));

        let err = resolve_err(&MemorySources::new(), "nothing");
        assert!(err.origin.is_none());
        assert!(matches!(err.kind(), ErrorKind::ModuleNotFound { .. }));
    }

    #[test]
    fn parents_only_imports_use_the_directory_form() {
        let sources = MemorySources::new()
            .with("pkg/main.nz", BODY)
            .with("pkg/sub/leaf.nz", format!("import\n\t..\n{BODY}"));
        let modules = linearize(&sources, &ModulePath::parse("pkg/sub/leaf")).expect("resolve");
        assert_eq!(logicals(&modules), vec!["pkg", "pkg/sub/leaf"]);
        assert_eq!(modules[0].origin.full, ModulePath::parse("pkg/main.nz"));
    }

    #[test]
    fn global_imports_are_not_implemented() {
        let sources = MemorySources::new().with("a.nz", format!("import\n\tstd.io\n{BODY}"));
        let err = resolve_err(&sources, "a");
        assert_eq!(err.kind(), &ErrorKind::NotImplemented("global imports"));
    }

    #[test]
    fn parse_errors_are_attributed() {
        let sources = MemorySources::new().with("a.nz", "fun Int x()\n\t= 1\n\t1");
        let err = resolve_err(&sources, "a");
        assert_eq!(err.kind(), &ErrorKind::PrecedingEquals);
        assert_eq!(err.origin.map(|o| o.full), Some(ModulePath::parse("a.nz")));
    }

    #[test]
    fn climbing_past_the_root_fails() {
        let sources = MemorySources::new().with("a.nz", format!("import\n\t...x\n{BODY}"));
        let err = resolve_err(&sources, "a");
        assert!(matches!(err.kind(), ErrorKind::CantResolveRelative { .. }));
    }
}
