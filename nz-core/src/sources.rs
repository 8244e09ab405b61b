//! Where module source text comes from.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::path::ModulePath;
use crate::sym::Sym;

/// File extension of nz sources, including the dot.
pub const EXTENSION: &str = ".nz";

/// Name of the entry point of a directory module.
pub const DIRECTORY_ENTRY: &str = "main.nz";

/// Maps a full module path (`a/b.nz`) to its text.
///
/// A missing file is `Ok(None)`; only real I/O failures are errors.
/// Reads must be deterministic within one compilation.
pub trait SourceProvider {
    fn read(&self, path: &ModulePath) -> io::Result<Option<String>>;
}

impl<P: SourceProvider + ?Sized> SourceProvider for &P {
    fn read(&self, path: &ModulePath) -> io::Result<Option<String>> {
        (**self).read(path)
    }
}

/// In-memory sources, keyed by full path.
#[derive(Debug, Clone, Default)]
pub struct MemorySources {
    files: HashMap<ModulePath, String>,
}

impl MemorySources {
    pub fn new() -> Self {
        MemorySources::default()
    }

    pub fn insert(&mut self, path: &str, text: impl Into<String>) {
        self.files.insert(ModulePath::parse(path), text.into());
    }

    pub fn with(mut self, path: &str, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl SourceProvider for MemorySources {
    fn read(&self, path: &ModulePath) -> io::Result<Option<String>> {
        Ok(self.files.get(path).cloned())
    }
}

/// Sources under a directory on disk.
#[derive(Debug, Clone)]
pub struct FsSources {
    root: PathBuf,
}

impl FsSources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSources { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, path: &ModulePath) -> PathBuf {
        let mut file = self.root.clone();
        for part in path.parts() {
            file.push(part.as_str());
        }
        file
    }

    /// Logical paths of every module under the root, sorted.
    ///
    /// `x.nz` is module `x` and `d/main.nz` is module `d`. A `main.nz`
    /// directly in the root has no logical name and is skipped.
    pub fn discover(&self) -> io::Result<Vec<ModulePath>> {
        let mut modules = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if let Some(logical) = logical_path(relative) {
                modules.push(logical);
            }
        }
        modules.sort_by_key(|module| module.to_string());
        modules.dedup();
        Ok(modules)
    }
}

fn logical_path(relative: &Path) -> Option<ModulePath> {
    let mut parts = relative
        .iter()
        .map(|part| part.to_str())
        .collect::<Option<Vec<_>>>()?;
    let file = parts.pop()?;
    if file != DIRECTORY_ENTRY {
        parts.push(file.strip_suffix(EXTENSION)?);
    }
    if parts.is_empty() {
        return None;
    }
    Some(ModulePath::new(parts.into_iter().map(Sym::intern).collect()))
}

impl SourceProvider for FsSources {
    fn read(&self, path: &ModulePath) -> io::Result<Option<String>> {
        match fs::read_to_string(self.file_path(path)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}
