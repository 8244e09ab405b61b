//! Logical module paths.

use std::fmt;

use crate::sym::Sym;

/// Slash-separated sequence of symbols naming a module or a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ModulePath {
    parts: Vec<Sym>,
}

impl ModulePath {
    pub fn empty() -> Self {
        ModulePath { parts: Vec::new() }
    }

    pub fn new(parts: Vec<Sym>) -> Self {
        ModulePath { parts }
    }

    /// Build from `a/b/c`. Empty segments are ignored.
    pub fn parse(text: &str) -> Self {
        ModulePath {
            parts: text
                .split('/')
                .filter(|part| !part.is_empty())
                .map(Sym::intern)
                .collect(),
        }
    }

    pub fn parts(&self) -> &[Sym] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn last(&self) -> Option<Sym> {
        self.parts.last().copied()
    }

    pub fn add(&self, next: Sym) -> ModulePath {
        let mut parts = self.parts.clone();
        parts.push(next);
        ModulePath { parts }
    }

    /// `a/b` becomes `a/b<extension>`.
    pub fn add_extension(&self, extension: &str) -> Option<ModulePath> {
        let (last, init) = self.parts.split_last()?;
        let mut parts = init.to_vec();
        parts.push(Sym::intern(&format!("{last}{extension}")));
        Some(ModulePath { parts })
    }

    /// Drop `rel.ancestors` trailing segments and append `rel.path`.
    /// Returns `None` when there are not enough segments to drop.
    pub fn resolve(&self, rel: &RelPath) -> Option<ModulePath> {
        let keep = self.parts.len().checked_sub(rel.ancestors)?;
        let mut parts = self.parts[..keep].to_vec();
        parts.extend_from_slice(&rel.path.parts);
        Some(ModulePath { parts })
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.parts.iter().enumerate() {
            if index != 0 {
                f.write_str("/")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

/// Number of trailing segments to skip, then a path below that ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelPath {
    pub ancestors: usize,
    pub path: ModulePath,
}

impl RelPath {
    pub fn new(ancestors: usize, path: ModulePath) -> Self {
        RelPath { ancestors, path }
    }

    /// True for imports like `..` that name a directory only.
    pub fn is_parents_only(&self) -> bool {
        self.path.is_empty()
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ancestors {
            0 => f.write_str("/")?,
            1 => f.write_str("./")?,
            n => {
                for _ in 1..n {
                    f.write_str("../")?;
                }
            }
        }
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_siblings_and_parents() {
        let base = ModulePath::parse("a/b/c.nz");
        let sibling = RelPath::new(1, ModulePath::parse("d"));
        assert_eq!(base.resolve(&sibling), Some(ModulePath::parse("a/b/d")));
        let uncle = RelPath::new(2, ModulePath::parse("e/f"));
        assert_eq!(base.resolve(&uncle), Some(ModulePath::parse("a/e/f")));
    }

    #[test]
    fn resolving_past_the_root_fails() {
        let base = ModulePath::parse("a.nz");
        assert_eq!(base.resolve(&RelPath::new(2, ModulePath::parse("x"))), None);
    }

    #[test]
    fn displays_relative_paths() {
        assert_eq!(RelPath::new(1, ModulePath::parse("x")).to_string(), "./x");
        assert_eq!(RelPath::new(3, ModulePath::parse("x/y")).to_string(), "../../x/y");
        assert_eq!(
            ModulePath::parse("a/b").add_extension(".nz"),
            Some(ModulePath::parse("a/b.nz"))
        );
    }
}
