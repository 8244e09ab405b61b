//! Process-wide symbol interning.
//!
//! A [`Sym`] is a canonical handle for an identifier. Two symbols are equal
//! exactly when they point at the same interned string, so comparison and
//! hashing never look at the characters.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use parking_lot::Mutex;

static TABLE: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();

#[derive(Clone, Copy)]
pub struct Sym(&'static str);

impl Sym {
    /// Intern `text`, returning the existing symbol if there is one.
    pub fn intern(text: &str) -> Sym {
        let mut table = TABLE.get_or_init(|| Mutex::new(HashSet::new())).lock();
        if let Some(&existing) = table.get(text) {
            return Sym(existing);
        }
        // Interned strings live for the rest of the process.
        let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
        table.insert(leaked);
        Sym(leaked)
    }

    pub fn as_str(self) -> &'static str {
        self.0
    }

    pub fn starts_with_uppercase(self) -> bool {
        self.0.starts_with(|c: char| c.is_ascii_uppercase())
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }
}

impl Eq for Sym {}

impl Hash for Sym {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_canonical() {
        let a = Sym::intern("slots");
        let b = Sym::intern(&(String::from("slo") + "ts"));
        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
        assert_ne!(a, Sym::intern("slot"));
    }

    #[test]
    fn interning_from_many_threads_agrees() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Sym::intern("concurrentName")))
            .collect();
        let syms: Vec<Sym> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        assert!(syms.windows(2).all(|w| w[0] == w[1]));
    }
}
