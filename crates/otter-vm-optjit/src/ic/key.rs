use std::fmt;

use rustc_hash::FxHashMap;

/// Handle to an interned property name.
///
/// Descriptors hold keys without owning the string; the [`Interner`] that
/// issued a key must outlive every descriptor naming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey(u32);

impl PropertyKey {
    /// Raw table index.
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key#{}", self.0)
    }
}

/// Property-name table shared by the translator and the object model.
#[derive(Debug, Default)]
pub struct Interner {
    names: Vec<Box<str>>,
    lookup: FxHashMap<Box<str>, PropertyKey>,
}

impl Interner {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `name`, interning it on first use.
    pub fn intern(&mut self, name: &str) -> PropertyKey {
        if let Some(&key) = self.lookup.get(name) {
            return key;
        }
        let key = PropertyKey(self.names.len() as u32);
        self.names.push(name.into());
        self.lookup.insert(name.into(), key);
        key
    }

    /// Key for `name` if already interned.
    pub fn get(&self, name: &str) -> Option<PropertyKey> {
        self.lookup.get(name).copied()
    }

    /// Name behind `key`.
    pub fn resolve(&self, key: PropertyKey) -> Option<&str> {
        self.names.get(key.0 as usize).map(|name| &**name)
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
