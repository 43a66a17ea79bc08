//! Interned strings
//!
//! Every string the engine touches is interned: two equal strings always
//! share one [`Atom`]. Atom handles are process-local and carry no meaning
//! across processes, which is why the snapshot codec rewrites every atom
//! operand to a literal-table index.

use std::rc::Rc;

use ferret_vm_bytecode::Atom;
use rustc_hash::FxHashMap;

/// Content-keyed interned-string table
///
/// Atom 0 is always the empty string.
pub struct AtomTable {
    strings: Vec<Rc<str>>,
    map: FxHashMap<Rc<str>, Atom>,
}

impl AtomTable {
    /// Create a table with the empty string pre-interned as atom 0
    pub fn new() -> Self {
        let mut table = Self {
            strings: Vec::new(),
            map: FxHashMap::default(),
        };
        let empty = table.intern("");
        debug_assert_eq!(empty, Atom::EMPTY);
        table
    }

    /// Intern `text`, returning the atom shared by all equal strings
    pub fn intern(&mut self, text: &str) -> Atom {
        if let Some(atom) = self.map.get(text) {
            return *atom;
        }
        let atom = Atom(self.strings.len() as u32);
        let shared: Rc<str> = Rc::from(text);
        self.strings.push(shared.clone());
        self.map.insert(shared, atom);
        atom
    }

    /// Resolve an atom to its text. Panics on a handle this table never
    /// produced; atoms are not forgeable through the public API.
    #[inline]
    pub fn resolve(&self, atom: Atom) -> &str {
        &self.strings[atom.0 as usize]
    }

    /// Number of interned strings, the empty string included
    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Always false; the empty string is interned on construction
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_atom_zero() {
        let mut table = AtomTable::new();
        assert_eq!(table.intern(""), Atom::EMPTY);
        assert_eq!(table.resolve(Atom::EMPTY), "");
    }

    #[test]
    fn test_interning_dedups_by_content() {
        let mut table = AtomTable::new();
        let a = table.intern("print");
        let b = table.intern("print");
        let c = table.intern("x");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.resolve(a), "print");
        assert_eq!(table.resolve(c), "x");
    }
}
