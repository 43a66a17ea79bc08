//! The literal interner
//!
//! Assigns a dense, stable index to each distinct string reachable from the
//! program being saved, in first-call order. The engine's atom table is
//! content-keyed, so keying on atoms here *is* keying on content — two equal
//! strings can never arrive under different atoms.
//!
//! The empty string is never interned; name fields that may be empty are
//! written as the sentinel index instead (see `wire::EMPTY_NAME_SENTINEL`).
//! Interner state is owned by one save invocation and dropped with it.

use ferret_vm_bytecode::Atom;
use rustc_hash::FxHashMap;

/// Per-save string interner producing the snapshot's literal table
#[derive(Default)]
pub struct LiteralInterner {
    map: FxHashMap<Atom, u32>,
    order: Vec<Atom>,
}

impl LiteralInterner {
    /// Create an empty interner
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `atom`, returning its stable literal-table index
    pub fn intern(&mut self, atom: Atom) -> u32 {
        debug_assert!(!atom.is_empty(), "the empty string is never interned");
        if let Some(index) = self.map.get(&atom) {
            return *index;
        }
        let index = self.order.len() as u32;
        self.map.insert(atom, index);
        self.order.push(atom);
        index
    }

    /// Index of an already-interned atom
    pub fn lookup(&self, atom: Atom) -> Option<u32> {
        self.map.get(&atom).copied()
    }

    /// Number of distinct literals
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Literals in index order, for the serialization pass
    pub fn iter(&self) -> impl Iterator<Item = Atom> + '_ {
        self.order.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_order() {
        let mut interner = LiteralInterner::new();
        assert_eq!(interner.intern(Atom(5)), 0);
        assert_eq!(interner.intern(Atom(9)), 1);
        assert_eq!(interner.intern(Atom(5)), 0);
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.iter().collect::<Vec<_>>(), vec![Atom(5), Atom(9)]);
    }

    #[test]
    fn test_lookup_misses_unseen() {
        let interner = LiteralInterner::new();
        assert_eq!(interner.lookup(Atom(1)), None);
    }
}
