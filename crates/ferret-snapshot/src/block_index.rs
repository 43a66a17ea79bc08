//! The code-block index
//!
//! A pre-order walk over the code-block tree assigns indices 0, 1, 2, … in
//! visit order; the root is always index 0 and every block's parent is
//! assigned before the block itself. Index state is owned by one save
//! invocation.

use ferret_vm_bytecode::BlockId;
use rustc_hash::FxHashMap;

/// Per-save block-to-index assignment
#[derive(Default)]
pub struct BlockIndex {
    order: Vec<BlockId>,
    map: FxHashMap<BlockId, u32>,
}

impl BlockIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next block in visit order, returning its index
    pub fn insert(&mut self, block: BlockId) -> u32 {
        debug_assert!(!self.map.contains_key(&block), "block visited twice");
        let index = self.order.len() as u32;
        self.map.insert(block, index);
        self.order.push(block);
        index
    }

    /// Index assigned to `block`, if it was visited
    pub fn lookup(&self, block: BlockId) -> Option<u32> {
        self.map.get(&block).copied()
    }

    /// Number of indexed blocks
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Is the index empty?
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Blocks in index order
    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.order.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_order() {
        let mut index = BlockIndex::new();
        assert_eq!(index.insert(BlockId(7)), 0);
        assert_eq!(index.insert(BlockId(3)), 1);
        assert_eq!(index.lookup(BlockId(3)), Some(1));
        assert_eq!(index.lookup(BlockId(8)), None);
    }
}
