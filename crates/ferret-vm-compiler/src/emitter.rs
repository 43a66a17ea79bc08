//! Low-level bytecode emission
//!
//! The emitter owns the record writer, the register allocator, the pending
//! jump-target patches and the per-block side tables (numeral literals,
//! retained strings, inline-cache count, property-access positions).
//!
//! Jump operands are absolute positions inside the finished buffer. During
//! emission only byte offsets are known, so jump slots are written as
//! placeholders and resolved in [`ByteCodeEmitter::finish`], after the
//! buffer has been boxed and its final base address is fixed.

use ferret_vm_bytecode::{
    Atom, ByteCodeBlock, ByteCodeWriter, InlineCache, Literal, Opcode, Register,
};

use crate::error::{CompileError, CompileResult};

/// Register allocator with a free list
///
/// Registers are frame-local temporaries; `Register::NONE` is reserved.
pub struct RegisterAllocator {
    next: u16,
    max: u16,
    free: Vec<u16>,
}

impl RegisterAllocator {
    fn new() -> Self {
        Self {
            next: 0,
            max: 0,
            free: Vec::new(),
        }
    }

    /// Allocate one register
    pub fn alloc(&mut self) -> CompileResult<Register> {
        if let Some(id) = self.free.pop() {
            return Ok(Register(id));
        }
        if self.next >= u16::MAX - 1 {
            return Err(CompileError::TooManyRegisters);
        }
        let reg = Register(self.next);
        self.next += 1;
        self.max = self.max.max(self.next);
        Ok(reg)
    }

    /// Allocate `count` contiguous fresh registers (never from the free
    /// list); the calling convention needs argument registers adjacent
    pub fn alloc_range(&mut self, count: u16) -> CompileResult<Register> {
        let base = self.next;
        let end = base
            .checked_add(count)
            .filter(|end| *end < u16::MAX)
            .ok_or(CompileError::TooManyRegisters)?;
        self.next = end;
        self.max = self.max.max(self.next);
        Ok(Register(base))
    }

    /// Return a register to the free list
    pub fn free(&mut self, reg: Register) {
        debug_assert!(!reg.is_none());
        self.free.push(reg.0);
    }

    /// Widest register file any point of the code needs
    pub fn max_used(&self) -> u16 {
        self.max
    }
}

/// An unresolved jump-target slot
#[derive(Debug, Clone, Copy)]
#[must_use = "an unpatched jump keeps its placeholder target"]
pub struct JumpSite(usize);

/// Per-block bytecode emitter
pub struct ByteCodeEmitter {
    /// Record writer; code generation appends operands through this
    pub writer: ByteCodeWriter,
    /// Register allocator for frame temporaries
    pub registers: RegisterAllocator,
    relocations: Vec<(usize, usize)>,
    numerals: Vec<Literal>,
    literal_data: Vec<Atom>,
    cache_count: u32,
    object_positions: Vec<usize>,
}

impl ByteCodeEmitter {
    /// Create an emitter for one code block
    pub fn new() -> Self {
        Self {
            writer: ByteCodeWriter::new(),
            registers: RegisterAllocator::new(),
            relocations: Vec::new(),
            numerals: Vec::new(),
            literal_data: Vec::new(),
            cache_count: 0,
            object_positions: Vec::new(),
        }
    }

    /// Byte position the next record will start at
    #[inline]
    pub fn here(&self) -> usize {
        self.writer.len()
    }

    /// Emit `LoadLiteral`, maintaining the block's side tables: numbers are
    /// collected into the numeral table, strings into the retention array
    pub fn load_literal(&mut self, dst: Register, value: Literal) {
        match value {
            Literal::Int32(_) | Literal::Double(_) => {
                if !self.numerals.contains(&value) {
                    self.numerals.push(value);
                }
            }
            Literal::String(atom) => self.literal_data.push(atom),
            _ => {}
        }
        self.writer.begin(Opcode::LoadLiteral);
        self.writer.register(dst);
        self.writer.value(value);
    }

    /// Emit an operand-less record
    pub fn simple(&mut self, op: Opcode) {
        debug_assert!(op.operands().is_empty());
        self.writer.begin(op);
    }

    /// Emit `Jump` with an unresolved target
    pub fn jump(&mut self) -> JumpSite {
        self.writer.begin(Opcode::Jump);
        JumpSite(self.writer.offset_slot(0))
    }

    /// Emit `JumpIfTrue` with an unresolved target
    pub fn jump_if_true(&mut self, cond: Register) -> JumpSite {
        self.writer.begin(Opcode::JumpIfTrue);
        self.writer.register(cond);
        JumpSite(self.writer.offset_slot(0))
    }

    /// Emit `JumpIfFalse` with an unresolved target
    pub fn jump_if_false(&mut self, cond: Register) -> JumpSite {
        self.writer.begin(Opcode::JumpIfFalse);
        self.writer.register(cond);
        JumpSite(self.writer.offset_slot(0))
    }

    /// Append an atom operand, retaining the string for the block's lifetime
    ///
    /// The loader rebuilds the retention array by scanning restored operand
    /// slots, so the generator retains the same set in the same order.
    pub fn atom_operand(&mut self, atom: Atom) {
        self.writer.atom(atom);
        self.literal_data.push(atom);
    }

    /// Append a possibly-empty name operand; only real names are retained
    pub fn name_operand(&mut self, atom: Atom) {
        self.writer.atom(atom);
        if !atom.is_empty() {
            self.literal_data.push(atom);
        }
    }

    /// Emit `TryOperation`; returns the unresolved catch and end positions
    pub fn try_operation(&mut self, catch_name: Atom) -> (JumpSite, JumpSite) {
        self.writer.begin(Opcode::TryOperation);
        self.name_operand(catch_name);
        let catch_site = JumpSite(self.writer.offset_slot(0));
        let end_site = JumpSite(self.writer.offset_slot(0));
        (catch_site, end_site)
    }

    /// Resolve a jump slot to a byte position in this block's code
    pub fn patch(&mut self, site: JumpSite, target: usize) {
        self.relocations.push((site.0, target));
    }

    /// Emit `GetObjectPreComputedCase`, recording its byte position in the
    /// block's object-code-position table
    pub fn get_object_precomputed(&mut self, obj: Register, dst: Register, name: Atom) {
        self.object_positions.push(self.here());
        self.writer.begin(Opcode::GetObjectPreComputedCase);
        self.writer.register(obj);
        self.writer.register(dst);
        self.atom_operand(name);
    }

    /// Emit `SetObjectPreComputedCase` with a freshly allocated inline-cache
    /// slot
    pub fn set_object_precomputed(&mut self, obj: Register, src: Register, name: Atom) {
        let cache = self.cache_count;
        self.cache_count += 1;
        self.writer.begin(Opcode::SetObjectPreComputedCase);
        self.writer.register(obj);
        self.writer.register(src);
        self.atom_operand(name);
        self.writer.cache(cache);
    }

    /// Finish the block: box the buffer, resolve every jump slot against the
    /// buffer's final base address, and assemble the [`ByteCodeBlock`]
    pub fn finish(self) -> ByteCodeBlock {
        let mut code: Box<[u8]> = self.writer.finish().into_boxed_slice();
        let base = code.as_ptr() as usize;
        for (slot, target) in self.relocations {
            ferret_vm_bytecode::stream::write_u64(&mut code, slot, (base + target) as u64);
        }
        ByteCodeBlock {
            code,
            required_register_count: self.registers.max_used(),
            numeral_literals: self.numerals,
            literal_data: self.literal_data,
            inline_caches: (0..self.cache_count).map(|_| InlineCache::new()).collect(),
            object_code_positions: self.object_positions,
        }
    }
}

impl Default for ByteCodeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferret_vm_bytecode::stream::read_u64;
    use ferret_vm_bytecode::OPCODE_WORD_SIZE;

    #[test]
    fn test_jump_targets_are_absolute() {
        let mut e = ByteCodeEmitter::new();
        let site = e.jump();
        let target = e.here();
        e.simple(Opcode::ReturnFunction);
        e.patch(site, target);
        let block = e.finish();

        let stored = read_u64(&block.code, OPCODE_WORD_SIZE) as usize;
        assert_eq!(stored, block.base() + target);
    }

    #[test]
    fn test_numerals_dedup() {
        let mut e = ByteCodeEmitter::new();
        let r = e.registers.alloc().unwrap();
        e.load_literal(r, Literal::Int32(3));
        e.load_literal(r, Literal::Int32(3));
        e.load_literal(r, Literal::Double(2.5));
        e.simple(Opcode::ReturnFunction);
        let block = e.finish();
        assert_eq!(
            block.numeral_literals,
            vec![Literal::Int32(3), Literal::Double(2.5)]
        );
    }

    #[test]
    fn test_register_reuse() {
        let mut a = RegisterAllocator::new();
        let r0 = a.alloc().unwrap();
        a.free(r0);
        let r1 = a.alloc().unwrap();
        assert_eq!(r0, r1);
        assert_eq!(a.max_used(), 1);
    }

    #[test]
    fn test_cache_slots_are_sequential() {
        let mut e = ByteCodeEmitter::new();
        let r = Register(0);
        let name = Atom(1);
        e.set_object_precomputed(r, r, name);
        e.set_object_precomputed(r, r, name);
        let block = e.finish();
        assert_eq!(block.inline_caches.len(), 2);
    }
}
