//! The opcode set and its declarative operand table
//!
//! Every opcode is declared exactly once in [`for_each_opcode!`] together
//! with its operand kinds in stream order. Record byte lengths, the stream
//! walker, the interpreter's operand cursor and the snapshot codec's
//! save/load rewrite passes are all derived from this table; there is no
//! second per-opcode switch anywhere in the engine.
//!
//! A record is a `u32` opcode word followed by byte-packed operands. Operand
//! slots that hold engine handles (atoms, code blocks) or absolute code
//! positions are the ones the snapshot codec rewrites; see [`OperandKind`].

use crate::literal;

/// Size of the leading opcode word of every record
pub const OPCODE_WORD_SIZE: usize = 4;

/// Kind of a single bytecode operand
///
/// The kind determines both the slot width in the stream and how the
/// snapshot codec treats the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// `u16` register index; untouched by the codec
    Register,
    /// `u16` immediate (stack slot, environment hop count, argument count);
    /// untouched by the codec
    Index,
    /// `u32` atom handle; rewritten to a literal-table index and back
    Atom,
    /// `u32` atom handle that may be the empty string; the empty string is
    /// written as the sentinel index, everything else as a literal-table
    /// index
    NameOrEmpty,
    /// `u32` code-block handle; rewritten to a code-block index and back
    Block,
    /// `u32` inline-cache slot; left alone on save, reassigned to a freshly
    /// allocated cache on load
    CacheSlot,
    /// `u64` absolute byte position inside this block's bytecode buffer;
    /// stored relative to the buffer base and relocated on load
    Offset,
    /// 16-byte engine literal value; a `String` payload is rewritten to a
    /// `SnapshotIndex` and back
    Value,
}

impl OperandKind {
    /// Width of this operand in the byte stream
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            OperandKind::Register | OperandKind::Index => 2,
            OperandKind::Atom
            | OperandKind::NameOrEmpty
            | OperandKind::Block
            | OperandKind::CacheSlot => 4,
            OperandKind::Offset => 8,
            OperandKind::Value => literal::RAW_SIZE,
        }
    }
}

/// Invoke `$callback` with the full opcode table.
///
/// Each entry is `Name { operand: Kind, ... }`; entry order fixes the
/// discriminant.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            LoadLiteral { dst: Register, value: Value },
            Move { src: Register, dst: Register },
            LoadThis { dst: Register },
            LoadByName { dst: Register, name: Atom },
            StoreByName { src: Register, name: Atom },
            GetGlobalVariable { dst: Register, name: Atom },
            SetGlobalVariable { src: Register, name: Atom },
            LoadByStackIndex { dst: Register, slot: Index },
            StoreByStackIndex { src: Register, slot: Index },
            LoadByHeapIndex { dst: Register, upper: Index, slot: Index },
            StoreByHeapIndex { src: Register, upper: Index, slot: Index },
            BinaryPlus { lhs: Register, rhs: Register, dst: Register },
            BinaryMinus { lhs: Register, rhs: Register, dst: Register },
            BinaryMultiply { lhs: Register, rhs: Register, dst: Register },
            BinaryDivision { lhs: Register, rhs: Register, dst: Register },
            BinaryMod { lhs: Register, rhs: Register, dst: Register },
            BinaryEqual { lhs: Register, rhs: Register, dst: Register },
            BinaryNotEqual { lhs: Register, rhs: Register, dst: Register },
            BinaryStrictEqual { lhs: Register, rhs: Register, dst: Register },
            BinaryStrictNotEqual { lhs: Register, rhs: Register, dst: Register },
            BinaryLessThan { lhs: Register, rhs: Register, dst: Register },
            BinaryLessThanOrEqual { lhs: Register, rhs: Register, dst: Register },
            BinaryGreaterThan { lhs: Register, rhs: Register, dst: Register },
            BinaryGreaterThanOrEqual { lhs: Register, rhs: Register, dst: Register },
            Increment { src: Register, dst: Register },
            Decrement { src: Register, dst: Register },
            UnaryMinus { src: Register, dst: Register },
            UnaryNot { src: Register, dst: Register },
            UnaryTypeof { src: Register, dst: Register, id: NameOrEmpty },
            UnaryDelete { obj: Register, dst: Register, id: NameOrEmpty },
            CreateObject { dst: Register },
            GetObject { obj: Register, property: Register, dst: Register },
            SetObject { obj: Register, property: Register, src: Register },
            GetObjectPreComputedCase { obj: Register, dst: Register, name: Atom },
            SetObjectPreComputedCase { obj: Register, src: Register, name: Atom, cache: CacheSlot },
            ObjectDefineOwnPropertyWithNameOperation { obj: Register, src: Register, name: Atom },
            LoadRegexp { dst: Register, body: Atom, option: NameOrEmpty },
            CreateFunction { dst: Register, block: Block },
            DeclareFunctionDeclarations { block: Block },
            CreateClass { dst: Register, name: NameOrEmpty, block: Block },
            NewOperation { callee: Register, argv: Register, argc: Index, dst: Register },
            CallFunction { receiver: Register, callee: Register, argv: Register, argc: Index, dst: Register },
            CallFunctionInWithScope { name: Atom, argv: Register, argc: Index, dst: Register },
            Jump { target: Offset },
            JumpIfTrue { cond: Register, target: Offset },
            JumpIfFalse { cond: Register, target: Offset },
            TryOperation { catch_name: NameOrEmpty, catch_position: Offset, end_position: Offset },
            EndTryOperation {},
            OpenWithEnvironment { src: Register },
            CloseEnvironment {},
            ThrowOperation { src: Register },
            ReturnFunctionWithValue { src: Register },
            ReturnFunction {},
            End { src: Register },
        }
    };
}

macro_rules! declare_opcodes {
    ($( $name:ident { $( $field:ident : $kind:ident ),* $(,)? } ),+ $(,)?) => {
        /// Bytecode opcodes
        ///
        /// Discriminants are assigned in declaration order and are part of
        /// the snapshot wire format.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        #[allow(missing_docs)]
        pub enum Opcode {
            $( $name ),+
        }

        /// Every opcode, in discriminant order
        pub static OPCODES: &[Opcode] = &[ $( Opcode::$name ),+ ];

        impl Opcode {
            /// Decode an opcode word
            #[inline]
            pub fn from_u32(raw: u32) -> Option<Opcode> {
                OPCODES.get(raw as usize).copied()
            }

            /// Opcode name, for diagnostics and disassembly
            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$name => stringify!($name) ),+
                }
            }

            /// Operand kinds in stream order, excluding the opcode word
            pub fn operands(self) -> &'static [OperandKind] {
                match self {
                    $( Opcode::$name => &[ $( OperandKind::$kind ),* ] ),+
                }
            }
        }
    };
}

for_each_opcode!(declare_opcodes);

impl Opcode {
    /// Total record size in bytes, a pure function of the opcode kind
    pub fn byte_length(self) -> usize {
        OPCODE_WORD_SIZE
            + self
                .operands()
                .iter()
                .map(|kind| kind.width())
                .sum::<usize>()
    }

    /// Operand kinds paired with their byte offsets from the record start
    pub fn operand_layout(self) -> impl Iterator<Item = (OperandKind, usize)> {
        self.operands().iter().scan(OPCODE_WORD_SIZE, |off, kind| {
            let at = *off;
            *off += kind.width();
            Some((*kind, at))
        })
    }

    /// Does this opcode belong to the jump family (carries an absolute code
    /// position that the loader must relocate)?
    pub fn is_jump_family(self) -> bool {
        self.operands()
            .iter()
            .any(|kind| *kind == OperandKind::Offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_dense() {
        for (index, op) in OPCODES.iter().enumerate() {
            assert_eq!(*op as usize, index);
            assert_eq!(Opcode::from_u32(index as u32), Some(*op));
        }
        assert_eq!(Opcode::from_u32(OPCODES.len() as u32), None);
    }

    #[test]
    fn test_byte_length_matches_layout() {
        for op in OPCODES {
            let end = op
                .operand_layout()
                .last()
                .map(|(kind, off)| off + kind.width())
                .unwrap_or(OPCODE_WORD_SIZE);
            assert_eq!(op.byte_length(), end, "layout mismatch for {}", op.name());
        }
    }

    #[test]
    fn test_jump_family() {
        assert!(Opcode::Jump.is_jump_family());
        assert!(Opcode::JumpIfFalse.is_jump_family());
        assert!(Opcode::TryOperation.is_jump_family());
        assert!(!Opcode::BinaryPlus.is_jump_family());
    }

    #[test]
    fn test_known_lengths() {
        // opcode word + register + 16-byte value
        assert_eq!(Opcode::LoadLiteral.byte_length(), 4 + 2 + 16);
        // opcode word + two offsets + name
        assert_eq!(Opcode::TryOperation.byte_length(), 4 + 4 + 8 + 8);
        assert_eq!(Opcode::EndTryOperation.byte_length(), 4);
    }
}
