//! Engine literal values
//!
//! [`Literal`] is the engine-value representation that appears inside
//! bytecode: in a code block's numeral-literal table and in `LoadLiteral`
//! operands. It has a fixed 16-byte raw form (u64 tag followed by u64
//! payload, native endian) which is copied verbatim into snapshot artifacts.
//!
//! The `SnapshotIndex` variant exists only inside a snapshot: it carries a
//! literal-table index in the slot where a live `String` atom would sit.

use crate::error::{BytecodeError, Result};
use crate::operand::Atom;

/// Raw size of an encoded literal value
pub const RAW_SIZE: usize = 16;

const TAG_UNDEFINED: u64 = 0;
const TAG_NULL: u64 = 1;
const TAG_BOOL: u64 = 2;
const TAG_INT32: u64 = 3;
const TAG_DOUBLE: u64 = 4;
const TAG_STRING: u64 = 5;
const TAG_SNAPSHOT_INDEX: u64 = 6;

/// An engine literal value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Small integer
    Int32(i32),
    /// 64-bit float
    Double(f64),
    /// Interned string handle (live form only)
    String(Atom),
    /// Literal-table index (snapshot form only)
    SnapshotIndex(u32),
}

impl Literal {
    /// Create a numeric literal, using the integer representation when the
    /// value is a small integer
    pub fn number(value: f64) -> Self {
        if value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64 {
            // -0.0 must stay a double to keep its sign
            if value == 0.0 && value.is_sign_negative() {
                return Self::Double(value);
            }
            Self::Int32(value as i32)
        } else {
            Self::Double(value)
        }
    }

    /// Does this value hold a process-local handle?
    ///
    /// Such values must never be raw-copied into a snapshot's numeral table;
    /// they travel through the literal table instead.
    #[inline]
    pub fn is_heap_ref(self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Encode into the 16-byte raw form
    pub fn encode(self) -> [u8; RAW_SIZE] {
        let (tag, payload): (u64, u64) = match self {
            Self::Undefined => (TAG_UNDEFINED, 0),
            Self::Null => (TAG_NULL, 0),
            Self::Bool(b) => (TAG_BOOL, b as u64),
            Self::Int32(i) => (TAG_INT32, i as u32 as u64),
            Self::Double(d) => (TAG_DOUBLE, d.to_bits()),
            Self::String(atom) => (TAG_STRING, atom.0 as u64),
            Self::SnapshotIndex(index) => (TAG_SNAPSHOT_INDEX, index as u64),
        };
        let mut raw = [0u8; RAW_SIZE];
        raw[..8].copy_from_slice(&tag.to_ne_bytes());
        raw[8..].copy_from_slice(&payload.to_ne_bytes());
        raw
    }

    /// Decode from the 16-byte raw form
    pub fn decode(raw: &[u8; RAW_SIZE]) -> Result<Self> {
        let mut tag = [0u8; 8];
        let mut payload = [0u8; 8];
        tag.copy_from_slice(&raw[..8]);
        payload.copy_from_slice(&raw[8..]);
        let tag = u64::from_ne_bytes(tag);
        let payload = u64::from_ne_bytes(payload);
        match tag {
            TAG_UNDEFINED => Ok(Self::Undefined),
            TAG_NULL => Ok(Self::Null),
            TAG_BOOL => Ok(Self::Bool(payload != 0)),
            TAG_INT32 => Ok(Self::Int32(payload as u32 as i32)),
            TAG_DOUBLE => Ok(Self::Double(f64::from_bits(payload))),
            TAG_STRING => Ok(Self::String(Atom(payload as u32))),
            TAG_SNAPSHOT_INDEX => Ok(Self::SnapshotIndex(payload as u32)),
            other => Err(BytecodeError::InvalidLiteralTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip() {
        let values = [
            Literal::Undefined,
            Literal::Null,
            Literal::Bool(true),
            Literal::Bool(false),
            Literal::Int32(-7),
            Literal::Double(3.25),
            Literal::String(Atom(42)),
            Literal::SnapshotIndex(9),
        ];
        for value in values {
            let raw = value.encode();
            assert_eq!(Literal::decode(&raw).unwrap(), value);
        }
    }

    #[test]
    fn test_number_representation() {
        assert_eq!(Literal::number(3.0), Literal::Int32(3));
        assert_eq!(Literal::number(3.5), Literal::Double(3.5));
        assert_eq!(Literal::number(-0.0), Literal::Double(-0.0));
        assert_eq!(Literal::number(1e60), Literal::Double(1e60));
    }

    #[test]
    fn test_bad_tag() {
        let mut raw = [0u8; RAW_SIZE];
        raw[..8].copy_from_slice(&u64::MAX.to_ne_bytes());
        assert!(matches!(
            Literal::decode(&raw),
            Err(BytecodeError::InvalidLiteralTag(_))
        ));
    }

    #[test]
    fn test_heap_ref_classification() {
        assert!(Literal::String(Atom(1)).is_heap_ref());
        assert!(!Literal::SnapshotIndex(1).is_heap_ref());
        assert!(!Literal::Int32(5).is_heap_ref());
    }
}
