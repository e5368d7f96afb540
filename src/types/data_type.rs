//! Fixed-width typed columns.
//!
//! A `DataType` is a width (the numeric part of `TYPE_1..TYPE_64`) plus a
//! `ValueKind` that says how bytes of that width compare: as a signed
//! little-endian integer, or as a zero-padded byte string. `TYPE_4` is
//! used for integer columns and `TYPE_32` for string columns of differing
//! widths with no single canonical width-to-kind mapping, so the kind is
//! carried explicitly rather than inferred from the width alone (see
//! DESIGN.md).

use crate::error::{Result, StorageError};
use std::cmp::Ordering;

/// Whether a `DataType`'s bytes compare as an integer or as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Str,
}

/// A fixed-width column type. The byte width is the type's declared size;
/// the kind determines comparison and (de)serialization semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    kind: ValueKind,
    width: u8,
}

impl DataType {
    pub const TYPE_1: DataType = DataType::int(1);
    pub const TYPE_2: DataType = DataType::int(2);
    pub const TYPE_4: DataType = DataType::int(4);
    pub const TYPE_8: DataType = DataType::int(8);
    pub const TYPE_16: DataType = DataType::string(16);
    pub const TYPE_32: DataType = DataType::string(32);
    pub const TYPE_64: DataType = DataType::string(64);

    /// Construct an integer-kind type of the given byte width.
    ///
    /// Widths are restricted to 1, 2, 4, or 8 bytes so every integer
    /// value fits in an `i64` for comparison and the public `Value` API;
    /// `TYPE_1..TYPE_64` is a general declared range, but no native
    /// integer register is wider than 8 bytes, so this narrows it to the
    /// widths that are actually meaningful for `ValueKind::Int`.
    pub const fn int(width: u8) -> Self {
        Self {
            kind: ValueKind::Int,
            width,
        }
    }

    /// Construct a string-kind type of the given byte width (1..=64).
    pub const fn string(width: u8) -> Self {
        Self {
            kind: ValueKind::Str,
            width,
        }
    }

    /// Validate and construct a type from an explicit kind and width.
    pub fn new(kind: ValueKind, width: u8) -> Result<Self> {
        if width == 0 || width > 64 {
            return Err(StorageError::layout_overflow(format!(
                "data type width {} out of range 1..=64",
                width
            )));
        }
        if kind == ValueKind::Int && ![1u8, 2, 4, 8].contains(&width) {
            return Err(StorageError::layout_overflow(format!(
                "integer width {} must be one of 1, 2, 4, 8",
                width
            )));
        }
        Ok(Self { kind, width })
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn width(&self) -> usize {
        self.width as usize
    }

    pub fn is_int(&self) -> bool {
        self.kind == ValueKind::Int
    }

    pub fn is_str(&self) -> bool {
        self.kind == ValueKind::Str
    }

    /// Encode this type as a single byte for the on-disk catalog: the
    /// high bit marks string-kind, the low 7 bits carry the width.
    pub fn tag_byte(&self) -> u8 {
        let flag = match self.kind {
            ValueKind::Int => 0u8,
            ValueKind::Str => 0x80,
        };
        flag | self.width
    }

    pub fn from_tag_byte(tag: u8) -> Result<Self> {
        let width = tag & 0x7F;
        let kind = if tag & 0x80 != 0 {
            ValueKind::Str
        } else {
            ValueKind::Int
        };
        Self::new(kind, width)
    }

    /// Compare two byte slices of this type's declared width.
    ///
    /// Integers compare as little-endian two's complement; strings compare
    /// lexicographically over the full declared width. Slices of the
    /// wrong length are a caller error (`Fault`), not a recoverable one.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering> {
        if a.len() != self.width() || b.len() != self.width() {
            return Err(StorageError::fault(format!(
                "compare: expected {}-byte operands, got {} and {}",
                self.width(),
                a.len(),
                b.len()
            )));
        }

        match self.kind {
            ValueKind::Str => Ok(a.cmp(b)),
            ValueKind::Int => {
                let ia = sign_extend(a);
                let ib = sign_extend(b);
                Ok(ia.cmp(&ib))
            }
        }
    }
}

/// Interpret a little-endian two's-complement byte slice (1, 2, 4, or 8
/// bytes) as an `i64`.
fn sign_extend(bytes: &[u8]) -> i64 {
    match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        8 => i64::from_le_bytes(bytes.try_into().unwrap()),
        n => unreachable!("validated int widths are 1/2/4/8, got {}", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_compares_numerically_not_lexicographically() {
        let ty = DataType::TYPE_4;
        // 256 has a larger low byte pattern but compares greater numerically
        let a = 1i32.to_le_bytes();
        let b = 256i32.to_le_bytes();
        assert_eq!(ty.compare(&a, &b).unwrap(), Ordering::Less);
    }

    #[test]
    fn int_handles_negative_values() {
        let ty = DataType::TYPE_4;
        let neg = (-1i32).to_le_bytes();
        let pos = 0i32.to_le_bytes();
        assert_eq!(ty.compare(&neg, &pos).unwrap(), Ordering::Less);
    }

    #[test]
    fn str_compares_lexicographically_over_full_width() {
        let ty = DataType::TYPE_16;
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        a[..3].copy_from_slice(b"abc");
        b[..3].copy_from_slice(b"abd");
        assert_eq!(ty.compare(&a, &b).unwrap(), Ordering::Less);
    }

    #[test]
    fn tag_byte_roundtrips() {
        for ty in [
            DataType::TYPE_1,
            DataType::TYPE_2,
            DataType::TYPE_4,
            DataType::TYPE_8,
            DataType::TYPE_16,
            DataType::TYPE_32,
            DataType::TYPE_64,
        ] {
            let restored = DataType::from_tag_byte(ty.tag_byte()).unwrap();
            assert_eq!(restored, ty);
        }
    }

    #[test]
    fn rejects_bad_int_width() {
        assert!(DataType::new(ValueKind::Int, 3).is_err());
        assert!(DataType::new(ValueKind::Int, 0).is_err());
    }

    #[test]
    fn mismatched_length_is_a_fault() {
        let ty = DataType::TYPE_4;
        let a = [0u8; 4];
        let b = [0u8; 2];
        assert!(matches!(ty.compare(&a, &b), Err(StorageError::Fault(_))));
    }
}
