//! Aggregate classification for the small-struct register fast paths
//!
//! Design: a read-only tree walk returning leaf counts by value, so sibling
//! fields cannot interfere through shared counters. The counts feed both
//! the per-argument register-eligibility test and the return-value flag
//! encoder.

use super::cursor::SlotCursor;
use super::{FLAG_BITS, RET_STRUCT_SMALL, RET_STRUCT_SMALL2, RET_STRUCT_SOFT};
use crate::abi::WORD_SIZE;
use crate::types::{Type, TypeTag};

/// Leaf-field census of an aggregate. A float or double leaf counts as a
/// float only when the register file is wide enough to hold it; otherwise
/// it travels the integer convention and counts as an integer leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafCounts {
    pub floats: u32,
    pub ints: u32,
}

impl LeafCounts {
    /// True when this composition qualifies for field-by-field register
    /// placement given the registers still free at `cursor`. The hardware
    /// fast paths are exactly: one float, two floats, or one float plus
    /// one integer.
    #[inline]
    pub fn register_eligible(&self, cursor: &SlotCursor, fp_reg_bits: u32) -> bool {
        if fp_reg_bits == 0 {
            return false;
        }
        match (self.floats, self.ints) {
            (1, 0) => cursor.float_available(),
            (2, 0) => cursor.float_free() >= 2,
            (1, 1) => cursor.float_available() && cursor.int_available(),
            _ => false,
        }
    }

    /// Fast-path test shared by the flag pass, the marshaler, and the
    /// closure decoder so all three walk the same decision tree. One-word
    /// aggregates ride the scalar float gate and so inherit its variadic
    /// suppression; two-word aggregates do not.
    #[inline]
    pub fn fast_path(
        &self,
        cursor: &SlotCursor,
        fp_reg_bits: u32,
        size: usize,
        variadic_past: bool,
    ) -> bool {
        if size <= WORD_SIZE && variadic_past {
            return false;
        }
        self.register_eligible(cursor, fp_reg_bits)
    }

    /// Same shape test against a full register file, for return values.
    #[inline]
    fn return_eligible(&self, fp_reg_bits: u32) -> bool {
        fp_reg_bits != 0 && matches!((self.floats, self.ints), (1, 0) | (2, 0) | (1, 1))
    }
}

/// Count the float and integer leaves of `ty` under the given float
/// register width. Scalars classify as single leaves; aggregates recurse.
pub fn classify(ty: &Type, fp_reg_bits: u32) -> LeafCounts {
    match ty.tag() {
        TypeTag::Struct => {
            let mut counts = LeafCounts::default();
            for field in ty.elements() {
                let c = classify(field, fp_reg_bits);
                counts.floats += c.floats;
                counts.ints += c.ints;
            }
            counts
        }
        TypeTag::Float if fp_reg_bits >= 32 => LeafCounts { floats: 1, ints: 0 },
        TypeTag::Double if fp_reg_bits >= 64 => LeafCounts { floats: 1, ints: 0 },
        _ => LeafCounts { floats: 0, ints: 1 },
    }
}

/// Produce the packed return flags for a struct return value, or zero if
/// the struct is too large and must be returned through a hidden pointer.
///
/// Eligible compositions get one 2-bit tag per flattened leaf. Everything
/// else small enough for the return registers gets a generic one-word or
/// two-word small-struct tag telling the stubs to move raw words.
pub fn return_struct_flags(ty: &Type, fp_reg_bits: u32) -> u32 {
    if ty.size() > 2 * WORD_SIZE {
        return 0;
    }
    let small = if ty.size() > WORD_SIZE {
        RET_STRUCT_SMALL2
    } else {
        RET_STRUCT_SMALL
    };

    let counts = classify(ty, fp_reg_bits);
    if !counts.return_eligible(fp_reg_bits) {
        return small;
    }

    let mut leaf = 0;
    let mut flags = encode_leaf_tags(ty, &mut leaf, fp_reg_bits);
    if fp_reg_bits == 0 {
        flags |= RET_STRUCT_SOFT;
    }
    if flags == 0 {
        small
    } else {
        flags
    }
}

/// Flatten the leaf fields of `ty` into consecutive 2-bit tags. `leaf` is
/// the running flattened index shared across nesting levels.
fn encode_leaf_tags(ty: &Type, leaf: &mut u32, fp_reg_bits: u32) -> u32 {
    let mut flags = 0;
    for field in ty.elements() {
        match field.tag() {
            TypeTag::Struct => flags |= encode_leaf_tags(field, leaf, fp_reg_bits),
            tag => {
                let code = if tag == TypeTag::Float && fp_reg_bits >= 32 {
                    TypeTag::Float.code()
                } else if tag == TypeTag::Double && fp_reg_bits >= 64 {
                    TypeTag::Double.code()
                } else {
                    TypeTag::Int.code()
                };
                flags |= code << (*leaf * FLAG_BITS);
                *leaf += 1;
            }
        }
    }
    flags
}
