//! Call layout planning
//!
//! Design: a `CallDescriptor` is planned once per signature and then read
//! for every call. Planning replays the marshaler's decision tree with a
//! dry-run `SlotCursor`; both the staging buffer size (register shadow
//! areas, stack overflow, copy area for oversized aggregates) and the
//! flag word the assembly stubs decode derive from that one walk, so
//! sizing, flags, and actual slot placement cannot disagree.

mod classify;
mod cursor;


pub use classify::{classify, return_struct_flags, LeafCounts};
pub use cursor::SlotCursor;

use crate::abi::{align_up, word_count, Abi, NUM_ARG_REGS, WORD_SIZE};
use crate::types::{Type, TypeTag};

/// Bits per leaf tag in the return-struct sub-encoding.
pub const FLAG_BITS: u32 = 2;

/// Shift of the return-kind code within the flag word. Everything below
/// is the per-slot argument bitmaps (8 float bits, 8 reserved int bits).
pub const RET_SHIFT: u32 = FLAG_BITS * 8;

/// Shift of the return-struct sub-encoding within the flag word.
pub const RET_STRUCT_SHIFT: u32 = RET_SHIFT + 4;

/// Opaque small struct returned in one register.
pub const RET_STRUCT_SMALL: u32 = 0x10;

/// Opaque small struct returned in two registers.
pub const RET_STRUCT_SMALL2: u32 = 0x11;

/// Marker for small-struct returns under a soft-float ABI.
pub const RET_STRUCT_SOFT: u32 = 0x20;

/// A planned call signature. Constructed once, then read-only for any
/// number of calls through the marshaler or the closure decoder.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    abi: Abi,
    args: Vec<Type>,
    rtype: Type,
    nfixedargs: Option<usize>,
    bytes: usize,
    flags: u32,
    rstruct: bool,
}

impl CallDescriptor {
    /// Plan a non-variadic call.
    pub fn new(abi: Abi, args: Vec<Type>, rtype: Type) -> Self {
        Self::plan(abi, args, rtype, None)
    }

    /// Plan a variadic call with `nfixedargs` fixed leading arguments.
    /// Arguments at or past that index never use float registers.
    pub fn new_variadic(abi: Abi, args: Vec<Type>, rtype: Type, nfixedargs: usize) -> Self {
        Self::plan(abi, args, rtype, Some(nfixedargs))
    }

    fn plan(abi: Abi, args: Vec<Type>, rtype: Type, nfixedargs: Option<usize>) -> Self {
        let fp = abi.fp_reg_bits();

        let struct_ret_flags = if rtype.is_struct() {
            return_struct_flags(&rtype, fp)
        } else {
            0
        };
        // Zero here means the struct comes back through a hidden pointer
        // argument occupying integer slot 0.
        let rstruct = rtype.is_struct() && struct_ret_flags == 0;

        let usage = walk_args(&args, fp, nfixedargs, rstruct);
        let bytes = buffer_bytes(&usage, fp);
        let flags = return_flags(usage.float_map, &rtype, fp, struct_ret_flags);

        tracing::trace!(
            bytes,
            flags = format_args!("{flags:#x}"),
            rstruct,
            nargs = args.len(),
            "planned call layout"
        );

        Self { abi, args, rtype, nfixedargs, bytes, flags, rstruct }
    }

    #[inline]
    pub fn abi(&self) -> Abi {
        self.abi
    }

    #[inline]
    pub fn args(&self) -> &[Type] {
        &self.args
    }

    #[inline]
    pub fn rtype(&self) -> &Type {
        &self.rtype
    }

    /// Staging buffer size in bytes, 16-byte aligned.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Packed argument bitmaps and return-kind code.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// True when the return value travels through a hidden pointer in
    /// integer slot 0 instead of the return registers.
    #[inline]
    pub fn returns_via_pointer(&self) -> bool {
        self.rstruct
    }

    /// The return encoding the entry stubs consume: flag word with the
    /// argument bitmaps stripped.
    #[inline]
    pub fn return_kind(&self) -> u32 {
        self.flags >> RET_SHIFT
    }

    /// True when argument `index` sits at or past the variadic boundary.
    #[inline]
    pub(crate) fn past_fixed_args(&self, index: usize) -> bool {
        matches!(self.nfixedargs, Some(k) if index >= k)
    }

    /// Byte offset of the stack-overflow area within the staging buffer.
    /// Integer slots sit at offset 0; float slots, when the ABI has them,
    /// occupy the 8 words in between.
    #[inline]
    pub(crate) fn stack_base(&self) -> usize {
        if self.abi.has_fp_registers() {
            2 * NUM_ARG_REGS * WORD_SIZE
        } else {
            NUM_ARG_REGS * WORD_SIZE
        }
    }
}

/// True when a two-word-aligned value must skip to an even integer slot:
/// variadic arguments past the boundary start on an aligned register
/// pair, and anything landing in the stack area keeps its natural
/// 16-byte alignment there.
#[inline]
pub(crate) fn needs_even_slot(alignment: usize, cursor: &SlotCursor, variadic_past: bool) -> bool {
    alignment == 2 * WORD_SIZE && (variadic_past || !cursor.int_available())
}

/// Dry-run of the marshaler's decision tree over the argument list.
/// Records which float slots carry doubles and the copy-area bytes
/// by-reference aggregates need; the final cursor position is the total
/// integer-side consumption, stack words included.
struct SlotUsage {
    cursor: SlotCursor,
    float_map: u32,
    copy_bytes: usize,
}

fn walk_args(
    args: &[Type],
    fp_reg_bits: u32,
    nfixedargs: Option<usize>,
    rstruct: bool,
) -> SlotUsage {
    let mut cursor = SlotCursor::new();
    let mut float_map = 0u32;
    let mut copy_bytes = 0usize;

    if rstruct {
        cursor.take_int();
    }

    for (index, ty) in args.iter().enumerate() {
        let variadic_past = matches!(nfixedargs, Some(k) if index >= k);

        match ty.tag() {
            TypeTag::Float => {
                if cursor.float_available() && fp_reg_bits >= 32 && !variadic_past {
                    cursor.take_float();
                } else {
                    cursor.take_int();
                }
            }
            TypeTag::Double => {
                if cursor.float_available() && fp_reg_bits >= 64 && !variadic_past {
                    float_map |= 1 << cursor.take_float();
                } else {
                    cursor.take_int();
                }
            }
            TypeTag::LongDouble => {
                if needs_even_slot(ty.alignment(), &cursor, variadic_past) {
                    cursor.align_int_even();
                }
                cursor.advance_int(word_count(ty.size()));
            }
            TypeTag::Struct => {
                let z = ty.size();
                if z > 2 * WORD_SIZE {
                    if cursor.int_available() {
                        // By reference: one pointer slot plus an aligned
                        // copy of the referent in the high copy area.
                        cursor.take_int();
                        copy_bytes += align_up(z, ty.alignment().max(WORD_SIZE));
                    } else {
                        // By value on the stack afterwards.
                        if needs_even_slot(ty.alignment(), &cursor, variadic_past) {
                            cursor.align_int_even();
                        }
                        cursor.advance_int(word_count(z));
                    }
                } else {
                    let counts = classify(ty, fp_reg_bits);
                    if counts.fast_path(&cursor, fp_reg_bits, z, variadic_past) {
                        struct_arg_flags(ty, &mut cursor, &mut float_map, fp_reg_bits);
                    } else {
                        if needs_even_slot(ty.alignment(), &cursor, variadic_past) {
                            cursor.align_int_even();
                        }
                        cursor.advance_int(word_count(z));
                    }
                }
            }
            _ => {
                cursor.take_int();
            }
        }
    }

    SlotUsage { cursor, float_map, copy_bytes }
}

/// Staging buffer size: integer slots and stack words floored to a full
/// register shadow, the float shadow when the ABI has one, and the copy
/// area, rounded to 16 so the copy area's high end stays aligned.
fn buffer_bytes(usage: &SlotUsage, fp_reg_bits: u32) -> usize {
    let int_bytes = usage.cursor.int_used().max(NUM_ARG_REGS) * WORD_SIZE;
    let float_bytes = if fp_reg_bits != 0 { NUM_ARG_REGS * WORD_SIZE } else { 0 };
    align_up(int_bytes + float_bytes + usage.copy_bytes, 16)
}

/// Fold the argument bitmaps and the return-kind code into the flag word.
fn return_flags(float_map: u32, rtype: &Type, fp_reg_bits: u32, struct_ret_flags: u32) -> u32 {
    // Reserved per-slot bitmap for the integer file.
    let int_map = 0u32;
    let mut flags = float_map | (int_map << NUM_ARG_REGS);

    // Under soft or single-precision float the scalar return degrades to
    // the integer convention before the kind code is chosen.
    let mut rtag = rtype.tag();
    if fp_reg_bits < 32 && rtag == TypeTag::Float {
        rtag = TypeTag::UInt32;
    }
    if fp_reg_bits < 64 && rtag == TypeTag::Double {
        rtag = TypeTag::UInt64;
    }

    match rtag {
        TypeTag::Struct => {
            if struct_ret_flags != 0 {
                flags |= TypeTag::Struct.code() << RET_SHIFT;
                flags |= struct_ret_flags << RET_STRUCT_SHIFT;
            }
            // Hidden-pointer returns encode as void.
        }
        TypeTag::Void => {}
        TypeTag::Float | TypeTag::Double | TypeTag::LongDouble => {
            flags |= rtype.tag().code() << RET_SHIFT;
        }
        TypeTag::SInt32 | TypeTag::UInt32 => {
            flags |= TypeTag::SInt32.code() << RET_SHIFT;
        }
        _ => {
            flags |= TypeTag::Int.code() << RET_SHIFT;
        }
    }

    flags
}

/// Slot accounting for an aggregate taking the field-by-field fast path.
/// Recurses into nested aggregates; each float leaf claims a float slot
/// (doubles set their bitmap bit), each integer leaf an integer slot.
fn struct_arg_flags(ty: &Type, cursor: &mut SlotCursor, float_map: &mut u32, fp_reg_bits: u32) {
    for field in ty.elements() {
        match field.tag() {
            TypeTag::Double if fp_reg_bits >= 64 => {
                *float_map |= 1 << cursor.take_float();
            }
            TypeTag::Float if fp_reg_bits >= 32 => {
                cursor.take_float();
            }
            TypeTag::Struct => struct_arg_flags(field, cursor, float_map, fp_reg_bits),
            _ => {
                cursor.take_int();
            }
        }
    }
}
