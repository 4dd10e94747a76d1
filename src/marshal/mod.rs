//! Call argument marshaling
//!
//! Design: arguments are written into a staging buffer laid out as the
//! entry stub expects: 8 integer-register words at offset 0, 8
//! float-register words after them when the ABI has hardware float, the
//! stack-overflow area next, and a copy area for oversized aggregates
//! growing down from the 16-byte aligned end. One `SlotCursor` drives all
//! integer-side placement; positions past the register file map straight
//! onto stack words, so split values need no special bookkeeping.


use crate::abi::{align_up, NUM_ARG_REGS, WORD_SIZE};
use crate::layout::{classify, needs_even_slot, CallDescriptor, LeafCounts, SlotCursor};
use crate::types::{Type, TypeTag};

/// Byte offset of the float-register shadow area, when present.
const FLOAT_BASE: usize = NUM_ARG_REGS * WORD_SIZE;

/// Marshal one call's argument values into `buf`.
///
/// `rvalue` is the caller's return-value storage; it is only read when
/// the descriptor returns through a hidden pointer, in which case its
/// address is written into integer slot 0 before any real argument.
///
/// # Safety
///
/// Every pointer in `avalues` must reference storage valid for the size
/// of the corresponding argument type, and `buf` must be at least
/// `cif.bytes()` long. The buffer contents are only meaningful to the
/// raw entry stub paired with this layout.
pub unsafe fn marshal_args(
    cif: &CallDescriptor,
    rvalue: *mut u8,
    avalues: &[*const u8],
    buf: &mut [u8],
) {
    debug_assert_eq!(avalues.len(), cif.args().len());
    debug_assert!(buf.len() >= cif.bytes());

    let bytes = cif.bytes();
    buf[..bytes].fill(0);

    let mut w = ArgWriter {
        stack_base: cif.stack_base(),
        copy_off: bytes,
        fp_reg_bits: cif.abi().fp_reg_bits(),
        cursor: SlotCursor::new(),
        buf,
    };

    if cif.returns_via_pointer() {
        w.write_int_word(rvalue as u64);
    }

    for (index, (ty, &src)) in cif.args().iter().zip(avalues).enumerate() {
        let variadic_past = cif.past_fixed_args(index);
        let z = ty.size();
        let counts = if ty.is_struct() {
            classify(ty, w.fp_reg_bits)
        } else {
            LeafCounts::default()
        };

        if z <= WORD_SIZE {
            w.write_small(ty, src, counts, variadic_past);
        } else if z <= 2 * WORD_SIZE {
            if ty.is_struct() && counts.fast_path(&w.cursor, w.fp_reg_bits, z, variadic_past) {
                w.write_struct_fields(ty, src);
            } else {
                if needs_even_slot(arg_align(ty), &w.cursor, variadic_past) {
                    w.cursor.align_int_even();
                }
                w.write_int_stream(src, z);
            }
        } else if w.cursor.int_available() {
            w.write_by_reference(ty, src);
        } else {
            // Register file exhausted: the aggregate goes onto the stack
            // by value at its natural alignment.
            if needs_even_slot(arg_align(ty), &w.cursor, variadic_past) {
                w.cursor.align_int_even();
            }
            w.write_int_stream(src, z);
        }
    }

    tracing::trace!(
        int_slots = w.cursor.int_used(),
        float_slots = w.cursor.float_used(),
        "marshaled arguments"
    );
}

/// Natural alignment floored to one word, the granularity of slot space.
#[inline]
fn arg_align(ty: &Type) -> usize {
    ty.alignment().max(WORD_SIZE)
}

struct ArgWriter<'a> {
    buf: &'a mut [u8],
    cursor: SlotCursor,
    fp_reg_bits: u32,
    stack_base: usize,
    copy_off: usize,
}

impl ArgWriter<'_> {
    /// Map an integer slot index to its buffer offset. Indexes past the
    /// register file continue into the stack-overflow area.
    #[inline]
    fn int_slot_offset(&self, slot: usize) -> usize {
        if slot < NUM_ARG_REGS {
            slot * WORD_SIZE
        } else {
            self.stack_base + (slot - NUM_ARG_REGS) * WORD_SIZE
        }
    }

    fn write_int_word(&mut self, value: u64) {
        let slot = self.cursor.take_int();
        let off = self.int_slot_offset(slot);
        debug_assert!(off + WORD_SIZE <= self.copy_off || off < self.stack_base);
        self.buf[off..off + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
    }

    /// Write one float-register word. Single-precision values occupy the
    /// low four bytes; the rest of the slot stays zero.
    fn write_float_word(&mut self, bits: u64) {
        let off = FLOAT_BASE + self.cursor.take_float() * WORD_SIZE;
        self.buf[off..off + WORD_SIZE].copy_from_slice(&bits.to_le_bytes());
    }

    /// Raw byte copy across consecutive integer slots, running from the
    /// register words into the stack area when the value straddles the
    /// boundary.
    unsafe fn write_int_stream(&mut self, src: *const u8, len: usize) {
        let mut done = 0;
        while done < len {
            let slot = self.cursor.take_int();
            let off = self.int_slot_offset(slot);
            let n = (len - done).min(WORD_SIZE);
            debug_assert!(off + n <= self.copy_off || off < self.stack_base);
            self.buf[off..off + n]
                .copy_from_slice(core::slice::from_raw_parts(src.add(done), n));
            done += n;
        }
    }

    /// One-word values: promote to full word width and route to the float
    /// or integer file.
    unsafe fn write_small(
        &mut self,
        ty: &Type,
        src: *const u8,
        counts: LeafCounts,
        variadic_past: bool,
    ) {
        let mut tag = ty.tag();
        if tag == TypeTag::Pointer {
            tag = TypeTag::SInt64;
        }

        // Degrade float scalars that cannot use a float register.
        let float_ok = self.cursor.float_available() && !variadic_past;
        if tag == TypeTag::Float && !(float_ok && self.fp_reg_bits >= 32) {
            tag = TypeTag::UInt32;
        }
        if tag == TypeTag::Double && !(float_ok && self.fp_reg_bits >= 64) {
            tag = TypeTag::UInt64;
        }

        let goes_float =
            float_ok && (tag == TypeTag::Float || tag == TypeTag::Double || counts.floats > 0);

        if goes_float {
            match tag {
                TypeTag::Float => {
                    let bits = (src as *const u32).read_unaligned();
                    self.write_float_word(bits as u64);
                }
                TypeTag::Double => {
                    let bits = (src as *const u64).read_unaligned();
                    self.write_float_word(bits);
                }
                _ => {
                    // A one-word aggregate with float leaves.
                    if counts.fast_path(&self.cursor, self.fp_reg_bits, ty.size(), variadic_past) {
                        self.write_struct_fields(ty, src);
                    } else {
                        self.write_int_stream(src, ty.size());
                    }
                }
            }
        } else if tag == TypeTag::Struct {
            self.write_int_stream(src, ty.size());
        } else {
            let word = scalar_word(tag, src);
            self.write_int_word(word);
        }
    }

    /// Field-by-field placement for an aggregate on the register fast
    /// path: float leaves into float slots, integer leaves widened into
    /// integer slots, nested aggregates flattened in place.
    unsafe fn write_struct_fields(&mut self, ty: &Type, src: *const u8) {
        let mut offset = 0;
        self.write_fields_rec(ty, src, &mut offset);
    }

    unsafe fn write_fields_rec(&mut self, ty: &Type, base: *const u8, offset: &mut usize) {
        for field in ty.elements() {
            *offset = align_up(*offset, field.alignment());
            let start = *offset;
            let src = base.add(start);
            match field.tag() {
                TypeTag::Float if self.fp_reg_bits >= 32 => {
                    let bits = (src as *const u32).read_unaligned();
                    self.write_float_word(bits as u64);
                }
                TypeTag::Double if self.fp_reg_bits >= 64 => {
                    let bits = (src as *const u64).read_unaligned();
                    self.write_float_word(bits);
                }
                TypeTag::Struct => {
                    self.write_fields_rec(field, base, offset);
                }
                tag => {
                    self.write_int_word(scalar_word(tag, src));
                }
            }
            *offset = start + field.size();
        }
    }

    /// Oversized aggregate: copy the value into the high copy area and
    /// pass its address in the next integer slot.
    unsafe fn write_by_reference(&mut self, ty: &Type, src: *const u8) {
        let a = arg_align(ty);
        self.copy_off = (self.copy_off - ty.size()) & !(a - 1);
        let dst = self.copy_off;
        self.buf[dst..dst + ty.size()]
            .copy_from_slice(core::slice::from_raw_parts(src, ty.size()));
        let addr = self.buf.as_ptr().add(dst) as u64;
        self.write_int_word(addr);
    }
}

/// Read a scalar at `src` and widen it to a full argument word with the
/// sign/zero extension its tag calls for.
unsafe fn scalar_word(tag: TypeTag, src: *const u8) -> u64 {
    match tag {
        TypeTag::SInt8 => (src as *const i8).read_unaligned() as i64 as u64,
        TypeTag::UInt8 => src.read_unaligned() as u64,
        TypeTag::SInt16 => (src as *const i16).read_unaligned() as i64 as u64,
        TypeTag::UInt16 => (src as *const u16).read_unaligned() as u64,
        TypeTag::SInt32 | TypeTag::Int => (src as *const i32).read_unaligned() as i64 as u64,
        TypeTag::UInt32 | TypeTag::Float => (src as *const u32).read_unaligned() as u64,
        TypeTag::SInt64 | TypeTag::UInt64 | TypeTag::Pointer | TypeTag::Double => {
            (src as *const u64).read_unaligned()
        }
        // Void, LongDouble, and Struct never reach the scalar path.
        _ => 0,
    }
}
