//! Closure argument decoding
//!
//! Design: the trampoline and entry stub capture the eight integer and
//! eight float argument registers into save areas before any Rust runs,
//! with the caller's stack arguments contiguous after the integer area.
//! `closure_inner` replays the marshaler's decision tree over those
//! streams, rebuilding one typed value per argument and handing their
//! addresses to the registered handler. Its return value tells the entry
//! stub which return registers to load from the result.

#[cfg(test)]
mod tests;

use core::ffi::c_void;
use core::fmt;

use smallvec::SmallVec;

use crate::abi::{align_up, word_count, Abi, WORD_SIZE};
use crate::layout::{classify, needs_even_slot, CallDescriptor, SlotCursor};
use crate::trampoline::{flush_icache, synthesize, TRAMPOLINE_BYTES, TRAMPOLINE_WORDS};
use crate::types::{Type, TypeTag};

/// Handler invoked for every intercepted call: descriptor, return-value
/// storage, decoded argument addresses, user data.
pub type ClosureHandler = unsafe fn(&CallDescriptor, *mut u8, &[*mut u8], *mut c_void);

/// Closure preparation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareClosureError {
    /// Closures are only supported on the RV64 hardware-float variants.
    BadAbi(Abi),
}

impl fmt::Display for PrepareClosureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAbi(abi) => {
                write!(f, "closures require an rv64 hardware-float abi, got {abi:?}")
            }
        }
    }
}

impl std::error::Error for PrepareClosureError {}

/// A prepared closure: a call descriptor bound to a handler and its user
/// data. The executable trampoline block lives in caller-owned memory and
/// is filled in by [`Closure::install`].
#[derive(Debug)]
pub struct Closure<'a> {
    cif: &'a CallDescriptor,
    handler: ClosureHandler,
    user_data: *mut c_void,
}

impl<'a> Closure<'a> {
    /// Bind `handler` to a planned signature. Rejects ABI variants the
    /// closure entry stub does not support.
    pub fn new(
        cif: &'a CallDescriptor,
        handler: ClosureHandler,
        user_data: *mut c_void,
    ) -> Result<Self, PrepareClosureError> {
        match cif.abi() {
            Abi::Rv64Single | Abi::Rv64Double => Ok(Self { cif, handler, user_data }),
            other => Err(PrepareClosureError::BadAbi(other)),
        }
    }

    #[inline]
    pub fn cif(&self) -> &CallDescriptor {
        self.cif
    }

    /// Write the trampoline words for this closure into `code`, jumping
    /// to the closure entry stub at `entry`, and synchronize the
    /// instruction cache over the block.
    ///
    /// # Safety
    ///
    /// `code` must be the start of the block that will later be mapped
    /// executable; the entry stub locates the closure record relative to
    /// this address.
    pub unsafe fn install(&self, code: &mut [u32; TRAMPOLINE_WORDS], entry: usize) {
        *code = synthesize(entry as u64, self.cif.abi());
        flush_icache(code.as_ptr() as *const u8, TRAMPOLINE_BYTES);
        tracing::debug!(entry = format_args!("{entry:#x}"), "installed closure trampoline");
    }
}

/// Decode one intercepted call and dispatch it to the closure's handler.
///
/// `ar` points at the integer register save area, with the caller's
/// stack arguments contiguous after its eight words. `fpr` points at the
/// float register save area. Returns the descriptor's return-kind code
/// for the entry stub.
///
/// # Safety
///
/// `ar` and `fpr` must be the save areas captured by the entry stub for
/// a call matching the closure's descriptor, and `rvalue` must point at
/// storage large enough for the return type (ignored when the descriptor
/// returns through a hidden pointer, which then arrives in `ar[0]`).
pub unsafe fn closure_inner(
    closure: &Closure<'_>,
    rvalue: *mut u8,
    ar: *const u64,
    fpr: *const u64,
) -> u32 {
    let cif = closure.cif;
    let fp_reg_bits = cif.abi().fp_reg_bits();
    let nargs = cif.args().len();

    let mut cursor = SlotCursor::new();
    let mut rvalue = rvalue;
    if cif.returns_via_pointer() {
        rvalue = ar.read() as usize as *mut u8;
        cursor.take_int();
    }

    // Word scratch for scalars (stable addresses) and heap scratch for
    // aggregates rebuilt from the streams.
    let mut words: Vec<u64> = vec![0; nargs];
    let mut scratch: Vec<Box<[u8]>> = Vec::new();
    let mut avalues: SmallVec<[*mut u8; 8]> = SmallVec::with_capacity(nargs);

    for (index, ty) in cif.args().iter().enumerate() {
        let variadic_past = cif.past_fixed_args(index);
        let z = ty.size();

        match ty.tag() {
            TypeTag::Float | TypeTag::Double => {
                let need = if ty.tag() == TypeTag::Double { 64 } else { 32 };
                let use_float =
                    cursor.float_available() && fp_reg_bits >= need && !variadic_past;
                words[index] = if use_float {
                    fpr.add(cursor.take_float()).read()
                } else {
                    ar.add(cursor.take_int()).read()
                };
                avalues.push(words.as_mut_ptr().add(index) as *mut u8);
            }
            TypeTag::LongDouble => {
                if needs_even_slot(ty.alignment(), &cursor, variadic_past) {
                    cursor.align_int_even();
                }
                let mut value = vec![0u8; z].into_boxed_slice();
                read_int_stream(&mut cursor, ar, value.as_mut_ptr(), z);
                avalues.push(value.as_mut_ptr());
                scratch.push(value);
            }
            TypeTag::Struct if z <= 2 * WORD_SIZE => {
                let counts = classify(ty, fp_reg_bits);
                let mut value = vec![0u8; z].into_boxed_slice();
                if counts.fast_path(&cursor, fp_reg_bits, z, variadic_past) {
                    let mut offset = 0;
                    decode_struct_fields(
                        ty,
                        value.as_mut_ptr(),
                        &mut offset,
                        &mut cursor,
                        ar,
                        fpr,
                        fp_reg_bits,
                    );
                } else {
                    if needs_even_slot(struct_align(ty), &cursor, variadic_past) {
                        cursor.align_int_even();
                    }
                    read_int_stream(&mut cursor, ar, value.as_mut_ptr(), z);
                }
                avalues.push(value.as_mut_ptr());
                scratch.push(value);
            }
            TypeTag::Struct => {
                if cursor.int_available() {
                    // Passed by hidden reference.
                    let addr = ar.add(cursor.take_int()).read();
                    avalues.push(addr as usize as *mut u8);
                } else {
                    // By value on the stack; the stream itself is the
                    // argument storage, valid for the call's duration.
                    if needs_even_slot(struct_align(ty), &cursor, variadic_past) {
                        cursor.align_int_even();
                    }
                    avalues.push(ar.add(cursor.int_used()) as *mut u8);
                    cursor.advance_int(word_count(z));
                }
            }
            _ => {
                words[index] = ar.add(cursor.take_int()).read();
                avalues.push(words.as_mut_ptr().add(index) as *mut u8);
            }
        }
    }

    tracing::trace!(nargs, "decoded closure arguments");
    (closure.handler)(cif, rvalue, &avalues, closure.user_data);

    cif.return_kind()
}

#[inline]
fn struct_align(ty: &Type) -> usize {
    ty.alignment().max(WORD_SIZE)
}

/// Copy `len` raw bytes out of consecutive words of the integer stream.
unsafe fn read_int_stream(cursor: &mut SlotCursor, ar: *const u64, dst: *mut u8, len: usize) {
    let mut done = 0;
    while done < len {
        let slot = cursor.take_int();
        let n = (len - done).min(WORD_SIZE);
        core::ptr::copy_nonoverlapping(ar.add(slot) as *const u8, dst.add(done), n);
        done += n;
    }
}

/// Inverse of the marshaler's field-by-field placement: float leaves come
/// from the float save area, integer leaves from argument words, nested
/// aggregates flatten in place.
unsafe fn decode_struct_fields(
    ty: &Type,
    dst: *mut u8,
    offset: &mut usize,
    cursor: &mut SlotCursor,
    ar: *const u64,
    fpr: *const u64,
    fp_reg_bits: u32,
) {
    for field in ty.elements() {
        *offset = align_up(*offset, field.alignment());
        let start = *offset;
        let out = dst.add(start);
        match field.tag() {
            TypeTag::Float if fp_reg_bits >= 32 => {
                let word = fpr.add(cursor.take_float()).read();
                core::ptr::copy_nonoverlapping(&word as *const u64 as *const u8, out, 4);
            }
            TypeTag::Double if fp_reg_bits >= 64 => {
                let word = fpr.add(cursor.take_float()).read();
                core::ptr::copy_nonoverlapping(&word as *const u64 as *const u8, out, 8);
            }
            TypeTag::Struct => {
                decode_struct_fields(field, dst, offset, cursor, ar, fpr, fp_reg_bits);
            }
            _ => {
                let word = ar.add(cursor.take_int()).read();
                let n = field.size().min(WORD_SIZE);
                core::ptr::copy_nonoverlapping(&word as *const u64 as *const u8, out, n);
            }
        }
        *offset = start + field.size();
    }
}
