//! Trampoline synthesis
//!
//! Design: a trampoline is exactly six instruction words written into
//! caller-owned executable memory. It materializes its own address in t0
//! (so the entry stub can find the closure record placed alongside it)
//! and jumps to the fixed closure entry stub. Two encodings exist: a
//! short form reaching any stub below the 32-bit immediate horizon, and a
//! long form that loads a full 64-bit stub address stored in the last two
//! words of the block.


use crate::abi::Abi;

/// Instruction words per trampoline block.
pub const TRAMPOLINE_WORDS: usize = 6;

/// Trampoline block size in bytes.
pub const TRAMPOLINE_BYTES: usize = TRAMPOLINE_WORDS * 4;

/// Byte offset of the 64-bit stub address within a long-form block. The
/// entry stub and the `ld` below both hard-code this.
pub const LONG_ADDR_OFFSET: usize = 16;

/// Highest stub address the short form can encode with lui+jalr.
pub const SHORT_RANGE_LIMIT: u64 = 0x7fff_f000;

const REG_T0: u32 = 5;
const REG_T1: u32 = 6;
const REG_ZERO: u32 = 0;

#[inline]
const fn auipc(rd: u32, imm20: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | 0x17
}

#[inline]
const fn lui(rd: u32, imm20: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | 0x37
}

#[inline]
const fn jalr(rd: u32, rs1: u32, imm12: u32) -> u32 {
    (imm12 << 20) | (rs1 << 15) | (rd << 7) | 0x67
}

#[inline]
const fn ld(rd: u32, rs1: u32, imm12: u32) -> u32 {
    (imm12 << 20) | (rs1 << 15) | (0b011 << 12) | (rd << 7) | 0x03
}

#[inline]
const fn nop() -> u32 {
    0x0000_0013
}

/// Encode the six trampoline words jumping to the closure entry stub at
/// `entry`. The caller copies these into executable memory and then must
/// run [`flush_icache`] over that memory before the first call.
pub fn synthesize(entry: u64, abi: Abi) -> [u32; TRAMPOLINE_WORDS] {
    if !abi.is_rv64() || entry < SHORT_RANGE_LIMIT {
        // t0 = pc; t1 = entry (hi/lo split); jump t1
        let hi = (entry.wrapping_add(0x800) & 0xffff_f000) as u32;
        let lo = (entry & 0xfff) as u32;
        [
            auipc(REG_T0, 0),
            lui(REG_T1, hi >> 12),
            jalr(REG_ZERO, REG_T1, lo),
            nop(),
            nop(),
            nop(),
        ]
    } else {
        // t0 = pc; t1 = *(t0 + 16); jump t1. The stub address occupies
        // the last two words of the block.
        [
            auipc(REG_T0, 0),
            ld(REG_T1, REG_T0, LONG_ADDR_OFFSET as u32),
            jalr(REG_ZERO, REG_T1, 0),
            nop(),
            entry as u32,
            (entry >> 32) as u32,
        ]
    }
}

/// Synchronize the instruction cache over freshly written trampoline
/// memory. Required before executing the block on hardware with
/// non-coherent instruction caches.
///
/// # Safety
///
/// `ptr` must reference `len` bytes of memory this process owns.
#[allow(unused_variables)]
pub unsafe fn flush_icache(ptr: *const u8, len: usize) {
    #[cfg(any(target_arch = "riscv64", target_arch = "riscv32"))]
    core::arch::asm!("fence.i");
    // Elsewhere the trampoline is never executed, so there is nothing
    // to synchronize.
}
