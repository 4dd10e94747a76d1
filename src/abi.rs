//! Machine model for the RISC-V calling convention
//!
//! Design: the rest of the crate never hardcodes register counts or word
//! widths. Everything derives from the constants and `Abi` queries here,
//! so the integer/float slot math reads the same in the layout planner,
//! the marshaler, and the closure decoder.

/// Bytes per argument register (LP64 model).
pub const WORD_SIZE: usize = 8;

/// Argument registers per file: a0..a7 for integers, fa0..fa7 for floats.
pub const NUM_ARG_REGS: usize = 8;

/// Calling-convention variant, selecting the word width and the width of
/// the hardware floating-point register file.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    /// RV32, hardware floats up to 32 bits wide.
    Rv32Single = 1,
    /// RV32, hardware floats up to 64 bits wide.
    Rv32Double = 2,
    /// RV32, no hardware floating-point registers.
    Rv32SoftFloat = 3,
    /// RV64, hardware floats up to 32 bits wide.
    Rv64Single = 4,
    /// RV64, hardware floats up to 64 bits wide.
    Rv64Double = 5,
    /// RV64, no hardware floating-point registers.
    Rv64SoftFloat = 6,
}

impl Abi {
    /// Width in bits of the widest value the float register file can hold.
    /// Zero means every float travels the integer convention.
    #[inline]
    pub const fn fp_reg_bits(self) -> u32 {
        match self {
            Abi::Rv32Single | Abi::Rv64Single => 32,
            Abi::Rv32Double | Abi::Rv64Double => 64,
            Abi::Rv32SoftFloat | Abi::Rv64SoftFloat => 0,
        }
    }

    /// True when the variant carries a hardware float register file.
    #[inline]
    pub const fn has_fp_registers(self) -> bool {
        self.fp_reg_bits() != 0
    }

    /// True for the 64-bit variants.
    #[inline]
    pub const fn is_rv64(self) -> bool {
        matches!(self, Abi::Rv64Single | Abi::Rv64Double | Abi::Rv64SoftFloat)
    }
}

/// Round `value` up to a multiple of `align`. `align` must be a power of two.
#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Number of whole words needed to hold `bytes`.
#[inline]
pub(crate) const fn word_count(bytes: usize) -> usize {
    (bytes + WORD_SIZE - 1) / WORD_SIZE
}
