//! Slot cursor tracking register-file consumption during an argument walk.

use crate::abi::NUM_ARG_REGS;

/// Positions in the integer and float argument files. The integer counter
/// keeps advancing past `NUM_ARG_REGS`; positions beyond the file index
/// into the stack overflow area, so every walk shares one coordinate
/// system for registers and stack words.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotCursor {
    int_used: usize,
    float_used: usize,
}

impl SlotCursor {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn int_used(&self) -> usize {
        self.int_used
    }

    #[inline]
    pub fn float_used(&self) -> usize {
        self.float_used
    }

    /// True while at least one integer register remains.
    #[inline]
    pub fn int_available(&self) -> bool {
        self.int_used < NUM_ARG_REGS
    }

    /// True while at least one float register remains.
    #[inline]
    pub fn float_available(&self) -> bool {
        self.float_used < NUM_ARG_REGS
    }

    /// Integer registers still free (zero once the file is exhausted).
    #[inline]
    pub fn int_free(&self) -> usize {
        NUM_ARG_REGS.saturating_sub(self.int_used)
    }

    /// Float registers still free.
    #[inline]
    pub fn float_free(&self) -> usize {
        NUM_ARG_REGS.saturating_sub(self.float_used)
    }

    /// Claim the next integer slot and return its index. Unlike the float
    /// file this may run past the register count, continuing onto stack
    /// word positions.
    #[inline]
    pub fn take_int(&mut self) -> usize {
        let slot = self.int_used;
        self.int_used += 1;
        slot
    }

    /// Claim the next float register and return its index.
    #[inline]
    pub fn take_float(&mut self) -> usize {
        debug_assert!(self.float_used < NUM_ARG_REGS);
        let slot = self.float_used;
        self.float_used += 1;
        slot
    }

    /// Advance the integer counter by `n` slots.
    #[inline]
    pub fn advance_int(&mut self, n: usize) {
        self.int_used += n;
    }

    /// Round the integer position up to an even slot. Used for values with
    /// two-word alignment that must start on an aligned register pair.
    #[inline]
    pub fn align_int_even(&mut self) {
        self.int_used += self.int_used & 1;
    }
}
