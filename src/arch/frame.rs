//! Synthetic Cortex-M exception frame for new tasks.
//!
//! The hardware stacks R0–R3, R12, LR, PC and xPSR on exception entry;
//! PendSV saves R4–R11 below them. A fresh task gets the same 16 words
//! pre-built, so its first dispatch is an ordinary exception return.
//!
//! ```text
//! high  xPSR  (Thumb bit)
//!       PC    entry point
//!       LR    task exit trampoline
//!       R12, R3, R2, R1 = 0
//!       R0    entry argument
//!       R11 .. R4 = 0          <- saved stack pointer
//! low
//! ```

use core::ptr;

use crate::task::StackRegion;

/// Words in a complete saved context.
pub const FRAME_WORDS: usize = 16;

/// Words saved by software (R4–R11) below the hardware frame.
pub const SOFTWARE_WORDS: usize = 8;

/// Word offsets from the saved stack pointer.
pub const R0: usize = 8;
pub const R12: usize = 12;
pub const LR: usize = 13;
pub const PC: usize = 14;
pub const XPSR: usize = 15;

/// xPSR with only the Thumb state bit set.
pub const XPSR_THUMB: u32 = 0x0100_0000;

/// Write the initial frame at the (8-byte aligned) top of `stack` and
/// return the resulting saved stack pointer.
///
/// Addresses are stored as 32-bit words; the exception-return PC has its
/// Thumb bit cleared as the architecture requires.
///
/// # Safety
/// `stack` must be live, writable, and at least `FRAME_WORDS + 2` words.
pub unsafe fn build(stack: &StackRegion, entry: usize, arg: usize, exit: usize) -> *mut u32 {
    let aligned_top = stack.top() as usize & !0x07;
    let frame = (aligned_top - FRAME_WORDS * core::mem::size_of::<u32>()) as *mut u32;

    for i in 0..FRAME_WORDS {
        ptr::write(frame.add(i), 0);
    }
    ptr::write(frame.add(R0), arg as u32);
    ptr::write(frame.add(LR), exit as u32);
    ptr::write(frame.add(PC), (entry as u32) & !1);
    ptr::write(frame.add(XPSR), XPSR_THUMB);

    frame
}
