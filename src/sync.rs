//! # Critical Section
//!
//! Nestable interrupt-mask section protecting every piece of kernel
//! state. The outermost `enter()` raises the interrupt mask to the kernel
//! level (BASEPRI on Cortex-M4), which holds off SysTick and PendSV while
//! more urgent interrupts keep running; the matching outermost `exit()`
//! puts the previous mask back. Inner pairs only move the counter.
//!
//! The mask is raised *before* the counter is touched, so an interrupt can
//! never observe a half-updated nesting state.

use core::cell::Cell;

use crate::error::{fatal, KernelFault};
use crate::port::Port;

/// Nesting counter plus the mask saved by the outermost `enter()`.
pub struct CriticalSection {
    nesting: Cell<u32>,
    saved_mask: Cell<u8>,
}

// Safety: single core; the fields are only written with the kernel mask
// raised, so no interrupt that touches them can run concurrently.
unsafe impl Sync for CriticalSection {}

impl CriticalSection {
    pub const fn new() -> Self {
        Self {
            nesting: Cell::new(0),
            saved_mask: Cell::new(0),
        }
    }

    /// Enter the section, raising the mask to `level` on the outermost entry.
    #[inline]
    pub fn enter<P: Port>(&self, port: &P, level: u8) {
        let previous = port.raise_mask(level);
        let depth = self.nesting.get();
        if depth == 0 {
            self.saved_mask.set(previous);
        }
        self.nesting.set(depth + 1);
    }

    /// Leave the section; the outermost exit restores the saved mask.
    /// An exit without a matching enter is a fatal fault.
    #[inline]
    pub fn exit<P: Port>(&self, port: &P) {
        let depth = self.nesting.get();
        if depth == 0 {
            fatal(KernelFault::CriticalSectionUnderflow);
        }
        self.nesting.set(depth - 1);
        if depth == 1 {
            port.restore_mask(self.saved_mask.get());
        }
    }

    /// Current nesting depth; 0 outside any section.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.nesting.get()
    }

    /// Run `f` inside the section.
    ///
    /// # Usage
    /// ```ignore
    /// cs.with(&port, KERNEL_MASK_PRIORITY, || {
    ///     // kernel state may be touched here
    /// });
    /// ```
    #[inline]
    pub fn with<P: Port, R>(&self, port: &P, level: u8, f: impl FnOnce() -> R) -> R {
        self.enter(port, level);
        let result = f();
        self.exit(port);
        result
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}
