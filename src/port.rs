//! # Port Layer Contract
//!
//! Everything the kernel needs from the CPU, behind one trait. The kernel
//! is generic over its port so the scheduling logic is identical on the
//! target ([`CortexM4`](crate::arch::cortex_m4::CortexM4)) and on the
//! host ([`HostPort`](crate::arch::host::HostPort)), where the test-suite
//! drives it.

use crate::task::{StackRegion, TaskEntry};

pub trait Port {
    /// Enable the tick and yield interrupt sources and resume the first
    /// task from its saved stack pointer. Does not return on hardware.
    fn start(&self, first_sp: *mut u32, tick_reload: u32);

    /// Build a synthetic exception frame at the top of `stack` so the task
    /// looks as if it had been interrupted just before `entry(arg)`.
    /// Returning from `entry` lands in `exit`. Returns the initial saved
    /// stack pointer.
    ///
    /// # Safety
    /// `stack` must describe live memory that no running task uses.
    unsafe fn init_stack(
        &self,
        stack: &StackRegion,
        entry: TaskEntry,
        arg: usize,
        exit: extern "C" fn(),
    ) -> *mut u32;

    /// Raise the deferred context-switch interrupt.
    fn request_yield(&self);

    /// Withdraw a pending context-switch request.
    fn clear_yield(&self);

    /// Whether a context-switch request is pending.
    fn yield_pending(&self) -> bool;

    /// Raise the interrupt mask to at least `level`; returns the previous
    /// mask so it can be restored.
    fn raise_mask(&self, level: u8) -> u8;

    /// Restore a mask returned by [`raise_mask`](Self::raise_mask).
    fn restore_mask(&self, previous: u8);

    /// Sleep until the next interrupt. Used by the idle task.
    fn wait_for_interrupt(&self) {}
}
