//! # Host Port
//!
//! Stand-in for the Cortex-M4 port on non-ARM targets. Nothing runs on
//! the task stacks: the pending-switch request is a flag, the interrupt
//! mask is a byte with BASEPRI semantics (0 = nothing masked, smaller
//! non-zero values mask more), and [`Kernel::dispatch_pending`] plays the
//! part of the PendSV handler so tests can step the scheduler.

use core::cell::Cell;
use core::ptr;

use crate::arch::frame;
use crate::heap::KernelHeap;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::task::{StackRegion, TaskEntry, TaskId};

pub struct HostPort {
    yield_pending: Cell<bool>,
    mask: Cell<u8>,
    started: Cell<bool>,
    tick_reload: Cell<u32>,
    yield_requests: Cell<u32>,
}

// Safety: host tests drive each kernel instance from one thread.
unsafe impl Sync for HostPort {}

impl HostPort {
    pub const fn new() -> Self {
        Self {
            yield_pending: Cell::new(false),
            mask: Cell::new(0),
            started: Cell::new(false),
            tick_reload: Cell::new(0),
            yield_requests: Cell::new(0),
        }
    }

    /// Current simulated BASEPRI.
    pub fn mask(&self) -> u8 {
        self.mask.get()
    }

    pub fn started(&self) -> bool {
        self.started.get()
    }

    /// Reload value passed to [`Port::start`].
    pub fn tick_reload(&self) -> u32 {
        self.tick_reload.get()
    }

    /// Total number of `request_yield` calls so far.
    pub fn yield_requests(&self) -> u32 {
        self.yield_requests.get()
    }
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for HostPort {
    fn start(&self, _first_sp: *mut u32, tick_reload: u32) {
        self.tick_reload.set(tick_reload);
        self.started.set(true);
    }

    unsafe fn init_stack(
        &self,
        stack: &StackRegion,
        entry: TaskEntry,
        arg: usize,
        exit: extern "C" fn(),
    ) -> *mut u32 {
        frame::build(stack, entry as usize, arg, exit as usize)
    }

    fn request_yield(&self) {
        self.yield_pending.set(true);
        self.yield_requests.set(self.yield_requests.get() + 1);
    }

    fn clear_yield(&self) {
        self.yield_pending.set(false);
    }

    fn yield_pending(&self) -> bool {
        self.yield_pending.get()
    }

    fn raise_mask(&self, level: u8) -> u8 {
        let previous = self.mask.get();
        if level != 0 && (previous == 0 || level < previous) {
            self.mask.set(level);
        }
        previous
    }

    fn restore_mask(&self, previous: u8) {
        self.mask.set(previous);
    }
}

impl<H: KernelHeap> Kernel<HostPort, H> {
    /// Perform the context switch a pending yield request asks for, the
    /// way PendSV would once the mask drops. Returns the task now running,
    /// or `None` when no switch was pending.
    pub fn dispatch_pending(&mut self) -> Option<TaskId> {
        if !self.port().yield_pending() {
            return None;
        }
        let saved = self
            .current_task()
            .map(|id| self.scheduler().task(id).stack_pointer)
            .unwrap_or(ptr::null_mut());
        self.critical(|k| k.switch_context(saved));
        self.current_task()
    }
}

// ---------------------------------------------------------------------------
// Test fixtures shared by the kernel, lock and mutex tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::HostPort;
    use crate::config::{KernelConfig, DEFAULT_STACK_WORDS, IDLE_STACK_WORDS};
    use crate::heap::StackPool;
    use crate::kernel::Kernel;
    use crate::task::{Priority, TaskId, TaskOptions};

    pub extern "C" fn noop(_: usize) {}

    pub fn leak_words(words: usize) -> &'static mut [u32] {
        Box::leak(vec![0u32; words].into_boxed_slice())
    }

    /// Initialised (not started) kernel with room for 12 heap stacks.
    pub fn kernel_with(config: KernelConfig) -> Kernel<HostPort> {
        let pool = StackPool::new(leak_words(12 * DEFAULT_STACK_WORDS), DEFAULT_STACK_WORDS);
        let mut k = Kernel::new(HostPort::new(), pool, config);
        k.init(leak_words(IDLE_STACK_WORDS));
        k
    }

    /// Initialised and started kernel; the idle task is running.
    pub fn started_kernel() -> Kernel<HostPort> {
        let mut k = kernel_with(KernelConfig::DEFAULT);
        k.start();
        k
    }

    pub fn spawn(k: &mut Kernel<HostPort>, priority: Priority) -> TaskId {
        k.create_task(noop, TaskOptions::new(priority)).unwrap()
    }

    /// Create a task and let it preempt: it must be the one running after.
    pub fn spawn_running(k: &mut Kernel<HostPort>, priority: Priority) -> TaskId {
        let id = spawn(k, priority);
        assert_eq!(k.dispatch_pending(), Some(id));
        id
    }

    pub fn ticks(k: &mut Kernel<HostPort>, n: u32) {
        for _ in 0..n {
            k.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_mask_only_tightens() {
        let port = HostPort::new();
        assert_eq!(port.raise_mask(0x40), 0);
        assert_eq!(port.mask(), 0x40);
        assert_eq!(port.raise_mask(0x80), 0x40);
        assert_eq!(port.mask(), 0x40);
        assert_eq!(port.raise_mask(0x20), 0x40);
        assert_eq!(port.mask(), 0x20);
        port.restore_mask(0);
        assert_eq!(port.mask(), 0);
    }

    #[test]
    fn yield_flag_round_trip() {
        let port = HostPort::new();
        assert!(!port.yield_pending());
        port.request_yield();
        port.request_yield();
        assert!(port.yield_pending());
        assert_eq!(port.yield_requests(), 2);
        port.clear_yield();
        assert!(!port.yield_pending());
    }
}
