//! # KeelOS
//!
//! A small preemptive real-time kernel for single-core ARM Cortex-M4
//! microcontrollers.
//!
//! ## Overview
//!
//! - **Strict priorities**: the highest-priority ready task always runs;
//!   tasks of equal priority share the CPU round robin.
//! - **Exact delays**: a task delayed for N ticks becomes ready on the
//!   Nth tick, never earlier or later.
//! - **Locks**: binary locks with a priority-ordered wait set and optional
//!   starvation aging, and mutexes with priority inheritance.
//! - **Static memory**: task records and locks live in fixed arenas; task
//!   stacks come from a fixed-block pool or from caller-owned memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   init() · create_task() · start() · delay() · acquire()│
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Locks            │  Critical Section │
//! │  scheduler.rs│   lock.rs          │  sync.rs          │
//! │  ─ ready     │   ─ wait sets      │  ─ nesting        │
//! │  ─ delays    │   ─ aging          │  ─ mask level     │
//! │  ─ reclaim   │   mutex.rs         │                   │
//! │              │   ─ inheritance    │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │     Task Model (task.rs) · Lists (list.rs) · Heap      │
//! │        TCB · TaskState · StackRegion · StackPool        │
//! ├────────────────────────────────────────────────────────┤
//! │      Port (port.rs): arch/cortex_m4.rs · arch/host.rs   │
//! │       PendSV · SysTick · BASEPRI · synthetic frame      │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! static mut STACKS: [u32; 8 * 256] = [0; 8 * 256];
//!
//! #[entry]
//! fn main() -> ! {
//!     keelos::init(unsafe { &mut *core::ptr::addr_of_mut!(STACKS) });
//!     keelos::create_task(sensor, TaskOptions::new(3).name("sensor")).unwrap();
//!     keelos::create_task(logger, TaskOptions::new(1).name("logger")).unwrap();
//!     keelos::start()
//! }
//! ```
//!
//! ## Memory Model
//!
//! - **No `alloc`**: pure `core`; the kernel is one static instance
//! - **Arena records**: `[TaskControlBlock; MAX_TASKS]`, addressed by `TaskId`
//! - **Index links**: ready lists, wait sets and the delay queue store
//!   task indices, never pointers
//! - **Critical section**: every kernel operation runs with BASEPRI raised

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

pub mod config;
pub mod error;
pub mod task;
pub mod list;
pub mod heap;
pub mod port;
pub mod sync;
pub mod scheduler;
pub mod lock;
pub mod mutex;
pub mod arch;
pub mod kernel;

#[cfg(all(target_arch = "arm", feature = "panic-halt"))]
use panic_halt as _;

pub use config::KernelConfig;
pub use error::{KernelError, KernelFault, KernelResult};
pub use kernel::{
    acquire, create_lock, create_mutex, create_task, current_task, delay, delete_lock,
    delete_task, hibernate, init, init_with_config, release, restart_task, resume,
    set_priority, signal, start, suspend, take_signals, task_stats, tick_count, wake,
    yield_now, Kernel,
};
pub use lock::{BinaryLock, Lock, NoAging, StarvationAging, Timeout};
pub use mutex::Mutex;
pub use task::{InitialState, Priority, TaskId, TaskOptions, TaskState, TaskStats, WakeStatus};
