//! # Task Control Block
//!
//! Defines the task record for KeelOS. Records live in a fixed arena owned
//! by the scheduler and are addressed by [`TaskId`]; list membership
//! (ready list, lock wait set, delay queue) is kept by the scheduler as
//! indices, so a record never holds pointers to its neighbours.
//!
//! Priorities are small integers: 0 is the idle level, larger is more
//! urgent. A record carries two priorities: the `base_priority` it was
//! created with, and the effective `priority` the scheduler uses, which
//! locks may raise temporarily (inheritance, aging).

use core::ptr;

use crate::config::{DEFAULT_STACK_WORDS, STACK_PAINT};

/// Scheduling priority. 0 is the idle level; larger is more urgent.
pub type Priority = u8;

/// Task entry point. The argument arrives in R0. Returning from the entry
/// function deletes the task.
pub type TaskEntry = extern "C" fn(usize);

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Handle of a task record: its index in the kernel's task arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u8);

impl TaskId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u8)
    }

    /// Arena index of this record.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task record.
///
/// "Running" is not a state of its own: the running task is the READY
/// record the context-switch path last dispatched.
///
/// ```text
///              create                  delay(n)
///   (Free) ──────────────► Ready ◄──────────────────► Delayed
///                          ▲  │  ▲      n ticks
///             release /    │  │  │
///             timeout      │  │  └──────── resume / wake / signal
///                          │  ▼                  ▲
///                        Blocked          Suspended, Hibernating
///
///   delete / restart:  any ──► PendingDelete / PendingRestart
///                            ──(idle reclaim)──► Free / Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Arena slot is unused.
    Free,
    /// In its priority's ready list.
    Ready,
    /// Waiting in a lock's wait set, possibly also on the delay queue.
    Blocked,
    /// Pure timed wait on the delay queue.
    Delayed,
    /// Parked by `suspend` until `resume`.
    Suspended,
    /// Parked until `wake` or a signal arrives.
    Hibernating,
    /// Waiting for the maintenance path to rebuild its initial frame.
    PendingRestart,
    /// Waiting for the maintenance path to release its storage.
    PendingDelete,
}

/// State a record enters right after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitialState {
    Ready,
    Suspended,
    Hibernating,
}

/// Why a parked task was made ready again. Read back by the task when it
/// resumes so a timed-out wait can be told apart from success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeStatus {
    /// Ownership of the awaited lock was handed over.
    Acquired,
    /// The bounded wait on a lock expired.
    TimedOut,
    /// A `delay` ran its full length.
    Elapsed,
    /// `resume` or `wake` was called.
    Resumed,
    /// Signal bits were posted to a hibernating task.
    Signalled,
}

// ---------------------------------------------------------------------------
// Stack storage
// ---------------------------------------------------------------------------

/// Where a task's stack memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackOrigin {
    /// Allocated from the kernel heap; released when the task is deleted.
    Heap,
    /// Supplied by the caller; the task can never be deleted.
    Caller,
}

/// Stack request in [`TaskOptions`].
pub enum StackSpec {
    /// Allocate this many words from the kernel heap.
    Heap { words: usize },
    /// Use caller-owned memory.
    Static(&'static mut [u32]),
}

/// Bounds of a task stack. Stacks grow down from `base + words`.
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    base: *mut u32,
    words: usize,
    origin: StackOrigin,
}

impl StackRegion {
    pub const EMPTY: Self = Self {
        base: ptr::null_mut(),
        words: 0,
        origin: StackOrigin::Caller,
    };

    pub const fn new(base: *mut u32, words: usize, origin: StackOrigin) -> Self {
        Self { base, words, origin }
    }

    #[inline]
    pub fn base(&self) -> *mut u32 {
        self.base
    }

    #[inline]
    pub fn words(&self) -> usize {
        self.words
    }

    #[inline]
    pub fn origin(&self) -> StackOrigin {
        self.origin
    }

    /// One past the highest word of the stack.
    #[inline]
    pub fn top(&self) -> *mut u32 {
        self.base.wrapping_add(self.words)
    }

    /// Whether a saved stack pointer lies strictly above the canary word
    /// and no higher than the top of the region.
    pub fn contains(&self, sp: *const u32) -> bool {
        let sp = sp as usize;
        sp > self.base as usize && sp <= self.top() as usize
    }

    /// View the region as a slice.
    ///
    /// # Safety
    /// The region must be live and not aliased by a running task.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u32] {
        core::slice::from_raw_parts_mut(self.base, self.words)
    }

    /// Fill the whole region with [`STACK_PAINT`].
    ///
    /// # Safety
    /// Same requirements as [`as_mut_slice`](Self::as_mut_slice).
    pub unsafe fn paint(&self) {
        self.as_mut_slice().fill(STACK_PAINT);
    }

    /// The lowest word still holds the paint pattern.
    pub fn canary_intact(&self) -> bool {
        if self.base.is_null() {
            return true;
        }
        // SAFETY: base points at the first word of a live stack region.
        unsafe { ptr::read_volatile(self.base) == STACK_PAINT }
    }

    /// Number of words at the bottom of the stack that were never written
    /// (high-water mark, measured from below).
    pub fn unused_words(&self) -> usize {
        if self.base.is_null() {
            return 0;
        }
        // SAFETY: read-only scan of a live stack region.
        let words = unsafe { core::slice::from_raw_parts(self.base, self.words) };
        words.iter().take_while(|&&w| w == STACK_PAINT).count()
    }
}

// ---------------------------------------------------------------------------
// Creation options
// ---------------------------------------------------------------------------

/// Parameters for creating a task.
///
/// ```ignore
/// let opts = TaskOptions::new(3).name("sensor").stack_words(512).arg(7);
/// kernel::create_task(sensor_task, opts)?;
/// ```
pub struct TaskOptions {
    pub(crate) name: Option<&'static str>,
    pub(crate) priority: Priority,
    pub(crate) stack: StackSpec,
    pub(crate) arg: usize,
    pub(crate) initial: InitialState,
    pub(crate) suspendable: bool,
}

impl TaskOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            name: None,
            priority,
            stack: StackSpec::Heap {
                words: DEFAULT_STACK_WORDS,
            },
            arg: 0,
            initial: InitialState::Ready,
            suspendable: false,
        }
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Heap-allocate a stack of `words` words.
    pub fn stack_words(mut self, words: usize) -> Self {
        self.stack = StackSpec::Heap { words };
        self
    }

    /// Run on caller-owned memory. Such a task cannot be deleted.
    pub fn static_stack(mut self, stack: &'static mut [u32]) -> Self {
        self.stack = StackSpec::Static(stack);
        self
    }

    /// Value passed to the entry point.
    pub fn arg(mut self, arg: usize) -> Self {
        self.arg = arg;
        self
    }

    pub fn initial_state(mut self, state: InitialState) -> Self {
        self.initial = state;
        self
    }

    /// Allow `suspend` / `resume` on this task.
    pub fn suspendable(mut self, suspendable: bool) -> Self {
        self.suspendable = suspendable;
        self
    }
}

// ---------------------------------------------------------------------------
// Runtime accounting
// ---------------------------------------------------------------------------

/// Snapshot of a task's runtime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskStats {
    /// Ticks during which this task was the running task.
    pub run_ticks: u32,
    /// Times the context-switch path selected this task.
    pub dispatches: u32,
    /// Stack size in words.
    pub stack_words: usize,
    /// Words at the bottom of the stack never touched so far.
    pub stack_unused: usize,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB): everything the kernel knows about one task.
///
/// TCBs live in a fixed array inside the scheduler; a `Free` record is an
/// unused slot. All fields are mutated only inside the kernel critical
/// section.
pub struct TaskControlBlock {
    pub id: TaskId,
    pub name: Option<&'static str>,
    pub state: TaskState,

    /// Effective priority used for scheduling.
    pub priority: Priority,

    /// Priority assigned at creation or by `set_priority`.
    pub base_priority: Priority,

    /// Saved process stack pointer. Updated on every context switch.
    pub stack_pointer: *mut u32,

    pub stack: StackRegion,
    pub entry: Option<TaskEntry>,
    pub arg: usize,

    /// `suspend` / `resume` are permitted.
    pub suspendable: bool,

    /// Set when the task is made ready after a wait; consumed by the task.
    pub wake: Option<WakeStatus>,

    /// Lock whose wait set holds this record while `Blocked`.
    pub blocked_on: Option<crate::lock::LockId>,

    /// Priority at the moment the task joined an aging wait set.
    pub aged_from: Option<Priority>,

    /// Posted signal bits not yet taken.
    pub signals: u32,

    pub run_ticks: u32,
    pub dispatches: u32,
}

// Safety: the raw pointers refer to the task's own stack region, which is
// only touched inside the kernel critical section or by the task itself.
unsafe impl Send for TaskControlBlock {}
unsafe impl Sync for TaskControlBlock {}

impl TaskControlBlock {
    /// An unused arena slot.
    pub const EMPTY: Self = Self {
        id: TaskId(0),
        name: None,
        state: TaskState::Free,
        priority: 0,
        base_priority: 0,
        stack_pointer: ptr::null_mut(),
        stack: StackRegion::EMPTY,
        entry: None,
        arg: 0,
        suspendable: false,
        wake: None,
        blocked_on: None,
        aged_from: None,
        signals: 0,
        run_ticks: 0,
        dispatches: 0,
    };

    /// Fill a free slot for a new task. The stack frame is built
    /// separately by the port.
    pub fn init(
        &mut self,
        id: TaskId,
        entry: TaskEntry,
        options: &TaskOptions,
        stack: StackRegion,
    ) {
        *self = Self::EMPTY;
        self.id = id;
        self.name = options.name;
        self.priority = options.priority;
        self.base_priority = options.priority;
        self.stack = stack;
        self.entry = Some(entry);
        self.arg = options.arg;
        self.suspendable = options.suspendable;
    }

    /// Return the record to its just-created condition, keeping identity,
    /// entry point and stack.
    pub fn reset(&mut self) {
        self.priority = self.base_priority;
        self.wake = None;
        self.blocked_on = None;
        self.aged_from = None;
        self.signals = 0;
        self.run_ticks = 0;
        self.dispatches = 0;
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == TaskState::Free
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }

    /// Deletion or restart has been requested but not carried out.
    #[inline]
    pub fn is_pending_reclaim(&self) -> bool {
        matches!(self.state, TaskState::PendingDelete | TaskState::PendingRestart)
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            run_ticks: self.run_ticks,
            dispatches: self.dispatches,
            stack_words: self.stack.words(),
            stack_unused: self.stack.unused_words(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
