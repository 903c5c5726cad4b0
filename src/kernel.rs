//! # Kernel
//!
//! [`Kernel`] ties the scheduler, the lock table, the stack heap and the
//! port together and is the only way to change any of them: every method
//! runs its body inside the nestable critical section. It is generic over
//! the [`Port`] so the same code is driven by SysTick/PendSV on hardware
//! and by the test-suite on the host.
//!
//! The free functions at the bottom of this module operate on the single
//! global instance used by firmware; the blocking ones (`acquire`, `delay`,
//! suspending yourself) wait for the wake-up the kernel methods schedule.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init(heap)       ← validate config, create idle task
//!         ├─► kernel::create_task()   ← register tasks (×N)
//!         └─► kernel::start()          ← no return
//!               ├─► select first task (switch_context)
//!               ├─► configure SysTick, PendSV/SysTick priorities
//!               └─► resume first task's synthetic frame
//! ```
//!
//! ## Context-switch protocol
//!
//! ```text
//!   SysTick ─► tick() ── delays, timeouts, round robin ──┐
//!   yield / block / release / create ───────────────────┤ needs_switch?
//!                                                        ▼
//!                                              request_yield (PendSV)
//!                                                        │
//!   PendSV ─► save R4–R11 ─► switch_context(sp) ─► restore R4–R11
//! ```

use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};

use crate::arch::DefaultPort;
use crate::config::{
    ConfigError, KernelConfig, DEFAULT_STACK_WORDS, IDLE_PRIORITY, IDLE_STACK_WORDS,
    MIN_STACK_WORDS, PRIORITY_LEVELS,
};
use crate::error::{fatal, KernelError, KernelFault, KernelResult};
use crate::heap::{KernelHeap, StackPool};
use crate::lock::{AgingPolicy, BinaryLock, Lock, LockId, LockKind, LockTable, Timeout};
use crate::mutex::Mutex;
use crate::port::Port;
use crate::scheduler::Scheduler;
use crate::sync::CriticalSection;
use crate::task::{
    InitialState, Priority, StackOrigin, StackRegion, StackSpec, TaskControlBlock, TaskEntry,
    TaskId, TaskOptions, TaskState, TaskStats, WakeStatus,
};

// ---------------------------------------------------------------------------
// Kernel struct
// ---------------------------------------------------------------------------

pub struct Kernel<P: Port, H: KernelHeap = StackPool> {
    port: P,
    heap: H,
    config: KernelConfig,
    cs: CriticalSection,
    sched: Scheduler,
    locks: LockTable,
    initialized: bool,
    started: bool,
}

impl<P: Port, H: KernelHeap> Kernel<P, H> {
    pub const fn new(port: P, heap: H, config: KernelConfig) -> Self {
        Self {
            port,
            heap,
            config,
            cs: CriticalSection::new(),
            sched: Scheduler::new(),
            locks: LockTable::new(),
            initialized: false,
            started: false,
        }
    }

    // -- Accessors -----------------------------------------------------------

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    #[inline]
    pub fn heap(&self) -> &H {
        &self.heap
    }

    #[inline]
    pub fn heap_mut(&mut self) -> &mut H {
        &mut self.heap
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Replace the configuration. Only possible before [`init`](Self::init).
    pub fn set_config(&mut self, config: KernelConfig) {
        if self.initialized {
            fatal(KernelFault::AlreadyInitialized);
        }
        self.config = config;
    }

    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    #[inline]
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Nesting depth of the kernel critical section.
    #[inline]
    pub fn critical_depth(&self) -> u32 {
        self.cs.depth()
    }

    /// Run `f` with the kernel mask raised.
    pub fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.cs.enter(&self.port, self.config.kernel_mask);
        let result = f(self);
        self.cs.exit(&self.port);
        result
    }

    fn ensure_initialized(&self) {
        if !self.initialized {
            fatal(KernelFault::NotInitialized);
        }
    }

    /// Ask for a context switch if the running task is no longer the one
    /// that should run. Nothing is requested before `start`.
    fn request_switch_if_needed(&self) {
        if self.started && self.sched.needs_switch() {
            self.port.request_yield();
        }
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Validate the configuration and create the idle task on
    /// `idle_stack`. Faults on a second call or an invalid configuration.
    pub fn init(&mut self, idle_stack: &'static mut [u32]) {
        if self.initialized {
            fatal(KernelFault::AlreadyInitialized);
        }
        if let Err(e) = self.config.validate() {
            fatal(KernelFault::InvalidConfig(e));
        }
        if idle_stack.len() < MIN_STACK_WORDS {
            fatal(KernelFault::InvalidConfig(ConfigError::IdleStack));
        }

        let options = TaskOptions::new(IDLE_PRIORITY)
            .name("idle")
            .static_stack(idle_stack);
        let idle = self
            .spawn(idle_task, options)
            .unwrap_or_else(|_| fatal(KernelFault::NoReadyTask));
        self.sched.set_idle(idle);
        self.initialized = true;
        info!(
            "kernel initialised: {} Hz tick, slice {}",
            self.config.tick_hz,
            self.config.time_slice_ticks
        );
    }

    /// Select the first task and hand the CPU to it. On hardware the port
    /// never returns; on the host it records the start and comes back.
    pub fn start(&mut self) {
        self.ensure_initialized();
        let first_sp = self.critical(|k| {
            k.started = true;
            k.switch_context(ptr::null_mut())
        });
        info!("scheduler started");
        self.port.start(first_sp, self.config.systick_reload());
    }

    // -- Context switching ---------------------------------------------------

    /// The switch path shared by every preemption source.
    ///
    /// Stores `saved_sp` in the outgoing record, checks its stack, selects
    /// the head of the highest ready list and returns its saved stack
    /// pointer. Must be called with the kernel mask raised.
    pub fn switch_context(&mut self, saved_sp: *mut u32) -> *mut u32 {
        self.port.clear_yield();

        if let Some(current) = self.sched.current() {
            let task = self.sched.task_mut(current);
            if !task.is_free() {
                task.stack_pointer = saved_sp;
                if self.config.check_stack_overflow
                    && !(task.stack.canary_intact() && task.stack.contains(saved_sp))
                {
                    fatal(KernelFault::StackOverflow(current));
                }
            }
        }

        let next = self
            .sched
            .peek_next()
            .unwrap_or_else(|| fatal(KernelFault::NoReadyTask));
        self.sched.dispatch(next, self.config.time_slice_ticks);
        trace!("switch to task {}", next.index());
        self.sched.task(next).stack_pointer
    }

    /// Timer interrupt body: count the tick, expire delays and bounded
    /// waits, run the round-robin quantum, and request a switch if the
    /// ready queue now has a different head.
    pub fn tick(&mut self) {
        self.critical(|k| {
            k.sched.count_tick();
            k.sched.advance_delays();
            while let Some(id) = k.sched.pop_expired() {
                match k.sched.task(id).state {
                    TaskState::Delayed => {
                        k.sched.task_mut(id).wake = Some(WakeStatus::Elapsed);
                        k.sched.make_ready(id);
                    }
                    TaskState::Blocked => k.locks.time_out(&mut k.sched, id),
                    _ => {}
                }
            }
            k.sched.consume_slice(k.config.time_slice_ticks);
            k.request_switch_if_needed();
        });
    }

    /// Give up the rest of the quantum to the next task of equal priority.
    pub fn yield_now(&mut self) {
        self.critical(|k| {
            k.sched.rotate_current();
            k.sched.reset_slice(k.config.time_slice_ticks);
            k.request_switch_if_needed();
        });
    }

    // -- Task management -----------------------------------------------------

    /// Create a task. It joins the tail of its priority list, or starts
    /// suspended / hibernating if the options say so. A task that outranks
    /// the running one is switched to as soon as the mask drops.
    pub fn create_task(&mut self, entry: TaskEntry, options: TaskOptions) -> KernelResult<TaskId> {
        self.ensure_initialized();
        self.spawn(entry, options)
    }

    fn spawn(&mut self, entry: TaskEntry, mut options: TaskOptions) -> KernelResult<TaskId> {
        validate!((options.priority as usize) < PRIORITY_LEVELS);
        let stack_words = match &options.stack {
            StackSpec::Heap { words } => *words,
            StackSpec::Static(mem) => mem.len(),
        };
        // Too small for the frame is never allowed, checked build or not.
        if stack_words < MIN_STACK_WORDS {
            return Err(KernelError::InvalidArgument);
        }

        self.critical(|k| {
            let id = k.sched.free_slot().ok_or(KernelError::NoFreeSlot)?;
            let spec = core::mem::replace(&mut options.stack, StackSpec::Heap { words: 0 });
            let region = match spec {
                StackSpec::Heap { words } => {
                    let block = k.heap.alloc(words).ok_or(KernelError::NoMemory)?;
                    StackRegion::new(block.as_ptr(), words, StackOrigin::Heap)
                }
                StackSpec::Static(mem) => {
                    StackRegion::new(mem.as_mut_ptr(), mem.len(), StackOrigin::Caller)
                }
            };

            // SAFETY: the region was just handed to this record alone.
            unsafe { region.paint() };
            let task = k.sched.task_mut(id);
            task.init(id, entry, &options, region);
            // SAFETY: as above.
            task.stack_pointer = unsafe { k.port.init_stack(&region, entry, options.arg, task_exit) };

            match options.initial {
                InitialState::Ready => k.sched.make_ready(id),
                InitialState::Suspended => k.sched.task_mut(id).state = TaskState::Suspended,
                InitialState::Hibernating => k.sched.task_mut(id).state = TaskState::Hibernating,
            }
            debug!(
                "task {} created at priority {}",
                id.index(),
                options.priority
            );
            k.request_switch_if_needed();
            Ok(id)
        })
    }

    /// `id` is a live task other than idle.
    fn check_target(&self, id: TaskId) -> KernelResult<()> {
        if !self.sched.is_live(id) || self.sched.is_idle(id) {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }

    /// The running task, provided it is allowed to wait.
    fn waiting_caller(&self) -> KernelResult<TaskId> {
        let id = self.sched.current().ok_or(KernelError::InvalidState)?;
        if self.sched.is_idle(id) || !self.sched.task(id).is_ready() {
            return Err(KernelError::InvalidState);
        }
        Ok(id)
    }

    /// Take a record out of whichever queue its state puts it in.
    fn detach(&mut self, id: TaskId) {
        match self.sched.task(id).state {
            TaskState::Ready => self.sched.remove_ready(id),
            TaskState::Blocked => self.locks.withdraw(&mut self.sched, id),
            TaskState::Delayed => self.sched.delay_remove(id),
            _ => {}
        }
    }

    /// Request deletion. The record is flagged and queued; its stack is
    /// returned to the heap by [`reclaim`](Self::reclaim).
    pub fn delete_task(&mut self, id: TaskId) -> KernelResult<()> {
        self.retire(id, TaskState::PendingDelete)
    }

    /// Request a restart from the entry point with a fresh frame.
    pub fn restart_task(&mut self, id: TaskId) -> KernelResult<()> {
        self.retire(id, TaskState::PendingRestart)
    }

    fn retire(&mut self, id: TaskId, pending: TaskState) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| {
            k.check_target(id)?;
            let task = k.sched.task(id);
            if task.is_pending_reclaim() {
                return Err(KernelError::InvalidState);
            }
            if pending == TaskState::PendingDelete && task.stack.origin() == StackOrigin::Caller {
                return Err(KernelError::NotInHeap);
            }
            if k.locks.owns_any(id) {
                return Err(KernelError::InUse);
            }

            k.detach(id);
            k.sched.task_mut(id).state = pending;
            k.sched.queue_reclaim(id);
            if k.config.reclaim_immediately && k.sched.current() != Some(id) {
                k.reclaim_one(id);
            }
            k.request_switch_if_needed();
            Ok(())
        })
    }

    /// Carry out pending deletions and restarts, except for the running
    /// task. Called by the idle task; returns how many records were done.
    pub fn reclaim(&mut self) -> usize {
        self.critical(|k| {
            let mut done = 0;
            let mut cursor = k.sched.next_reclaim(None);
            while let Some(id) = cursor {
                cursor = k.sched.next_reclaim(Some(id));
                if k.sched.current() != Some(id) {
                    k.reclaim_one(id);
                    done += 1;
                }
            }
            k.request_switch_if_needed();
            done
        })
    }

    fn reclaim_one(&mut self, id: TaskId) {
        self.sched.dequeue_reclaim(id);
        let stack = self.sched.task(id).stack;
        match self.sched.task(id).state {
            TaskState::PendingDelete => {
                if stack.origin() == StackOrigin::Heap {
                    if let Some(block) = NonNull::new(stack.base()) {
                        if let Err(e) = self.heap.free(block) {
                            warn!("task {} stack not returned: {}", id.index(), e);
                        }
                    }
                }
                *self.sched.task_mut(id) = TaskControlBlock::EMPTY;
                debug!("task {} deleted", id.index());
            }
            TaskState::PendingRestart => {
                let task = self.sched.task_mut(id);
                task.reset();
                // SAFETY: the record is not running and owns its stack.
                unsafe { stack.paint() };
                if let Some(entry) = task.entry {
                    // SAFETY: as above.
                    task.stack_pointer =
                        unsafe { self.port.init_stack(&stack, entry, task.arg, task_exit) };
                }
                self.sched.make_ready(id);
                debug!("task {} restarted", id.index());
            }
            _ => {}
        }
    }

    /// Park a suspendable task until [`resume`](Self::resume).
    pub fn suspend(&mut self, id: TaskId) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| {
            k.check_target(id)?;
            let task = k.sched.task(id);
            if !task.suspendable {
                return Err(KernelError::InvalidState);
            }
            match task.state {
                TaskState::Ready => k.sched.remove_ready(id),
                TaskState::Delayed => k.sched.delay_remove(id),
                _ => return Err(KernelError::InvalidState),
            }
            let task = k.sched.task_mut(id);
            task.state = TaskState::Suspended;
            task.wake = None;
            k.request_switch_if_needed();
            Ok(())
        })
    }

    pub fn resume(&mut self, id: TaskId) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| {
            k.check_target(id)?;
            if k.sched.task(id).state != TaskState::Suspended {
                return Err(KernelError::InvalidState);
            }
            k.sched.task_mut(id).wake = Some(WakeStatus::Resumed);
            k.sched.make_ready(id);
            k.request_switch_if_needed();
            Ok(())
        })
    }

    /// Park a ready task until [`wake`](Self::wake) or a signal. If signals
    /// are already pending the task stays ready and sees `Signalled`.
    pub fn hibernate(&mut self, id: TaskId) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| {
            k.check_target(id)?;
            let task = k.sched.task(id);
            if task.state != TaskState::Ready {
                return Err(KernelError::InvalidState);
            }
            if task.signals != 0 {
                k.sched.task_mut(id).wake = Some(WakeStatus::Signalled);
                return Ok(());
            }
            k.sched.remove_ready(id);
            let task = k.sched.task_mut(id);
            task.state = TaskState::Hibernating;
            task.wake = None;
            k.request_switch_if_needed();
            Ok(())
        })
    }

    pub fn wake(&mut self, id: TaskId) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| {
            k.check_target(id)?;
            if k.sched.task(id).state != TaskState::Hibernating {
                return Err(KernelError::InvalidState);
            }
            k.sched.task_mut(id).wake = Some(WakeStatus::Resumed);
            k.sched.make_ready(id);
            k.request_switch_if_needed();
            Ok(())
        })
    }

    /// Post signal bits to a task, waking it if it hibernates.
    pub fn signal(&mut self, id: TaskId, bits: u32) -> KernelResult<()> {
        validate!(bits != 0);
        self.ensure_initialized();
        self.critical(|k| {
            k.check_target(id)?;
            let task = k.sched.task_mut(id);
            task.signals |= bits;
            if task.state == TaskState::Hibernating {
                task.wake = Some(WakeStatus::Signalled);
                k.sched.make_ready(id);
                k.request_switch_if_needed();
            }
            Ok(())
        })
    }

    /// Consume the running task's posted signals selected by `mask`.
    pub fn take_signals(&mut self, mask: u32) -> u32 {
        self.critical(|k| match k.sched.current() {
            Some(id) => {
                let task = k.sched.task_mut(id);
                let taken = task.signals & mask;
                task.signals &= !mask;
                taken
            }
            None => 0,
        })
    }

    /// Change a task's base priority. An active inheritance boost stays in
    /// force until the mutexes behind it are released.
    pub fn set_priority(&mut self, id: TaskId, priority: Priority) -> KernelResult<()> {
        validate!((priority as usize) < PRIORITY_LEVELS);
        self.ensure_initialized();
        self.critical(|k| {
            k.check_target(id)?;
            if k.sched.task(id).is_pending_reclaim() {
                return Err(KernelError::InvalidState);
            }
            let old = k.sched.task(id).priority;
            let task = k.sched.task_mut(id);
            task.base_priority = priority;
            if task.aged_from.is_some() {
                task.aged_from = Some(priority);
            }
            k.locks.rebase(id, priority);
            let target = priority.max(k.locks.inherited_ceiling(&k.sched, id, None));
            k.locks.set_effective(&mut k.sched, id, target);

            // A waiter's new priority may change what its lock's owner owes.
            let task = k.sched.task(id);
            if let (TaskState::Blocked, Some(lock)) = (task.state, task.blocked_on) {
                let index = lock.index();
                if k.locks.slots[index].is_mutex() {
                    if target > old {
                        k.locks.inherit(&mut k.sched, index, target);
                    } else if let Some(owner) = k.locks.slots[index].owner {
                        k.locks.relax(&mut k.sched, owner);
                    }
                }
            }
            k.request_switch_if_needed();
            Ok(())
        })
    }

    /// Put the running task to sleep for exactly `ticks` ticks. `delay(0)`
    /// is a plain yield.
    pub fn delay(&mut self, ticks: u32) -> KernelResult<()> {
        self.ensure_initialized();
        if ticks == 0 {
            self.yield_now();
            return Ok(());
        }
        self.critical(|k| {
            let id = k.waiting_caller()?;
            k.sched.remove_ready(id);
            let task = k.sched.task_mut(id);
            task.state = TaskState::Delayed;
            task.wake = None;
            k.sched.delay_insert(id, ticks);
            k.request_switch_if_needed();
            Ok(())
        })
    }

    // -- Queries -------------------------------------------------------------

    #[inline]
    pub fn current_task(&self) -> Option<TaskId> {
        self.sched.current()
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.sched.tick_count()
    }

    pub fn task_state(&self, id: TaskId) -> KernelResult<TaskState> {
        if !self.sched.is_live(id) {
            return Err(KernelError::InvalidArgument);
        }
        Ok(self.sched.task(id).state)
    }

    pub fn task_stats(&self, id: TaskId) -> KernelResult<TaskStats> {
        if !self.sched.is_live(id) {
            return Err(KernelError::InvalidArgument);
        }
        Ok(self.sched.task(id).stats())
    }

    /// Consume the reason the running task was last made ready.
    pub fn take_wake_status(&mut self) -> Option<WakeStatus> {
        self.critical(|k| {
            let id = k.sched.current()?;
            k.sched.task_mut(id).wake.take()
        })
    }

    // -- Locks ---------------------------------------------------------------

    pub fn create_lock<A: AgingPolicy>(&mut self, initially_owned: bool) -> KernelResult<BinaryLock<A>> {
        let id = self.create_slot(LockKind::Binary { aging: A::ENABLED }, initially_owned)?;
        Ok(BinaryLock::from_id(id))
    }

    pub fn create_mutex(&mut self, initially_owned: bool) -> KernelResult<Mutex> {
        let id = self.create_slot(LockKind::Mutex, initially_owned)?;
        Ok(Mutex::from_id(id))
    }

    fn create_slot(&mut self, kind: LockKind, initially_owned: bool) -> KernelResult<LockId> {
        self.ensure_initialized();
        self.critical(|k| {
            let owner = if initially_owned {
                Some(k.sched.current().ok_or(KernelError::InvalidState)?)
            } else {
                None
            };
            k.locks.create(kind, owner)
        })
    }

    /// Acquire on behalf of the running task. `WouldBlock` means the task
    /// has been parked; [`take_wake_status`](Self::take_wake_status) tells,
    /// once it runs again, whether it got the lock or timed out.
    pub fn acquire<L: Lock>(&mut self, lock: &L, timeout: Timeout) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| {
            let who = k.sched.current().ok_or(KernelError::InvalidState)?;
            // The idle task never owns or waits for a lock.
            if k.sched.is_idle(who) {
                return Err(KernelError::InvalidState);
            }
            let result = k.locks.acquire(&mut k.sched, lock.id(), who, timeout);
            k.request_switch_if_needed();
            result
        })
    }

    pub fn release<L: Lock>(&mut self, lock: &L) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| {
            let who = k.sched.current().ok_or(KernelError::InvalidState)?;
            k.locks.release(&mut k.sched, lock.id(), who)?;
            k.request_switch_if_needed();
            Ok(())
        })
    }

    pub fn delete_lock<L: Lock>(&mut self, lock: &L) -> KernelResult<()> {
        self.ensure_initialized();
        self.critical(|k| k.locks.delete(lock.id()))
    }

    pub fn lock_owner<L: Lock>(&self, lock: &L) -> KernelResult<Option<TaskId>> {
        self.locks.owner(lock.id())
    }

    pub fn lock_waiters<L: Lock>(&self, lock: &L) -> KernelResult<usize> {
        self.locks.waiter_count(lock.id())
    }
}

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

struct GlobalKernel(UnsafeCell<Kernel<DefaultPort>>);

// Safety: single core, and every mutation goes through the kernel's own
// critical section.
unsafe impl Sync for GlobalKernel {}

static KERNEL: GlobalKernel = GlobalKernel(UnsafeCell::new(Kernel::new(
    DefaultPort::new(),
    StackPool::empty(),
    KernelConfig::DEFAULT,
)));

static mut IDLE_STACK: [u32; IDLE_STACK_WORDS] = [0; IDLE_STACK_WORDS];

/// Run `f` on the global kernel; faults if `init` has not run.
fn with_kernel<R>(f: impl FnOnce(&mut Kernel<DefaultPort>) -> R) -> R {
    // SAFETY: see `GlobalKernel`.
    let k = unsafe { &mut *KERNEL.0.get() };
    k.ensure_initialized();
    f(k)
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialise the kernel with the default configuration. Task stacks
/// requested by size are carved from `stack_heap` in blocks of
/// `DEFAULT_STACK_WORDS`.
///
/// Must be called exactly once, before any other kernel function.
pub fn init(stack_heap: &'static mut [u32]) {
    init_with_config(KernelConfig::DEFAULT, stack_heap);
}

pub fn init_with_config(config: KernelConfig, stack_heap: &'static mut [u32]) {
    // SAFETY: see `GlobalKernel`; nothing else runs before init.
    let k = unsafe { &mut *KERNEL.0.get() };
    if k.is_initialized() {
        fatal(KernelFault::AlreadyInitialized);
    }
    k.set_config(config);
    k.heap_mut().attach(stack_heap, DEFAULT_STACK_WORDS);
    // SAFETY: handed out once, here.
    let idle_stack = unsafe { &mut *ptr::addr_of_mut!(IDLE_STACK) };
    k.init(idle_stack);
}

/// Start scheduling. **Does not return.**
pub fn start() -> ! {
    with_kernel(|k| k.start());
    loop {
        with_kernel(|k| k.port().wait_for_interrupt());
    }
}

/// Create a new task.
///
/// # Example
/// ```ignore
/// extern "C" fn blink(led: usize) { /* ... */ }
/// kernel::create_task(blink, TaskOptions::new(2).name("blink").arg(13))?;
/// ```
pub fn create_task(entry: TaskEntry, options: TaskOptions) -> KernelResult<TaskId> {
    with_kernel(|k| k.create_task(entry, options))
}

pub fn delete_task(id: TaskId) -> KernelResult<()> {
    with_kernel(|k| k.delete_task(id))
}

pub fn restart_task(id: TaskId) -> KernelResult<()> {
    with_kernel(|k| k.restart_task(id))
}

/// Suspend a task. Suspending yourself returns once resumed.
pub fn suspend(id: TaskId) -> KernelResult<()> {
    with_kernel(|k| k.suspend(id))?;
    if current_task() == Some(id) {
        wait_for_wake()?;
    }
    Ok(())
}

pub fn resume(id: TaskId) -> KernelResult<()> {
    with_kernel(|k| k.resume(id))
}

/// Hibernate a task. Hibernating yourself returns once woken or signalled.
pub fn hibernate(id: TaskId) -> KernelResult<()> {
    with_kernel(|k| k.hibernate(id))?;
    if current_task() == Some(id) {
        wait_for_wake()?;
    }
    Ok(())
}

pub fn wake(id: TaskId) -> KernelResult<()> {
    with_kernel(|k| k.wake(id))
}

pub fn signal(id: TaskId, bits: u32) -> KernelResult<()> {
    with_kernel(|k| k.signal(id, bits))
}

pub fn take_signals(mask: u32) -> u32 {
    with_kernel(|k| k.take_signals(mask))
}

pub fn set_priority(id: TaskId, priority: Priority) -> KernelResult<()> {
    with_kernel(|k| k.set_priority(id, priority))
}

/// Sleep for exactly `ticks` ticks.
pub fn delay(ticks: u32) -> KernelResult<()> {
    with_kernel(|k| k.delay(ticks))?;
    if ticks > 0 {
        wait_for_wake()?;
    }
    Ok(())
}

pub fn yield_now() {
    with_kernel(|k| k.yield_now());
}

pub fn current_task() -> Option<TaskId> {
    with_kernel(|k| k.current_task())
}

pub fn tick_count() -> u64 {
    with_kernel(|k| k.tick_count())
}

pub fn task_stats(id: TaskId) -> KernelResult<TaskStats> {
    with_kernel(|k| k.task_stats(id))
}

pub fn create_lock<A: AgingPolicy>(initially_owned: bool) -> KernelResult<BinaryLock<A>> {
    with_kernel(|k| k.create_lock(initially_owned))
}

pub fn create_mutex(initially_owned: bool) -> KernelResult<Mutex> {
    with_kernel(|k| k.create_mutex(initially_owned))
}

/// Acquire a lock, waiting as `timeout` allows.
pub fn acquire<L: Lock>(lock: &L, timeout: Timeout) -> KernelResult<()> {
    match with_kernel(|k| k.acquire(lock, timeout)) {
        Err(KernelError::WouldBlock) => wait_for_wake(),
        other => other,
    }
}

pub fn release<L: Lock>(lock: &L) -> KernelResult<()> {
    with_kernel(|k| k.release(lock))
}

pub fn delete_lock<L: Lock>(lock: &L) -> KernelResult<()> {
    with_kernel(|k| k.delete_lock(lock))
}

/// Spin on the yield request until the kernel records why this task was
/// made ready again. Normally the first check already finds it, because
/// the switch away happened as the critical section was left.
fn wait_for_wake() -> KernelResult<()> {
    loop {
        match with_kernel(|k| k.take_wake_status()) {
            Some(WakeStatus::TimedOut) => return Err(KernelError::Timeout),
            Some(_) => return Ok(()),
            None => with_kernel(|k| k.port().request_yield()),
        }
    }
}

// ---------------------------------------------------------------------------
// Interrupt entry points and built-in tasks
// ---------------------------------------------------------------------------

/// Body of the SysTick handler.
pub fn on_tick() {
    with_kernel(|k| k.tick());
}

/// Called by the PendSV handler with the outgoing task's stack pointer
/// (R4–R11 already pushed); returns the incoming one.
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn keelos_switch_context(saved_sp: *mut u32) -> *mut u32 {
    with_kernel(|k| k.critical(|k| k.switch_context(saved_sp)))
}

/// Reclaims retired records, then sleeps until the next interrupt.
extern "C" fn idle_task(_: usize) {
    loop {
        with_kernel(|k| {
            k.reclaim();
            k.port().wait_for_interrupt();
        });
    }
}

/// Return address of every task entry point: a task that returns is
/// deleted. One that cannot be (caller-supplied stack, locks still held)
/// hibernates for good instead.
extern "C" fn task_exit() {
    let Some(me) = current_task() else {
        fatal(KernelFault::NotInitialized);
    };
    if let Err(e) = delete_task(me) {
        warn!("task {} returned and cannot be deleted: {}", me.index(), e);
    }
    loop {
        take_signals(u32::MAX);
        if hibernate(me).is_err() {
            // Idle in place rather than spin at this task's priority.
            with_kernel(|k| k.port().wait_for_interrupt());
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::testing::{
        kernel_with, leak_words, noop, spawn, spawn_running, started_kernel, ticks,
    };
    use crate::arch::host::HostPort;
    use crate::config::MAX_TASKS;

    #[test]
    fn idle_runs_when_nothing_else_is_ready() {
        let mut k = started_kernel();
        let idle = k.scheduler().idle().unwrap();
        assert_eq!(k.current_task(), Some(idle));
        assert_eq!(k.scheduler().task(idle).name, Some("idle"));
        assert!(k.port().started());
        assert_eq!(k.port().tick_reload(), KernelConfig::DEFAULT.systick_reload());
        assert_eq!(k.critical_depth(), 0);
    }

    #[test]
    fn tasks_created_before_start_run_by_priority() {
        let mut k = kernel_with(KernelConfig::DEFAULT);
        let _low = spawn(&mut k, 1);
        let high = spawn(&mut k, 4);
        assert!(!k.port().yield_pending());
        k.start();
        assert_eq!(k.current_task(), Some(high));
    }

    #[test]
    fn higher_priority_creation_preempts() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 2);
        let b = spawn(&mut k, 5);
        assert!(k.port().yield_pending());
        assert_eq!(k.dispatch_pending(), Some(b));
        assert_eq!(k.task_state(a), Ok(TaskState::Ready));
    }

    #[test]
    fn lower_priority_creation_does_not_preempt() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 5);
        let b = spawn(&mut k, 2);
        assert!(!k.port().yield_pending());
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.task_state(b), Ok(TaskState::Ready));
    }

    #[test]
    fn equal_priorities_share_the_cpu_round_robin() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 2);
        let b = spawn(&mut k, 2);
        let c = spawn(&mut k, 2);

        let mut order = Vec::new();
        for _ in 0..9 {
            k.tick();
            order.push(k.dispatch_pending().unwrap());
        }
        assert_eq!(order, [b, c, a, b, c, a, b, c, a]);
        for id in [a, b, c] {
            assert_eq!(k.task_stats(id).unwrap().run_ticks, 3);
        }
    }

    #[test]
    fn longer_time_slice_keeps_the_task_running() {
        let config = KernelConfig {
            time_slice_ticks: 3,
            ..KernelConfig::DEFAULT
        };
        let mut k = kernel_with(config);
        k.start();
        let a = spawn_running(&mut k, 2);
        let b = spawn(&mut k, 2);
        ticks(&mut k, 2);
        assert_eq!(k.dispatch_pending(), None);
        k.tick();
        assert_eq!(k.dispatch_pending(), Some(b));
        ticks(&mut k, 3);
        assert_eq!(k.dispatch_pending(), Some(a));
    }

    #[test]
    fn delay_wakes_after_exactly_n_ticks() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 3);
        k.delay(5).unwrap();
        assert_eq!(k.task_state(a), Ok(TaskState::Delayed));
        assert_eq!(k.dispatch_pending(), k.scheduler().idle());

        ticks(&mut k, 4);
        assert_eq!(k.task_state(a), Ok(TaskState::Delayed));
        assert_eq!(k.dispatch_pending(), None);
        k.tick();
        assert_eq!(k.task_state(a), Ok(TaskState::Ready));
        assert_eq!(k.dispatch_pending(), Some(a));
        assert_eq!(k.take_wake_status(), Some(WakeStatus::Elapsed));
        assert_eq!(k.tick_count(), 5);
    }

    #[test]
    fn delay_zero_is_a_yield() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 3);
        let b = spawn(&mut k, 3);
        k.delay(0).unwrap();
        assert_eq!(k.task_state(a), Ok(TaskState::Ready));
        assert_eq!(k.dispatch_pending(), Some(b));
    }

    #[test]
    fn idle_cannot_wait() {
        let mut k = started_kernel();
        assert_eq!(k.delay(3), Err(KernelError::InvalidState));
        let lock: BinaryLock = k.create_lock(false).unwrap();
        assert_eq!(k.acquire(&lock, Timeout::Immediate), Err(KernelError::InvalidState));
        let idle = k.scheduler().idle().unwrap();
        assert_eq!(k.delete_task(idle), Err(KernelError::InvalidArgument));
        assert_eq!(k.hibernate(idle), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn suspend_and_resume() {
        let mut k = started_kernel();
        let s = k
            .create_task(noop, TaskOptions::new(4).suspendable(true))
            .unwrap();
        assert_eq!(k.dispatch_pending(), Some(s));

        k.suspend(s).unwrap();
        assert_eq!(k.task_state(s), Ok(TaskState::Suspended));
        assert_eq!(k.dispatch_pending(), k.scheduler().idle());
        assert_eq!(k.suspend(s), Err(KernelError::InvalidState));

        k.resume(s).unwrap();
        assert_eq!(k.dispatch_pending(), Some(s));
        assert_eq!(k.take_wake_status(), Some(WakeStatus::Resumed));
        assert_eq!(k.resume(s), Err(KernelError::InvalidState));

        let fixed = spawn(&mut k, 1);
        assert_eq!(k.suspend(fixed), Err(KernelError::InvalidState));
    }

    #[test]
    fn suspending_a_delayed_task_cancels_the_delay() {
        let mut k = started_kernel();
        let s = k
            .create_task(noop, TaskOptions::new(4).suspendable(true))
            .unwrap();
        k.dispatch_pending();
        k.delay(3).unwrap();
        k.suspend(s).unwrap();
        ticks(&mut k, 5);
        assert_eq!(k.task_state(s), Ok(TaskState::Suspended));
        k.scheduler().audit();
    }

    #[test]
    fn initial_states() {
        let mut k = started_kernel();
        let s = k
            .create_task(
                noop,
                TaskOptions::new(6)
                    .suspendable(true)
                    .initial_state(InitialState::Suspended),
            )
            .unwrap();
        let h = k
            .create_task(noop, TaskOptions::new(6).initial_state(InitialState::Hibernating))
            .unwrap();
        assert!(!k.port().yield_pending());
        assert_eq!(k.task_state(s), Ok(TaskState::Suspended));
        assert_eq!(k.task_state(h), Ok(TaskState::Hibernating));

        k.wake(h).unwrap();
        assert_eq!(k.dispatch_pending(), Some(h));
        k.scheduler().audit();
    }

    #[test]
    fn hibernate_wake_and_signals() {
        let mut k = started_kernel();
        let h = spawn_running(&mut k, 3);
        k.hibernate(h).unwrap();
        assert_eq!(k.task_state(h), Ok(TaskState::Hibernating));
        assert_eq!(k.dispatch_pending(), k.scheduler().idle());

        k.signal(h, 0b0110).unwrap();
        assert_eq!(k.dispatch_pending(), Some(h));
        assert_eq!(k.take_wake_status(), Some(WakeStatus::Signalled));
        assert_eq!(k.take_signals(0b0010), 0b0010);
        assert_eq!(k.take_signals(u32::MAX), 0b0100);
        assert_eq!(k.take_signals(u32::MAX), 0);

        // Signals already pending: hibernate returns at once.
        k.signal(h, 1).unwrap();
        k.hibernate(h).unwrap();
        assert_eq!(k.task_state(h), Ok(TaskState::Ready));
        assert_eq!(k.take_wake_status(), Some(WakeStatus::Signalled));

        assert_eq!(k.wake(h), Err(KernelError::InvalidState));
    }

    #[test]
    fn delete_is_deferred_until_reclaim() {
        let mut k = started_kernel();
        let used_before = k.heap().used_words();
        let a = spawn_running(&mut k, 3);
        assert_eq!(k.heap().used_words(), used_before + DEFAULT_STACK_WORDS);

        // A task deleting itself keeps running until the switch.
        k.delete_task(a).unwrap();
        assert_eq!(k.task_state(a), Ok(TaskState::PendingDelete));
        assert_eq!(k.reclaim(), 0);
        assert_eq!(k.delete_task(a), Err(KernelError::InvalidState));

        assert_eq!(k.dispatch_pending(), k.scheduler().idle());
        assert_eq!(k.reclaim(), 1);
        assert_eq!(k.task_state(a), Err(KernelError::InvalidArgument));
        assert_eq!(k.heap().used_words(), used_before);
        k.scheduler().audit();
    }

    #[test]
    fn deleting_another_task_detaches_it() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, 2);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        let waiter = spawn_running(&mut k, 4);
        k.acquire(&lock, Timeout::Ticks(10)).unwrap_err();
        assert_eq!(k.dispatch_pending(), Some(owner));

        k.delete_task(waiter).unwrap();
        assert_eq!(k.lock_waiters(&lock), Ok(0));
        assert!(!k.scheduler().is_delay_queued(waiter));
        k.scheduler().audit();

        k.release(&lock).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(None));
    }

    #[test]
    fn delete_rules() {
        let mut k = started_kernel();
        let fixed = k
            .create_task(noop, TaskOptions::new(1).static_stack(leak_words(64)))
            .unwrap();
        assert_eq!(k.delete_task(fixed), Err(KernelError::NotInHeap));

        let lock: BinaryLock = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, 3);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        assert_eq!(k.delete_task(owner), Err(KernelError::InUse));
        assert_eq!(k.restart_task(owner), Err(KernelError::InUse));
        k.release(&lock).unwrap();
        assert_eq!(k.delete_task(owner), Ok(()));
    }

    #[test]
    fn immediate_reclaim_for_other_tasks() {
        let config = KernelConfig {
            reclaim_immediately: true,
            ..KernelConfig::DEFAULT
        };
        let mut k = kernel_with(config);
        k.start();
        let used_before = k.heap().used_words();
        let other = spawn(&mut k, 1);
        k.delete_task(other).unwrap();
        assert_eq!(k.task_state(other), Err(KernelError::InvalidArgument));
        assert_eq!(k.heap().used_words(), used_before);

        // The caller itself still waits for the idle task.
        let me = spawn_running(&mut k, 2);
        k.delete_task(me).unwrap();
        assert_eq!(k.task_state(me), Ok(TaskState::PendingDelete));
    }

    #[test]
    fn restart_rebuilds_the_frame() {
        let mut k = started_kernel();
        let a = k
            .create_task(noop, TaskOptions::new(3).arg(77))
            .unwrap();
        assert_eq!(k.dispatch_pending(), Some(a));
        let initial_sp = k.scheduler().task(a).stack_pointer;
        k.delay(4).unwrap();
        k.dispatch_pending();

        k.restart_task(a).unwrap();
        assert_eq!(k.task_state(a), Ok(TaskState::PendingRestart));
        assert!(!k.scheduler().is_delay_queued(a));
        assert_eq!(k.reclaim(), 1);
        assert_eq!(k.task_state(a), Ok(TaskState::Ready));
        assert_eq!(k.scheduler().task(a).stack_pointer, initial_sp);
        assert_eq!(k.task_stats(a).unwrap().dispatches, 0);
        let frame = unsafe { core::slice::from_raw_parts(initial_sp, 16) };
        assert_eq!(frame[crate::arch::frame::R0], 77);
        assert_eq!(k.dispatch_pending(), Some(a));
    }

    #[test]
    fn set_priority_moves_ready_task() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 4);
        let b = spawn(&mut k, 2);
        k.set_priority(b, 6).unwrap();
        assert_eq!(k.dispatch_pending(), Some(b));
        k.set_priority(b, 1).unwrap();
        assert_eq!(k.dispatch_pending(), Some(a));
        assert_eq!(k.scheduler().task(b).base_priority, 1);
        k.scheduler().audit();
    }

    #[test]
    fn creation_errors() {
        let mut k = started_kernel();
        assert_eq!(
            k.create_task(noop, TaskOptions::new(1).stack_words(8)),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            k.create_task(noop, TaskOptions::new(PRIORITY_LEVELS as Priority)),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            k.create_task(noop, TaskOptions::new(1).stack_words(DEFAULT_STACK_WORDS + 1)),
            Err(KernelError::NoMemory)
        );

        let mut created = 0;
        loop {
            match k.create_task(noop, TaskOptions::new(1)) {
                Ok(_) => created += 1,
                Err(e) => {
                    assert_eq!(e, KernelError::NoMemory);
                    break;
                }
            }
        }
        assert_eq!(created, 12);
        for _ in created + 1..MAX_TASKS {
            k.create_task(noop, TaskOptions::new(1).static_stack(leak_words(64)))
                .unwrap();
        }
        assert_eq!(
            k.create_task(noop, TaskOptions::new(1).static_stack(leak_words(64))),
            Err(KernelError::NoFreeSlot)
        );
    }

    #[test]
    fn stats_count_dispatches_and_stack_use() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 2);
        let _b = spawn(&mut k, 2);
        ticks(&mut k, 1);
        k.dispatch_pending();
        ticks(&mut k, 1);
        k.dispatch_pending();

        let stats = k.task_stats(a).unwrap();
        assert_eq!(stats.dispatches, 2);
        assert_eq!(stats.run_ticks, 1);
        assert_eq!(stats.stack_words, DEFAULT_STACK_WORDS);
        assert!(stats.stack_unused < DEFAULT_STACK_WORDS);
        assert!(stats.stack_unused >= DEFAULT_STACK_WORDS - 20);
    }

    #[test]
    #[should_panic(expected = "stack overflow in task")]
    fn clobbered_canary_is_fatal_on_switch() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 2);
        let base = k.scheduler().task(a).stack.base();
        unsafe { base.write(0) };
        k.yield_now();
        spawn(&mut k, 2);
        k.yield_now();
        k.dispatch_pending();
    }

    #[test]
    #[should_panic(expected = "kernel not initialized")]
    fn use_before_init_is_fatal() {
        let mut k: Kernel<HostPort> = Kernel::new(HostPort::new(), StackPool::empty(), KernelConfig::DEFAULT);
        let _ = k.create_task(noop, TaskOptions::new(1));
    }

    #[test]
    #[should_panic(expected = "kernel not initialized")]
    fn task_returning_without_kernel_is_fatal() {
        task_exit();
    }

    #[test]
    #[should_panic(expected = "invalid configuration")]
    fn invalid_config_is_fatal() {
        kernel_with(KernelConfig {
            time_slice_ticks: 0,
            ..KernelConfig::DEFAULT
        });
    }

    #[test]
    #[should_panic(expected = "already initialized")]
    fn double_init_is_fatal() {
        let mut k = kernel_with(KernelConfig::DEFAULT);
        k.init(leak_words(IDLE_STACK_WORDS));
    }

    #[test]
    fn critical_section_is_balanced_after_every_call() {
        let mut k = started_kernel();
        let m = k.create_mutex(false).unwrap();
        let a = spawn_running(&mut k, 2);
        k.acquire(&m, Timeout::Immediate).unwrap();
        let _ = k.acquire(&m, Timeout::Immediate);
        k.release(&m).unwrap();
        let _ = k.release(&m);
        k.tick();
        let _ = k.suspend(a);
        k.yield_now();
        assert_eq!(k.critical_depth(), 0);
        assert_eq!(k.port().mask(), 0);
    }

    mod proptests {
        use super::*;
        use crate::lock::StarvationAging;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Spawn(Priority),
            Tick,
            Yield,
            Delay(u32),
            Acquire(usize, Timeout),
            Release(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            let timeout = prop_oneof![
                Just(Timeout::Immediate),
                (1u32..6).prop_map(Timeout::Ticks),
                Just(Timeout::Forever),
            ];
            prop_oneof![
                1 => (1..PRIORITY_LEVELS as Priority).prop_map(Op::Spawn),
                3 => Just(Op::Tick),
                1 => Just(Op::Yield),
                1 => (1u32..6).prop_map(Op::Delay),
                2 => (0usize..3, timeout).prop_map(|(l, t)| Op::Acquire(l, t)),
                2 => (0usize..3).prop_map(Op::Release),
            ]
        }

        struct Locks {
            mutex: Mutex,
            plain: BinaryLock,
            aging: BinaryLock<StarvationAging>,
        }

        impl Locks {
            fn acquire(&self, k: &mut Kernel<HostPort>, n: usize, t: Timeout) -> KernelResult<()> {
                match n {
                    0 => k.acquire(&self.mutex, t),
                    1 => k.acquire(&self.plain, t),
                    _ => k.acquire(&self.aging, t),
                }
            }

            fn release(&self, k: &mut Kernel<HostPort>, n: usize) -> KernelResult<()> {
                match n {
                    0 => k.release(&self.mutex),
                    1 => k.release(&self.plain),
                    _ => k.release(&self.aging),
                }
            }
        }

        proptest! {
            #[test]
            fn scheduling_invariants_hold(ops in proptest::collection::vec(op(), 1..120)) {
                let mut k = started_kernel();
                let locks = Locks {
                    mutex: k.create_mutex(false).unwrap(),
                    plain: k.create_lock(false).unwrap(),
                    aging: k.create_lock(false).unwrap(),
                };

                for op in ops {
                    let _ = match op {
                        Op::Spawn(p) => k.create_task(noop, TaskOptions::new(p)).map(|_| ()),
                        Op::Tick => {
                            k.tick();
                            Ok(())
                        }
                        Op::Yield => {
                            k.yield_now();
                            Ok(())
                        }
                        Op::Delay(n) => k.delay(n),
                        Op::Acquire(l, t) => locks.acquire(&mut k, l, t),
                        Op::Release(l) => locks.release(&mut k, l),
                    };
                    k.dispatch_pending();

                    // The running task heads the highest ready level.
                    prop_assert_eq!(k.current_task(), k.scheduler().peek_next());
                    let current = k.current_task().unwrap();
                    let top = k.scheduler().highest_ready_priority().unwrap();
                    prop_assert!(k.scheduler().task(current).priority >= top);

                    // A mutex owner never runs below its waiters.
                    let index = locks.mutex.id().index();
                    if let Ok(Some(owner)) = k.lock_owner(&locks.mutex) {
                        if let Some(w) = k.locks().highest_waiter(k.scheduler(), index) {
                            prop_assert!(k.scheduler().task(owner).priority >= w);
                        }
                    }

                    // Outside an aging wait nobody keeps a raise that no
                    // mutex waiter still justifies.
                    for task in k.scheduler().live_tasks() {
                        if task.aged_from.is_none() {
                            let owed = k.locks().owed_priority(k.scheduler(), task.id, None);
                            prop_assert_eq!(task.priority, owed, "task {}", task.id.index());
                        }
                    }

                    prop_assert_eq!(k.critical_depth(), 0);
                    k.scheduler().audit();
                }
            }
        }
    }
}
