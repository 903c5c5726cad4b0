//! # Binary Lock
//!
//! A lock with a single owner and a priority-ordered set of waiters. Lock
//! state lives in the kernel's [`LockTable`]; applications hold small
//! `Copy` handles ([`BinaryLock`], [`Mutex`](crate::mutex::Mutex)) that
//! name a slot plus the generation it was created in, so a handle that
//! outlives its lock is detected instead of aliasing a newer one.
//!
//! ## Wait order
//!
//! Waiters are kept highest priority first, arrival order within a level.
//! Release hands ownership straight to the head waiter; the lock is never
//! observably free while someone is waiting.
//!
//! ## Starvation aging
//!
//! With [`StarvationAging`] every release that passes over a waiter raises
//! that waiter's priority by one level (capped at
//! [`MAX_PRIORITY`]). Since every remaining waiter moves up together the
//! order never changes. A waiter gets back the priority it arrived with as
//! soon as it acquires or gives up.

use core::marker::PhantomData;

use crate::config::{MAX_LOCKS, MAX_PRIORITY};
use crate::error::{KernelError, KernelResult};
use crate::list::TaskList;
use crate::scheduler::Scheduler;
use crate::task::{Priority, TaskId, TaskState, WakeStatus};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Slot index plus creation generation of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockId {
    index: u8,
    generation: u16,
}

impl LockId {
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

/// Anything the kernel can acquire and release.
pub trait Lock {
    fn id(&self) -> LockId;
}

/// Aging behaviour of a [`BinaryLock`], chosen by type.
pub trait AgingPolicy {
    const ENABLED: bool;
}

/// Waiters keep their own priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoAging;

/// Waiters gain a level each time a release passes them over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarvationAging;

impl AgingPolicy for NoAging {
    const ENABLED: bool = false;
}

impl AgingPolicy for StarvationAging {
    const ENABLED: bool = true;
}

/// Handle of a binary lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryLock<A: AgingPolicy = NoAging> {
    id: LockId,
    _aging: PhantomData<A>,
}

impl<A: AgingPolicy> BinaryLock<A> {
    pub(crate) const fn from_id(id: LockId) -> Self {
        Self {
            id,
            _aging: PhantomData,
        }
    }
}

impl<A: AgingPolicy> Lock for BinaryLock<A> {
    fn id(&self) -> LockId {
        self.id
    }
}

/// How long `acquire` may wait for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Fail with `Unavailable` instead of waiting. `Ticks(0)` means the same.
    Immediate,
    /// Give up after this many ticks.
    Ticks(u32),
    /// Wait until released.
    Forever,
}

impl Timeout {
    #[inline]
    pub fn is_immediate(self) -> bool {
        matches!(self, Timeout::Immediate | Timeout::Ticks(0))
    }
}

// ---------------------------------------------------------------------------
// Lock table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockKind {
    Binary { aging: bool },
    Mutex,
}

pub(crate) struct LockSlot {
    pub(crate) in_use: bool,
    pub(crate) generation: u16,
    pub(crate) kind: LockKind,
    pub(crate) owner: Option<TaskId>,
    pub(crate) waiters: TaskList,
    /// Mutex only: the owner's priority before this mutex first boosted
    /// it. `None` while no boost is active through this mutex.
    pub(crate) inherited_from: Option<Priority>,
}

impl LockSlot {
    const EMPTY: Self = Self {
        in_use: false,
        generation: 0,
        kind: LockKind::Binary { aging: false },
        owner: None,
        waiters: TaskList::new(),
        inherited_from: None,
    };

    #[inline]
    pub(crate) fn is_mutex(&self) -> bool {
        self.kind == LockKind::Mutex
    }

    #[inline]
    fn ages(&self) -> bool {
        self.kind == LockKind::Binary { aging: true }
    }
}

/// Storage for every lock in the system.
pub struct LockTable {
    pub(crate) slots: [LockSlot; MAX_LOCKS],
}

impl LockTable {
    pub const fn new() -> Self {
        Self {
            slots: [LockSlot::EMPTY; MAX_LOCKS],
        }
    }

    /// Claim a free slot. An initially owned lock belongs to `owner`.
    pub(crate) fn create(&mut self, kind: LockKind, owner: Option<TaskId>) -> KernelResult<LockId> {
        let index = self
            .slots
            .iter()
            .position(|s| !s.in_use)
            .ok_or(KernelError::NoFreeSlot)?;
        let slot = &mut self.slots[index];
        slot.in_use = true;
        slot.kind = kind;
        slot.owner = owner;
        slot.waiters = TaskList::new();
        slot.inherited_from = None;
        Ok(LockId {
            index: index as u8,
            generation: slot.generation,
        })
    }

    /// Slot index for a live handle.
    pub(crate) fn resolve(&self, id: LockId) -> KernelResult<usize> {
        match self.slots.get(id.index()) {
            Some(slot) if slot.in_use && slot.generation == id.generation => Ok(id.index()),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub fn owner(&self, id: LockId) -> KernelResult<Option<TaskId>> {
        Ok(self.slots[self.resolve(id)?].owner)
    }

    pub fn waiter_count(&self, id: LockId) -> KernelResult<usize> {
        Ok(self.slots[self.resolve(id)?].waiters.len())
    }

    /// Whether `task` owns any live lock.
    pub fn owns_any(&self, task: TaskId) -> bool {
        self.slots.iter().any(|s| s.in_use && s.owner == Some(task))
    }

    /// Retire a lock. Fails with `InUse` while it is owned, or when the
    /// handle is stale because the lock was already deleted.
    pub(crate) fn delete(&mut self, id: LockId) -> KernelResult<()> {
        let index = self.resolve(id).map_err(|_| KernelError::InUse)?;
        let slot = &mut self.slots[index];
        if slot.owner.is_some() {
            return Err(KernelError::InUse);
        }
        debug_assert!(slot.waiters.is_empty());
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.inherited_from = None;
        Ok(())
    }

    // -- Acquire -------------------------------------------------------------

    /// Take the lock for `who`, or park `who` in its wait set.
    ///
    /// Returns `Ok(())` when the lock was free, `Unavailable` for an
    /// immediate attempt on a held lock, and `WouldBlock` once `who` has
    /// been moved off the ready queue; the wake status tells later how
    /// the wait ended.
    pub(crate) fn acquire(
        &mut self,
        sched: &mut Scheduler,
        id: LockId,
        who: TaskId,
        timeout: Timeout,
    ) -> KernelResult<()> {
        let index = self.resolve(id)?;
        match self.slots[index].owner {
            None => {
                self.slots[index].owner = Some(who);
                return Ok(());
            }
            Some(owner) if owner == who => return Err(KernelError::InvalidState),
            Some(_) => {}
        }
        if timeout.is_immediate() {
            return Err(KernelError::Unavailable);
        }
        if !sched.task(who).is_ready() {
            return Err(KernelError::InvalidState);
        }

        let priority = sched.task(who).priority;
        if self.slots[index].is_mutex() {
            self.inherit(sched, index, priority);
        }

        sched.remove_ready(who);
        let task = sched.task_mut(who);
        task.state = TaskState::Blocked;
        task.blocked_on = Some(id);
        task.wake = None;
        if self.slots[index].ages() {
            task.aged_from = Some(task.priority);
        }
        self.insert_waiter(sched, index, who);

        if let Timeout::Ticks(ticks) = timeout {
            sched.delay_insert(who, ticks);
        }
        trace!("task {} waits on lock {}", who.index(), index);
        Err(KernelError::WouldBlock)
    }

    /// Insert before the first waiter of strictly lower priority.
    fn insert_waiter(&mut self, sched: &mut Scheduler, index: usize, who: TaskId) {
        let priority = sched.task(who).priority;
        let waiters = &mut self.slots[index].waiters;
        let mut at = None;
        for w in waiters.iter(&sched.links) {
            if sched.task(w).priority < priority {
                at = Some(w);
                break;
            }
        }
        match at {
            Some(at) => waiters.insert_before(&mut sched.links, at, who),
            None => waiters.push_back(&mut sched.links, who),
        }
    }

    // -- Release -------------------------------------------------------------

    /// Give up ownership. The head waiter, if any, becomes the owner and
    /// is made ready with [`WakeStatus::Acquired`].
    pub(crate) fn release(&mut self, sched: &mut Scheduler, id: LockId, who: TaskId) -> KernelResult<()> {
        let index = self.resolve(id)?;
        if self.slots[index].owner != Some(who) {
            return Err(KernelError::InvalidOwner);
        }
        if self.slots[index].is_mutex() {
            self.restore_owner(sched, index, who);
        }

        let Some(next) = self.slots[index].waiters.pop_front(&mut sched.links) else {
            self.slots[index].owner = None;
            return Ok(());
        };

        self.slots[index].owner = Some(next);
        sched.delay_remove(next);
        let restored = self.arrival_priority(sched, next);
        let task = sched.task_mut(next);
        task.blocked_on = None;
        task.aged_from = None;
        task.priority = restored;
        task.wake = Some(WakeStatus::Acquired);
        sched.make_ready(next);
        trace!("lock {} handed to task {}", index, next.index());

        if self.slots[index].ages() {
            self.age_waiters(sched, index);
        }
        if self.slots[index].is_mutex() {
            if let Some(top) = self.highest_waiter(sched, index) {
                self.inherit(sched, index, top);
            }
        }
        Ok(())
    }

    /// Raise every waiter of an aging lock by one level.
    fn age_waiters(&mut self, sched: &mut Scheduler, index: usize) {
        let mut cursor = self.slots[index].waiters.head();
        while let Some(w) = cursor {
            let task = sched.task_mut(w);
            task.priority = task.priority.saturating_add(1).min(MAX_PRIORITY);
            cursor = self.slots[index].waiters.next_of(&sched.links, w);
        }
    }

    /// Priority a waiter goes back to when it leaves an aging wait set:
    /// its base priority, unless mutexes it owns demand more. Boosts it
    /// arrived with may have lapsed during the wait.
    fn arrival_priority(&self, sched: &Scheduler, who: TaskId) -> Priority {
        match sched.task(who).aged_from {
            Some(_) => self.owed_priority(sched, who, None),
            None => sched.task(who).priority,
        }
    }

    // -- Timeout / withdrawal ------------------------------------------------

    /// Take a blocked task out of its wait set without handing it the
    /// lock: restores its arrival priority and relaxes any boost its wait
    /// was giving the owner. Leaves the task's state to the caller.
    pub(crate) fn withdraw(&mut self, sched: &mut Scheduler, who: TaskId) {
        sched.delay_remove(who);
        let Some(id) = sched.task_mut(who).blocked_on.take() else {
            return;
        };
        let index = id.index();
        self.slots[index].waiters.remove(&mut sched.links, who);
        let restored = self.arrival_priority(sched, who);
        let task = sched.task_mut(who);
        task.priority = restored;
        task.aged_from = None;

        if self.slots[index].is_mutex() {
            if let Some(owner) = self.slots[index].owner {
                self.relax(sched, owner);
            }
        }
    }

    /// The bounded wait of a blocked task ran out.
    pub(crate) fn time_out(&mut self, sched: &mut Scheduler, who: TaskId) {
        self.withdraw(sched, who);
        sched.task_mut(who).wake = Some(WakeStatus::TimedOut);
        sched.make_ready(who);
        trace!("task {} timed out", who.index());
    }

    // -- Priority changes ----------------------------------------------------

    /// Set a task's effective priority, keeping whichever queue it is in
    /// correctly ordered.
    pub(crate) fn set_effective(&mut self, sched: &mut Scheduler, who: TaskId, priority: Priority) {
        let task = sched.task(who);
        if task.priority == priority {
            return;
        }
        match (task.state, task.blocked_on) {
            (TaskState::Ready, _) => sched.requeue(who, priority),
            (TaskState::Blocked, Some(id)) => {
                let index = id.index();
                self.slots[index].waiters.remove(&mut sched.links, who);
                sched.task_mut(who).priority = priority;
                self.insert_waiter(sched, index, who);
            }
            _ => sched.task_mut(who).priority = priority,
        }
    }

    /// Highest priority among the waiters of slot `index`.
    pub(crate) fn highest_waiter(&self, sched: &Scheduler, index: usize) -> Option<Priority> {
        self.slots[index]
            .waiters
            .iter(&sched.links)
            .map(|w| sched.task(w).priority)
            .max()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::testing::{spawn, spawn_running, started_kernel, ticks};
    use crate::config::PRIORITY_LEVELS;
    use crate::port::Port;

    #[test]
    fn free_lock_is_taken_immediately() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 3);
        let lock: BinaryLock = k.create_lock(false).unwrap();

        assert_eq!(k.acquire(&lock, Timeout::Immediate), Ok(()));
        assert_eq!(k.lock_owner(&lock), Ok(Some(a)));
        assert_eq!(k.acquire(&lock, Timeout::Forever), Err(KernelError::InvalidState));
    }

    #[test]
    fn immediate_attempt_on_held_lock_fails() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        let a = spawn_running(&mut k, 2);
        k.acquire(&lock, Timeout::Immediate).unwrap();

        let b = spawn_running(&mut k, 4);
        assert_eq!(k.acquire(&lock, Timeout::Immediate), Err(KernelError::Unavailable));
        assert_eq!(k.acquire(&lock, Timeout::Ticks(0)), Err(KernelError::Unavailable));
        assert_eq!(k.current_task(), Some(b));
        assert_eq!(k.lock_owner(&lock), Ok(Some(a)));
    }

    #[test]
    fn release_by_non_owner_is_rejected() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        spawn_running(&mut k, 2);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        spawn_running(&mut k, 3);
        assert_eq!(k.release(&lock), Err(KernelError::InvalidOwner));
    }

    #[test]
    fn waiters_are_served_by_priority_then_arrival() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, 6);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        k.delay(10).unwrap();

        let mut order = Vec::new();
        for priority in [1, 3, 3, 2] {
            let w = spawn_running(&mut k, priority);
            assert_eq!(k.acquire(&lock, Timeout::Forever), Err(KernelError::WouldBlock));
            assert_eq!(k.task_state(w), Ok(TaskState::Blocked));
            k.dispatch_pending();
            order.push((priority, w));
        }
        assert_eq!(k.lock_waiters(&lock), Ok(4));

        ticks(&mut k, 10);
        assert_eq!(k.dispatch_pending(), Some(owner));
        k.release(&lock).unwrap();

        // First priority-3 arrival wins.
        let first = order[1].1;
        assert_eq!(k.lock_owner(&lock), Ok(Some(first)));
        assert_eq!(k.task_state(first), Ok(TaskState::Ready));
        assert_eq!(k.scheduler().task(first).wake, Some(WakeStatus::Acquired));
        k.scheduler().audit();
    }

    #[test]
    fn bounded_wait_times_out_after_exact_ticks() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, 2);
        k.acquire(&lock, Timeout::Immediate).unwrap();

        let w = spawn_running(&mut k, 5);
        assert_eq!(k.acquire(&lock, Timeout::Ticks(3)), Err(KernelError::WouldBlock));
        assert_eq!(k.dispatch_pending(), Some(owner));

        ticks(&mut k, 2);
        assert_eq!(k.task_state(w), Ok(TaskState::Blocked));
        ticks(&mut k, 1);
        assert_eq!(k.task_state(w), Ok(TaskState::Ready));
        assert_eq!(k.dispatch_pending(), Some(w));
        assert_eq!(k.take_wake_status(), Some(WakeStatus::TimedOut));
        assert_eq!(k.lock_waiters(&lock), Ok(0));
        assert_eq!(k.lock_owner(&lock), Ok(Some(owner)));
    }

    #[test]
    fn released_lock_can_be_retaken_at_once() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        spawn_running(&mut k, 3);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        k.release(&lock).unwrap();
        assert_eq!(k.acquire(&lock, Timeout::Immediate), Ok(()));
    }

    #[test]
    fn release_to_higher_priority_waiter_requests_switch() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        let low = spawn_running(&mut k, 1);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        let high = spawn_running(&mut k, 4);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        assert_eq!(k.dispatch_pending(), Some(low));

        k.release(&lock).unwrap();
        assert!(k.port().yield_pending());
        assert_eq!(k.dispatch_pending(), Some(high));
        assert_eq!(k.take_wake_status(), Some(WakeStatus::Acquired));
    }

    #[test]
    fn delete_only_when_unowned() {
        let mut k = started_kernel();
        let lock: BinaryLock = k.create_lock(false).unwrap();
        spawn_running(&mut k, 2);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        assert_eq!(k.delete_lock(&lock), Err(KernelError::InUse));

        k.release(&lock).unwrap();
        assert_eq!(k.delete_lock(&lock), Ok(()));
        assert_eq!(k.delete_lock(&lock), Err(KernelError::InUse));
        assert_eq!(k.acquire(&lock, Timeout::Immediate), Err(KernelError::InvalidArgument));

        // The slot is reused under a new generation.
        let again: BinaryLock = k.create_lock(false).unwrap();
        assert_eq!(again.id().index(), lock.id().index());
        assert_ne!(again.id(), lock.id());
    }

    #[test]
    fn initially_owned_lock_belongs_to_creator() {
        let mut k = started_kernel();
        let a = spawn_running(&mut k, 2);
        let lock: BinaryLock = k.create_lock(true).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(Some(a)));
    }

    #[test]
    fn lock_table_exhaustion() {
        let mut k = started_kernel();
        for _ in 0..MAX_LOCKS {
            k.create_lock::<NoAging>(false).unwrap();
        }
        assert_eq!(k.create_lock::<NoAging>(false), Err(KernelError::NoFreeSlot));
    }

    #[test]
    fn aging_raises_passed_over_waiters_and_restores_on_acquire() {
        let mut k = started_kernel();
        let lock: BinaryLock<StarvationAging> = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, 6);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        k.delay(5).unwrap();

        let low = spawn_running(&mut k, 1);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();
        let mid = spawn_running(&mut k, 3);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();

        ticks(&mut k, 5);
        assert_eq!(k.dispatch_pending(), Some(owner));
        k.release(&lock).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(Some(mid)));
        assert_eq!(k.scheduler().task(low).priority, 2);
        assert_eq!(k.scheduler().task(low).aged_from, Some(1));
        assert_eq!(k.scheduler().task(mid).priority, 3);
        k.scheduler().audit();
    }

    #[test]
    fn aged_waiters_tie_in_arrival_order() {
        let mut k = started_kernel();
        let lock: BinaryLock<StarvationAging> = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, 6);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        k.delay(5).unwrap();

        // w1 (1) arrives before w2 (2).
        let w1 = spawn_running(&mut k, 1);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();
        let w2 = spawn_running(&mut k, 2);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();

        // Owner hands over to w2; w1 is aged to 2.
        ticks(&mut k, 5);
        assert_eq!(k.dispatch_pending(), Some(owner));
        k.release(&lock).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(Some(w2)));
        assert_eq!(k.scheduler().task(w1).priority, 2);
        k.delay(50).unwrap();
        assert_eq!(k.dispatch_pending(), Some(w2));

        // w3 arrives at 2, tying with the aged w1.
        let w3 = spawn(&mut k, 2);
        k.yield_now();
        assert_eq!(k.dispatch_pending(), Some(w3));
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        assert_eq!(k.dispatch_pending(), Some(w2));

        // The earlier arrival wins the tie.
        k.release(&lock).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(Some(w1)));
        assert_eq!(k.scheduler().task(w1).priority, 1);
        assert_eq!(k.scheduler().task(w3).priority, 3);
        k.scheduler().audit();
    }

    #[test]
    fn aging_is_capped_at_top_level() {
        let mut k = started_kernel();
        let lock: BinaryLock<StarvationAging> = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, MAX_PRIORITY);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        k.delay(1).unwrap();

        let a = spawn_running(&mut k, MAX_PRIORITY - 1);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();
        let b = spawn_running(&mut k, MAX_PRIORITY - 1);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();
        let c = spawn_running(&mut k, MAX_PRIORITY - 1);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();

        ticks(&mut k, 1);
        assert_eq!(k.dispatch_pending(), Some(owner));
        k.release(&lock).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(Some(a)));
        assert_eq!(k.scheduler().task(b).priority, MAX_PRIORITY);

        // a is ready at MAX-1 behind the running owner; hand over again
        // from a once it runs.
        k.delay(1).unwrap();
        assert_eq!(k.dispatch_pending(), Some(a));
        k.release(&lock).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(Some(b)));
        assert_eq!(k.scheduler().task(c).priority, MAX_PRIORITY);
        assert_eq!(k.scheduler().task(b).priority, MAX_PRIORITY - 1);
    }

    #[test]
    fn aging_bounds_the_wait_of_a_low_waiter() {
        const CONTENDER: Priority = 6;
        let mut k = started_kernel();
        let lock: BinaryLock<StarvationAging> = k.create_lock(false).unwrap();
        let first = spawn_running(&mut k, 2);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        k.delay(1).unwrap();
        k.dispatch_pending();

        let low = spawn_running(&mut k, 1);
        assert_eq!(k.acquire(&lock, Timeout::Forever), Err(KernelError::WouldBlock));
        k.dispatch_pending();
        ticks(&mut k, 1);
        assert_eq!(k.dispatch_pending(), Some(first));

        // Before every release a fresh, more urgent contender queues up.
        // Each owner leaves the CPU for good after handing over.
        let mut releases = 0;
        while k.lock_owner(&lock) != Ok(Some(low)) {
            assert!(releases < PRIORITY_LEVELS, "low waiter starved");
            let owner = k.current_task().unwrap();
            let contender = spawn(&mut k, CONTENDER);
            k.yield_now();
            assert_eq!(k.dispatch_pending(), Some(contender));
            assert_eq!(k.acquire(&lock, Timeout::Forever), Err(KernelError::WouldBlock));
            assert_eq!(k.dispatch_pending(), Some(owner));

            k.release(&lock).unwrap();
            releases += 1;
            k.delay(10_000).unwrap();
            assert_eq!(k.dispatch_pending(), k.lock_owner(&lock).unwrap());
        }

        // One release per level between the waiter and its rivals, plus
        // one to win the tie it then holds by arriving first.
        assert_eq!(releases, (CONTENDER - 1) as usize + 1);
        assert_eq!(k.current_task(), Some(low));
        assert_eq!(k.scheduler().task(low).priority, 1);
        assert_eq!(k.take_wake_status(), Some(WakeStatus::Acquired));
        k.scheduler().audit();
    }

    #[test]
    fn timed_out_aged_waiter_gets_arrival_priority_back() {
        let mut k = started_kernel();
        let lock: BinaryLock<StarvationAging> = k.create_lock(false).unwrap();
        let owner = spawn_running(&mut k, 6);
        k.acquire(&lock, Timeout::Immediate).unwrap();
        k.delay(2).unwrap();

        let patient = spawn_running(&mut k, 1);
        k.acquire(&lock, Timeout::Ticks(10)).unwrap_err();
        k.dispatch_pending();
        let eager = spawn_running(&mut k, 3);
        k.acquire(&lock, Timeout::Forever).unwrap_err();
        k.dispatch_pending();

        ticks(&mut k, 2);
        assert_eq!(k.dispatch_pending(), Some(owner));
        k.release(&lock).unwrap();
        assert_eq!(k.lock_owner(&lock), Ok(Some(eager)));
        assert_eq!(k.scheduler().task(patient).priority, 2);
        k.delay(100).unwrap();

        ticks(&mut k, 8);
        assert_eq!(k.task_state(patient), Ok(TaskState::Ready));
        assert_eq!(k.scheduler().task(patient).priority, 1);
        assert_eq!(k.scheduler().task(patient).aged_from, None);
        k.scheduler().audit();
    }
}
