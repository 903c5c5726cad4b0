//! # Mutex
//!
//! A [`BinaryLock`](crate::lock::BinaryLock) whose owner inherits the
//! priority of its most urgent waiter, which bounds priority inversion.
//!
//! ## Inheritance rules
//!
//! - A requester that outranks the owner raises the owner in place before
//!   it blocks. The owner's priority before the first such boost is cached
//!   in the mutex; later boosts leave the cache alone.
//! - If the owner is itself blocked on another mutex the boost travels on
//!   to that mutex's owner, and so on down the chain.
//! - On release the owner drops back to its base priority, or to the
//!   most urgent waiter of any other mutex it still holds if that is
//!   higher, and the cache is cleared. Ownership then passes to the head
//!   waiter, which inherits from whoever is still waiting.
//! - A waiter that times out takes its share of the boost with it.
//!
//! Throughout, an owner never runs below any of its waiters.

use crate::config::MAX_LOCKS;
use crate::lock::{Lock, LockId, LockTable};
use crate::scheduler::Scheduler;
use crate::task::{Priority, TaskId, TaskState};

/// Handle of a priority-inheriting mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutex {
    id: LockId,
}

impl Mutex {
    pub(crate) const fn from_id(id: LockId) -> Self {
        Self { id }
    }
}

impl Lock for Mutex {
    fn id(&self) -> LockId {
        self.id
    }
}

impl LockTable {
    /// Boost the owner of mutex `index` (and any owner it is blocked
    /// behind) to at least `priority`.
    pub(crate) fn inherit(&mut self, sched: &mut Scheduler, index: usize, priority: Priority) {
        let mut index = index;
        // A chain can pass through each mutex at most once.
        for _ in 0..MAX_LOCKS {
            let slot = &mut self.slots[index];
            if !slot.is_mutex() {
                break;
            }
            let Some(owner) = slot.owner else {
                break;
            };
            let task = sched.task(owner);
            if task.priority >= priority {
                break;
            }
            if slot.inherited_from.is_none() {
                slot.inherited_from = Some(task.base_priority);
            }
            trace!(
                "task {} inherits {} through lock {}",
                owner.index(),
                priority,
                index
            );
            self.set_effective(sched, owner, priority);

            let task = sched.task(owner);
            match (task.state, task.blocked_on) {
                (TaskState::Blocked, Some(next)) => index = next.index(),
                _ => break,
            }
        }
    }

    /// Undo the boost mutex `index` gave its owner, ahead of a release.
    ///
    /// The owner is recomputed from its base priority and the waiters of
    /// the mutexes it keeps, whether or not this mutex recorded a boost:
    /// a raise through `set_priority` or an aging hand-off leaves no cache.
    pub(crate) fn restore_owner(&mut self, sched: &mut Scheduler, index: usize, owner: TaskId) {
        self.slots[index].inherited_from = None;
        let target = self.owed_priority(sched, owner, Some(index));
        if target != sched.task(owner).priority {
            trace!("task {} restored to {}", owner.index(), target);
            self.set_effective(sched, owner, target);
        }
    }

    /// Lower an owner to what its remaining waiters still justify, then do
    /// the same for whichever owner it is blocked behind.
    pub(crate) fn relax(&mut self, sched: &mut Scheduler, owner: TaskId) {
        let mut owner = owner;
        for _ in 0..MAX_LOCKS {
            let task = sched.task(owner);
            // Levels gained while waiting on an aging lock are only given
            // back when the wait ends.
            if task.aged_from.is_some() {
                return;
            }
            let target = self.owed_priority(sched, owner, None);
            if target >= task.priority {
                return;
            }
            trace!("task {} relaxed to {}", owner.index(), target);
            self.set_effective(sched, owner, target);

            let task = sched.task(owner);
            match (task.state, task.blocked_on) {
                (TaskState::Blocked, Some(id)) if self.slots[id.index()].is_mutex() => {
                    match self.slots[id.index()].owner {
                        Some(next) => owner = next,
                        None => return,
                    }
                }
                _ => return,
            }
        }
    }

    /// The priority `owner` is entitled to outside any aging wait: its base
    /// priority, or the most urgent waiter of a mutex it holds (other than
    /// `except`) if that is higher.
    pub(crate) fn owed_priority(
        &self,
        sched: &Scheduler,
        owner: TaskId,
        except: Option<usize>,
    ) -> Priority {
        sched
            .task(owner)
            .base_priority
            .max(self.inherited_ceiling(sched, owner, except))
    }

    /// Highest waiter priority across the mutexes `owner` holds, skipping
    /// slot `except`. 0 when nobody is waiting.
    pub(crate) fn inherited_ceiling(
        &self,
        sched: &Scheduler,
        owner: TaskId,
        except: Option<usize>,
    ) -> Priority {
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                s.in_use && s.is_mutex() && s.owner == Some(owner) && Some(*i) != except
            })
            .filter_map(|(i, _)| self.highest_waiter(sched, i))
            .max()
            .unwrap_or(0)
    }

    /// Point every active boost cache of `owner` at a new base priority.
    pub(crate) fn rebase(&mut self, owner: TaskId, base: Priority) {
        for slot in self.slots.iter_mut() {
            if slot.in_use && slot.is_mutex() && slot.owner == Some(owner) && slot.inherited_from.is_some() {
                slot.inherited_from = Some(base);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
