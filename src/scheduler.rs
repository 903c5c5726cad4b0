//! # Scheduler
//!
//! Owns the task arena and every queue a record can sit in:
//!
//! - one ready list per priority level plus an occupancy bitmap, so the
//!   highest ready level is a single leading-zeros count;
//! - the delay queue, a delta list ordered by wake-up tick;
//! - the reclamation queue of records waiting for the idle task.
//!
//! ## Selection rule
//!
//! The task to run is the head of the highest non-empty ready list. The
//! running task stays at the head of its list while it runs; a time-slice
//! expiry or a voluntary yield rotates that list by one, which is all the
//! round robin there is.
//!
//! ## Delay queue
//!
//! ```text
//!   head                               tail
//!   [A:3] ──► [B:0] ──► [C:2] ──► [D:5]
//!   wakes at   +3        +3        +5        +10 ticks
//! ```
//!
//! Each entry stores its distance from its predecessor. A tick only
//! decrements the head; every head that reaches zero has expired. Equal
//! deadlines keep insertion order.

use crate::config::{MAX_TASKS, PRIORITY_LEVELS};
use crate::list::{Link, TaskList};
use crate::task::{Priority, TaskControlBlock, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

pub struct Scheduler {
    tasks: [TaskControlBlock; MAX_TASKS],

    /// Links for ready-list, wait-set and reclamation membership. A record
    /// belongs to at most one of these at a time.
    pub(crate) links: [Link; MAX_TASKS],

    delay_links: [Link; MAX_TASKS],
    delay_delta: [u32; MAX_TASKS],
    delay_queued: [bool; MAX_TASKS],
    delayed: TaskList,

    ready: [TaskList; PRIORITY_LEVELS],
    /// Bit `p` is set while `ready[p]` is non-empty.
    ready_bitmap: u32,

    reclaim: TaskList,

    current: Option<TaskId>,
    idle: Option<TaskId>,

    /// Ticks left in the running task's round-robin quantum.
    slice_left: u32,

    /// Monotonic tick counter.
    tick_count: u64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            links: [Link::UNLINKED; MAX_TASKS],
            delay_links: [Link::UNLINKED; MAX_TASKS],
            delay_delta: [0; MAX_TASKS],
            delay_queued: [false; MAX_TASKS],
            delayed: TaskList::new(),
            ready: [TaskList::new(); PRIORITY_LEVELS],
            ready_bitmap: 0,
            reclaim: TaskList::new(),
            current: None,
            idle: None,
            slice_left: 0,
            tick_count: 0,
        }
    }

    // -- Arena ---------------------------------------------------------------

    #[inline]
    pub fn task(&self, id: TaskId) -> &TaskControlBlock {
        &self.tasks[id.index()]
    }

    #[inline]
    pub fn task_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        &mut self.tasks[id.index()]
    }

    /// `id` names a live record.
    pub fn is_live(&self, id: TaskId) -> bool {
        id.index() < MAX_TASKS && !self.tasks[id.index()].is_free()
    }

    /// First unused arena slot.
    pub fn free_slot(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .position(TaskControlBlock::is_free)
            .map(TaskId::new)
    }

    pub fn live_tasks(&self) -> impl Iterator<Item = &TaskControlBlock> + '_ {
        self.tasks.iter().filter(|t| !t.is_free())
    }

    #[inline]
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    #[inline]
    pub fn idle(&self) -> Option<TaskId> {
        self.idle
    }

    pub(crate) fn set_idle(&mut self, id: TaskId) {
        self.idle = Some(id);
    }

    #[inline]
    pub fn is_idle(&self, id: TaskId) -> bool {
        self.idle == Some(id)
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // -- Ready lists ---------------------------------------------------------

    /// Mark `id` ready and append it to the tail of its priority list.
    pub fn make_ready(&mut self, id: TaskId) {
        let priority = self.tasks[id.index()].priority as usize;
        self.tasks[id.index()].state = TaskState::Ready;
        self.ready[priority].push_back(&mut self.links, id);
        self.ready_bitmap |= 1 << priority;
    }

    /// Unlink a ready record from its list. Its state is left to the caller.
    pub fn remove_ready(&mut self, id: TaskId) {
        let priority = self.tasks[id.index()].priority as usize;
        self.ready[priority].remove(&mut self.links, id);
        if self.ready[priority].is_empty() {
            self.ready_bitmap &= !(1 << priority);
        }
    }

    /// Move a ready record to the tail of the list for `priority`.
    pub fn requeue(&mut self, id: TaskId, priority: Priority) {
        self.remove_ready(id);
        self.tasks[id.index()].priority = priority;
        self.make_ready(id);
    }

    pub fn highest_ready_priority(&self) -> Option<Priority> {
        if self.ready_bitmap == 0 {
            None
        } else {
            Some((31 - self.ready_bitmap.leading_zeros()) as Priority)
        }
    }

    /// The task the next context switch will select.
    pub fn peek_next(&self) -> Option<TaskId> {
        let priority = self.highest_ready_priority()?;
        self.ready[priority as usize].head()
    }

    /// The running task is no longer the one that should run.
    #[inline]
    pub fn needs_switch(&self) -> bool {
        self.peek_next() != self.current
    }

    /// Send the running task to the back of its level if it is at the front.
    pub fn rotate_current(&mut self) {
        let Some(current) = self.current else {
            return;
        };
        let task = &self.tasks[current.index()];
        if !task.is_ready() {
            return;
        }
        let list = &mut self.ready[task.priority as usize];
        if list.head() == Some(current) {
            list.rotate(&self.links);
        }
    }

    pub fn ready_list(&self, priority: Priority) -> &TaskList {
        &self.ready[priority as usize]
    }

    // -- Dispatch ------------------------------------------------------------

    /// Record `id` as the running task and give it a fresh quantum.
    pub fn dispatch(&mut self, id: TaskId, slice: u32) {
        self.current = Some(id);
        self.slice_left = slice;
        self.tasks[id.index()].dispatches = self.tasks[id.index()].dispatches.wrapping_add(1);
    }

    /// Count a tick and credit it to the running task.
    pub fn count_tick(&mut self) {
        self.tick_count += 1;
        if let Some(current) = self.current {
            let task = &mut self.tasks[current.index()];
            task.run_ticks = task.run_ticks.wrapping_add(1);
        }
    }

    /// Consume one tick of the running task's quantum; when it runs out the
    /// quantum is refilled and the task's level rotated.
    pub fn consume_slice(&mut self, slice: u32) {
        self.slice_left = self.slice_left.saturating_sub(1);
        if self.slice_left == 0 {
            self.slice_left = slice;
            self.rotate_current();
        }
    }

    pub fn reset_slice(&mut self, slice: u32) {
        self.slice_left = slice;
    }

    // -- Delay queue ---------------------------------------------------------

    /// Queue `id` to expire after exactly `ticks` ticks (`ticks > 0`).
    pub fn delay_insert(&mut self, id: TaskId, ticks: u32) {
        debug_assert!(ticks > 0);
        debug_assert!(!self.delay_queued[id.index()]);
        let mut remaining = ticks;
        let mut cursor = self.delayed.head();
        while let Some(node) = cursor {
            let delta = self.delay_delta[node.index()];
            if delta > remaining {
                self.delay_delta[node.index()] = delta - remaining;
                self.delay_delta[id.index()] = remaining;
                self.delayed.insert_before(&mut self.delay_links, node, id);
                self.delay_queued[id.index()] = true;
                return;
            }
            remaining -= delta;
            cursor = self.delayed.next_of(&self.delay_links, node);
        }
        self.delay_delta[id.index()] = remaining;
        self.delayed.push_back(&mut self.delay_links, id);
        self.delay_queued[id.index()] = true;
    }

    /// Take `id` off the delay queue, if it is on it.
    pub fn delay_remove(&mut self, id: TaskId) {
        if !self.delay_queued[id.index()] {
            return;
        }
        if let Some(next) = self.delayed.next_of(&self.delay_links, id) {
            self.delay_delta[next.index()] += self.delay_delta[id.index()];
        }
        self.delayed.remove(&mut self.delay_links, id);
        self.delay_delta[id.index()] = 0;
        self.delay_queued[id.index()] = false;
    }

    #[inline]
    pub fn is_delay_queued(&self, id: TaskId) -> bool {
        self.delay_queued[id.index()]
    }

    /// Ticks until `id` expires, if it is on the delay queue.
    pub fn remaining_delay(&self, id: TaskId) -> Option<u32> {
        if !self.delay_queued[id.index()] {
            return None;
        }
        let mut total = 0;
        for node in self.delayed.iter(&self.delay_links) {
            total += self.delay_delta[node.index()];
            if node == id {
                break;
            }
        }
        Some(total)
    }

    /// Advance the delay queue by one tick.
    pub fn advance_delays(&mut self) {
        if let Some(head) = self.delayed.head() {
            let delta = &mut self.delay_delta[head.index()];
            *delta = delta.saturating_sub(1);
        }
    }

    /// Pop the next record whose delay has run out.
    pub fn pop_expired(&mut self) -> Option<TaskId> {
        let head = self.delayed.head()?;
        if self.delay_delta[head.index()] != 0 {
            return None;
        }
        self.delayed.remove(&mut self.delay_links, head);
        self.delay_queued[head.index()] = false;
        Some(head)
    }

    // -- Reclamation queue ---------------------------------------------------

    pub fn queue_reclaim(&mut self, id: TaskId) {
        self.reclaim.push_back(&mut self.links, id);
    }

    pub fn dequeue_reclaim(&mut self, id: TaskId) {
        self.reclaim.remove(&mut self.links, id);
    }

    /// Next queued record after `after` (or the first one), skipping none.
    pub fn next_reclaim(&self, after: Option<TaskId>) -> Option<TaskId> {
        match after {
            None => self.reclaim.head(),
            Some(id) => self.reclaim.next_of(&self.links, id),
        }
    }

    pub fn reclaim_pending(&self) -> usize {
        self.reclaim.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Invariant audit (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
impl Scheduler {
    /// Panics unless every queue agrees with the record states.
    pub(crate) fn audit(&self) {
        let mut seen = [0u8; MAX_TASKS];
        for (priority, list) in self.ready.iter().enumerate() {
            assert_eq!(
                list.is_empty(),
                self.ready_bitmap & (1 << priority) == 0,
                "bitmap out of sync at level {priority}"
            );
            for id in list.iter(&self.links) {
                let task = self.task(id);
                assert_eq!(task.state, TaskState::Ready, "{id:?} queued but not ready");
                assert_eq!(task.priority as usize, priority, "{id:?} on the wrong level");
                seen[id.index()] += 1;
            }
        }
        for id in self.reclaim.iter(&self.links) {
            assert!(self.task(id).is_pending_reclaim());
            seen[id.index()] += 1;
        }
        for id in self.delayed.iter(&self.delay_links) {
            assert!(self.delay_queued[id.index()]);
            assert!(matches!(
                self.task(id).state,
                TaskState::Delayed | TaskState::Blocked
            ));
        }
        for task in self.live_tasks() {
            let i = task.id.index();
            match task.state {
                TaskState::Ready | TaskState::PendingDelete | TaskState::PendingRestart => {
                    assert_eq!(seen[i], 1, "{:?} in {} queues", task.id, seen[i]);
                }
                TaskState::Delayed => assert!(self.delay_queued[i]),
                _ => assert_eq!(seen[i], 0),
            }
        }
        if let Some(idle) = self.idle {
            if self.task(idle).is_ready() {
                assert!(self.ready[0].contains(&self.links, idle));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
