//! Intrusive task lists over the task arena.
//!
//! A [`TaskList`] is a circular doubly-linked list of [`TaskId`]s whose
//! links live in a separate `[Link; MAX_TASKS]` array, one entry per
//! arena slot. The scheduler keeps two such arrays: one shared by the
//! ready lists and lock wait sets (a record is in at most one of them),
//! and one for the delay queue. Lists only store the head; the tail is
//! `head.prev`.

use crate::task::TaskId;

/// Neighbour indices of one record within the list it currently belongs to.
/// Meaningless while the record is not in a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub next: TaskId,
    pub prev: TaskId,
}

impl Link {
    pub const UNLINKED: Self = Self {
        next: TaskId::new(0),
        prev: TaskId::new(0),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskList {
    head: Option<TaskId>,
    len: usize,
}

impl TaskList {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    #[inline]
    pub fn tail(&self, links: &[Link]) -> Option<TaskId> {
        self.head.map(|h| links[h.index()].prev)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Successor of `id`, or `None` when `id` is the tail.
    #[inline]
    pub fn next_of(&self, links: &[Link], id: TaskId) -> Option<TaskId> {
        let next = links[id.index()].next;
        if Some(next) == self.head {
            None
        } else {
            Some(next)
        }
    }

    pub fn push_back(&mut self, links: &mut [Link], id: TaskId) {
        match self.head {
            None => {
                links[id.index()] = Link { next: id, prev: id };
                self.head = Some(id);
            }
            Some(head) => {
                let tail = links[head.index()].prev;
                links[id.index()] = Link { next: head, prev: tail };
                links[tail.index()].next = id;
                links[head.index()].prev = id;
            }
        }
        self.len += 1;
    }

    /// Insert `id` immediately before `at`, which must be in this list.
    pub fn insert_before(&mut self, links: &mut [Link], at: TaskId, id: TaskId) {
        let prev = links[at.index()].prev;
        links[id.index()] = Link { next: at, prev };
        links[prev.index()].next = id;
        links[at.index()].prev = id;
        if self.head == Some(at) {
            self.head = Some(id);
        }
        self.len += 1;
    }

    /// Unlink `id`, which must be in this list.
    pub fn remove(&mut self, links: &mut [Link], id: TaskId) {
        debug_assert!(self.len > 0);
        let Link { next, prev } = links[id.index()];
        if next == id {
            self.head = None;
        } else {
            links[prev.index()].next = next;
            links[next.index()].prev = prev;
            if self.head == Some(id) {
                self.head = Some(next);
            }
        }
        links[id.index()] = Link::UNLINKED;
        self.len -= 1;
    }

    pub fn pop_front(&mut self, links: &mut [Link]) -> Option<TaskId> {
        let head = self.head?;
        self.remove(links, head);
        Some(head)
    }

    /// Move the head to the tail.
    #[inline]
    pub fn rotate(&mut self, links: &[Link]) {
        if let Some(head) = self.head {
            self.head = Some(links[head.index()].next);
        }
    }

    pub fn iter<'a>(&self, links: &'a [Link]) -> Iter<'a> {
        Iter {
            links,
            head: self.head,
            next: self.head,
        }
    }

    pub fn contains(&self, links: &[Link], id: TaskId) -> bool {
        self.iter(links).any(|t| t == id)
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

/// Head-to-tail iterator over a [`TaskList`].
pub struct Iter<'a> {
    links: &'a [Link],
    head: Option<TaskId>,
    next: Option<TaskId>,
}

impl Iterator for Iter<'_> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let current = self.next?;
        let following = self.links[current.index()].next;
        self.next = if Some(following) == self.head {
            None
        } else {
            Some(following)
        };
        Some(current)
    }
}
