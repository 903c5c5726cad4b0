//! # Result Codes and Kernel Faults
//!
//! Recoverable outcomes (contention, timeouts, misuse that a caller can
//! react to) are [`KernelError`] values returned through [`KernelResult`].
//! Programmer errors the kernel cannot continue from are [`KernelFault`]s
//! handed to [`fatal`], which panics.

use core::fmt;

use crate::config::ConfigError;
use crate::task::TaskId;

/// Result code of a kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// The resource is taken and the caller asked not to wait.
    Unavailable,
    /// The resource is taken and the calling task has been parked. Only
    /// returned by [`Kernel`](crate::kernel::Kernel) methods; the
    /// global API waits for the wake-up instead.
    WouldBlock,
    /// A bounded wait expired before the resource became available.
    Timeout,
    /// Release attempted by a task that does not own the lock.
    InvalidOwner,
    /// The object is still owned, referenced, or already being deleted.
    InUse,
    /// The storage was not allocated by the kernel heap (caller-supplied
    /// stacks cannot be deleted).
    NotInHeap,
    /// A malformed argument, caught only when validation is compiled in.
    InvalidArgument,
    /// The operation does not apply to the record's current state.
    InvalidState,
    /// The heap could not supply a stack.
    NoMemory,
    /// Every task or lock slot is in use.
    NoFreeSlot,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::Unavailable => "resource unavailable",
            KernelError::WouldBlock => "operation would block",
            KernelError::Timeout => "timed out",
            KernelError::InvalidOwner => "caller does not own the lock",
            KernelError::InUse => "resource in use",
            KernelError::NotInHeap => "storage not allocated from the kernel heap",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::InvalidState => "invalid state for this operation",
            KernelError::NoMemory => "out of memory",
            KernelError::NoFreeSlot => "no free slot",
        };
        f.write_str(msg)
    }
}

/// Unrecoverable kernel condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelFault {
    /// A kernel service was used before `init()`.
    NotInitialized,
    /// `init()` was called twice.
    AlreadyInitialized,
    /// The configuration failed validation.
    InvalidConfig(ConfigError),
    /// A task's stack canary was overwritten or its stack pointer left
    /// the stack region.
    StackOverflow(TaskId),
    /// `exit()` without a matching `enter()` on the critical section.
    CriticalSectionUnderflow,
    /// The ready queue was empty; the idle task has been lost.
    NoReadyTask,
}

impl fmt::Display for KernelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelFault::NotInitialized => f.write_str("kernel not initialized"),
            KernelFault::AlreadyInitialized => f.write_str("kernel already initialized"),
            KernelFault::InvalidConfig(e) => write!(f, "invalid configuration: {}", e),
            KernelFault::StackOverflow(id) => write!(f, "stack overflow in task {}", id.index()),
            KernelFault::CriticalSectionUnderflow => f.write_str("unbalanced critical section exit"),
            KernelFault::NoReadyTask => f.write_str("ready queue empty"),
        }
    }
}

/// Report a fault and stop. With `panic-halt` on target this halts the
/// core; under test it unwinds so the fault can be asserted.
#[cold]
#[inline(never)]
pub fn fatal(fault: KernelFault) -> ! {
    error!("kernel fault: {}", fault);
    panic!("kernel fault: {}", fault)
}
