//! # KeelOS Configuration
//!
//! Compile-time limits plus a small runtime [`KernelConfig`] that is
//! validated once when the kernel is initialised. Array sizes stay
//! compile-time constants so the whole kernel lives in static memory.

use core::fmt;

use crate::task::Priority;

/// Maximum number of task records (including the idle task).
/// Bounded by the `u8` task index.
pub const MAX_TASKS: usize = 16;

/// Maximum number of live locks (binary locks and mutexes together).
pub const MAX_LOCKS: usize = 16;

/// Number of distinct priority levels. Level 0 is reserved for the idle
/// task; higher numbers are more urgent. At most 32 (one bitmap word).
pub const PRIORITY_LEVELS: usize = 8;

/// Priority of the always-present idle task.
pub const IDLE_PRIORITY: Priority = 0;

/// Highest priority a task (or an aged waiter) can reach.
pub const MAX_PRIORITY: Priority = (PRIORITY_LEVELS - 1) as Priority;

/// SysTick frequency in Hz. One tick is the unit of every delay and timeout.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Ticks a task runs before its priority level is rotated.
pub const DEFAULT_TIME_SLICE: u32 = 1;

/// Stack size, in words, for tasks that do not ask for a specific size.
pub const DEFAULT_STACK_WORDS: usize = 256;

/// Stack size, in words, of the idle task.
pub const IDLE_STACK_WORDS: usize = 128;

/// Smallest stack accepted for a task: the 16-word exception frame plus
/// headroom for the canary and the first few calls.
pub const MIN_STACK_WORDS: usize = 64;

/// Value the whole stack is painted with at creation. The lowest word
/// doubles as the overflow canary.
pub const STACK_PAINT: u32 = 0xA5A5_A5A5;

/// BASEPRI value used by the kernel critical section. With 4 implemented
/// priority bits this masks NVIC priorities 0x40..=0xF0, which includes
/// SysTick and PendSV (both 0xF0). Interrupts at 0x00..0x30 keep running
/// and must not call into the kernel.
pub const KERNEL_MASK_PRIORITY: u8 = 0x40;

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Kernel options checked once by [`Kernel::init`](crate::kernel::Kernel::init).
///
/// Replaces a wide matrix of build switches: everything here is a plain
/// value, and anything inconsistent is rejected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KernelConfig {
    /// Tick rate in Hz.
    pub tick_hz: u32,
    /// Core clock in Hz, used to derive the SysTick reload value.
    pub system_clock_hz: u32,
    /// Round-robin quantum in ticks.
    pub time_slice_ticks: u32,
    /// Interrupt mask raised by the critical section.
    pub kernel_mask: u8,
    /// Verify the stack canary of the outgoing task on every switch.
    pub check_stack_overflow: bool,
    /// Reclaim deleted/restarted records (other than the caller) inline
    /// instead of waiting for the idle task.
    pub reclaim_immediately: bool,
}

impl KernelConfig {
    /// Default configuration built from the constants above.
    pub const DEFAULT: Self = Self {
        tick_hz: TICK_HZ,
        system_clock_hz: SYSTEM_CLOCK_HZ,
        time_slice_ticks: DEFAULT_TIME_SLICE,
        kernel_mask: KERNEL_MASK_PRIORITY,
        check_stack_overflow: true,
        reclaim_immediately: false,
    };

    pub const fn new() -> Self {
        Self::DEFAULT
    }

    /// SysTick reload value for this configuration.
    #[inline]
    pub const fn systick_reload(&self) -> u32 {
        self.system_clock_hz / self.tick_hz - 1
    }

    /// Check the configuration for values the kernel cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_hz == 0 || self.tick_hz > self.system_clock_hz {
            return Err(ConfigError::TickRate);
        }
        // SysTick has a 24-bit reload register.
        if self.systick_reload() > 0x00FF_FFFF {
            return Err(ConfigError::TickRate);
        }
        if self.time_slice_ticks == 0 {
            return Err(ConfigError::TimeSlice);
        }
        if self.kernel_mask == 0 {
            return Err(ConfigError::KernelMask);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Reason a [`KernelConfig`] was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Tick rate is zero, faster than the core clock, or needs a reload
    /// value SysTick cannot hold.
    TickRate,
    /// Round-robin quantum of zero ticks.
    TimeSlice,
    /// A BASEPRI of zero disables masking altogether.
    KernelMask,
    /// The idle task's stack is smaller than `MIN_STACK_WORDS`.
    IdleStack,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TickRate => f.write_str("tick rate out of range"),
            ConfigError::TimeSlice => f.write_str("time slice must be at least one tick"),
            ConfigError::KernelMask => f.write_str("kernel mask priority must be non-zero"),
            ConfigError::IdleStack => f.write_str("idle stack too small"),
        }
    }
}

// Compile-time sanity for the static layout.
const _: () = assert!(PRIORITY_LEVELS >= 2 && PRIORITY_LEVELS <= 32);
const _: () = assert!(MAX_TASKS >= 2 && MAX_TASKS < u8::MAX as usize);
const _: () = assert!(MAX_LOCKS < u8::MAX as usize);
