//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! BASEPRI masking for the kernel critical section, PendSV for deferred
//! context switches, SysTick for the scheduler tick.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler saves and restores
//! R4–R11 around [`keelos_switch_context`](crate::kernel::keelos_switch_context),
//! which completes the full context save/restore. Tasks must not use the
//! FPU (build for `thumbv7em-none-eabi`); only the basic frame is switched.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest) — runs only when no other ISR is active
//!
//! Neither can preempt the other, so the tick and a requested switch are
//! always processed one after the other, and both are held off by the
//! kernel BASEPRI level.

use core::arch::{asm, global_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;
use cortex_m::register::{basepri, basepri_max};
use cortex_m_rt::exception;

use crate::arch::frame;
use crate::port::Port;
use crate::task::{StackRegion, TaskEntry};

/// NVIC priority given to PendSV and SysTick.
const LOWEST_PRIORITY: u8 = 0xFF;

/// The Cortex-M4 port. Stateless: everything lives in core registers.
pub struct CortexM4;

impl CortexM4 {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for CortexM4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for CortexM4 {
    fn start(&self, first_sp: *mut u32, tick_reload: u32) {
        cortex_m::interrupt::disable();

        // SAFETY: the kernel is the only user of SCB and SYST from here on.
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        unsafe {
            cp.SCB.set_priority(SystemHandler::PendSV, LOWEST_PRIORITY);
            cp.SCB.set_priority(SystemHandler::SysTick, LOWEST_PRIORITY);
        }

        cp.SYST.set_reload(tick_reload);
        cp.SYST.clear_current();
        cp.SYST.set_clock_source(SystClkSource::Core);
        cp.SYST.enable_counter();
        cp.SYST.enable_interrupt();

        // SAFETY: called once, with the frame built by `init_stack`.
        unsafe { start_first_task(first_sp) }
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

    #[inline]
    fn request_yield(&self) {
        SCB::set_pendsv();
    }

    #[inline]
    fn clear_yield(&self) {
        SCB::clear_pendsv();
    }

    #[inline]
    fn yield_pending(&self) -> bool {
        SCB::is_pendsv_pending()
    }

    #[inline]
    fn raise_mask(&self, level: u8) -> u8 {
        let previous = basepri::read();
        // BASEPRI_MAX only ever tightens the mask.
        basepri_max::write(level);
        previous
    }

    #[inline]
    fn restore_mask(&self, previous: u8) {
        // SAFETY: restores a value previously read from BASEPRI.
        unsafe { basepri::write(previous) }
    }

    #[inline]
    fn wait_for_interrupt(&self) {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching to PSP and branching to Thread mode.
///
/// Called once from [`CortexM4::start`] and never returns. The frame is
/// unwound by hand since there is no exception to return from: R0 gets
/// the task argument, LR the exit trampoline.
///
/// # Safety
/// Must only be called once, with interrupts disabled and a stack pointer
/// produced by [`frame::build`].
unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the software-saved R4-R11 and make that the PSP
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unwind the hardware part of the frame
        "pop {{r0-r3, r12}}",
        "pop {{lr}}",          // exit trampoline
        "pop {{r5}}",          // entry point
        "pop {{r6}}",          // xPSR, discarded

        // Exception-return PCs have bit 0 clear; a branch needs it set
        "orr r5, r5, #1",
        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// PendSV exception handler.
//
// 1. Push R4–R11 onto the outgoing task's process stack
// 2. Hand the resulting PSP to the kernel, which stores it and selects the
//    next task, returning that task's saved PSP
// 3. Pop R4–R11 from the incoming stack and return through EXC_RETURN,
//    letting the hardware restore R0–R3, R12, LR, PC and xPSR
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    push {{r0, lr}}",
    "    bl keelos_switch_context",
    "    pop {{r1, lr}}",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    bx lr",
    ".size PendSV, . - PendSV",
);

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// Scheduler tick. Pends PendSV if the tick changed who should run.
#[exception]
fn SysTick() {
    crate::kernel::on_tick();
}
