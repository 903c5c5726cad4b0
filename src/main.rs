//! # KeelOS Example Firmware
//!
//! Demonstrates priority scheduling, exact delays, signals and both lock
//! kinds with five tasks:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `sampler_task` | 4 | Wakes every 100 ticks, updates the shared reading under the mutex, signals the reporter |
//! | `reporter_task` | 3 | Hibernates until signalled, then reads the shared value under the mutex |
//! | `logger_task` | 2 | Holds the mutex for long stretches; inherits priority 4 while the sampler waits |
//! | `worker_task` ×2 | 1 | Equal-priority busy loops sharing the CPU round robin; contend for the aging UART lock |
//!
//! ## Expected Dynamics
//!
//! 1. **Inheritance**: whenever the sampler finds the logger holding the
//!    mutex, the logger runs at priority 4 until it releases, so the
//!    reporter (priority 3) can never stretch the sampler's wait.
//!
//! 2. **Round robin**: the two workers alternate on every tick while no
//!    higher-priority task is ready.
//!
//! 3. **Aging**: a worker passed over for the UART lock gains one level per
//!    release and drops back once it gets the lock.
//!
//! The binary only does something useful on an ARM target; on the host it
//! builds to an empty program.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
mod firmware {
    use core::cell::Cell;
    use core::ptr;

    use cortex_m::interrupt::{self, Mutex as IrqCell};
    use cortex_m_rt::entry;

    use keelos::{
        BinaryLock, InitialState, Mutex, StarvationAging, TaskId, TaskOptions, Timeout,
    };

    /// Handles created in `main` and shared with the tasks.
    #[derive(Clone, Copy)]
    struct Handles {
        shared: Mutex,
        uart: BinaryLock<StarvationAging>,
        reporter: TaskId,
    }

    static HANDLES: IrqCell<Cell<Option<Handles>>> = IrqCell::new(Cell::new(None));

    /// Sensor reading guarded by `Handles::shared`.
    static READING: IrqCell<Cell<u32>> = IrqCell::new(Cell::new(0));

    /// Backing memory for heap-allocated task stacks.
    static mut STACKS: [u32; 8 * keelos::config::DEFAULT_STACK_WORDS] =
        [0; 8 * keelos::config::DEFAULT_STACK_WORDS];

    const SAMPLE_PERIOD: u32 = 100;
    const NEW_SAMPLE: u32 = 1 << 0;

    fn handles() -> Handles {
        interrupt::free(|cs| HANDLES.borrow(cs).get()).unwrap_or_else(|| loop {
            cortex_m::asm::wfi();
        })
    }

    fn busy(iterations: u32) -> u32 {
        let mut acc: u32 = 0;
        for i in 0..iterations {
            acc = acc.wrapping_add(i);
        }
        acc
    }

    // -----------------------------------------------------------------------
    // Task entry points
    // -----------------------------------------------------------------------

    /// **Sampler** (Priority 4)
    ///
    /// Periodic producer. Sleeps exactly `SAMPLE_PERIOD` ticks, stores a
    /// new reading under the mutex and signals the reporter.
    extern "C" fn sampler_task(_: usize) {
        let h = handles();
        let mut sample: u32 = 0;
        loop {
            let _ = keelos::delay(SAMPLE_PERIOD);
            sample = sample.wrapping_add(busy(500) & 0xFF);

            if keelos::acquire(&h.shared, Timeout::Forever).is_ok() {
                interrupt::free(|cs| READING.borrow(cs).set(sample));
                let _ = keelos::release(&h.shared);
            }
            let _ = keelos::signal(h.reporter, NEW_SAMPLE);
        }
    }

    /// **Reporter** (Priority 3)
    ///
    /// Starts hibernating and is woken by each new sample. Reads the value
    /// under the mutex with a bounded wait.
    extern "C" fn reporter_task(_: usize) {
        let h = handles();
        loop {
            if keelos::take_signals(NEW_SAMPLE) == 0 {
                if let Some(me) = keelos::current_task() {
                    let _ = keelos::hibernate(me);
                }
                continue;
            }
            match keelos::acquire(&h.shared, Timeout::Ticks(20)) {
                Ok(()) => {
                    let _value = interrupt::free(|cs| READING.borrow(cs).get());
                    let _ = keelos::release(&h.shared);
                }
                Err(_) => keelos::yield_now(),
            }
        }
    }

    /// **Logger** (Priority 2)
    ///
    /// Holds the mutex for long stretches of work. The sampler blocking on
    /// it lifts the logger to priority 4 until the release.
    extern "C" fn logger_task(_: usize) {
        let h = handles();
        loop {
            if keelos::acquire(&h.shared, Timeout::Forever).is_ok() {
                busy(20_000);
                let _ = keelos::release(&h.shared);
            }
            let _ = keelos::delay(7);
        }
    }

    /// **Worker** (Priority 1, two instances)
    ///
    /// Busy loops that only lose the CPU to preemption and the round-robin
    /// quantum; every so often they queue for the UART lock.
    extern "C" fn worker_task(id: usize) {
        let h = handles();
        let mut rounds: u32 = 0;
        loop {
            busy(1_000 + id as u32 * 250);
            rounds = rounds.wrapping_add(1);
            if rounds % 16 == 0 && keelos::acquire(&h.uart, Timeout::Ticks(50)).is_ok() {
                busy(2_000);
                let _ = keelos::release(&h.uart);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Firmware entry point. Initializes the kernel, creates the locks and
    /// tasks, and starts scheduling. Does not return.
    #[entry]
    fn main() -> ! {
        // SAFETY: the stack heap is handed to the kernel once, before any
        // task exists.
        keelos::init(unsafe { &mut *ptr::addr_of_mut!(STACKS) });

        let shared = keelos::create_mutex(false).unwrap_or_else(|_| halt());
        let uart = keelos::create_lock::<StarvationAging>(false).unwrap_or_else(|_| halt());

        let reporter = keelos::create_task(
            reporter_task,
            TaskOptions::new(3)
                .name("reporter")
                .initial_state(InitialState::Hibernating),
        )
        .unwrap_or_else(|_| halt());

        interrupt::free(|cs| {
            HANDLES.borrow(cs).set(Some(Handles {
                shared,
                uart,
                reporter,
            }))
        });

        let tasks: [(extern "C" fn(usize), TaskOptions); 4] = [
            (sampler_task, TaskOptions::new(4).name("sampler")),
            (logger_task, TaskOptions::new(2).name("logger")),
            (worker_task, TaskOptions::new(1).name("worker-a").arg(0)),
            (worker_task, TaskOptions::new(1).name("worker-b").arg(1)),
        ];
        for (entry, options) in tasks {
            if keelos::create_task(entry, options).is_err() {
                halt();
            }
        }

        // Start the scheduler — does not return
        keelos::start()
    }

    fn halt() -> ! {
        loop {
            cortex_m::asm::bkpt();
        }
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
