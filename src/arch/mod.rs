//! # Architecture Abstraction Layer
//!
//! Port implementations for the kernel. The Cortex-M4 port is built for
//! ARM targets; every other target gets the host port, which simulates
//! the yield request and interrupt mask so the scheduler can be exercised
//! in ordinary unit tests. Both share the same synthetic frame layout.

pub mod frame;

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(not(target_arch = "arm"))]
pub mod host;

/// Port used by the global kernel instance.
#[cfg(target_arch = "arm")]
pub type DefaultPort = cortex_m4::CortexM4;

/// Port used by the global kernel instance.
#[cfg(not(target_arch = "arm"))]
pub type DefaultPort = host::HostPort;
