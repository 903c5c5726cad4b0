//! Kernel logging macros.
//!
//! With the `defmt` feature every macro forwards to the matching `defmt`
//! macro, so format strings follow defmt syntax and logged types implement
//! `defmt::Format`. Without it the macros expand to nothing but still
//! borrow their arguments, so call sites compile warning-free either way.

#![allow(unused_macros)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::info!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::error!($s $(, $x)*);
            #[cfg(not(feature = "defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

/// Argument check that is compiled in with debug assertions or the
/// `validate` feature and disappears from plain release builds.
macro_rules! validate {
    ($cond:expr) => {
        #[cfg(any(debug_assertions, feature = "validate"))]
        {
            if !($cond) {
                warn!("argument check failed: {}", stringify!($cond));
                return Err($crate::error::KernelError::InvalidArgument);
            }
        }
    };
}
