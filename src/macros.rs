// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Internal logging macros. They forward to the `log` crate when the `log`
//! feature is enabled, and expand to nothing otherwise.

/// Logs at the given `log` level.
#[cfg(feature = "log")]
macro_rules! log_at {
    ( $level:ident, $($args:tt)* ) => {
        log::$level!( $($args)* )
    };
}

/// Discards the message. Variables only used for logging must therefore be
/// named with a leading underscore.
#[cfg(not(feature = "log"))]
macro_rules! log_at {
    ( $level:ident, $($args:tt)* ) => {
        ()
    };
}

macro_rules! log_debug {
    ( $($args:tt)* ) => {
        $crate::macros::log_at!(debug, $($args)*)
    };
}

macro_rules! log_error {
    ( $($args:tt)* ) => {
        $crate::macros::log_at!(error, $($args)*)
    };
}

macro_rules! log_warn {
    ( $($args:tt)* ) => {
        $crate::macros::log_at!(warn, $($args)*)
    };
}

// Only used to report the parallelism of the pool.
#[cfg(feature = "log_parallelism")]
macro_rules! log_info {
    ( $($args:tt)* ) => {
        $crate::macros::log_at!(info, $($args)*)
    };
}

#[cfg(feature = "log_parallelism")]
macro_rules! log_trace {
    ( $($args:tt)* ) => {
        $crate::macros::log_at!(trace, $($args)*)
    };
}

pub(crate) use log_at;
pub(crate) use log_debug;
pub(crate) use log_error;
#[cfg(feature = "log_parallelism")]
pub(crate) use log_info;
#[cfg(feature = "log_parallelism")]
pub(crate) use log_trace;
pub(crate) use log_warn;
