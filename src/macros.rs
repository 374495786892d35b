// src/macros.rs

//
// Crate-internal logging macros.
//
// With `logging` the call sites become `tracing` events under the calling
// module's target, so `RUST_LOG=lms_rpc=debug` shows reply-queue churn and
// correlation mismatches.
//
// Without it, the two levels an operator must see still reach stderr:
// errors (failed acks, failed publishes) and warnings (timeouts, rejected
// requests, reconnects). Info and debug are type-checked and dropped.
//

#![allow(unused_macros)]

#[cfg(feature = "logging")]
mod levels {
    macro_rules! log_error { ($($arg:tt)*) => { tracing::error!($($arg)*) }; }
    macro_rules! log_warn  { ($($arg:tt)*) => { tracing::warn!($($arg)*) }; }
    macro_rules! log_info  { ($($arg:tt)*) => { tracing::info!($($arg)*) }; }
    macro_rules! log_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) }; }

    pub(crate) use log_debug;
    pub(crate) use log_error;
    pub(crate) use log_info;
    pub(crate) use log_warn;
}

// each body is spelled out: a helper macro named here would be resolved at
// the call site, where it is not in scope
#[cfg(not(feature = "logging"))]
mod levels {
    macro_rules! log_error {
        ($($arg:tt)*) => { eprintln!("[lms-rpc error] {}", format_args!($($arg)*)) };
    }
    macro_rules! log_warn {
        ($($arg:tt)*) => { eprintln!("[lms-rpc warn] {}", format_args!($($arg)*)) };
    }
    macro_rules! log_info {
        ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
    }
    macro_rules! log_debug {
        ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
    }

    pub(crate) use log_debug;
    pub(crate) use log_error;
    pub(crate) use log_info;
    pub(crate) use log_warn;
}

pub(crate) use levels::{log_debug, log_error, log_info, log_warn};
