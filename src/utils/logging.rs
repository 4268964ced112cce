//! Logging switches for chatty modules.
//!
//! The ingest path sees every sensor callback, so its per-reading logs are
//! gated behind a module-level flag instead of relying on `RUST_LOG` alone:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_warn};
//!
//! log_debug!("reading dropped: {reason}");
//! ```

/// Conditional debug logging.
///
/// The calling module must define `const ENABLE_LOGS: bool`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Conditional info logging.
///
/// The calling module must define `const ENABLE_LOGS: bool`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional warn logging.
///
/// The calling module must define `const ENABLE_LOGS: bool`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional error logging.
///
/// The calling module must define `const ENABLE_LOGS: bool`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Initialise the global logger (reads `RUST_LOG`, defaults to `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
