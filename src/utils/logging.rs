//! Logging setup and per-module switchable log macros.
//!
//! Background loops that log on every cycle define a module-level flag and use the macros:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn, log_error};
//!
//! log_info!("probe cycle finished");
//! ```

use log::LevelFilter;

pub const DEBUG_ENV: &str = "KIOSK_DEBUG";

/// Initialises `env_logger` from `RUST_LOG`, defaulting to `Info` (`Debug` when `KIOSK_DEBUG=1`).
pub fn init() {
    let debug_mode = std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let default_level = if debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level);
    // RUST_LOG directives win over the default level.
    if let Ok(directives) = std::env::var("RUST_LOG") {
        builder.parse_filters(&directives);
    }
    let _ = builder.format_timestamp_millis().try_init();
}

/// Masks an OTP for logging, keeping only its last two characters.
pub fn mask_code(code: &str) -> String {
    let visible: String = code
        .chars()
        .rev()
        .take(2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let hidden = code.chars().count().saturating_sub(2);
    format!("{}{}", "*".repeat(hidden), visible)
}

/// Conditional info logging, gated by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional warn logging, gated by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional error logging, gated by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
