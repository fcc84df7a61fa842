//! Foundational low-level utilities shared across Argus crates.
//!
//! Provides wall-clock helpers used for process and error timestamps, plus
//! poison-tolerant lock accessors used by the supervisor's shared state.

pub mod sync_utils;
pub mod time_utils;

pub use sync_utils::{lock_or_recover, read_or_recover, write_or_recover};
pub use time_utils::{current_unix_timestamp_ms, is_within_window_ms};
