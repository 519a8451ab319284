//! Utility functions and helpers
//!
//! Atomic file writes and time formatting.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, atomic_write_jsonl};
pub use time::{format_uptime, hours_to_duration, seconds_since};
