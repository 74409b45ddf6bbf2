//! Shared error plumbing and small helpers used across all jamra crates.

pub mod error;
pub mod time;

pub use {
    error::FromMessage,
    time::now_ms,
};
