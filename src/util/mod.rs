//! Shared utilities.

pub mod estimate;

pub use estimate::estimate_tokens;
