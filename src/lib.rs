//! translate-dispatch - batch LLM call dispatcher for machine translation.
//!
//! Fans id-addressed text segments out to an OpenAI-compatible chat
//! endpoint under client-side RPM/TPM quota windows, retries with a
//! soft/hard failure taxonomy and a batch-wide error budget, repairs
//! partial replies against the source segments, and always resolves
//! every request to a usable value.

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod core;
pub mod error;
pub mod util;

pub use crate::core::{
    Agent, AgentConfig, ErrorBudget, Handled, PlainText, ProgressFn, Provider, QuotaWindow,
    ResultHandler, SegmentMap, SegmentTranslator, ThinkingMode, UsageLedger, UsageTotals,
};
pub use error::{DispatchError, Result};
pub use util::estimate_tokens;
