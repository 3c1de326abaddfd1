//! Core dispatch engine: configuration, quota, budget, and the call
//! pipeline.

pub mod budget;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod logging;
pub mod provider;
pub mod quota;
pub mod reconcile;
pub mod segments;
pub mod usage;
pub mod wire;

pub use budget::{ErrorBudget, REQUESTS_PER_ERROR_UNIT};
pub use config::{AgentConfig, ThinkingMode};
pub use dispatcher::{Agent, ProgressFn};
pub use executor::{Handled, MAX_CONTINUE_FETCHES, PlainText, ResultHandler, backoff_delay};
pub use logging::{LogFormat, LogLevel};
pub use provider::Provider;
pub use quota::QuotaWindow;
pub use reconcile::{SegmentMap, continuation_hint, parse_reply, reconcile, strip_code_fence};
pub use segments::SegmentTranslator;
pub use usage::{UsageLedger, UsageTotals};
pub use wire::{TokenUsage, sanitize_reply};
