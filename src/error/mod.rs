//! Error types for translate-dispatch.
//!
//! Uses `thiserror` for structured error types.
//!
//! ## Error Taxonomy
//!
//! Failures during a dispatch fall into two classes:
//! - **Hard**: transport errors, timeouts, HTTP status errors, and
//!   malformed responses. These count against the batch [`ErrorBudget`]
//!   and trigger a throttle cooldown for 429-class statuses.
//! - **Soft**: the endpoint responded, but the payload is semantically
//!   invalid or incomplete. Soft outcomes never surface as errors at all;
//!   result handlers report them as [`Handled::Invalid`] or
//!   [`Handled::Partial`] verdicts, because a partial payload carries a
//!   typed best-effort value that must survive across retries.
//!
//! No error of either class ever escapes a batch: the executor resolves
//! every failure mode to a terminal fallback value.
//!
//! [`ErrorBudget`]: crate::core::budget::ErrorBudget
//! [`Handled::Invalid`]: crate::core::executor::Handled::Invalid
//! [`Handled::Partial`]: crate::core::executor::Handled::Partial

use thiserror::Error;

/// Main error type for dispatch operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The endpoint returned a non-success HTTP status.
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection-level failure (DNS, TLS, reset, refused).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded the configured per-call timeout.
    #[error("request timeout after {0}s")]
    Timeout(u64),

    /// The response body did not have the expected shape
    /// (missing `choices`, undecodable JSON, etc.).
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The provider refused the completion (`finish_reason: content_filter`).
    #[error("response content was filtered by the provider")]
    ContentFiltered,

    /// Invalid value in the agent configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid { key: String, message: String },

    /// Error parsing a configuration document.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DispatchError {
    /// Whether this error counts against the batch error budget.
    ///
    /// Hard errors are transport-, status-, or parse-level failures.
    /// Configuration errors are not hard: they are raised before any
    /// request is issued and never enter the retry loop.
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        matches!(
            self,
            Self::Status { .. }
                | Self::Transport(_)
                | Self::Timeout(_)
                | Self::MalformedResponse(_)
                | Self::ContentFiltered
        )
    }

    /// Whether this error indicates provider-side throttling.
    ///
    /// Throttling adds a fixed cooldown on top of the local quota window
    /// before the next attempt.
    #[must_use]
    pub const fn is_throttle(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }

    /// Classify a `reqwest` error at the call site.
    pub(crate) fn from_transport(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_secs)
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
