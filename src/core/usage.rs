//! Batch-scoped token accounting.
//!
//! The ledger accumulates normalized token usage across every successful
//! call in a batch, plus the count of requests that exhausted their
//! retries without a usable result. It is reset at batch start and read
//! via point-in-time snapshots.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::core::wire::TokenUsage;

/// Point-in-time snapshot of accumulated token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    /// input + output.
    pub total_tokens: u64,
}

/// Thread-safe accumulator for token usage and unresolved errors.
#[derive(Debug, Default)]
pub struct UsageLedger {
    totals: Mutex<UsageTotals>,
    unresolved_errors: AtomicUsize,
}

impl UsageLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call's usage.
    pub fn record(&self, usage: TokenUsage) {
        let mut totals = self.totals.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        totals.input_tokens += usage.input;
        totals.cached_tokens += usage.cached;
        totals.output_tokens += usage.output;
        totals.reasoning_tokens += usage.reasoning;
        totals.total_tokens += usage.input + usage.output;
    }

    /// Note a request that ended in terminal fallback after failed retries.
    pub fn note_unresolved(&self) {
        self.unresolved_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Unresolved-error count since the last reset.
    #[must_use]
    pub fn unresolved(&self) -> usize {
        self.unresolved_errors.load(Ordering::Relaxed)
    }

    /// Snapshot the accumulated totals.
    #[must_use]
    pub fn snapshot(&self) -> UsageTotals {
        *self.totals.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Zero all counters. Called at batch start.
    pub fn reset(&self) {
        *self.totals.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            UsageTotals::default();
        self.unresolved_errors.store(0, Ordering::Relaxed);
    }
}
