//! Batch-wide circuit breaker for hard failures.
//!
//! The budget tolerates roughly one hard failure per
//! [`REQUESTS_PER_ERROR_UNIT`] requests in the batch. Once the count
//! exceeds the ceiling, every request still in flight skips further
//! retries and falls back immediately, so a systemically failing endpoint
//! stops burning quota.
//!
//! Soft failures (invalid or partial payloads) never touch the budget.

use std::sync::Mutex;

use tracing::warn;

/// One unit of error budget is granted per this many batch requests.
pub const REQUESTS_PER_ERROR_UNIT: usize = 15;

/// Ceiling before any batch arms the budget, so standalone requests
/// outside a batch still retry.
const DEFAULT_CEILING: usize = 10;

#[derive(Debug)]
struct BudgetState {
    ceiling: usize,
    count: usize,
}

impl Default for BudgetState {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_CEILING,
            count: 0,
        }
    }
}

/// Shared hard-failure counter with a batch-sized ceiling.
#[derive(Debug, Default)]
pub struct ErrorBudget {
    state: Mutex<BudgetState>,
}

impl ErrorBudget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the budget for a batch of `batch_len` requests and clear the
    /// count. A small batch gets a ceiling of zero: the first counted
    /// hard failure already exhausts it.
    pub fn arm(&self, batch_len: usize) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.ceiling = batch_len / REQUESTS_PER_ERROR_UNIT;
        state.count = 0;
    }

    /// Count one hard failure. Returns `true` when the budget is now
    /// exhausted.
    pub fn record(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.count += 1;
        let exhausted = state.count > state.ceiling;
        if exhausted {
            warn!(
                count = state.count,
                ceiling = state.ceiling,
                "hard-failure budget exhausted"
            );
        }
        exhausted
    }

    /// Whether the budget is already exhausted.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.count > state.ceiling
    }
}
