//! Sliding-window rate limiter for RPM and TPM quotas.
//!
//! Two independent 60-second windows: one counting requests (weight 1 per
//! call) and one summing estimated token weights. The window boundary is
//! always "now minus 60s", never a clock-aligned bucket, so admission
//! cannot burst at minute boundaries.
//!
//! All waiters sleep outside the lock and re-check on wake; admission
//! order between concurrent callers is therefore best-effort, not FIFO.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Length of both sliding windows.
const WINDOW: Duration = Duration::from_secs(60);

/// Safety margin added to every computed wait before re-checking, so a
/// waiter does not wake exactly on the boundary and spin.
const RECHECK_SLACK: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct WindowState {
    /// Admission timestamps for the request-count window.
    requests: VecDeque<Instant>,
    /// (timestamp, weight) pairs for the token window.
    tokens: VecDeque<(Instant, u64)>,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        let cutoff = now.checked_sub(WINDOW);
        let Some(cutoff) = cutoff else { return };
        while self.requests.front().is_some_and(|&t| t <= cutoff) {
            self.requests.pop_front();
        }
        while self.tokens.front().is_some_and(|&(t, _)| t <= cutoff) {
            self.tokens.pop_front();
        }
    }
}

/// Sliding-window quota tracker shared by all concurrent callers.
///
/// Either limit may be `None` (unlimited); with both absent,
/// [`QuotaWindow::acquire`] returns immediately.
#[derive(Debug)]
pub struct QuotaWindow {
    rpm: Option<u32>,
    tpm: Option<u64>,
    state: Mutex<WindowState>,
}

impl QuotaWindow {
    #[must_use]
    pub fn new(rpm: Option<u32>, tpm: Option<u64>) -> Self {
        Self {
            rpm,
            tpm,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Configured requests-per-minute limit.
    #[must_use]
    pub const fn rpm(&self) -> Option<u32> {
        self.rpm
    }

    /// Configured tokens-per-minute limit.
    #[must_use]
    pub const fn tpm(&self) -> Option<u64> {
        self.tpm
    }

    /// Block (by suspending) until both windows have headroom for a call
    /// of `weight` estimated tokens, then record the usage atomically.
    ///
    /// The lock is held only for pruning and the headroom check, never
    /// across the sleep.
    pub async fn acquire(&self, weight: u64) {
        if self.rpm.is_none() && self.tpm.is_none() {
            return;
        }

        loop {
            let wait = self.try_admit(Instant::now(), weight);
            match wait {
                None => return,
                Some(wait) => {
                    trace!(wait_ms = wait.as_millis() as u64, "quota window full, waiting");
                    tokio::time::sleep(wait + RECHECK_SLACK).await;
                }
            }
        }
    }

    /// Single admission check at `now`: records usage and returns `None`
    /// when both windows have headroom, otherwise the required wait.
    fn try_admit(&self, now: Instant, weight: u64) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.prune(now);

        let mut wait = Duration::ZERO;

        if let Some(rpm) = self.rpm {
            if state.requests.len() >= rpm as usize {
                if let Some(&earliest) = state.requests.front() {
                    wait = wait.max(WINDOW.saturating_sub(now.duration_since(earliest)));
                }
            }
        }

        if let Some(tpm) = self.tpm {
            let in_window: u64 = state.tokens.iter().map(|&(_, w)| w).sum();
            if in_window + weight > tpm {
                // An empty token window admits even an over-limit weight:
                // a single oversized request must not deadlock.
                if let Some(&(earliest, _)) = state.tokens.front() {
                    wait = wait.max(WINDOW.saturating_sub(now.duration_since(earliest)));
                }
            }
        }

        if wait > Duration::ZERO {
            return Some(wait);
        }

        if self.rpm.is_some() {
            state.requests.push_back(now);
        }
        if self.tpm.is_some() {
            state.tokens.push_back((now, weight));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    #[tokio::test]
    async fn unlimited_admits_immediately() {
        let quota = QuotaWindow::new(None, None);
        let base = Instant::now();
        assert_eq!(quota.try_admit(base, 10_000), None);
        quota.acquire(1_000_000).await;
    }

    #[tokio::test]
    async fn rpm_admits_up_to_limit_then_waits() {
        let quota = QuotaWindow::new(Some(2), None);
        let base = Instant::now();
        assert_eq!(quota.try_admit(at(base, 0.0), 0), None);
        assert_eq!(quota.try_admit(at(base, 1.0), 0), None);

        // Third call must wait until the first entry leaves the window.
        let wait = quota.try_admit(at(base, 2.0), 0).expect("window full");
        assert_eq!(wait, Duration::from_secs(58));
    }

    #[tokio::test]
    async fn rpm_window_slides() {
        let quota = QuotaWindow::new(Some(2), None);
        let base = Instant::now();
        assert_eq!(quota.try_admit(at(base, 0.0), 0), None);
        assert_eq!(quota.try_admit(at(base, 30.0), 0), None);
        assert!(quota.try_admit(at(base, 40.0), 0).is_some());
        // First entry expired at t=60; one slot free again.
        assert_eq!(quota.try_admit(at(base, 61.0), 0), None);
        // The t=30 entry still pins the window.
        assert!(quota.try_admit(at(base, 62.0), 0).is_some());
    }

    #[tokio::test]
    async fn tpm_sums_weights_within_window() {
        let quota = QuotaWindow::new(None, Some(100));
        let base = Instant::now();
        assert_eq!(quota.try_admit(at(base, 0.0), 60), None);
        assert_eq!(quota.try_admit(at(base, 1.0), 40), None);
        // 60 + 40 + 1 > 100: wait for the t=0 entry to expire.
        let wait = quota.try_admit(at(base, 2.0), 1).expect("over token limit");
        assert_eq!(wait, Duration::from_secs(58));
        // After expiry of the first weight the request fits.
        assert_eq!(quota.try_admit(at(base, 61.0), 60), None);
    }

    #[tokio::test]
    async fn oversized_weight_admits_on_empty_window() {
        // A single request above TPM must pass rather than wait forever.
        let quota = QuotaWindow::new(None, Some(100));
        let base = Instant::now();
        assert_eq!(quota.try_admit(base, 500), None);
    }

    /// Quota invariant: for any 60s window, admitted count <= RPM and
    /// admitted weight <= TPM, driven by a simulated clock.
    #[tokio::test]
    async fn invariant_holds_under_simulated_clock() {
        let quota = QuotaWindow::new(Some(5), Some(50));
        let base = Instant::now();
        let mut admitted: Vec<(f64, u64)> = Vec::new();

        let mut t = 0.0;
        while t < 300.0 {
            if quota.try_admit(at(base, t), 7).is_none() {
                admitted.push((t, 7));
            }
            t += 1.3;
        }

        for &(start, _) in &admitted {
            let in_window: Vec<_> = admitted
                .iter()
                .filter(|&&(t, _)| t > start - 60.0 && t <= start)
                .collect();
            assert!(in_window.len() <= 5, "RPM exceeded in window ending at {start}");
            let weight: u64 = in_window.iter().map(|&&(_, w)| w).sum();
            assert!(weight <= 50, "TPM exceeded in window ending at {start}");
        }
    }

    /// RPM=2, five concurrent instantaneous calls. The fifth
    /// admission cannot happen before ~120s of (virtual) elapsed time.
    #[tokio::test(start_paused = true)]
    async fn five_calls_at_rpm_two_take_two_minutes() {
        use std::sync::Arc;

        let quota = Arc::new(QuotaWindow::new(Some(2), None));
        let start = Instant::now();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let quota = Arc::clone(&quota);
                tokio::spawn(async move {
                    quota.acquire(0).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("task completes");
        }

        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(120),
            "fifth admission after {elapsed:?}, expected >= 120s"
        );
        // And not pathologically late either.
        assert!(elapsed < Duration::from_secs(125));
    }
}
