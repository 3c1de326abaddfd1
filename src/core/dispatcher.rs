//! Batch dispatch over a bounded concurrency pool.
//!
//! [`Agent`] owns everything a batch shares: the connection-pooled HTTP
//! client, the quota window, the usage ledger, and the error budget.
//! [`Agent::send_batch`] fans prompts out under a counting semaphore and
//! fans results back in with input-index correspondence preserved, no
//! matter the completion order. A blocking wrapper provides the
//! synchronous scheduling model with identical external behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::info;
use url::Url;

use crate::core::budget::ErrorBudget;
use crate::core::config::AgentConfig;
use crate::core::executor::ResultHandler;
use crate::core::provider::Provider;
use crate::core::quota::QuotaWindow;
use crate::core::usage::{UsageLedger, UsageTotals};
use crate::error::{DispatchError, Result};

/// Connect timeout, independent of the per-call read timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress callback: (completed, total).
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Dispatch agent for one endpoint/model pair.
///
/// Cheap to share by reference across a batch; all interior state is
/// lock-protected. Construct one per batch or reuse across batches —
/// budget and ledger are re-armed at every batch start.
pub struct Agent {
    config: AgentConfig,
    base_url: String,
    api_key: String,
    provider: Provider,
    client: Client,
    quota: QuotaWindow,
    ledger: UsageLedger,
    budget: ErrorBudget,
    progress: Option<ProgressFn>,
}

impl Agent {
    /// Build an agent from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ConfigInvalid`] for an unusable
    /// configuration or base URL, [`DispatchError::Transport`] when the
    /// HTTP client cannot be constructed.
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        let domain = Url::parse(&base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| DispatchError::ConfigInvalid {
                key: "base_url".to_string(),
                message: format!("cannot parse '{base_url}'"),
            })?;

        let provider = config
            .provider
            .unwrap_or_else(|| Provider::from_domain(&domain));

        // Quota does the real throttling; the pool just needs to keep up
        // with the concurrency cap.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.concurrency)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let api_key = config
            .api_key
            .as_deref()
            .map_or_else(|| "xx".to_string(), |k| k.trim().to_string());

        let quota = QuotaWindow::new(config.rpm, config.tpm);

        Ok(Self {
            config,
            base_url,
            api_key,
            provider,
            client,
            quota,
            ledger: UsageLedger::new(),
            budget: ErrorBudget::new(),
            progress: None,
        })
    }

    /// Install a progress callback invoked after each item completes.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub(crate) const fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    /// The resolved provider tag.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    pub(crate) const fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) const fn quota(&self) -> &QuotaWindow {
        &self.quota
    }

    pub(crate) const fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub(crate) const fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    /// Token usage accumulated since the current batch started.
    #[must_use]
    pub fn usage(&self) -> UsageTotals {
        self.ledger.snapshot()
    }

    /// Requests in the current batch that ended in terminal fallback.
    #[must_use]
    pub fn unresolved_errors(&self) -> usize {
        self.ledger.unresolved()
    }

    /// Dispatch a batch of prompts, returning one result per prompt in
    /// input order.
    ///
    /// A single item's failure never aborts the batch: the executor
    /// resolves every item to a terminal value, so the output length
    /// always equals the input length.
    pub async fn send_batch<H: ResultHandler>(
        &self,
        prompts: Vec<String>,
        handler: &H,
    ) -> Vec<H::Output> {
        let total = prompts.len();
        info!(
            provider = %self.provider,
            base_url = %self.base_url,
            model_id = %self.config.model_id,
            concurrency = self.config.concurrency,
            rpm = ?self.quota.rpm(),
            tpm = ?self.quota.tpm(),
            temperature = self.config.temperature,
            json_output = self.config.force_json,
            "dispatching {total} request(s)"
        );

        self.budget.arm(total);
        self.ledger.reset();

        let semaphore = Semaphore::new(self.config.concurrency);
        let completed = AtomicUsize::new(0);

        let items = prompts.into_iter().map(|prompt| {
            let semaphore = &semaphore;
            let completed = &completed;
            async move {
                // A closed semaphore cannot happen here; skipping the
                // permit on that path is safer than panicking mid-batch.
                let _permit = semaphore.acquire().await.ok();
                let result = self.send(prompt, handler).await;
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                info!("completed {done}/{total}");
                if let Some(progress) = &self.progress {
                    progress(done, total);
                }
                result
            }
        });

        // join_all polls every item concurrently and yields results in
        // input order regardless of completion order.
        let results = futures::future::join_all(items).await;

        let totals = self.ledger.snapshot();
        info!(
            unresolved_errors = self.ledger.unresolved(),
            "batch finished"
        );
        info!(
            "token usage - input: {:.2}K (cached: {:.2}K), output: {:.2}K (reasoning: {:.2}K), total: {:.2}K",
            totals.input_tokens as f64 / 1000.0,
            totals.cached_tokens as f64 / 1000.0,
            totals.output_tokens as f64 / 1000.0,
            totals.reasoning_tokens as f64 / 1000.0,
            totals.total_tokens as f64 / 1000.0,
        );

        results
    }

    /// Synchronous variant of [`Agent::send_batch`] for blocking callers.
    ///
    /// Runs the same cooperative pipeline on a private current-thread
    /// runtime, so the two scheduling models cannot drift apart.
    ///
    /// # Errors
    ///
    /// Returns an error only when the runtime itself cannot be built;
    /// per-item failures still resolve to fallback values.
    pub fn send_batch_blocking<H: ResultHandler>(
        &self,
        prompts: Vec<String>,
        handler: &H,
    ) -> Result<Vec<H::Output>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DispatchError::Io)?;
        Ok(runtime.block_on(self.send_batch(prompts, handler)))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("base_url", &self.base_url)
            .field("model_id", &self.config.model_id)
            .field("provider", &self.provider)
            .field("concurrency", &self.config.concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> AgentConfig {
        AgentConfig {
            base_url: base_url.to_string(),
            model_id: "test-model".to_string(),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn trims_trailing_slash_and_detects_provider() {
        let agent = Agent::new(config("https://open.bigmodel.cn/api/paas/v4/")).expect("valid");
        assert_eq!(agent.base_url(), "https://open.bigmodel.cn/api/paas/v4");
        assert_eq!(agent.provider(), Provider::BigModel);
    }

    #[test]
    fn explicit_provider_wins_over_domain() {
        let mut cfg = config("https://open.bigmodel.cn/api/paas/v4");
        cfg.provider = Some(Provider::Default);
        let agent = Agent::new(cfg).expect("valid");
        assert_eq!(agent.provider(), Provider::Default);
    }

    #[test]
    fn missing_api_key_uses_placeholder() {
        let agent = Agent::new(config("https://api.example.com/v1")).expect("valid");
        assert_eq!(agent.api_key(), "xx");
    }

    #[test]
    fn rejects_unparsable_base_url() {
        let err = Agent::new(config("not a url")).unwrap_err();
        assert!(matches!(err, DispatchError::ConfigInvalid { .. }));
    }
}
