//! Per-request call execution: retry loop, outcome classification,
//! backoff, and continuation fetches.
//!
//! One logical request moves through an explicit attempt loop (the
//! original recursive formulation is flattened so stack depth stays
//! constant and every suspension point is visible):
//!
//! ```text
//! INIT -> SENT -> SUCCESS
//!              -> soft failure  -> INIT (retry, budget untouched)
//!              -> hard failure  -> INIT (retry, budget counted once)
//!              -> TERMINAL_FALLBACK (retries exhausted or budget gone)
//! ```
//!
//! Every terminal path returns a value: the best partial result seen so
//! far, the handler's fallback, or the raw prompt. Nothing escapes as an
//! error.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::core::dispatcher::Agent;
use crate::core::wire::{ChatResponse, build_request_body, sanitize_reply};
use crate::error::DispatchError;
use crate::util::estimate_tokens;

/// Maximum follow-up calls when a response is truncated by the
/// provider's output-length limit.
pub const MAX_CONTINUE_FETCHES: u32 = 2;

/// Extra sleep after a 429, on top of the local quota window.
const THROTTLE_COOLDOWN: Duration = Duration::from_secs(5);

/// Base delay for exponential backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Delay before the retry following attempt `attempt` (0-indexed):
/// `base * 2^attempt`, independent of failure classification.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt)
}

/// Verdict a result handler passes on a successfully received reply.
#[derive(Debug)]
pub enum Handled<T> {
    /// The reply is complete and usable.
    Done(T),
    /// The reply is semantically unusable; retry from scratch.
    /// Never counted against the error budget.
    Invalid(String),
    /// The reply is incomplete but contains usable data. The partial
    /// value becomes the request's best-known result and survives into
    /// the next attempt; `append_prompt` is appended to the retry prompt.
    Partial {
        partial: T,
        reason: String,
        append_prompt: Option<String>,
    },
}

/// Pluggable per-request hooks: prompt shaping before send, reply
/// validation after receive, and the terminal fallback.
///
/// Implementations must be cheap and non-blocking; they run inline in
/// the dispatch loop.
pub trait ResultHandler: Send + Sync {
    type Output: Send;

    /// System preamble sent with every request.
    fn system_prompt(&self) -> String {
        String::new()
    }

    /// Final chance to rewrite the prompts before the call. Runs on
    /// every attempt, including continuation fetches.
    fn before_send(&self, system_prompt: String, prompt: String) -> (String, String) {
        (system_prompt, prompt)
    }

    /// Validate and convert a (sanitized) reply.
    ///
    /// `previous` is the best partial value from earlier attempts of the
    /// same request, when one exists. Handlers that can combine it with
    /// the new reply should do so and report [`Handled::Done`] once the
    /// combination is complete.
    fn on_reply(
        &self,
        reply: &str,
        prompt: &str,
        previous: Option<&Self::Output>,
    ) -> Handled<Self::Output>;

    /// Terminal fallback when retries are exhausted or the budget is
    /// gone and no partial result exists.
    fn fallback(&self, prompt: &str) -> Self::Output;

    /// Prompt used to ask the model to continue a truncated response.
    fn continue_prompt(&self, accumulated: &str, prompt: &str) -> String {
        format!(
            "{prompt}\n\n[Note: your previous response was cut off. \
             The output so far is:\n---\n{accumulated}\n---\n\
             Continue from exactly where it stopped; emit only the \
             remaining content.]"
        )
    }

    /// Merge a continuation fetch's output into the accumulated reply.
    fn merge_continuation(&self, mut accumulated: String, additional: &str) -> String {
        accumulated.push_str(additional);
        accumulated
    }
}

/// Free-text handler: identity result, prompt-as-fallback. The default
/// continuation hooks give plain string accumulation, which is the
/// behavior wanted for single large completions.
#[derive(Debug, Clone, Default)]
pub struct PlainText {
    /// System preamble for every request.
    pub system_prompt: String,
}

impl ResultHandler for PlainText {
    type Output = String;

    fn system_prompt(&self) -> String {
        self.system_prompt.clone()
    }

    fn on_reply(&self, reply: &str, _prompt: &str, _previous: Option<&String>) -> Handled<String> {
        Handled::Done(reply.to_string())
    }

    fn fallback(&self, prompt: &str) -> String {
        prompt.to_string()
    }
}

/// Outcome of one attempt, before the retry decision.
enum AttemptVerdict<T> {
    Done(T),
    Soft {
        partial: Option<T>,
        append: Option<String>,
        reason: String,
    },
    Hard(DispatchError),
}

impl Agent {
    /// Execute one logical request to a terminal outcome.
    ///
    /// Infallible by design: every failure mode resolves to a value.
    pub async fn send<H: ResultHandler>(&self, prompt: String, handler: &H) -> H::Output {
        let mut prompt = prompt;
        let mut best_partial: Option<H::Output> = None;
        let retries = self.config().retries;
        let mut attempt_no: u32 = 0;

        loop {
            // Bind before matching so the attempt future (and its borrow
            // of best_partial) is dropped before the arms mutate state.
            let verdict = self
                .attempt(&prompt, handler, attempt_no, best_partial.as_ref())
                .await;
            let hard = match verdict {
                AttemptVerdict::Done(value) => return value,
                AttemptVerdict::Soft { partial, append, reason } => {
                    error!(attempt = attempt_no, %reason, "unusable reply, will retry");
                    if let Some(partial) = partial {
                        best_partial = Some(partial);
                    }
                    if let Some(append) = append {
                        prompt.push_str(&append);
                    }
                    false
                }
                AttemptVerdict::Hard(err) => {
                    error!(attempt = attempt_no, error = %err, "request failed");
                    if err.is_throttle() {
                        // Provider-side throttling: cool down beyond what
                        // the local quota window enforces.
                        tokio::time::sleep(THROTTLE_COOLDOWN).await;
                    }
                    true
                }
            };

            if attempt_no >= retries {
                error!("all {retries} retries failed, falling back");
                return self.terminal_fallback(best_partial, &prompt, handler);
            }

            if hard {
                // The budget is charged only for a request's first-attempt
                // hard failure; later attempts merely consult it. Changing
                // this boundary changes observable retry counts.
                let stop = if attempt_no == 0 {
                    self.budget().record()
                } else {
                    self.budget().exhausted()
                };
                if stop {
                    error!("error budget exhausted, skipping retries");
                    return self.terminal_fallback(best_partial, &prompt, handler);
                }
            }

            info!("retrying {}/{}", attempt_no + 1, retries);
            tokio::time::sleep(backoff_delay(attempt_no)).await;
            attempt_no += 1;
        }
    }

    fn terminal_fallback<H: ResultHandler>(
        &self,
        best_partial: Option<H::Output>,
        prompt: &str,
        handler: &H,
    ) -> H::Output {
        self.ledger().note_unresolved();
        if let Some(partial) = best_partial {
            info!("returning best-known partial result after failed retries");
            return partial;
        }
        handler.fallback(prompt)
    }

    /// One attempt: quota admission, the HTTP call, and classification.
    async fn attempt<H: ResultHandler>(
        &self,
        prompt: &str,
        handler: &H,
        attempt_no: u32,
        previous: Option<&H::Output>,
    ) -> AttemptVerdict<H::Output> {
        let (system, user) = handler.before_send(handler.system_prompt(), prompt.to_string());

        let weight = estimate_tokens(&system) + estimate_tokens(&user);
        self.quota().acquire(weight).await;

        let response = match self.post_chat(&system, &user).await {
            Ok(response) => response,
            Err(err) => return AttemptVerdict::Hard(err),
        };

        if response.choices.is_empty() {
            return AttemptVerdict::Hard(DispatchError::MalformedResponse(
                "response has no choices".to_string(),
            ));
        }

        match response.finish_reason() {
            Some("stop") | None => {}
            Some("length") => {
                warn!("response truncated by output-length limit, continuing fetch");
                let accumulated = response.content().to_string();
                self.ledger().record(response.token_usage());
                let value = self.continue_fetch(handler, prompt, accumulated, previous).await;
                return AttemptVerdict::Done(value);
            }
            Some(reason @ ("tool_calls" | "function_call")) => {
                // Tool calling is unsupported here; keep whatever content
                // arrived rather than retrying. Usage is not recorded on
                // this path.
                warn!(%reason, "unsupported finish_reason, returning received content");
                let content = sanitize_reply(response.content()).to_string();
                let value = if content.is_empty() {
                    handler.fallback(prompt)
                } else {
                    lenient_finish(handler, &content, prompt, previous)
                };
                return AttemptVerdict::Done(value);
            }
            Some("content_filter") => {
                return AttemptVerdict::Hard(DispatchError::ContentFiltered);
            }
            Some(reason) => {
                warn!(%reason, "unknown finish_reason, treating as normal completion");
            }
        }

        self.ledger().record(response.token_usage());

        if attempt_no > 0 {
            info!("retry {}/{} succeeded", attempt_no, self.config().retries);
        }

        let reply = sanitize_reply(response.content()).to_string();
        match handler.on_reply(&reply, prompt, previous) {
            Handled::Done(value) => AttemptVerdict::Done(value),
            Handled::Invalid(reason) => AttemptVerdict::Soft {
                partial: None,
                append: None,
                reason,
            },
            Handled::Partial { partial, reason, append_prompt } => AttemptVerdict::Soft {
                partial: Some(partial),
                append: append_prompt,
                reason,
            },
        }
    }

    /// Follow-up calls for a truncated response.
    ///
    /// Many endpoints do not actually support continuation and will
    /// answer with `stop` or garbage; this path degrades to returning
    /// whatever has accumulated rather than failing the request.
    async fn continue_fetch<H: ResultHandler>(
        &self,
        handler: &H,
        prompt: &str,
        mut accumulated: String,
        previous: Option<&H::Output>,
    ) -> H::Output {
        for fetch in 0..MAX_CONTINUE_FETCHES {
            info!(
                chars = accumulated.len(),
                fetch = fetch + 1,
                max = MAX_CONTINUE_FETCHES,
                "fetching continuation"
            );

            let continue_prompt = handler.continue_prompt(&accumulated, prompt);
            let (system, user) =
                handler.before_send(handler.system_prompt(), continue_prompt);

            let weight = estimate_tokens(&system) + estimate_tokens(&user);
            self.quota().acquire(weight).await;

            let response = match self.post_chat(&system, &user).await {
                Ok(response) if !response.choices.is_empty() => response,
                Ok(_) | Err(_) => {
                    warn!(
                        chars = accumulated.len(),
                        "continuation fetch failed, keeping accumulated content"
                    );
                    break;
                }
            };

            self.ledger().record(response.token_usage());
            accumulated = handler.merge_continuation(accumulated, response.content());

            if response.finish_reason() != Some("length") {
                break;
            }
            if fetch + 1 == MAX_CONTINUE_FETCHES {
                warn!(
                    chars = accumulated.len(),
                    "continuation cap reached, keeping accumulated content"
                );
            }
        }

        if accumulated.is_empty() {
            return handler.fallback(prompt);
        }
        let reply = sanitize_reply(&accumulated).to_string();
        lenient_finish(handler, &reply, prompt, previous)
    }

    /// Issue one POST to `{base}/chat/completions` and parse it.
    async fn post_chat(&self, system: &str, user: &str) -> crate::error::Result<ChatResponse> {
        let body = build_request_body(self.config(), self.provider(), system, user);
        let timeout_secs = self.config().timeout_secs;

        let response = self
            .client()
            .post(format!("{}/chat/completions", self.base_url()))
            .bearer_auth(self.api_key())
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::from_transport(&e, timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| DispatchError::MalformedResponse(e.to_string()))
    }
}

/// Accept a reply that will not be retried: a partial verdict yields its
/// partial value, an invalid one yields the fallback.
fn lenient_finish<H: ResultHandler>(
    handler: &H,
    reply: &str,
    prompt: &str,
    previous: Option<&H::Output>,
) -> H::Output {
    match handler.on_reply(reply, prompt, previous) {
        Handled::Done(value) | Handled::Partial { partial: value, .. } => value,
        Handled::Invalid(reason) => {
            warn!(%reason, "kept content is unusable, falling back");
            handler.fallback(prompt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backoff monotonicity: delay before attempt k equals base * 2^(k-1).
    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn plain_text_passes_replies_through() {
        let handler = PlainText::default();
        assert!(matches!(
            handler.on_reply("translated", "original", None),
            Handled::Done(text) if text == "translated"
        ));
        assert_eq!(handler.fallback("original"), "original");
    }

    #[test]
    fn default_continuation_appends() {
        let handler = PlainText::default();
        let merged = handler.merge_continuation("first ".to_string(), "second");
        assert_eq!(merged, "first second");

        let prompt = handler.continue_prompt("partial output", "the prompt");
        assert!(prompt.contains("the prompt"));
        assert!(prompt.contains("partial output"));
    }
}
