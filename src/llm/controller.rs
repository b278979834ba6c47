//! # Retry Controller
//!
//! Owns the loop that re-issues a chat request until the provider returns a
//! usable reply or the attempt budget runs out.
//!
//! ## Flow
//!
//! 1. Build the context for the attempt (see [`crate::llm::persona::build`]).
//! 2. Invoke the provider and classify the reply.
//! 3. Accepted replies are returned as is. Rejected replies and provider
//!    errors wait for the next backoff delay and try again.
//! 4. Once `max_attempts` retries have failed, the configured fallback text
//!    is returned, or nothing at all when it is empty.
//!
//! The provider is called at most `max_attempts + 1` times per user turn,
//! the original call included.
//!
//! ## Backoff
//!
//! Delays follow `base, base * 2, base * 4, ...`, each capped at the
//! policy's delay cap. Waiting uses `tokio::time::sleep`, so other
//! conversations keep running while one turn backs off.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replyguard::llm::{RetryController, RetryOutcome, RetryPolicy};
//! use std::sync::Arc;
//!
//! let controller = RetryController::new(Arc::new(RetryPolicy::default()));
//! match controller.handle_turn(completed_turn, &provider).await {
//!     RetryOutcome::Accepted(response) => send(response.text),
//!     RetryOutcome::FallbackUsed(text) => send(text),
//!     RetryOutcome::Suppressed => {}
//! }
//! ```

use crate::event::CompletedTurn;
use crate::llm::classifier::{Decision, RetryTrigger, classify};
use crate::llm::config::RetryPolicy;
use crate::llm::core::{ConversationContext, LLM, LLMResponse};
use crate::llm::persona;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// The terminal value handed back to the host for one user turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// A reply that passed classification, either the original or a retry's.
    Accepted(LLMResponse),
    /// Every attempt failed; show this text instead.
    FallbackUsed(String),
    /// Every attempt failed and no fallback text is configured.
    Suppressed,
}

/// Exponential backoff schedule: `base, base * 2, base * 4, ...`, each
/// value capped at `cap`. The iterator never ends; bound it with `take`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { next: base, cap }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next.min(self.cap);
        self.next = self.next.saturating_mul(2);
        Some(delay)
    }
}

/// Drives classification, backoff and re-invocation for user turns.
///
/// The controller holds nothing but a read-only policy, so one instance can
/// serve every conversation concurrently.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: Arc<RetryPolicy>,
}

impl RetryController {
    pub fn new(policy: Arc<RetryPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issues `base` to `provider` and retries until a reply is accepted or
    /// the budget is spent. The first call counts as attempt 0.
    ///
    /// `base` must already end with the current user turn. It is rebuilt
    /// with `persona` for every attempt and never modified.
    pub async fn execute(
        &self,
        base: &ConversationContext,
        persona: Option<&str>,
        provider: &dyn LLM,
    ) -> RetryOutcome {
        let span = info_span!("retry_turn", turn_id = %Uuid::new_v4());
        self.run(base, persona, provider, None).instrument(span).await
    }

    /// Host entry point for a provider call that has already completed.
    ///
    /// The delivered response is attempt 0. If it is accepted it comes back
    /// untouched; otherwise up to `max_attempts` fresh calls are made. Turns
    /// in which the user sent no text (image-only messages) are never
    /// re-issued.
    pub async fn handle_turn(&self, turn: CompletedTurn, provider: &dyn LLM) -> RetryOutcome {
        let span = info_span!("retry_turn", turn_id = %Uuid::new_v4());
        async move {
            let CompletedTurn { request, response } = turn;

            match classify(&response, &self.policy) {
                Decision::Accept(reason) => {
                    debug!(?reason, "Response accepted");
                    RetryOutcome::Accepted(response)
                }
                Decision::Retry(trigger) if !request.has_text() => {
                    debug!(reason = %trigger, "User turn has no text, not retrying");
                    RetryOutcome::Accepted(response)
                }
                Decision::Retry(trigger) => {
                    warn!(reason = %trigger, text = %response.text, "Invalid response detected");
                    let persona = request.persona.as_deref().or(provider.persona());
                    self.run(&request.base_context(), persona, provider, Some(trigger))
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// The retry loop. `pending` carries the verdict on an attempt 0 that
    /// happened before the loop was entered.
    async fn run(
        &self,
        base: &ConversationContext,
        persona: Option<&str>,
        provider: &dyn LLM,
        mut pending: Option<RetryTrigger>,
    ) -> RetryOutcome {
        let max_attempts = self.policy.max_attempts();
        let mut delays =
            Backoff::new(self.policy.base_delay(), self.policy.delay_cap()).take(max_attempts);
        let mut attempt = 0;

        loop {
            let trigger = match pending.take() {
                Some(trigger) => trigger,
                None => match self.attempt(base, persona, provider, attempt).await {
                    Ok(response) => return RetryOutcome::Accepted(response),
                    Err(trigger) => trigger,
                },
            };

            let Some(delay) = delays.next() else {
                return self.fallback(attempt, &trigger);
            };

            attempt += 1;
            info!(
                attempt,
                max_attempts,
                delay = %humantime::format_duration(delay),
                reason = %trigger,
                "Scheduling retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One provider call plus classification. `Err` means "try again".
    async fn attempt(
        &self,
        base: &ConversationContext,
        persona: Option<&str>,
        provider: &dyn LLM,
        attempt: usize,
    ) -> Result<LLMResponse, RetryTrigger> {
        let context = persona::build(base, persona, &self.policy);
        self.log_preview(&context, attempt);

        let response = provider.chat(&context).await.map_err(|e| {
            error!(attempt, error = %e, "Provider invocation failed");
            RetryTrigger::from(e)
        })?;

        match classify(&response, &self.policy) {
            Decision::Accept(reason) => {
                if attempt > 0 {
                    info!(attempt, ?reason, "Retry succeeded");
                } else {
                    debug!(?reason, "Response accepted");
                }
                Ok(response)
            }
            Decision::Retry(trigger) => {
                warn!(attempt, reason = %trigger, text = %response.text, "Response rejected");
                Err(trigger)
            }
        }
    }

    fn fallback(&self, retries: usize, trigger: &RetryTrigger) -> RetryOutcome {
        let text = self.policy.fallback_text();
        if text.is_empty() {
            error!(retries, last_reason = %trigger, "All retries failed, suppressing reply");
            RetryOutcome::Suppressed
        } else {
            error!(retries, last_reason = %trigger, "All retries failed, using fallback text");
            RetryOutcome::FallbackUsed(text.to_string())
        }
    }

    fn log_preview(&self, context: &ConversationContext, attempt: usize) {
        let preview = self.policy.debug_preview();
        if preview.count == 0 {
            return;
        }
        for (index, line) in context
            .preview(preview.count, preview.max_chars)
            .iter()
            .enumerate()
        {
            debug!(attempt, index, turn = %line, "Context preview");
        }
    }
}
