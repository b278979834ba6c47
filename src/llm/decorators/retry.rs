//! # Retry Decorator
//!
//! [`RetryingLLM`] wraps any [`LLM`] so that callers who only speak the
//! `LLM` trait get classification, backoff and persona handling for free.
//!
//! ```rust,ignore
//! use replyguard::llm::{RetryPolicy, RetryingLLM, LLM};
//! use std::sync::Arc;
//!
//! let guarded = RetryingLLM::new(base_llm, Arc::new(RetryPolicy::default()));
//! let reply = guarded.chat(&context).await?;
//! ```
//!
//! Outcomes map back onto the trait as follows:
//!
//! - **Accepted**: the accepted response.
//! - **FallbackUsed**: a host-generated response holding the fallback text.
//!   It is marked as not coming from the provider, so a second guard further
//!   out lets it through instead of retrying it again.
//! - **Suppressed**: `Err(LLMError::Exhausted)`.

use crate::llm::config::RetryPolicy;
use crate::llm::controller::{RetryController, RetryOutcome};
use crate::llm::core::{ConversationContext, LLM, LLMError, LLMResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// An [`LLM`] decorator that retries invalid replies of the wrapped provider.
pub struct RetryingLLM<L: LLM> {
    inner: L,
    controller: RetryController,
}

impl<L: LLM> RetryingLLM<L> {
    /// Wraps `inner` with the given policy.
    pub fn new(inner: L, policy: Arc<RetryPolicy>) -> Self {
        Self {
            inner,
            controller: RetryController::new(policy),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: LLM> LLM for RetryingLLM<L> {
    async fn chat(&self, context: &ConversationContext) -> Result<LLMResponse, LLMError> {
        match self
            .controller
            .execute(context, self.inner.persona(), &self.inner)
            .await
        {
            RetryOutcome::Accepted(response) => Ok(response),
            RetryOutcome::FallbackUsed(text) => Ok(LLMResponse::system(text)),
            RetryOutcome::Suppressed => Err(LLMError::Exhausted),
        }
    }

    fn persona(&self) -> Option<&str> {
        self.inner.persona()
    }
}
