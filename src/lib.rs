//! # ReplyGuard: response validation and retry for chat-bot LLM backends.

/// The `event` module provides the values a host hands over for one user turn.
pub mod event;
/// The `llm` module provides the provider trait, the response classifier and the retry controller.
pub mod llm;

pub use event::{ChatRequest, CompletedTurn};
pub use llm::{
    LLM, LLMError, LLMResponse, RetryController, RetryOutcome, RetryPolicy, RetrySettings,
    RetryingLLM,
};
