// The `llm` module holds the provider contract and the retry machinery around it.

pub mod classifier;
pub mod config;
pub mod controller;
pub mod core;
pub mod decorators;
pub mod persona;

pub use classifier::{AcceptReason, Decision, RetryTrigger, classify};
pub use config::{ConfigError, DebugPreview, RetryPolicy, RetrySettings, StatusCodeList};
pub use controller::{Backoff, RetryController, RetryOutcome};
pub use self::core::{
    ConversationContext, ErrorSignal, FinishReason, LLM, LLMError, LLMResponse, Role, Turn,
};
pub use decorators::RetryingLLM;
