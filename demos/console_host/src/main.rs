// This demo plays the role of a chat-bot host sitting in front of an unreliable backend.
//
// Key features:
// - Retry policy loaded from REPLYGUARD_* environment variables (and .env)
// - A simulated backend that answers with error text or nothing at all
//   for the first few calls of every turn
// - Conversation history and persona carried across retries

use async_trait::async_trait;
use replyguard::llm::{ConversationContext, LLM, LLMError, LLMResponse, Turn};
use replyguard::{ChatRequest, CompletedTurn, RetryController, RetryOutcome, RetrySettings};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// Fails `flaky_calls` times out of every `flaky_calls + 1`, in rotation.
struct FlakyBackend {
    calls: AtomicUsize,
    flaky_calls: usize,
}

#[async_trait]
impl LLM for FlakyBackend {
    async fn chat(&self, context: &ConversationContext) -> Result<LLMResponse, LLMError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match call % (self.flaky_calls + 1) {
            0 => Ok(LLMResponse::new("请求失败。错误类型: APIConnectionError")),
            1 => Err(LLMError::Status {
                code: 503,
                message: "Service Unavailable".to_string(),
            }),
            n if n < self.flaky_calls => Ok(LLMResponse::new("")),
            _ => {
                let last = context
                    .turns()
                    .last()
                    .map(|turn| turn.content.clone())
                    .unwrap_or_default();
                Ok(LLMResponse::new(format!(
                    "(after {} turns of context) you said: {}",
                    context.len(),
                    last
                )))
            }
        }
    }

    fn persona(&self) -> Option<&str> {
        Some("You are a cheerful assistant.")
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize the logger
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let policy = match RetrySettings::from_env().and_then(|settings| settings.into_policy()) {
        Ok(policy) => Arc::new(policy),
        Err(e) => {
            error!(error = %e, "Invalid retry configuration");
            return;
        }
    };
    let controller = RetryController::new(policy);
    let backend = FlakyBackend {
        calls: AtomicUsize::new(0),
        flaky_calls: 2,
    };

    info!("Console host ready, type a message (Ctrl-D to quit)");

    let mut history = ConversationContext::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let request = ChatRequest::new(line.clone()).with_context(history.clone());

        // The host makes the first call itself, then lets the guard judge it.
        let first = backend
            .chat(&request.base_context())
            .await
            .unwrap_or_else(|e| LLMResponse::new(e.to_string()));

        let outcome = controller
            .handle_turn(CompletedTurn::new(request, first), &backend)
            .await;

        history.push(Turn::user(line));
        match outcome {
            RetryOutcome::Accepted(response) => {
                println!("bot> {}", response.text);
                history.push(Turn::assistant(response.text));
            }
            RetryOutcome::FallbackUsed(text) => println!("bot> {}", text),
            RetryOutcome::Suppressed => info!("Reply suppressed after failed retries"),
        }
    }

    info!("Console host finished");
}
