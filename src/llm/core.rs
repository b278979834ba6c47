use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A custom error type for LLM operations.
///
/// Every failure a provider can report while answering a chat request maps
/// onto one of these variants, regardless of the backend behind it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LLMError {
    /// An error occurred while prompting the model.
    #[error("Failed to prompt the model: {0}")]
    PromptError(String),
    /// The backend answered with a failing HTTP status.
    #[error("Provider returned status {code}: {message}")]
    Status { code: u16, message: String },
    /// Every retry attempt failed and no fallback text is configured.
    #[error("All retry attempts were exhausted")]
    Exhausted,
}

/// The role a turn plays in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Images attached to the turn. They travel with it on every retry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_urls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_image_urls(mut self, image_urls: Vec<String>) -> Self {
        self.image_urls = image_urls;
        self
    }
}

/// An ordered conversation history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationContext {
    turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Returns a copy of this context with `turn` appended.
    pub fn with_turn(&self, turn: Turn) -> Self {
        let mut turns = self.turns.clone();
        turns.push(turn);
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn has_system_turn(&self) -> bool {
        self.turns.iter().any(|turn| turn.role == Role::System)
    }

    /// Short renderings of the last `count` turns, each cut to `max_chars`
    /// characters. Only used for diagnostic logging.
    pub fn preview(&self, count: usize, max_chars: usize) -> Vec<String> {
        let skip = self.turns.len().saturating_sub(count);
        self.turns
            .iter()
            .skip(skip)
            .map(|turn| {
                let mut content: String = turn.content.chars().take(max_chars).collect();
                if turn.content.chars().count() > max_chars {
                    content.push('…');
                }
                format!("{:?}: {}", turn.role, content)
            })
            .collect()
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// A raw error indication attached to a response by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSignal {
    Status(u16),
    Message(String),
}

/// A completed reply as handed back by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LLMResponse {
    pub text: String,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub error_signal: Option<ErrorSignal>,
    /// Set when the response really came out of the monitored provider call.
    /// Host-generated messages must clear it so they are never retried.
    pub from_provider: bool,
    /// The reply carries non-text content (images, files, ...).
    #[serde(default)]
    pub has_media: bool,
}

impl LLMResponse {
    /// A plain text reply produced by the provider.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            error_signal: None,
            from_provider: true,
            has_media: false,
        }
    }

    /// A message produced by the host rather than the provider.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            from_provider: false,
            ..Self::new(text)
        }
    }

    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    pub fn with_error_signal(mut self, signal: ErrorSignal) -> Self {
        self.error_signal = Some(signal);
        self
    }

    pub fn with_media(mut self) -> Self {
        self.has_media = true;
        self
    }
}

/// A trait that defines the contract for any LLM backend the retry machinery can drive.
///
/// Implementations receive the fully built conversation for one attempt and
/// return either the reply or an [`LLMError`]. Errors are ordinary values:
/// the controller treats them as one more reason to retry.
///
/// # Examples
///
/// ```rust
/// use replyguard::llm::{ConversationContext, LLM, LLMError, LLMResponse};
/// use async_trait::async_trait;
///
/// struct EchoLLM;
///
/// #[async_trait]
/// impl LLM for EchoLLM {
///     async fn chat(&self, context: &ConversationContext) -> Result<LLMResponse, LLMError> {
///         let last = context.turns().last().map(|t| t.content.clone()).unwrap_or_default();
///         Ok(LLMResponse::new(format!("echo: {}", last)))
///     }
/// }
/// ```
///
/// # Thread Safety
///
/// `chat` takes `&self` and the trait requires `Send + Sync`, so a single
/// provider can serve any number of concurrent conversations.
#[async_trait]
pub trait LLM: Send + Sync {
    /// Sends the conversation to the model and returns its reply.
    async fn chat(&self, context: &ConversationContext) -> Result<LLMResponse, LLMError>;

    /// The system persona configured on the provider, if it exposes one.
    fn persona(&self) -> Option<&str> {
        None
    }
}
