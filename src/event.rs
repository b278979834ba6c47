// Values the host hands over for one user turn.

use crate::llm::core::{ConversationContext, LLMResponse, Turn};
use serde::{Deserialize, Serialize};

/// Everything needed to (re-)issue one user turn to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation before the current user turn.
    #[serde(default)]
    pub context: ConversationContext,
    /// Text of the current user turn.
    pub prompt: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Persona of the conversation, if the host tracks one.
    #[serde(default)]
    pub persona: Option<String>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: ConversationContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_image_urls(mut self, image_urls: Vec<String>) -> Self {
        self.image_urls = image_urls;
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Prior conversation followed by the current user turn.
    pub fn base_context(&self) -> ConversationContext {
        self.context
            .with_turn(Turn::user(self.prompt.clone()).with_image_urls(self.image_urls.clone()))
    }

    /// True when the user actually typed something, as opposed to sending
    /// only images or stickers.
    pub fn has_text(&self) -> bool {
        !self.prompt.trim().is_empty()
    }
}

/// A finished provider call, as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTurn {
    pub request: ChatRequest,
    pub response: LLMResponse,
}

impl CompletedTurn {
    pub fn new(request: ChatRequest, response: LLMResponse) -> Self {
        Self { request, response }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::core::Role;

    #[test]
    fn test_base_context_appends_user_turn() {
        let request = ChatRequest::new("what is this?")
            .with_context(ConversationContext::from_turns(vec![
                Turn::user("hi"),
                Turn::assistant("hello"),
            ]))
            .with_image_urls(vec!["https://img/1.png".into()]);

        let base = request.base_context();

        assert_eq!(base.len(), 3);
        let last = &base.turns()[2];
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "what is this?");
        assert_eq!(last.image_urls, vec!["https://img/1.png".to_string()]);
        assert_eq!(request.context.len(), 2);
    }

    #[test]
    fn test_image_only_request_has_no_text() {
        let request = ChatRequest::new("  ").with_image_urls(vec!["https://img/1.png".into()]);
        assert!(!request.has_text());
        assert!(ChatRequest::new("hi").has_text());
    }

    #[test]
    fn test_completed_turn_from_json() {
        let turn: CompletedTurn = serde_json::from_str(
            r#"{
                "request": {"prompt": "hi", "persona": "cat girl"},
                "response": {"text": "", "finish_reason": "tool_calls", "from_provider": true}
            }"#,
        )
        .unwrap();

        assert_eq!(turn.request.persona.as_deref(), Some("cat girl"));
        assert!(turn.request.context.is_empty());
        assert_eq!(
            turn.response.finish_reason,
            crate::llm::core::FinishReason::ToolCalls
        );
    }
}
