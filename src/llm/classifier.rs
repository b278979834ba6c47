//! Response classification.
//!
//! [`classify`] decides whether a completed provider reply should be handed
//! to the user or re-requested. Rules are evaluated in a fixed order and the
//! first one that matches decides:
//!
//! 1. Tool-call replies are always accepted.
//! 2. Replies the host did not get from the provider are always accepted.
//! 3. A denied status code vetoes any retry.
//! 4. An allowed status code triggers a retry.
//! 5. A configured error keyword in the text triggers a retry.
//! 6. An empty reply triggers a retry.
//! 7. Anything else is accepted.

use crate::llm::config::RetryPolicy;
use crate::llm::core::{ErrorSignal, FinishReason, LLMError, LLMResponse};
use thiserror::Error;

/// Why a response was let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptReason {
    ToolCallBypass,
    NonLLMBypass,
    StatusCodeVetoed(u16),
    Clean,
}

/// Why a response, or an attempt to get one, should be retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryTrigger {
    #[error("empty response")]
    EmptyResponse,
    #[error("response contains error keyword '{0}'")]
    KeywordMatch(String),
    #[error("retryable status code {0}")]
    StatusCodeRetryable(u16),
    #[error("provider invocation failed: {0}")]
    ProviderInvocationFailure(#[from] LLMError),
}

/// The verdict on a single response.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept(AcceptReason),
    Retry(RetryTrigger),
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry(_))
    }
}

/// Classifies `response` against `policy`. Pure: no state, no side effects.
pub fn classify(response: &LLMResponse, policy: &RetryPolicy) -> Decision {
    if response.finish_reason == FinishReason::ToolCalls {
        return Decision::Accept(AcceptReason::ToolCallBypass);
    }

    if !response.from_provider {
        return Decision::Accept(AcceptReason::NonLLMBypass);
    }

    let codes = status_codes(response);
    if let Some(code) = codes
        .iter()
        .find(|code| policy.denied_status_codes().contains(*code))
    {
        return Decision::Accept(AcceptReason::StatusCodeVetoed(*code));
    }
    if let Some(code) = codes
        .iter()
        .find(|code| policy.allowed_status_codes().contains(*code))
    {
        return Decision::Retry(RetryTrigger::StatusCodeRetryable(*code));
    }

    let lowered = response.text.to_lowercase();
    if let Some(keyword) = policy
        .error_keywords()
        .iter()
        .find(|keyword| lowered.contains(keyword.as_str()))
    {
        return Decision::Retry(RetryTrigger::KeywordMatch(keyword.clone()));
    }

    if response.text.trim().is_empty() && !response.has_media {
        return Decision::Retry(RetryTrigger::EmptyResponse);
    }

    Decision::Accept(AcceptReason::Clean)
}

/// Every status code mentioned by the response, signal first, then text.
fn status_codes(response: &LLMResponse) -> Vec<u16> {
    let mut codes = Vec::new();
    match &response.error_signal {
        Some(ErrorSignal::Status(code)) => codes.push(*code),
        Some(ErrorSignal::Message(message)) => codes.extend(codes_in_text(message)),
        None => {}
    }
    codes.extend(codes_in_text(&response.text));
    codes
}

/// Standalone three-digit numbers in the HTTP status range.
fn codes_in_text(text: &str) -> Vec<u16> {
    let bytes = text.as_bytes();
    let mut codes = Vec::new();
    let mut start = 0;

    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end - start == 3 {
            if let Ok(code) = text[start..end].parse::<u16>() {
                if (100..=599).contains(&code) {
                    codes.push(code);
                }
            }
        }
        start = end;
    }

    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new().with_error_keywords(["请求失败", "Rate Limit"])
    }

    #[test]
    fn test_clean_reply_is_accepted() {
        let decision = classify(&LLMResponse::new("你好，有什么可以帮你？"), &policy());
        assert_eq!(decision, Decision::Accept(AcceptReason::Clean));
    }

    #[test]
    fn test_tool_calls_are_never_retried() {
        let policy = policy().with_allowed_status_codes([429]);
        for text in ["", "   ", "请求失败", "error 429"] {
            let response = LLMResponse::new(text).with_finish_reason(FinishReason::ToolCalls);
            assert_eq!(
                classify(&response, &policy),
                Decision::Accept(AcceptReason::ToolCallBypass)
            );
        }
    }

    #[test]
    fn test_non_provider_messages_are_bypassed() {
        let decision = classify(&LLMResponse::system(""), &policy());
        assert_eq!(decision, Decision::Accept(AcceptReason::NonLLMBypass));
    }

    #[test]
    fn test_empty_and_whitespace_replies_are_retried() {
        for text in ["", " \n\t "] {
            assert_eq!(
                classify(&LLMResponse::new(text), &policy()),
                Decision::Retry(RetryTrigger::EmptyResponse)
            );
        }
    }

    #[test]
    fn test_media_only_reply_is_not_empty() {
        let response = LLMResponse::new("").with_media();
        assert_eq!(
            classify(&response, &policy()),
            Decision::Accept(AcceptReason::Clean)
        );
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let decision = classify(&LLMResponse::new("RATE LIMIT reached"), &policy());
        assert_eq!(
            decision,
            Decision::Retry(RetryTrigger::KeywordMatch("rate limit".to_string()))
        );
    }

    #[test]
    fn test_allowed_status_code_in_signal() {
        let policy = policy().with_allowed_status_codes([429]);
        let response = LLMResponse::new("slow down").with_error_signal(ErrorSignal::Status(429));
        assert_eq!(
            classify(&response, &policy),
            Decision::Retry(RetryTrigger::StatusCodeRetryable(429))
        );
    }

    #[test]
    fn test_allowed_status_code_in_message_signal() {
        let policy = policy().with_allowed_status_codes([503]);
        let response = LLMResponse::new("")
            .with_error_signal(ErrorSignal::Message("HTTP 503 Service Unavailable".into()));
        assert_eq!(
            classify(&response, &policy),
            Decision::Retry(RetryTrigger::StatusCodeRetryable(503))
        );
    }

    #[test]
    fn test_denied_code_wins_over_allowed_code() {
        let policy = policy()
            .with_denied_status_codes([400])
            .with_allowed_status_codes([400, 429]);
        let decision = classify(&LLMResponse::new("Error: 400"), &policy);
        assert_eq!(decision, Decision::Accept(AcceptReason::StatusCodeVetoed(400)));
    }

    #[test]
    fn test_denied_code_wins_over_keyword() {
        let policy = policy().with_denied_status_codes([401]);
        let decision = classify(&LLMResponse::new("请求失败: 401"), &policy);
        assert_eq!(decision, Decision::Accept(AcceptReason::StatusCodeVetoed(401)));
    }

    #[test]
    fn test_denied_code_in_signal_wins_over_allowed_code_in_text() {
        let policy = policy()
            .with_denied_status_codes([400])
            .with_allowed_status_codes([429]);
        let response = LLMResponse::new("429 too many requests")
            .with_error_signal(ErrorSignal::Status(400));
        assert_eq!(
            classify(&response, &policy),
            Decision::Accept(AcceptReason::StatusCodeVetoed(400))
        );
    }

    #[test]
    fn test_allowed_code_wins_over_keyword() {
        let policy = policy().with_allowed_status_codes([500]);
        let decision = classify(&LLMResponse::new("请求失败 (500)"), &policy);
        assert_eq!(decision, Decision::Retry(RetryTrigger::StatusCodeRetryable(500)));
    }

    #[test]
    fn test_codes_must_stand_alone() {
        assert_eq!(codes_in_text("order 4000 and 1429"), Vec::<u16>::new());
        assert_eq!(codes_in_text("429,500;abc503"), vec![429, 500, 503]);
        assert_eq!(codes_in_text("099 600 200"), vec![200]);
        assert_eq!(codes_in_text("错误码：502。"), vec![502]);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let policy = policy().with_allowed_status_codes([429]);
        let responses = [
            LLMResponse::new(""),
            LLMResponse::new("请求失败"),
            LLMResponse::new("429"),
            LLMResponse::new("fine"),
        ];
        for response in &responses {
            assert_eq!(classify(response, &policy), classify(response, &policy));
        }
    }
}
