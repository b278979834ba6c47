// Builds the conversation sent on each attempt, re-applying the persona.

use crate::llm::config::RetryPolicy;
use crate::llm::core::{ConversationContext, Role, Turn};

/// Derives the context for one attempt from `base`.
///
/// `base` holds the full prior conversation followed by the current user
/// turn. The result keeps all of it and differs only in its system turns:
///
/// * with `always_use_system_persona`, every system turn is dropped and
///   `persona` (or the policy's fallback persona) is put in front;
/// * otherwise existing system turns stay and `persona` is put in front
///   only when there are none.
///
/// `base` is never modified.
pub fn build(
    base: &ConversationContext,
    persona: Option<&str>,
    policy: &RetryPolicy,
) -> ConversationContext {
    let persona = persona.filter(|text| !text.trim().is_empty());

    if policy.always_use_system_persona() {
        let fallback = Some(policy.fallback_persona()).filter(|text| !text.trim().is_empty());
        let mut turns: Vec<Turn> = Vec::with_capacity(base.len() + 1);
        if let Some(text) = persona.or(fallback) {
            turns.push(Turn::system(text));
        }
        turns.extend(
            base.turns()
                .iter()
                .filter(|turn| turn.role != Role::System)
                .cloned(),
        );
        return ConversationContext::from_turns(turns);
    }

    match persona {
        Some(text) if !base.has_system_turn() => {
            let mut turns = Vec::with_capacity(base.len() + 1);
            turns.push(Turn::system(text));
            turns.extend(base.turns().iter().cloned());
            ConversationContext::from_turns(turns)
        }
        _ => base.clone(),
    }
}
