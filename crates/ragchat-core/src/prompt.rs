//! Prompt construction with a bounded context window.
//!
//! Messages are emitted in a fixed order: system instructions, recent
//! conversation history, retrieved context, then the user query. Sizes are
//! measured in characters.
//!
//! When the prompt would exceed the window, history is dropped oldest turn
//! first. Retrieved context is truncated only once no history is left.

use crate::chat::ChatMessage;
use crate::error::{RagError, RagResult};
use crate::models::ConversationTurn;

/// Default system instructions for the assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful personal assistant. Answer the user's \
question accurately and concisely. When reference material from the user's documents is \
provided, ground your answer in it and mention which document it came from. If the material \
does not contain the answer, say so and answer from general knowledge only when you are \
confident.\n\n\
Formatting: use ## for section headers and • for bullet points; keep markup minimal.\n\n\
If the user asks you to save, write, or add content to an external page (for example a \
Notion page), write the content as your reply and finish with a final line of the form \
`ACTION: save_external | target: <page title>`. Never claim the content was saved.";

/// Prefix of the system message that carries retrieved context.
pub const CONTEXT_HEADER: &str = "Reference material from the user's documents:\n\n";

/// Sent in place of retrieved context when retrieval found nothing.
pub const NO_CONTEXT_NOTE: &str =
    "No relevant material was found in the user's documents for this question.";

#[derive(Debug, Clone)]
pub struct PromptParams {
    pub system_instructions: String,
    /// Most recent turns considered for inclusion.
    pub history_turns: usize,
    /// Upper bound on the summed character length of all messages.
    pub context_window_chars: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPrompt {
    pub messages: Vec<ChatMessage>,
    pub history_used: usize,
    pub context_truncated: bool,
    pub total_chars: usize,
}

/// Assemble the message list for one model call.
///
/// # Errors
///
/// [`RagError::Validation`] when the system instructions plus the query
/// alone exceed the window.
pub fn build_prompt(
    params: &PromptParams,
    query: &str,
    context: &str,
    history: &[ConversationTurn],
) -> RagResult<BuiltPrompt> {
    let window = params.context_window_chars;
    let system_len = params.system_instructions.chars().count();
    let query_len = query.chars().count();
    let fixed = system_len + query_len;
    if fixed > window {
        return Err(RagError::Validation(format!(
            "query of {} characters does not fit the {}-character context window",
            query_len, window
        )));
    }

    let start = history.len().saturating_sub(params.history_turns);
    let mut turns: &[ConversationTurn] = &history[start..];
    let turn_len = |t: &ConversationTurn| {
        t.user_message.chars().count() + t.assistant_message.chars().count()
    };
    let mut history_len: usize = turns.iter().map(turn_len).sum();

    let mut context_body = if context.is_empty() {
        NO_CONTEXT_NOTE.to_string()
    } else {
        format!("{}{}", CONTEXT_HEADER, context)
    };
    let mut context_len = context_body.chars().count();

    while fixed + history_len + context_len > window && !turns.is_empty() {
        history_len -= turn_len(&turns[0]);
        turns = &turns[1..];
    }

    let mut context_truncated = false;
    if fixed + context_len > window {
        context_truncated = true;
        let available = window - fixed;
        context_body = context_body.chars().take(available).collect();
        context_len = available;
    }

    let mut messages = Vec::with_capacity(turns.len() * 2 + 3);
    messages.push(ChatMessage::system(params.system_instructions.clone()));
    for t in turns {
        messages.push(ChatMessage::user(t.user_message.clone()));
        messages.push(ChatMessage::assistant(t.assistant_message.clone()));
    }
    if context_len > 0 {
        messages.push(ChatMessage::system(context_body));
    }
    messages.push(ChatMessage::user(query.to_string()));

    Ok(BuiltPrompt {
        history_used: turns.len(),
        context_truncated,
        total_chars: fixed + history_len + context_len,
        messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;

    fn params(window: usize, turns: usize) -> PromptParams {
        PromptParams {
            system_instructions: "SYS".to_string(),
            history_turns: turns,
            context_window_chars: window,
        }
    }

    fn history(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| ConversationTurn::new(format!("q{}", i), format!("a{}", i)))
            .collect()
    }

    #[test]
    fn test_message_order() {
        let p = build_prompt(&params(10_000, 5), "question", "some context", &history(2)).unwrap();
        let roles: Vec<Role> = p.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::System,
                Role::User
            ]
        );
        assert_eq!(p.messages[1].content, "q0");
        assert!(p.messages[5].content.ends_with("some context"));
        assert_eq!(p.messages.last().unwrap().content, "question");
        assert!(!p.context_truncated);
    }

    #[test]
    fn test_only_recent_turns() {
        let p = build_prompt(&params(10_000, 2), "q", "", &history(6)).unwrap();
        assert_eq!(p.history_used, 2);
        assert_eq!(p.messages[1].content, "q4");
    }

    #[test]
    fn test_history_truncated_before_context() {
        let context = "c".repeat(50);
        let full = build_prompt(&params(10_000, 5), "query", &context, &history(3)).unwrap();
        let window = full.total_chars - 2;

        let p = build_prompt(&params(window, 5), "query", &context, &history(3)).unwrap();
        assert_eq!(p.history_used, 2);
        assert!(!p.context_truncated);
        assert!(p.total_chars <= window);
        // The oldest turn was the one dropped.
        assert_eq!(p.messages[1].content, "q1");
    }

    #[test]
    fn test_context_truncated_after_history_exhausted() {
        let context = "c".repeat(500);
        let p = build_prompt(&params(100, 5), "query", &context, &history(3)).unwrap();
        assert_eq!(p.history_used, 0);
        assert!(p.context_truncated);
        let total: usize = p.messages.iter().map(|m| m.char_len()).sum();
        assert!(total <= 100);
        assert_eq!(total, p.total_chars);
    }

    #[test]
    fn test_query_too_large() {
        let err = build_prompt(&params(10, 5), &"q".repeat(20), "", &[]).unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[test]
    fn test_empty_context_uses_note() {
        let p = build_prompt(&params(10_000, 5), "q", "", &[]).unwrap();
        assert_eq!(p.messages[1].content, NO_CONTEXT_NOTE);
    }
}
