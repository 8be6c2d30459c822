//! Model response parsing: formatting clean-up and action intents.
//!
//! The composer never executes side effects. When the model (or the user's
//! own message) asks for content to be saved to an external system, the
//! request is surfaced as an [`ActionIntent`] for the caller to act on.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{RagError, RagResult};

static ACTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*ACTION:[ \t]*save_external[ \t]*(?:\|[ \t]*target:[ \t]*(.*?))?[ \t]*$")
        .expect("valid action regex")
});

static SAVE_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:write|add|save|append|put)\b.*?\b(?:to|in|on|into)\s+(?:my\s+|the\s+)?(?:.{0,40}?\s)?(?:notion|page)\b")
        .expect("valid save-request regex")
});

static QUOTED_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:notion|page)\s+["']([^"']+)["']"#).expect("valid quoted-target regex")
});

static NAMED_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:to|in|on|into)\s+(?:my\s+|the\s+)?([A-Za-z0-9][A-Za-z0-9 ]{1,40}?)\s+(?:notion\s+)?page\b")
        .expect("valid named-target regex")
});

struct Rewrite {
    pattern: Regex,
    replacement: &'static str,
}

static CLEANUP_RULES: LazyLock<Vec<Rewrite>> = LazyLock::new(|| {
    [
        (r"#{4,}", "##"),
        (r"\*{4,}", "**"),
        (r"\*\*\*(.+?)\*\*\*", "**$1**"),
        (r"(?m)^\*[ \t]+", "• "),
        (r"(?m)^[ \t]*[*#]+[ \t]*$", ""),
        (r"(?m)[ \t]+$", ""),
        (r"\n{3,}", "\n\n"),
    ]
    .into_iter()
    .map(|(p, replacement)| Rewrite {
        pattern: Regex::new(p).expect("valid cleanup regex"),
        replacement,
    })
    .collect()
});

/// A side-effecting request the caller may choose to carry out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionIntent {
    SaveExternal {
        target: Option<String>,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub text: String,
    pub intent: Option<ActionIntent>,
}

/// Validate and post-process raw model output.
///
/// # Errors
///
/// [`RagError::ModelResponseInvalid`] when no text remains after removing
/// action markers and whitespace.
pub fn parse_reply(raw: &str, user_message: &str) -> RagResult<ParsedReply> {
    let mut marker_target: Option<Option<String>> = None;
    if let Some(caps) = ACTION_LINE.captures(raw) {
        let target = caps
            .get(1)
            .map(|m| m.as_str().trim().trim_matches(|c: char| c == '"' || c == '\''))
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        marker_target = Some(target);
    }
    let stripped = ACTION_LINE.replace_all(raw, "");

    let text = clean_formatting(&stripped);
    if text.is_empty() {
        return Err(RagError::ModelResponseInvalid(
            "model returned no text content".to_string(),
        ));
    }

    let intent = match marker_target {
        Some(target) => Some(ActionIntent::SaveExternal {
            target: target.or_else(|| save_target(user_message)),
            content: text.clone(),
        }),
        None if is_save_request(user_message) => Some(ActionIntent::SaveExternal {
            target: save_target(user_message),
            content: text.clone(),
        }),
        None => None,
    };

    Ok(ParsedReply { text, intent })
}

/// Normalise markdown noise in model output.
pub fn clean_formatting(text: &str) -> String {
    let mut out = text.to_string();
    for rule in CLEANUP_RULES.iter() {
        out = rule.pattern.replace_all(&out, rule.replacement).into_owned();
    }
    out.trim().to_string()
}

/// Whether a user message asks for content to be written to an external page.
pub fn is_save_request(message: &str) -> bool {
    SAVE_REQUEST.is_match(message)
}

/// Best-effort extraction of the target page title from a user message.
pub fn save_target(message: &str) -> Option<String> {
    QUOTED_TARGET
        .captures(message)
        .or_else(|| NAMED_TARGET.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_formatting() {
        let raw = "#### Title\n\n\n\n* item one\n* item two   \n***bold***";
        assert_eq!(
            clean_formatting(raw),
            "## Title\n\n• item one\n• item two\n**bold**"
        );
    }

    #[test]
    fn test_plain_reply_has_no_intent() {
        let parsed = parse_reply("  The answer is 42.  ", "What is the answer?").unwrap();
        assert_eq!(parsed.text, "The answer is 42.");
        assert!(parsed.intent.is_none());
    }

    #[test]
    fn test_empty_reply_is_invalid() {
        assert!(matches!(
            parse_reply("   \n ", "hi"),
            Err(RagError::ModelResponseInvalid(_))
        ));
        assert!(matches!(
            parse_reply("ACTION: save_external | target: Notes", "hi"),
            Err(RagError::ModelResponseInvalid(_))
        ));
    }

    #[test]
    fn test_action_marker_is_stripped_and_surfaced() {
        let raw = "Here is your summary.\n\nACTION: save_external | target: Weekly Notes";
        let parsed = parse_reply(raw, "summarise this").unwrap();
        assert_eq!(parsed.text, "Here is your summary.");
        assert_eq!(
            parsed.intent,
            Some(ActionIntent::SaveExternal {
                target: Some("Weekly Notes".to_string()),
                content: "Here is your summary.".to_string(),
            })
        );
    }

    #[test]
    fn test_user_save_request_detected_without_marker() {
        let parsed = parse_reply(
            "Meeting moved to Friday.",
            "save this to my calendar notion page",
        )
        .unwrap();
        match parsed.intent {
            Some(ActionIntent::SaveExternal { target, content }) => {
                assert_eq!(target.as_deref(), Some("calendar"));
                assert_eq!(content, "Meeting moved to Friday.");
            }
            None => panic!("expected a save intent"),
        }
    }

    #[test]
    fn test_quoted_target() {
        assert_eq!(
            save_target(r#"add this to notion "Reading List""#).as_deref(),
            Some("Reading List")
        );
    }

    #[test]
    fn test_non_save_messages() {
        assert!(!is_save_request("what does the page say about cats?"));
        assert!(!is_save_request("tell me about notion"));
        assert!(is_save_request("Please write the summary to my Notion"));
    }
}
