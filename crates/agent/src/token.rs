//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, rounded up.
//! Exact counts are vendor-specific and not needed for pruning decisions.

use kestrel_core::message::ChatEntry;
use kestrel_core::provider::ToolDefinition;

/// Fixed cost of an entry on the wire (role name, delimiters).
pub const ENTRY_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a transcript entry, including any tool call payloads.
pub fn estimate_entry_tokens(entry: &ChatEntry) -> usize {
    let calls: usize = entry
        .tool_calls
        .iter()
        .flatten()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    ENTRY_OVERHEAD + estimate_tokens(&entry.content) + calls
}

/// Estimate tokens for a slice of tool definitions (serialized as JSON).
pub fn estimate_tools_tokens(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_tokens(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::message::ToolCall;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 4 chars, 8 bytes
        assert_eq!(estimate_tokens("ééé!"), 1);
    }

    #[test]
    fn entry_includes_overhead() {
        let entry = ChatEntry::user("test"); // 1 token + 4 overhead
        assert_eq!(estimate_entry_tokens(&entry), 5);
    }

    #[test]
    fn entry_counts_tool_call_arguments() {
        let mut entry = ChatEntry::assistant("");
        entry.tool_calls = Some(vec![ToolCall::new("c1", "bash", r#"{"command":"ls"}"#)]);
        // "bash" → 1, 16-char args → 4
        assert_eq!(estimate_entry_tokens(&entry), ENTRY_OVERHEAD + 1 + 4);
    }

    #[test]
    fn empty_tools_is_zero() {
        assert_eq!(estimate_tools_tokens(&[]), 0);
    }

    #[test]
    fn tools_count_their_schema() {
        let tool = ToolDefinition {
            name: "bash".into(),
            description: "Run a shell command".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(!json.is_empty());
        assert_eq!(estimate_tools_tokens(&[tool.clone(), tool]), 2 * estimate_tokens(&json));
    }
}
