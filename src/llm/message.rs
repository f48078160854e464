//! Conversation messages sent to the dialogue model.
//!
//! # Examples
//!
//! ```
//! use ada::llm::message::{Message, Role};
//!
//! let msg = Message::user("What's the weather in Reno?");
//! assert_eq!(msg.role, Role::User);
//! assert_eq!(msg.text(), "What's the weather in Reno?");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolResult;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Model output.
    Assistant,
    /// Tool results returned to the model.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model mid-turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier; every result must carry it back.
    pub id: String,
    /// Tool name as declared to the model.
    pub name: String,
    /// Named arguments.
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Build a call from any JSON value; non-object arguments become empty.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Parse JSON-encoded arguments as streamed by OpenAI-style providers.
    ///
    /// Empty or malformed argument text yields an empty mapping; the tool
    /// then reports the missing arguments itself.
    pub fn from_json_arguments(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments_json: &str,
    ) -> Self {
        let value = if arguments_json.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(arguments_json).unwrap_or(Value::Null)
        };
        Self::new(id, name, value)
    }

    /// Arguments re-encoded as a JSON string.
    pub fn arguments_json(&self) -> String {
        Value::Object(self.arguments.clone()).to_string()
    }
}

/// One part of a message body.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// Plain text.
    Text(String),
    /// An inline image (raw bytes; adapters encode them for the wire).
    Image {
        /// MIME type, e.g. `image/jpeg`.
        mime_type: String,
        /// Raw image bytes.
        data: Vec<u8>,
    },
    /// A tool result answering one [`ToolCall`].
    ToolResult(ToolResult),
}

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Who sent this message.
    pub role: Role,
    /// Message body.
    pub parts: Vec<ContentPart>,
    /// Tool calls made by the assistant (Assistant role only).
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            parts,
            tool_calls: Vec::new(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_parts(Role::System, vec![ContentPart::Text(text.into())])
    }

    /// Create a user text message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_parts(Role::User, vec![ContentPart::Text(text.into())])
    }

    /// Create a user message with an attached image.
    pub fn user_with_image(
        text: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self::with_parts(
            Role::User,
            vec![
                ContentPart::Text(text.into()),
                ContentPart::Image {
                    mime_type: mime_type.into(),
                    data,
                },
            ],
        )
    }

    /// Create an assistant message, optionally carrying tool calls.
    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let parts = if text.is_empty() {
            Vec::new()
        } else {
            vec![ContentPart::Text(text)]
        };
        Self {
            role: Role::Assistant,
            parts,
            tool_calls,
        }
    }

    /// Create a single message carrying every tool result of one round.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::with_parts(
            Role::Tool,
            results.into_iter().map(ContentPart::ToolResult).collect(),
        )
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool results carried by this message.
    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.parts.iter().filter_map(|p| match p {
            ContentPart::ToolResult(r) => Some(r),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Role ──────────────────────────────────────────────────

    #[test]
    fn role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    // ── ToolCall ──────────────────────────────────────────────

    #[test]
    fn tool_call_from_object() {
        let call = ToolCall::new("c1", "get_weather", json!({"location": "Reno, NV"}));
        assert_eq!(call.arguments.len(), 1);
        assert_eq!(call.arguments_json(), r#"{"location":"Reno, NV"}"#);
    }

    #[test]
    fn tool_call_non_object_arguments_become_empty() {
        let call = ToolCall::new("c1", "get_weather", json!("Reno"));
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn tool_call_from_streamed_json() {
        let call = ToolCall::from_json_arguments(
            "c2",
            "get_travel_duration",
            r#"{"origin":"A","destination":"B"}"#,
        );
        assert_eq!(call.arguments.get("origin"), Some(&json!("A")));
    }

    #[test]
    fn tool_call_from_malformed_json_is_empty() {
        let call = ToolCall::from_json_arguments("c3", "x", "{\"origin\":");
        assert!(call.arguments.is_empty());
        let call = ToolCall::from_json_arguments("c4", "x", "   ");
        assert!(call.arguments.is_empty());
    }

    // ── Message ───────────────────────────────────────────────

    #[test]
    fn user_with_image_has_two_parts() {
        let msg = Message::user_with_image("look", "image/png", vec![1, 2, 3]);
        assert_eq!(msg.parts.len(), 2);
        assert_eq!(msg.text(), "look");
        assert!(matches!(&msg.parts[1], ContentPart::Image { mime_type, .. } if mime_type == "image/png"));
    }

    #[test]
    fn assistant_without_text_has_no_parts() {
        let call = ToolCall::new("c1", "get_weather", json!({}));
        let msg = Message::assistant("", vec![call]);
        assert!(msg.parts.is_empty());
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[test]
    fn tool_results_message_keeps_order() {
        let msg = Message::tool_results(vec![
            ToolResult::success("a", "get_weather", json!({"ok": 1})),
            ToolResult::failure("b", "nope", "Function nope not found or implemented."),
        ]);
        assert_eq!(msg.role, Role::Tool);
        let ids: Vec<&str> = msg.results().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
