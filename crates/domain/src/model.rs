//! The provider-agnostic conversation model.
//!
//! A [`Conversation`] is a sequence of [`Message`]s. Assistant messages carry
//! a full [`Response`] (text, reasoning, tool calls); every other role is
//! plain text. The two LLM wire formats are serialized from and parsed into
//! this neutral form by the `grasp-model` crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Message roles. `config` and `output` never enter the wire conversation;
/// they exist for log and event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Feedback,
    Config,
    Output,
}

/// A tool call emitted by the model.
///
/// Invariant: before a conversation containing this call is re-serialized
/// for the LLM, `result` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            result: None,
        }
    }
}

/// Reasoning attached to a response. `encrypted_content` is round-tripped
/// opaquely for backends that support reasoning continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reasoning {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
}

/// Token usage for a single response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One assistant turn: optional text, optional reasoning, ordered tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Response {
    /// An empty response is a fatal signal to the agent loop.
    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.reasoning.is_none() && self.tool_calls.is_empty()
    }

    pub fn has_content(&self) -> bool {
        self.message.is_some() || self.has_reasoning_content()
    }

    pub fn has_reasoning_content(&self) -> bool {
        self.reasoning
            .as_ref()
            .is_some_and(|r| r.content.is_some() || r.summary.is_some())
    }

    /// Reasoning text to show the user: full content if present, else the
    /// summary.
    pub fn reasoning_text(&self) -> Option<&str> {
        let reasoning = self.reasoning.as_ref()?;
        reasoning
            .content
            .as_deref()
            .or(reasoning.summary.as_deref())
    }

    /// Stable content hash used solely for loop detection across consecutive
    /// turns: SHA-256 over the canonical JSON of message text, reasoning
    /// without its id, and the sorted (name, canonical args) tool-call pairs.
    pub fn content_hash(&self) -> String {
        let reasoning = self.reasoning.as_ref().map(|r| {
            serde_json::json!({
                "content": r.content,
                "summary": r.summary,
                "encrypted_content": r.encrypted_content,
            })
        });

        let mut calls: Vec<(String, String)> = self
            .tool_calls
            .iter()
            .map(|tc| (tc.name.clone(), canonical_json(&tc.args)))
            .collect();
        calls.sort();

        let value = serde_json::json!({
            "message": self.message,
            "reasoning": reasoning,
            "tool_calls": calls,
        });

        let digest = Sha256::digest(canonical_json(&value).as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Serialize a JSON value with all object keys recursively sorted so that
/// semantically equal values hash equally.
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Message content: a full response for assistants, plain text otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Response(Response),
}

impl MessageContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Response(_) => None,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            MessageContent::Response(r) => Some(r),
            MessageContent::Text(_) => None,
        }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn feedback(text: impl Into<String>) -> Self {
        Self {
            role: Role::Feedback,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(response: Response) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Response(response),
        }
    }
}

/// A function exposed to the LLM. `parameters` is a JSON schema object with
/// `additionalProperties: false` and explicit required fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

impl FunctionSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            strict: true,
        }
    }
}

/// Trim a string option, mapping empty results to `None`.
pub fn strip_none(s: Option<String>) -> Option<String> {
    let s = s?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Generate a fresh hex id for responses and synthetic tool calls.
pub fn fresh_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(message: Option<&str>, calls: Vec<(&str, Value)>) -> Response {
        Response {
            id: fresh_id(),
            message: message.map(String::from),
            reasoning: None,
            tool_calls: calls
                .into_iter()
                .map(|(name, args)| ToolCall::new(fresh_id(), name, args))
                .collect(),
            usage: None,
        }
    }

    #[test]
    fn empty_response_detection() {
        let r = response_with(None, vec![]);
        assert!(r.is_empty());
        assert!(!r.has_content());

        let r = response_with(Some("hi"), vec![]);
        assert!(!r.is_empty());
        assert!(r.has_content());
    }

    #[test]
    fn hash_ignores_ids_and_call_order() {
        let a = response_with(
            Some("text"),
            vec![
                ("search", serde_json::json!({"query": "x", "kg": "wikidata"})),
                ("execute", serde_json::json!({"sparql": "SELECT 1"})),
            ],
        );
        let b = response_with(
            Some("text"),
            vec![
                ("execute", serde_json::json!({"sparql": "SELECT 1"})),
                ("search", serde_json::json!({"kg": "wikidata", "query": "x"})),
            ],
        );
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_differs_on_content() {
        let a = response_with(Some("one"), vec![]);
        let b = response_with(Some("two"), vec![]);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_ignores_reasoning_id() {
        let mut a = response_with(Some("t"), vec![]);
        a.reasoning = Some(Reasoning {
            id: "r1".into(),
            content: Some("think".into()),
            summary: None,
            encrypted_content: None,
        });
        let mut b = a.clone();
        b.reasoning.as_mut().unwrap().id = "r2".into();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&v), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn message_content_roundtrip() {
        let msg = Message::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content.text(), Some("hello"));

        let msg = Message::assistant(response_with(Some("answer"), vec![]));
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.content.response().unwrap().message.as_deref(),
            Some("answer")
        );
    }

    #[test]
    fn strip_none_trims() {
        assert_eq!(strip_none(Some("  x  ".into())), Some("x".into()));
        assert_eq!(strip_none(Some("   ".into())), None);
        assert_eq!(strip_none(None), None);
    }
}
