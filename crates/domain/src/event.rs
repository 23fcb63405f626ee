//! Events emitted during a generation, in the order they are produced by the
//! agent loop and forwarded to clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{FunctionSpec, Message};
use crate::request::Task;

/// Why a generation terminated abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    Timeout,
    Api,
    Empty,
    Loop,
    StepLimit,
    Feedback,
}

/// Terminal error attached to the final `output` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationError {
    pub content: String,
    pub reason: ErrorReason,
}

impl GenerationError {
    pub fn new(reason: ErrorReason, content: impl Into<String>) -> Self {
        Self {
            reason,
            content: content.into(),
        }
    }
}

/// Verdict of the feedback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    Done,
    Refine,
    Retry,
}

impl std::fmt::Display for FeedbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FeedbackStatus::Done => "done",
            FeedbackStatus::Refine => "refine",
            FeedbackStatus::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// One event of the generation stream.
///
/// The sequence per request matches
/// `input system (model? tool* feedback?)* output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Input {
        input: Value,
    },
    System {
        functions: Vec<FunctionSpec>,
        system_message: String,
    },
    Model {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Tool {
        name: String,
        args: Value,
        result: String,
    },
    Feedback {
        status: FeedbackStatus,
        feedback: String,
    },
    Output {
        task: Task,
        output: Option<Value>,
        /// Seconds since the loop was entered.
        elapsed: f64,
        error: Option<GenerationError>,
        messages: Vec<Message>,
        known: Vec<String>,
    },
}

impl Event {
    pub fn is_output(&self) -> bool {
        matches!(self, Event::Output { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_by_type() {
        let ev = Event::Tool {
            name: "execute".into(),
            args: serde_json::json!({"kg": "wikidata"}),
            result: "ok".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool");
        assert_eq!(v["name"], "execute");
    }

    #[test]
    fn error_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorReason::StepLimit).unwrap(),
            serde_json::json!("step_limit")
        );
        assert_eq!(
            serde_json::to_value(ErrorReason::Loop).unwrap(),
            serde_json::json!("loop")
        );
    }

    #[test]
    fn model_event_omits_absent_fields() {
        let ev = Event::Model {
            reasoning: None,
            content: Some("hello".into()),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v.get("reasoning").is_none());
        assert_eq!(v["content"], "hello");
    }
}
