//! The feedback sub-loop: one extra LLM call that critiques a proposed
//! output and may send the agent loop into another sweep.

use serde::Deserialize;
use serde_json::{json, Value};

use grasp_domain::config::GraspConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::event::FeedbackStatus;
use grasp_domain::model::{FunctionSpec, Message};
use grasp_model::ModelBridge;

use crate::tasks::{TaskAdapter, TaskEnv};

#[derive(Debug, Clone, Deserialize)]
pub struct Feedback {
    pub status: FeedbackStatus,
    pub feedback: String,
}

/// How the feedback is shown to the agent in the conversation.
pub fn format_feedback(feedback: &Feedback) -> String {
    format!(
        "Feedback (status={}):\n{}",
        feedback.status, feedback.feedback
    )
}

/// The single tool offered to the feedback model.
pub fn feedback_functions() -> Vec<FunctionSpec> {
    vec![FunctionSpec::new(
        "give_feedback",
        "Provide feedback on the output of the system for the specified task.\n\n\
         The feedback status can be one of:\n\
         1. done: The output is correct and complete in its current form\n\
         2. refine: The output is sensible, but needs some refinement\n\
         3. retry: The output is incorrect and needs to be reworked\n\n\
         The feedback message should describe the reasoning behind the chosen \
         status and provide suggestions for improving the output if applicable.",
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["done", "refine", "retry"],
                    "description": "The feedback type",
                },
                "feedback": {
                    "type": "string",
                    "description": "The feedback message",
                },
            },
            "required": ["status", "feedback"],
            "additionalProperties": false,
        }),
    )]
}

/// Run the single-shot critique. Returns `Ok(None)` when the task does not
/// support feedback, the call timed out, or the response did not contain a
/// usable `give_feedback` call; those cases end the loop without an error.
pub async fn generate_feedback(
    bridge: &dyn ModelBridge,
    adapter: &dyn TaskAdapter,
    env: &TaskEnv<'_>,
    config: &GraspConfig,
    inputs: &[String],
    output: &Value,
) -> Result<Option<Feedback>> {
    let Some(system) = adapter.feedback_system(env) else {
        return Ok(None);
    };
    let Some(prompt) = adapter.feedback_prompt(inputs, output) else {
        return Ok(None);
    };

    let messages = vec![Message::system(system), Message::user(prompt)];

    let response = match bridge
        .call(&messages, &feedback_functions(), &config.model)
        .await
    {
        Ok(response) => response,
        Err(Error::Timeout(_)) => {
            tracing::error!("LLM API timed out during feedback generation");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let [tool_call] = response.tool_calls.as_slice() else {
        tracing::debug!("feedback response without a single tool call");
        return Ok(None);
    };
    if tool_call.name != "give_feedback" {
        tracing::debug!(name = %tool_call.name, "feedback function not called");
        return Ok(None);
    }

    match serde_json::from_value::<Feedback>(tool_call.args.clone()) {
        Ok(feedback) => Ok(Some(feedback)),
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse feedback arguments");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_status() {
        let feedback = Feedback {
            status: FeedbackStatus::Refine,
            feedback: "add a label".into(),
        };
        assert_eq!(
            format_feedback(&feedback),
            "Feedback (status=refine):\nadd a label"
        );
    }

    #[test]
    fn feedback_args_parse() {
        let feedback: Feedback =
            serde_json::from_value(json!({"status": "retry", "feedback": "wrong entity"}))
                .unwrap();
        assert_eq!(feedback.status, FeedbackStatus::Retry);
    }
}
