//! General question answering: no task functions, the loop ends on the first
//! assistant turn without tool calls, and the output is the last assistant
//! message.

use serde_json::{json, Value};

use grasp_domain::config::GraspConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::model::{FunctionSpec, Message};
use grasp_kg::KnownSet;

use super::{TaskAdapter, TaskEnv, TaskState};

pub struct GeneralQaTask;

#[async_trait::async_trait]
impl TaskAdapter for GeneralQaTask {
    fn system_info(&self, _config: &GraspConfig) -> String {
        "You are a question answering assistant. Your job is to answer a given user \
         question using the knowledge graphs and functions available to you.\n\n\
         You should follow a step-by-step approach to answer the question:\n\
         1. Determine the information needed from the knowledge graphs to answer the \
         user question and think about how it might be represented with entities and \
         properties.\n\
         2. Search for the entities and properties in the knowledge graphs. Where \
         applicable, constrain the searches with already identified entities and \
         properties.\n\
         3. Gradually build up the answer by querying the knowledge graphs using the \
         identified entities and properties. You may need to refine or rethink your \
         current plan based on the query results and go back to step 2 if needed, \
         possibly multiple times.\n\
         4. Output your final answer to the question and stop."
            .into()
    }

    fn rules(&self) -> Vec<String> {
        vec![
            "Your answers preferably should be based on the information available in \
             the knowledge graphs. If you do not need them to answer the question, \
             e.g. if you know the answer by heart, still try to verify it with the \
             knowledge graphs."
                .into(),
        ]
    }

    async fn input_and_state(
        &self,
        raw: &Value,
        _env: &TaskEnv<'_>,
    ) -> Result<(String, TaskState)> {
        let question = raw
            .as_str()
            .ok_or_else(|| Error::Task("general-qa input must be a string question".into()))?;
        Ok((question.to_string(), TaskState::None))
    }

    fn functions(&self, _env: &TaskEnv<'_>) -> Vec<FunctionSpec> {
        Vec::new()
    }

    fn is_task_function(&self, _name: &str) -> bool {
        false
    }

    async fn call(
        &self,
        _env: &TaskEnv<'_>,
        name: &str,
        _args: &Value,
        _state: &mut TaskState,
        _known: &mut KnownSet,
    ) -> Result<String> {
        Err(Error::FunctionCall(format!("Unknown function: {name}")))
    }

    fn is_terminal(&self, _name: &str) -> bool {
        false
    }

    async fn output(
        &self,
        _env: &TaskEnv<'_>,
        messages: &[Message],
        _state: &TaskState,
    ) -> Option<Value> {
        let last = messages
            .iter()
            .rev()
            .find_map(|message| message.content.response())?;
        let answer = last.message.as_deref()?;

        Some(json!({
            "type": "output",
            "output": answer,
            "formatted": answer,
        }))
    }
}
