//! SPARQL question answering: the model builds and verifies a SPARQL query,
//! then finalizes with `answer` or `cancel`. When the model forgets to call
//! either, the output extractor falls back to fenced tool calls, fenced
//! SPARQL blocks, and finally the last `execute` call.

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use grasp_domain::config::{ForceExamples, GraspConfig};
use grasp_domain::error::{Error, Result};
use grasp_domain::fmt::{format_list, format_notes};
use grasp_domain::model::{fresh_id, FunctionSpec, Message, Role, ToolCall};
use grasp_kg::examples::{Example, MIN_EXAMPLE_SCORE};
use grasp_kg::functions::{format_sparql_result, prepare_sparql_result};
use grasp_kg::items::sparql_items;
use grasp_kg::{find_manager, format_kgs, KnownSet};

use super::{general_rules, TaskAdapter, TaskEnv, TaskState};

pub struct SparqlQaTask;

fn kg_names(env: &TaskEnv<'_>) -> Vec<String> {
    env.managers.iter().map(|m| m.kg.clone()).collect()
}

fn example_kgs(env: &TaskEnv<'_>) -> Vec<String> {
    env.managers
        .iter()
        .filter(|m| m.example_index.is_some())
        .map(|m| m.kg.clone())
        .collect()
}

#[async_trait::async_trait]
impl TaskAdapter for SparqlQaTask {
    fn system_info(&self, _config: &GraspConfig) -> String {
        "You are a question answering assistant. Your job is to generate a SPARQL \
         query to answer a given user question.\n\n\
         You should follow a step-by-step approach to generate the SPARQL query:\n\
         1. Determine possible entities and properties implied by the user question.\n\
         2. Search for the entities and properties in the knowledge graphs. Where \
         applicable, constrain the searches with already identified entities and \
         properties.\n\
         3. Gradually build up the SPARQL query using the identified entities and \
         properties. Start with simple queries and add more complexity as needed. \
         Execute intermediate queries to get feedback and to verify your assumptions. \
         You may need to refine or rethink your current plan based on the query \
         results and go back to step 2 if needed, possibly multiple times.\n\
         4. Use the answer or cancel function to finalize your answer and stop the \
         generation process."
            .into()
    }

    fn rules(&self) -> Vec<String> {
        vec![
            "Always execute your final SPARQL query before giving an answer to make \
             sure it returns the expected results."
                .into(),
            "The SPARQL query should always return the actual identifiers / IRIs of \
             the items in its result. It additionally may return labels or other \
             human-readable information, but they are optional and should be put \
             within optional clauses unless explicitly requested by the user."
                .into(),
            "Do not stop early if there are still obvious improvements to be made to \
             the SPARQL query. For example, keep refining your SPARQL query if its \
             result contains irrelevant items or is missing items you expected."
                .into(),
            "Do not perform additional computation (e.g. filtering, sorting, \
             calculations) on the result of the SPARQL query to determine the answer. \
             All computation should be done solely within SPARQL."
                .into(),
            "For questions with a \"True\" or \"False\" answer the SPARQL query should \
             be an ASK query."
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
            .ok_or_else(|| Error::Task("sparql-qa input must be a string question".into()))?;
        Ok((question.to_string(), TaskState::None))
    }

    fn functions(&self, env: &TaskEnv<'_>) -> Vec<FunctionSpec> {
        let kgs = kg_names(env);
        let mut fns = vec![
            FunctionSpec::new(
                "answer",
                "Provide your final SPARQL query and answer to the user question \
                 based on the query results. This function will stop the generation \
                 process.",
                json!({
                    "type": "object",
                    "properties": {
                        "kg": {
                            "type": "string",
                            "enum": kgs.clone(),
                            "description": "The knowledge graph on which the final \
SPARQL query needs to be executed",
                        },
                        "sparql": {
                            "type": "string",
                            "description": "The final SPARQL query",
                        },
                        "answer": {
                            "type": "string",
                            "description": "The answer to the question based on the \
SPARQL query results",
                        },
                    },
                    "required": ["kg", "sparql", "answer"],
                    "additionalProperties": false,
                }),
            ),
            FunctionSpec::new(
                "cancel",
                "If you are unable to find a SPARQL query that answers the question \
                 well, you can call this function instead of the answer function. \
                 This function will stop the generation process.",
                json!({
                    "type": "object",
                    "properties": {
                        "explanation": {
                            "type": "string",
                            "description": "A detailed explanation of why you could \
not find a satisfactory SPARQL query",
                        },
                        "best_attempt": {
                            "type": ["object", "null"],
                            "description": "Your best attempt at a SPARQL query so \
far, can be omitted if there is none",
                            "properties": {
                                "sparql": {
                                    "type": "string",
                                    "description": "The best SPARQL query so far",
                                },
                                "kg": {
                                    "type": "string",
                                    "enum": kgs,
                                    "description": "The knowledge graph on which the \
SPARQL query needs to be executed",
                                },
                            },
                            "required": ["sparql", "kg"],
                            "additionalProperties": false,
                        },
                    },
                    "required": ["explanation", "best_attempt"],
                    "additionalProperties": false,
                }),
            ),
        ];

        let example_kgs = example_kgs(env);
        if !example_kgs.is_empty() {
            let available = example_kgs.join("\n");
            fns.push(FunctionSpec::new(
                "find_examples",
                format!(
                    "Find examples of SPARQL-question-pairs over the specified \
                     knowledge graph. At most {} examples are returned. The examples \
                     may help you with generating your own SPARQL query.\n\n\
                     Currently, examples are available for the following knowledge \
                     graphs:\n{available}",
                    env.config.num_examples
                ),
                json!({
                    "type": "object",
                    "properties": {
                        "kg": {
                            "type": "string",
                            "enum": example_kgs.clone(),
                            "description": "The knowledge graph to find examples for",
                        },
                    },
                    "required": ["kg"],
                    "additionalProperties": false,
                }),
            ));
            fns.push(FunctionSpec::new(
                "find_similar_examples",
                format!(
                    "Find SPARQL-question-pairs over the specified knowledge graph \
                     that try to answer a similar question to the one provided. At \
                     most {} examples are returned. The examples may help you with \
                     generating your own SPARQL query.\n\n\
                     Currently, examples are available for the following knowledge \
                     graphs:\n{available}",
                    env.config.num_examples
                ),
                json!({
                    "type": "object",
                    "properties": {
                        "kg": {
                            "type": "string",
                            "enum": example_kgs,
                            "description": "The knowledge graph to find examples for",
                        },
                        "question": {
                            "type": "string",
                            "description": "The question to find examples for",
                        },
                    },
                    "required": ["kg", "question"],
                    "additionalProperties": false,
                }),
            ));
        }

        fns
    }

    fn is_task_function(&self, name: &str) -> bool {
        matches!(
            name,
            "answer" | "cancel" | "find_examples" | "find_similar_examples"
        )
    }

    async fn call(
        &self,
        env: &TaskEnv<'_>,
        name: &str,
        args: &Value,
        _state: &mut TaskState,
        known: &mut KnownSet,
    ) -> Result<String> {
        match name {
            "answer" => {
                if env.config.know_before_use {
                    check_known(env, args, known)?;
                }
                Ok("Stopping".into())
            }
            "cancel" => Ok("Stopping".into()),
            "find_examples" => {
                let args: ExamplesArgs =
                    serde_json::from_value(args.clone()).map_err(invalid_args)?;
                let examples = random_examples(env, &args.kg)?;
                Ok(format_examples(env, &args.kg, &examples, known).await)
            }
            "find_similar_examples" => {
                let args: SimilarExamplesArgs =
                    serde_json::from_value(args.clone()).map_err(invalid_args)?;
                let examples = similar_examples(env, &args.kg, &args.question)?;
                Ok(format_examples(env, &args.kg, &examples, known).await)
            }
            _ => Err(Error::FunctionCall(format!("Unknown function: {name}"))),
        }
    }

    fn is_terminal(&self, name: &str) -> bool {
        name == "answer" || name == "cancel"
    }

    async fn output(
        &self,
        env: &TaskEnv<'_>,
        messages: &[Message],
        _state: &TaskState,
    ) -> Option<Value> {
        let (answer, cancel) = get_answer_or_cancel(messages);

        let mut output = json!({
            "sparql": null,
            "kg": null,
            "selections": null,
            "result": null,
            "endpoint": null,
        });

        if let Some(answer) = &answer {
            let text = answer
                .args
                .get("answer")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            output["type"] = json!("answer");
            output["answer"] = json!(text);
            output["sparql"] = answer.args.get("sparql").cloned().unwrap_or(Value::Null);
            output["kg"] = answer.args.get("kg").cloned().unwrap_or(Value::Null);
            output["formatted"] = json!(text);
        } else if let Some(cancel) = &cancel {
            let explanation = cancel
                .args
                .get("explanation")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            output["type"] = json!("cancel");
            output["explanation"] = json!(explanation);
            output["formatted"] = json!(explanation);
            if let Some(best) = cancel.args.get("best_attempt").filter(|v| v.is_object()) {
                output["sparql"] = best.get("sparql").cloned().unwrap_or(Value::Null);
                output["kg"] = best.get("kg").cloned().unwrap_or(Value::Null);
            }
        } else {
            return None;
        }

        let Some(sparql) = output["sparql"].as_str().map(String::from) else {
            return Some(output);
        };

        // fall back to the first selected KG when the model omitted it
        let kg = output["kg"]
            .as_str()
            .filter(|kg| env.managers.iter().any(|m| m.kg == *kg))
            .unwrap_or(&env.managers.first()?.kg)
            .to_string();

        let (sparql, selections, result) =
            prepare_sparql_result(env.managers, env.client, &kg, &sparql, env.config, None)
                .await
                .ok()?;
        let manager = find_manager(env.managers, &kg).ok()?;

        output["kg"] = json!(kg);
        output["sparql"] = json!(sparql);
        output["selections"] = json!(selections);
        output["result"] = json!(result);
        output["endpoint"] = json!(manager.endpoint);

        let formatted = format!(
            "{}\n\n{}",
            output["formatted"].as_str().unwrap_or(""),
            format_sparql_result(&kg, &sparql, &selections, &result),
        );
        output["formatted"] = json!(formatted);

        Some(output)
    }

    fn feedback_system(&self, env: &TaskEnv<'_>) -> Option<String> {
        Some(format!(
            "You are a question answering assistant providing feedback on the output \
             of a SPARQL-based question answering system for a given user question.\n\n\
             The system has access to the following knowledge graphs:\n{}\n\n\
             The system was provided the following notes across all knowledge \
             graphs:\n{}\n\n\
             The system was provided the following rules to follow:\n{}\n\n\
             There are two possible cases:\n\n\
             1) The system was able to find an answer\n\
             You are given the final SPARQL query, the knowledge graph it has to be \
             executed against, and a human-readable answer to the question. You are \
             also given some additional information about the SPARQL query, like the \
             entities and properties it uses, and its execution result.\n\n\
             2) The system failed to find an answer\n\
             You are given the system's explanation for why it failed to find an \
             answer. Optionally, you are provided with the system's best attempt at a \
             SPARQL query so far including the same additional information as in \
             case 1.\n\n\
             Provide your feedback with the give_feedback function.",
            format_kgs(env.managers),
            format_notes(env.general_notes, 0, false),
            format_list(
                general_rules()
                    .into_iter()
                    .chain(self.rules())
                    .collect::<Vec<_>>(),
                0
            ),
        ))
    }

    fn feedback_prompt(&self, inputs: &[String], output: &Value) -> Option<String> {
        let question = inputs.last()?;
        let mut prompt = if inputs.len() > 1 {
            format!(
                "Previous questions:\n{}\n\n",
                inputs[..inputs.len() - 1]
                    .iter()
                    .map(|q| q.trim())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            )
        } else {
            String::new()
        };
        prompt.push_str(&format!("Question:\n{}", question.trim()));

        if output["type"] == "answer" {
            prompt.push_str(&format!(
                "\n\n1) The system was able to find an answer\n\nAnswer:\n{}",
                output["answer"].as_str().unwrap_or("")
            ));
        } else {
            prompt.push_str(&format!(
                "\n\n2) The system failed to find an answer\n\nExplanation:\n{}",
                output["explanation"].as_str().unwrap_or("")
            ));
        }

        match (
            output["sparql"].as_str(),
            output["kg"].as_str(),
            output["selections"].as_str(),
            output["result"].as_str(),
        ) {
            (Some(sparql), Some(kg), Some(selections), Some(result)) => {
                prompt.push_str(&format!(
                    "\n\n{}",
                    format_sparql_result(kg, sparql, selections, result)
                ));
            }
            _ => prompt.push_str("\n\nNo SPARQL query found"),
        }

        Some(prompt)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExamplesArgs {
    kg: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SimilarExamplesArgs {
    kg: String,
    question: String,
}

fn invalid_args(e: serde_json::Error) -> Error {
    Error::FunctionCall(format!("Invalid arguments: {e}"))
}

/// Know-before-use gate on the final query of an `answer` call.
fn check_known(env: &TaskEnv<'_>, args: &Value, known: &KnownSet) -> Result<()> {
    let Some(sparql) = args.get("sparql").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    let kg = args.get("kg").and_then(|v| v.as_str()).unwrap_or_default();
    let manager = find_manager(env.managers, kg)
        .ok()
        .or_else(|| env.managers.first())
        .ok_or_else(|| Error::FunctionCall("No knowledge graphs available".into()))?;

    let unknown: Vec<String> = sparql_items(sparql, &manager.prefixes)
        .into_iter()
        .filter(|item| !known.contains(item))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(Error::FunctionCall(format!(
            "The final SPARQL query uses identifiers that are not known from \
             previous function call results: {}. Verify that they exist in the \
             knowledge graphs first.",
            unknown.join(", ")
        )))
    }
}

fn random_examples(env: &TaskEnv<'_>, kg: &str) -> Result<Vec<Example>> {
    let manager = find_manager(env.managers, kg)?;
    let index = manager.example_index.as_ref().ok_or_else(|| {
        Error::FunctionCall(format!("No example index for knowledge graph {kg}"))
    })?;
    Ok(index.random(env.config.num_examples))
}

fn similar_examples(env: &TaskEnv<'_>, kg: &str, question: &str) -> Result<Vec<Example>> {
    let manager = find_manager(env.managers, kg)?;
    let index = manager.example_index.as_ref().ok_or_else(|| {
        Error::FunctionCall(format!("No example index for knowledge graph {kg}"))
    })?;
    Ok(index.similar(question, env.config.num_examples, MIN_EXAMPLE_SCORE))
}

async fn format_examples(
    env: &TaskEnv<'_>,
    kg: &str,
    examples: &[Example],
    known: &mut KnownSet,
) -> String {
    let mut sections = Vec::new();
    for example in examples {
        let Ok((sparql, selections, result)) = prepare_sparql_result(
            env.managers,
            env.client,
            kg,
            &example.sparql,
            env.config,
            Some(&mut *known),
        )
        .await
        else {
            continue;
        };
        sections.push(format!(
            "Question:\n{}\n\n{}",
            example.question,
            format_sparql_result(kg, &sparql, &selections, &result),
        ));
    }

    if sections.is_empty() {
        return "No examples found".into();
    }

    sections
        .iter()
        .enumerate()
        .map(|(i, section)| format!("Example {}:\n{section}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The synthetic example turn injected right after the user input when
/// force-examples is on. Returns (function name, args, assistant text, tool
/// result).
pub(crate) async fn forced_examples(
    env: &TaskEnv<'_>,
    mode: ForceExamples,
    question: &str,
    known: &mut KnownSet,
) -> Result<(String, Value, String, String)> {
    let kg = example_kgs(env)
        .into_iter()
        .next()
        .ok_or_else(|| Error::Task("no knowledge graph with an example index".into()))?;

    match mode {
        ForceExamples::Random => {
            let examples = random_examples(env, &kg)?;
            let result = format_examples(env, &kg, &examples, known).await;
            Ok((
                "find_examples".into(),
                json!({"kg": kg}),
                "Let's start by looking at some examples.".into(),
                result,
            ))
        }
        ForceExamples::Similar => {
            let examples = similar_examples(env, &kg, question)?;
            let result = format_examples(env, &kg, &examples, known).await;
            Ok((
                "find_similar_examples".into(),
                json!({"kg": kg, "question": question}),
                "Let's start by looking at some similar examples.".into(),
                result,
            ))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fallback parsing of answers from plain assistant text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Models sometimes emit the final call as text instead of a tool call,
/// either within `<tool_call>...</tool_call>` tags or a ```json code block.
fn raw_tool_call(message: &str) -> Option<String> {
    let tags = Regex::new(r"(?is)<tool_call>(.*?)</tool_call>").expect("static regex");
    if let Some(capture) = tags.captures(message) {
        return Some(capture[1].trim().to_string());
    }
    let block = Regex::new(r"(?is)```json\s*(.*?)\s*```").expect("static regex");
    block
        .captures(message)
        .map(|capture| capture[1].trim().to_string())
}

#[derive(Deserialize)]
struct NamedCall {
    name: String,
    arguments: Value,
}

fn valid_answer_args(args: &Value) -> bool {
    args.get("kg").map_or(false, Value::is_string)
        && args.get("sparql").map_or(false, Value::is_string)
        && args.get("answer").map_or(false, Value::is_string)
}

fn valid_cancel_args(args: &Value) -> bool {
    args.get("explanation").map_or(false, Value::is_string)
}

fn answer_from_message(message: Option<&str>) -> Option<ToolCall> {
    let raw = raw_tool_call(message?)?;
    if let Ok(call) = serde_json::from_str::<NamedCall>(&raw) {
        if call.name == "answer" && valid_answer_args(&call.arguments) {
            return Some(ToolCall::new(fresh_id(), "answer", call.arguments));
        }
    }
    let value: Value = serde_json::from_str(&raw).ok()?;
    valid_answer_args(&value).then(|| ToolCall::new(fresh_id(), "answer", value))
}

fn cancel_from_message(message: Option<&str>) -> Option<ToolCall> {
    let raw = raw_tool_call(message?)?;
    if let Ok(call) = serde_json::from_str::<NamedCall>(&raw) {
        if call.name == "cancel" && valid_cancel_args(&call.arguments) {
            return Some(ToolCall::new(fresh_id(), "cancel", call.arguments));
        }
    }
    let value: Value = serde_json::from_str(&raw).ok()?;
    valid_cancel_args(&value).then(|| ToolCall::new(fresh_id(), "cancel", value))
}

fn sparql_from_message(message: Option<&str>) -> Option<ToolCall> {
    let message = message?;
    let block = Regex::new(r"(?is)```sparql\s*(.*?)\s*```").expect("static regex");
    let capture = block.captures(message)?;
    Some(ToolCall::new(
        fresh_id(),
        "answer",
        json!({
            "kg": null,
            "sparql": capture[1].trim(),
            "answer": message,
        }),
    ))
}

/// Scan the conversation for the latest `answer` or `cancel`. Intermediate
/// feedback resets the scan so only the latest sweep counts.
fn get_answer_or_cancel(messages: &[Message]) -> (Option<ToolCall>, Option<ToolCall>) {
    let mut last_message: Option<String> = None;
    let mut last_answer: Option<ToolCall> = None;
    let mut last_cancel: Option<ToolCall> = None;
    let mut last_execute: Option<ToolCall> = None;

    for (i, message) in messages.iter().enumerate().skip(2) {
        if message.role == Role::Feedback && i != messages.len() - 1 {
            last_answer = None;
            last_cancel = None;
            last_message = None;
            last_execute = None;
        }

        let Some(response) = message.content.response() else {
            continue;
        };
        last_message = response.message.clone();

        for tool_call in &response.tool_calls {
            match tool_call.name.as_str() {
                "answer" => {
                    last_answer = Some(tool_call.clone());
                    last_cancel = None;
                }
                "cancel" => {
                    last_cancel = Some(tool_call.clone());
                    last_answer = None;
                }
                "execute" => last_execute = Some(tool_call.clone()),
                _ => {}
            }
        }
    }

    if last_answer.is_none() && last_cancel.is_none() {
        last_answer = answer_from_message(last_message.as_deref());
    }
    if last_answer.is_none() && last_cancel.is_none() {
        last_cancel = cancel_from_message(last_message.as_deref());
    }
    if last_answer.is_none() && last_cancel.is_none() {
        last_answer = sparql_from_message(last_message.as_deref());
    }
    if last_answer.is_none() && last_cancel.is_none() {
        if let Some(execute) = last_execute {
            let mut args = execute.args;
            args["answer"] = json!(last_message.unwrap_or_else(|| "No answer provided".into()));
            last_answer = Some(ToolCall::new(fresh_id(), "answer", args));
        }
    }

    (last_answer, last_cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::{test_manager, StaticClient};
    use grasp_domain::model::Response;

    fn env_managers() -> Vec<std::sync::Arc<grasp_kg::KgManager>> {
        vec![test_manager("wikidata")]
    }

    fn assistant(message: Option<&str>, calls: Vec<ToolCall>) -> Message {
        Message::assistant(Response {
            id: fresh_id(),
            message: message.map(String::from),
            reasoning: None,
            tool_calls: calls,
            usage: None,
        })
    }

    fn conversation(last: Message) -> Vec<Message> {
        vec![Message::system("sys"), Message::user("question"), last]
    }

    #[test]
    fn answer_call_wins() {
        let call = ToolCall::new(
            "c1",
            "answer",
            json!({"kg": "wikidata", "sparql": "SELECT 1", "answer": "Paris"}),
        );
        let (answer, cancel) = get_answer_or_cancel(&conversation(assistant(None, vec![call])));
        assert!(answer.is_some());
        assert!(cancel.is_none());
    }

    #[test]
    fn later_cancel_resets_answer() {
        let answer = ToolCall::new(
            "c1",
            "answer",
            json!({"kg": "wikidata", "sparql": "SELECT 1", "answer": "x"}),
        );
        let cancel = ToolCall::new("c2", "cancel", json!({"explanation": "no", "best_attempt": null}));
        let mut messages = conversation(assistant(None, vec![answer]));
        messages.push(assistant(None, vec![cancel]));
        let (answer, cancel) = get_answer_or_cancel(&messages);
        assert!(answer.is_none());
        assert!(cancel.is_some());
    }

    #[test]
    fn fenced_tool_call_is_adopted() {
        let text = "Here is my final answer:\n<tool_call>{\"name\": \"answer\", \
                    \"arguments\": {\"kg\": \"wikidata\", \"sparql\": \"SELECT 1\", \
                    \"answer\": \"Paris\"}}</tool_call>";
        let (answer, _) = get_answer_or_cancel(&conversation(assistant(Some(text), vec![])));
        let answer = answer.expect("fenced call parsed");
        assert_eq!(answer.args["answer"], "Paris");
    }

    #[test]
    fn fenced_json_block_with_bare_args() {
        let text = "```json\n{\"kg\": \"wikidata\", \"sparql\": \"SELECT 1\", \
                    \"answer\": \"Paris\"}\n```";
        let (answer, _) = get_answer_or_cancel(&conversation(assistant(Some(text), vec![])));
        assert!(answer.is_some());
    }

    #[test]
    fn fenced_sparql_block_is_promoted() {
        let text = "The query is:\n```sparql\nSELECT ?x WHERE { ?x ?p ?o }\n```";
        let (answer, _) = get_answer_or_cancel(&conversation(assistant(Some(text), vec![])));
        let answer = answer.expect("sparql block promoted");
        assert_eq!(answer.args["sparql"], "SELECT ?x WHERE { ?x ?p ?o }");
        assert!(answer.args["kg"].is_null());
    }

    #[test]
    fn last_execute_is_promoted() {
        let execute = ToolCall::new(
            "c1",
            "execute",
            json!({"kg": "wikidata", "sparql": "SELECT 2"}),
        );
        let (answer, _) =
            get_answer_or_cancel(&conversation(assistant(Some("done"), vec![execute])));
        let answer = answer.expect("execute promoted");
        assert_eq!(answer.args["sparql"], "SELECT 2");
        assert_eq!(answer.args["answer"], "done");
    }

    #[test]
    fn no_fallback_yields_none() {
        let (answer, cancel) =
            get_answer_or_cancel(&conversation(assistant(Some("no idea"), vec![])));
        assert!(answer.is_none());
        assert!(cancel.is_none());
    }

    #[test]
    fn intermediate_feedback_resets_scan() {
        let answer = ToolCall::new(
            "c1",
            "answer",
            json!({"kg": "wikidata", "sparql": "SELECT 1", "answer": "x"}),
        );
        let mut messages = conversation(assistant(None, vec![answer]));
        messages.push(Message::feedback("redo it"));
        messages.push(assistant(Some("working on it"), vec![]));
        let (answer, cancel) = get_answer_or_cancel(&messages);
        assert!(answer.is_none());
        assert!(cancel.is_none());
    }

    #[tokio::test]
    async fn output_enriches_answer_with_execution() {
        let managers = env_managers();
        let config = GraspConfig::default();
        let env = TaskEnv {
            managers: &managers,
            client: &StaticClient,
            config: &config,
            general_notes: &[],
        };

        let call = ToolCall::new(
            "c1",
            "answer",
            json!({"kg": "wikidata", "sparql": "SELECT ?x WHERE { wd:Q142 wdt:P36 ?x }", "answer": "Paris"}),
        );
        let messages = conversation(assistant(None, vec![call]));
        let output = SparqlQaTask
            .output(&env, &messages, &TaskState::None)
            .await
            .expect("output produced");

        assert_eq!(output["type"], "answer");
        assert_eq!(output["kg"], "wikidata");
        let formatted = output["formatted"].as_str().unwrap();
        assert!(formatted.contains("Paris"));
        assert!(formatted.contains("SPARQL query over wikidata"));
        assert!(formatted.contains("Execution result"));
        assert!(output["selections"]
            .as_str()
            .unwrap()
            .contains("wd:Q142 (France)"));
    }

    #[tokio::test]
    async fn answer_with_unknown_iris_fails_under_know_before_use() {
        let managers = env_managers();
        let mut config = GraspConfig::default();
        config.know_before_use = true;
        let env = TaskEnv {
            managers: &managers,
            client: &StaticClient,
            config: &config,
            general_notes: &[],
        };

        let args = json!({"kg": "wikidata", "sparql": "SELECT ?x WHERE { wd:Q142 wdt:P36 ?x }", "answer": "Paris"});
        let mut state = TaskState::None;
        let mut known = KnownSet::new();
        let err = SparqlQaTask
            .call(&env, "answer", &args, &mut state, &mut known)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wd:Q142"));

        known.extend(["wd:Q142", "wdt:P36"]);
        let result = SparqlQaTask
            .call(&env, "answer", &args, &mut state, &mut known)
            .await
            .unwrap();
        assert_eq!(result, "Stopping");
    }
}
