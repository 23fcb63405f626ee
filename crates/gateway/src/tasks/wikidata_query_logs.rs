//! Wikidata query logs: given an anonymized SPARQL query from the query
//! service logs, the model reconstructs natural language questions and a
//! cleaned query.

use regex::Regex;
use serde_json::{json, Value};

use grasp_domain::config::GraspConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::fmt::format_list;
use grasp_domain::model::{FunctionSpec, Message};
use grasp_kg::functions::{format_sparql_result, prepare_sparql_result};
use grasp_kg::items::sparql_items;
use grasp_kg::KnownSet;

use super::{TaskAdapter, TaskEnv, TaskState};

pub struct WikidataQueryLogsTask;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query cleaning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Remove `SERVICE wikibase:label { ... }` blocks, matching braces so nested
/// groups inside the service block do not cut it short.
fn strip_label_service(sparql: &str) -> String {
    let service = Regex::new(r"(?i)SERVICE\s+wikibase:label\s*\{").expect("static regex");
    let mut out = String::new();
    let mut rest = sparql;

    while let Some(found) = service.find(rest) {
        out.push_str(&rest[..found.start()]);

        let mut depth = 1usize;
        let mut end = found.end();
        for (i, c) in rest[found.end()..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = found.end() + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Drop SELECT variables that do not occur in the query body (anonymized
/// leftovers). `?fooLabel` variables are kept; the label service binding
/// them is non-standard and the model re-adds labels via rdfs:label.
fn drop_unused_select_vars(sparql: &str) -> String {
    let select = Regex::new(r"(?is)(SELECT\s+(?:DISTINCT\s+)?)(.*?)(\s+WHERE)").expect("static regex");
    let Some(capture) = select.captures(sparql) else {
        return sparql.to_string();
    };

    let vars_part = capture.get(2).map(|m| m.as_str()).unwrap_or("");
    if vars_part.trim() == "*" {
        return sparql.to_string();
    }

    let body = &sparql[capture.get(0).map(|m| m.end()).unwrap_or(0)..];
    let kept: Vec<&str> = vars_part
        .split_whitespace()
        .filter(|var| {
            if !var.starts_with('?') || var.ends_with("Label") {
                return true;
            }
            body.contains(*var)
        })
        .collect();

    if kept.is_empty() || kept.len() == vars_part.split_whitespace().count() {
        return sparql.to_string();
    }

    let prefix = capture.get(1).map(|m| m.as_str()).unwrap_or("SELECT ");
    let suffix = capture.get(3).map(|m| m.as_str()).unwrap_or(" WHERE");
    select
        .replace(sparql, format!("{prefix}{}{suffix}", kept.join(" ")))
        .into_owned()
}

/// Full input cleaning: strip label service blocks, then unused variables.
pub fn clean_sparql(sparql: &str) -> String {
    let stripped = strip_label_service(sparql);
    drop_unused_select_vars(stripped.trim())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl TaskAdapter for WikidataQueryLogsTask {
    fn system_info(&self, config: &GraspConfig) -> String {
        format!(
            "You are a Wikidata expert trying to find possible user questions for \
             anonymized SPARQL queries sent to the Wikidata Query Service. Your task \
             is to generate one or more natural language questions that correspond \
             to a given SPARQL query.\n\n\
             You should take a step-by-step approach to understand the query and \
             generate the questions:\n\
             1. Analyze the given SPARQL query, its used entities and properties, \
             and execution result. Think about what the user wanted to achieve with \
             this query. Search and query Wikidata to gain more context about the \
             SPARQL query, if needed.\n\
             2. Clean the SPARQL query. This e.g. includes removing superfluous \
             variables or other unnecessary parts, finding better variable names, or \
             replacing anonymized string literals with sensible values.\n\
             3. Formulate your final SPARQL query and validate it against Wikidata. \
             It should not be too different from the original anonymous query in \
             terms of intent and its execution result, but you are allowed to \
             deviate if it would make the query more natural, precise, etc.\n\
             4. For the final SPARQL query, generate between 1 and {} natural \
             language questions that accurately reflect its intent.\n\
             5. Provide your final output by calling the answer function.",
            config.task.max_questions,
        )
    }

    fn rules(&self) -> Vec<String> {
        vec![
            "The generated questions should be diverse regarding the phrasing (e.g. \
             keyword-like, formulated in a requesting or asking manner, etc.)."
                .into(),
            "You can use the cancel function at any time to stop the task without \
             producing an output (e.g. if the SPARQL query is invalid or does not \
             make sense)."
                .into(),
        ]
    }

    async fn input_and_state(&self, raw: &Value, env: &TaskEnv<'_>) -> Result<(String, TaskState)> {
        let sparql = raw
            .as_str()
            .ok_or_else(|| Error::Task("wikidata-query-logs input must be a SPARQL string".into()))?;

        let manager = env
            .managers
            .first()
            .ok_or_else(|| Error::Task("no knowledge graph selected".into()))?;

        let cleaned = clean_sparql(sparql);
        let (sparql, selections, result) = prepare_sparql_result(
            env.managers,
            env.client,
            &manager.kg,
            &cleaned,
            env.config,
            None,
        )
        .await?;

        let instructions = format!(
            "Find natural language questions for the following anonymized SPARQL \
             query from the query logs.\n\n{}",
            format_sparql_result(&manager.kg, &sparql, &selections, &result),
        );

        Ok((instructions, TaskState::None))
    }

    fn functions(&self, _env: &TaskEnv<'_>) -> Vec<FunctionSpec> {
        vec![
            FunctionSpec::new(
                "answer",
                "Finalize your output and stop.",
                json!({
                    "type": "object",
                    "properties": {
                        "sparql": {
                            "type": "string",
                            "description": "The final cleaned SPARQL query",
                        },
                        "questions": {
                            "type": "array",
                            "description": "A list of natural language questions \
corresponding to the SPARQL query",
                            "items": {
                                "type": "string",
                                "description": "A natural language question \
corresponding to the SPARQL query",
                            },
                        },
                    },
                    "required": ["sparql", "questions"],
                    "additionalProperties": false,
                }),
            ),
            FunctionSpec::new(
                "cancel",
                "Stop the task without producing an output.",
                json!({
                    "type": "object",
                    "properties": {
                        "reason": {
                            "type": "string",
                            "description": "The reason for cancelling the task",
                        },
                    },
                    "required": ["reason"],
                    "additionalProperties": false,
                }),
            ),
        ]
    }

    fn is_task_function(&self, name: &str) -> bool {
        name == "answer" || name == "cancel"
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
                    if let (Some(sparql), Some(manager)) =
                        (args.get("sparql").and_then(|v| v.as_str()), env.managers.first())
                    {
                        let unknown: Vec<String> = sparql_items(sparql, &manager.prefixes)
                            .into_iter()
                            .filter(|item| !known.contains(item))
                            .collect();
                        if !unknown.is_empty() {
                            return Err(Error::FunctionCall(format!(
                                "The final SPARQL query uses identifiers that are \
                                 not known from previous function call results: {}. \
                                 Verify that they exist in the knowledge graphs \
                                 first.",
                                unknown.join(", ")
                            )));
                        }
                    }
                }
                Ok("Stopping".into())
            }
            "cancel" => Ok("Stopping".into()),
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
        let response = messages.last()?.content.response()?;
        let tool_call = response.tool_calls.first()?;

        let mut output = tool_call.args.clone();
        match tool_call.name.as_str() {
            "answer" => {
                let manager = env.managers.first()?;
                let sparql = tool_call.args.get("sparql")?.as_str()?;
                let questions: Vec<String> = tool_call
                    .args
                    .get("questions")?
                    .as_array()?
                    .iter()
                    .filter_map(|q| q.as_str().map(String::from))
                    .collect();

                let (sparql, selections, result) = prepare_sparql_result(
                    env.managers,
                    env.client,
                    &manager.kg,
                    sparql,
                    env.config,
                    None,
                )
                .await
                .ok()?;

                output["type"] = json!("answer");
                output["sparql"] = json!(sparql);
                output["formatted"] = json!(format!(
                    "Questions:\n{}\n\n{}",
                    format_list(&questions, 0),
                    format_sparql_result(&manager.kg, &sparql, &selections, &result),
                ));
            }
            "cancel" => {
                let reason = tool_call.args.get("reason")?.as_str()?;
                output["type"] = json!("cancel");
                output["formatted"] = json!(format!("Cancelled:\n{reason}"));
            }
            _ => return None,
        }

        Some(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testutil::{test_manager, StaticClient};
    use grasp_domain::model::{fresh_id, Response, ToolCall};

    #[test]
    fn strips_label_service_with_nested_braces() {
        let sparql = "SELECT ?x ?xLabel WHERE { ?x wdt:P31 wd:Q5 . \
                      SERVICE wikibase:label { bd:serviceParam wikibase:language \
                      \"en\" . ?x rdfs:label ?xLabel } }";
        let cleaned = clean_sparql(sparql);
        assert!(!cleaned.contains("SERVICE"));
        assert!(cleaned.contains("?x wdt:P31 wd:Q5"));
        // label variables survive the cleaning
        assert!(cleaned.contains("?xLabel"));
    }

    #[test]
    fn drops_unused_non_label_vars() {
        let sparql = "SELECT ?x ?orphan WHERE { ?x ?p ?o }";
        assert_eq!(clean_sparql(sparql), "SELECT ?x WHERE { ?x ?p ?o }");
    }

    #[test]
    fn keeps_used_vars_and_star() {
        assert_eq!(
            clean_sparql("SELECT * WHERE { ?x ?p ?o }"),
            "SELECT * WHERE { ?x ?p ?o }"
        );
        let sparql = "SELECT ?x ?y WHERE { ?x ?p ?y }";
        assert_eq!(clean_sparql(sparql), sparql);
    }

    #[tokio::test]
    async fn input_builds_executed_prompt() {
        let managers = vec![test_manager("wikidata")];
        let config = GraspConfig::default();
        let env = TaskEnv {
            managers: &managers,
            client: &StaticClient,
            config: &config,
            general_notes: &[],
        };

        let (instructions, _) = WikidataQueryLogsTask
            .input_and_state(
                &json!("SELECT ?x WHERE { wd:Q142 wdt:P36 ?x }"),
                &env,
            )
            .await
            .unwrap();
        assert!(instructions.contains("SPARQL query over wikidata"));
        assert!(instructions.contains("Execution result"));
    }

    #[tokio::test]
    async fn output_formats_questions() {
        let managers = vec![test_manager("wikidata")];
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
            json!({
                "sparql": "SELECT ?x WHERE { wd:Q142 wdt:P36 ?x }",
                "questions": ["What is the capital of France?", "capital of france"],
            }),
        );
        let messages = vec![
            Message::system("sys"),
            Message::user("input"),
            Message::assistant(Response {
                id: fresh_id(),
                message: None,
                reasoning: None,
                tool_calls: vec![call],
                usage: None,
            }),
        ];

        let output = WikidataQueryLogsTask
            .output(&env, &messages, &TaskState::None)
            .await
            .unwrap();
        assert_eq!(output["type"], "answer");
        let formatted = output["formatted"].as_str().unwrap();
        assert!(formatted.starts_with("Questions:\n- What is the capital of France?"));
        assert!(formatted.contains("SPARQL query over wikidata"));
    }

    #[tokio::test]
    async fn cancel_output() {
        let managers = vec![test_manager("wikidata")];
        let config = GraspConfig::default();
        let env = TaskEnv {
            managers: &managers,
            client: &StaticClient,
            config: &config,
            general_notes: &[],
        };

        let call = ToolCall::new("c1", "cancel", json!({"reason": "query is invalid"}));
        let messages = vec![
            Message::system("sys"),
            Message::user("input"),
            Message::assistant(Response {
                id: fresh_id(),
                message: None,
                reasoning: None,
                tool_calls: vec![call],
                usage: None,
            }),
        ];

        let output = WikidataQueryLogsTask
            .output(&env, &messages, &TaskState::None)
            .await
            .unwrap();
        assert_eq!(output["type"], "cancel");
        assert_eq!(output["formatted"], "Cancelled:\nquery is invalid");
    }
}
