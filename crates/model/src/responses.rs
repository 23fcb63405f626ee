//! Responses-API wire form.
//!
//! Reasoning items, assistant output messages, and function call / output
//! pairs are separate input items. Ids and encrypted reasoning content are
//! round-tripped verbatim so backends can continue reasoning chains.

use serde_json::{json, Value};

use grasp_domain::config::ModelConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::model::{
    fresh_id, strip_none, FunctionSpec, Message, MessageContent, Reasoning, Response, Role,
    ToolCall, Usage,
};

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::User | Role::Feedback => "user",
        Role::Config => "config",
        Role::Output => "output",
    }
}

/// Serialize the conversation into responses-API input items.
pub fn wire_items(messages: &[Message]) -> Result<Vec<Value>> {
    let mut items = Vec::new();

    for message in messages {
        let response = match &message.content {
            MessageContent::Text(text) => {
                items.push(json!({
                    "type": "message",
                    "role": role_str(message.role),
                    "content": text,
                }));
                continue;
            }
            MessageContent::Response(response) => response,
        };

        if let Some(reasoning) = &response.reasoning {
            let content: Vec<Value> = reasoning
                .content
                .iter()
                .map(|text| json!({"type": "reasoning_text", "text": text}))
                .collect();
            let summary: Vec<Value> = reasoning
                .summary
                .iter()
                .map(|text| json!({"type": "summary_text", "text": text}))
                .collect();
            items.push(json!({
                "id": reasoning.id,
                "type": "reasoning",
                "content": content,
                "summary": summary,
                "encrypted_content": reasoning.encrypted_content,
            }));
        }

        if let Some(text) = &response.message {
            items.push(json!({
                "id": response.id,
                "type": "message",
                "role": role_str(message.role),
                "content": text,
            }));
        }

        for tool_call in &response.tool_calls {
            items.push(json!({
                "type": "function_call",
                "call_id": tool_call.id,
                "name": tool_call.name,
                "arguments": tool_call.args.to_string(),
            }));
            let result = tool_call.result.as_ref().ok_or_else(|| {
                Error::Protocol(format!(
                    "tool call {} has no result before re-serialization",
                    tool_call.id
                ))
            })?;
            items.push(json!({
                "type": "function_call_output",
                "call_id": tool_call.id,
                "output": result,
            }));
        }
    }

    Ok(items)
}

/// Build the request body for `POST {endpoint}/responses`.
pub fn build_body(
    messages: &[Message],
    functions: &[FunctionSpec],
    config: &ModelConfig,
    model: &str,
) -> Result<Value> {
    let tools: Vec<Value> = functions
        .iter()
        .map(|fn_spec| {
            json!({
                "type": "function",
                "name": fn_spec.name,
                "description": fn_spec.description,
                "parameters": fn_spec.parameters,
                "strict": fn_spec.strict,
            })
        })
        .collect();

    let mut body = json!({
        "model": model,
        "input": wire_items(messages)?,
        "include": ["reasoning.encrypted_content"],
        "tools": tools,
        "tool_choice": "auto",
        "parallel_tool_calls": config.parallel_tool_calls,
        "truncation": "auto",
        "max_output_tokens": config.max_completion_tokens,
        "store": false,
    });

    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = config.top_p {
        body["top_p"] = json!(top_p);
    }
    if config.reasoning_effort.is_some() || config.reasoning_summary.is_some() {
        body["reasoning"] = json!({
            "effort": config.reasoning_effort,
            "summary": config.reasoning_summary,
        });
    }
    if let Some(seed) = config.seed {
        body["seed"] = json!(seed);
    }
    for (key, value) in &config.model_kwargs {
        body[key.as_str()] = value.clone();
    }

    Ok(body)
}

/// Parse a responses-API body into a [`Response`].
pub fn parse_response(body: &Value) -> Result<Response> {
    let output = body
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Protocol("no output in responses body".into()))?;

    let mut response = response_from_items(output)?;
    response.usage = body.get("usage").and_then(parse_usage);
    Ok(response)
}

/// Reconstruct a [`Response`] from output (or echoed input) items.
pub fn response_from_items(items: &[Value]) -> Result<Response> {
    let mut id = None;
    let mut message = None;
    let mut reasoning = None;
    let mut tool_calls = Vec::new();

    for item in items {
        match item.get("type").and_then(|v| v.as_str()) {
            Some("message") => {
                if let Some(item_id) = item.get("id").and_then(|v| v.as_str()) {
                    id = Some(item_id.to_string());
                }
                message = strip_none(extract_text(item.get("content")));
            }
            Some("reasoning") => {
                reasoning = Some(Reasoning {
                    id: item
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                        .unwrap_or_else(fresh_id),
                    content: strip_none(first_text(item.get("content"))),
                    summary: strip_none(first_text(item.get("summary"))),
                    encrypted_content: item
                        .get("encrypted_content")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                });
            }
            Some("function_call") => {
                let name = item
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Protocol("function call without name".into()))?;
                let args_raw = item
                    .get("arguments")
                    .and_then(|v| v.as_str())
                    .unwrap_or("{}");
                let args: Value = serde_json::from_str(args_raw)
                    .map_err(|e| Error::Protocol(format!("invalid function call arguments: {e}")))?;
                let call_id = item
                    .get("call_id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(fresh_id);
                tool_calls.push(ToolCall::new(call_id, name, args));
            }
            // function_call_output items echo our own tool results
            Some("function_call_output") => {}
            other => {
                return Err(Error::Protocol(format!(
                    "unknown responses output item type {other:?}"
                )));
            }
        }
    }

    Ok(Response {
        id: id.unwrap_or_else(fresh_id),
        message,
        reasoning,
        tool_calls,
        usage: None,
    })
}

/// Message content is either a bare string or a list of text parts.
fn extract_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(text) => Some(text.clone()),
        Value::Array(_) => first_text(content),
        _ => None,
    }
}

fn first_text(content: Option<&Value>) -> Option<String> {
    content?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
        .map(String::from)
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let prompt = value.get("input_tokens")?.as_u64()?;
    let completion = value.get("output_tokens")?.as_u64()?;
    let total = value
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(prompt + completion);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_response() -> Response {
        let mut tool_call = ToolCall::new("call_9", "execute", json!({"sparql": "SELECT 1"}));
        tool_call.result = Some("1".into());
        Response {
            id: "msg_1".into(),
            message: Some("Running a query".into()),
            reasoning: Some(Reasoning {
                id: "rs_1".into(),
                content: None,
                summary: Some("plan the query".into()),
                encrypted_content: Some("opaque-blob".into()),
            }),
            tool_calls: vec![tool_call],
            usage: None,
        }
    }

    #[test]
    fn items_preserve_ids_and_encrypted_content() {
        let items = wire_items(&[Message::assistant(full_response())]).unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0]["type"], "reasoning");
        assert_eq!(items[0]["id"], "rs_1");
        assert_eq!(items[0]["encrypted_content"], "opaque-blob");
        assert_eq!(items[1]["type"], "message");
        assert_eq!(items[1]["id"], "msg_1");
        assert_eq!(items[2]["type"], "function_call");
        assert_eq!(items[3]["type"], "function_call_output");
        assert_eq!(items[3]["call_id"], "call_9");
    }

    #[test]
    fn roundtrip_preserves_content_hash() {
        let original = full_response();
        let items = wire_items(&[Message::assistant(original.clone())]).unwrap();
        // drop the echoed tool output; the parser ignores it anyway
        let parsed = response_from_items(&items).unwrap();
        assert_eq!(parsed.content_hash(), original.content_hash());
        assert_eq!(
            parsed.reasoning.as_ref().unwrap().encrypted_content.as_deref(),
            Some("opaque-blob")
        );
    }

    #[test]
    fn parse_body_with_usage() {
        let body = json!({
            "output": [
                {"type": "message", "id": "m", "role": "assistant",
                 "content": [{"type": "output_text", "text": "Paris"}]},
            ],
            "usage": {"input_tokens": 7, "output_tokens": 3},
        });
        let response = parse_response(&body).unwrap();
        assert_eq!(response.message.as_deref(), Some("Paris"));
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 10);
    }

    #[test]
    fn unknown_item_type_is_protocol_error() {
        let items = vec![json!({"type": "web_search_call"})];
        assert!(matches!(
            response_from_items(&items),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn feedback_becomes_user_item() {
        let items = wire_items(&[Message::feedback("refine the query")]).unwrap();
        assert_eq!(items[0]["role"], "user");
        assert_eq!(items[0]["type"], "message");
    }
}
