//! Chat-completions wire form.
//!
//! Assistant turns flatten into a single message with optional
//! `reasoning_content` and tool-call stubs; every tool result becomes its own
//! `tool` message carrying the originating call id. `feedback` roles
//! serialize as `user`.

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
        // feedback is treated as coming from the user
        Role::User | Role::Feedback => "user",
        Role::Config => "config",
        Role::Output => "output",
    }
}

/// Serialize the conversation into completions-API messages.
pub fn wire_messages(messages: &[Message]) -> Result<Vec<Value>> {
    let mut msgs = Vec::new();

    for message in messages {
        let response = match &message.content {
            MessageContent::Text(text) => {
                msgs.push(json!({
                    "role": role_str(message.role),
                    "content": text,
                }));
                continue;
            }
            MessageContent::Response(response) => response,
        };

        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();
        for tool_call in &response.tool_calls {
            tool_calls.push(json!({
                "id": tool_call.id,
                "type": "function",
                "function": {
                    "name": tool_call.name,
                    "arguments": tool_call.args.to_string(),
                },
            }));
            let result = tool_call.result.as_ref().ok_or_else(|| {
                Error::Protocol(format!(
                    "tool call {} has no result before re-serialization",
                    tool_call.id
                ))
            })?;
            tool_results.push(json!({
                "role": "tool",
                "tool_call_id": tool_call.id,
                "content": result,
            }));
        }

        let mut msg = json!({
            "role": role_str(message.role),
            "content": response.message,
        });
        if let Some(reasoning) = &response.reasoning {
            msg["reasoning_content"] = json!(reasoning.content);
        }
        if !tool_calls.is_empty() {
            msg["tool_calls"] = Value::Array(tool_calls);
        }

        msgs.push(msg);
        msgs.extend(tool_results);
    }

    Ok(msgs)
}

/// Build the request body for `POST {endpoint}/chat/completions`.
pub fn build_body(
    messages: &[Message],
    functions: &[FunctionSpec],
    config: &ModelConfig,
    model: &str,
) -> Result<Value> {
    let tools: Vec<Value> = functions
        .iter()
        .map(|fn_spec| json!({"type": "function", "function": fn_spec}))
        .collect();

    let mut body = json!({
        "model": model,
        "messages": wire_messages(messages)?,
        "tools": tools,
        "tool_choice": "auto",
        "parallel_tool_calls": config.parallel_tool_calls,
        "max_completion_tokens": config.max_completion_tokens,
    });

    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = config.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(effort) = &config.reasoning_effort {
        body["reasoning_effort"] = json!(effort);
    }
    if let Some(seed) = config.seed {
        body["seed"] = json!(seed);
    }
    for (key, value) in &config.model_kwargs {
        body[key.as_str()] = value.clone();
    }

    Ok(body)
}

/// Parse a completions-API response body into a [`Response`].
pub fn parse_response(body: &Value) -> Result<Response> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Protocol("no choices in completions response".into()))?;

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("stop");
    if !matches!(finish_reason, "tool_calls" | "stop" | "length") {
        return Err(Error::Protocol(format!(
            "unexpected finish reason {finish_reason}"
        )));
    }

    let message = choice
        .get("message")
        .ok_or_else(|| Error::Protocol("no message in completions choice".into()))?;

    let mut response = parse_assistant_message(message)?;
    response.usage = body.get("usage").and_then(parse_usage);
    Ok(response)
}

/// Parse a single assistant wire message. Split out so the round-trip of
/// serialized conversations can be tested without a full response body.
pub fn parse_assistant_message(message: &Value) -> Result<Response> {
    let text = strip_none(
        message
            .get("content")
            .and_then(|v| v.as_str())
            .map(String::from),
    );

    let reasoning = strip_none(
        message
            .get("reasoning_content")
            .and_then(|v| v.as_str())
            .map(String::from),
    )
    .map(|content| Reasoning {
        id: fresh_id(),
        content: Some(content),
        summary: None,
        encrypted_content: None,
    });

    let mut tool_calls = Vec::new();
    for tool_call in message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or_default()
    {
        if tool_call.get("type").and_then(|v| v.as_str()) != Some("function") {
            continue;
        }
        let function = tool_call
            .get("function")
            .ok_or_else(|| Error::Protocol("tool call without function".into()))?;
        let name = function
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("tool call without name".into()))?;
        let args_raw = function
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        let args: Value = serde_json::from_str(args_raw)
            .map_err(|e| Error::Protocol(format!("invalid tool call arguments: {e}")))?;
        let id = tool_call
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(fresh_id);
        tool_calls.push(ToolCall::new(id, name, args));
    }

    Ok(Response {
        id: fresh_id(),
        message: text,
        reasoning,
        tool_calls,
        usage: None,
    })
}

fn parse_usage(value: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: value.get("prompt_tokens")?.as_u64()?,
        completion_tokens: value.get("completion_tokens")?.as_u64()?,
        total_tokens: value.get("total_tokens")?.as_u64()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_with_call() -> Message {
        let mut tool_call = ToolCall::new(
            "call_1",
            "search_entities",
            json!({"kg": "wikidata", "query": "Paris"}),
        );
        tool_call.result = Some("1. wd:Q90 (Paris)".into());
        Message::assistant(Response {
            id: fresh_id(),
            message: Some("Searching".into()),
            reasoning: None,
            tool_calls: vec![tool_call],
            usage: None,
        })
    }

    #[test]
    fn assistant_flattens_with_tool_results() {
        let messages = vec![
            Message::system("sys"),
            Message::user("q"),
            assistant_with_call(),
        ];
        let wire = wire_messages(&messages).unwrap();
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[2]["role"], "assistant");
        assert_eq!(wire[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["content"], "1. wd:Q90 (Paris)");
    }

    #[test]
    fn feedback_serializes_as_user() {
        let wire = wire_messages(&[Message::feedback("try again")]).unwrap();
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn missing_tool_result_is_protocol_error() {
        let message = Message::assistant(Response {
            id: fresh_id(),
            message: None,
            reasoning: None,
            tool_calls: vec![ToolCall::new("c", "execute", json!({}))],
            usage: None,
        });
        assert!(wire_messages(&[message]).is_err());
    }

    #[test]
    fn roundtrip_preserves_content_hash() {
        let message = assistant_with_call();
        let original = message.content.response().unwrap().clone();

        let wire = wire_messages(&[message]).unwrap();
        let parsed = parse_assistant_message(&wire[0]).unwrap();
        assert_eq!(parsed.content_hash(), original.content_hash());
    }

    #[test]
    fn parse_rejects_unknown_finish_reason() {
        let body = json!({
            "choices": [{"finish_reason": "content_filter", "message": {"content": "x"}}],
        });
        assert!(matches!(
            parse_response(&body),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn parse_full_response() {
        let body = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "reasoning_content": "thinking",
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "execute", "arguments": "{\"kg\":\"wikidata\"}"},
                    }],
                },
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        });
        let response = parse_response(&body).unwrap();
        assert!(response.message.is_none());
        assert_eq!(response.reasoning_text(), Some("thinking"));
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].args["kg"], "wikidata");
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 15);
    }
}
