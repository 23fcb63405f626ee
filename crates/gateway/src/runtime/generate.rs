//! The agent loop: drives LLM turns, dispatches tool calls, applies the
//! step, loop-detection, and feedback guards, and publishes a lazy event
//! stream over a bounded channel.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;

use grasp_domain::config::GraspConfig;
use grasp_domain::error::{Error, Result};
use grasp_domain::event::{ErrorReason, Event, FeedbackStatus, GenerationError};
use grasp_domain::model::{fresh_id, Message, MessageContent, Response, Role, ToolCall};
use grasp_domain::request::{Past, Task};
use grasp_kg::functions::{call_kg_function, is_kg_function, kg_functions};
use grasp_kg::{KgManager, KnownSet, SparqlClient};
use grasp_model::ModelBridge;

use crate::runtime::cancel::CancelToken;
use crate::runtime::feedback::{format_feedback, generate_feedback};
use crate::tasks::{adapter_for, sparql_qa, system_instructions, TaskAdapter, TaskEnv, TaskState};

/// Capacity of the event channel between the producer and the request
/// handler. A slow consumer blocks the loop, bounding memory per request.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Everything a generation needs, assembled per request.
pub struct GenerationDeps {
    pub bridge: Arc<dyn ModelBridge>,
    pub client: Arc<dyn SparqlClient>,
    pub managers: Vec<Arc<KgManager>>,
    pub general_notes: Vec<String>,
    pub config: Arc<GraspConfig>,
}

/// Items on the event channel: ordinary events, or a producer failure that
/// prevented a terminal `output` event (invalid input, broken past state).
pub enum Produced {
    Event(Event),
    Failed(String),
}

/// Spawn a generation and return the receiving end of its event stream.
pub fn spawn_generation(
    deps: GenerationDeps,
    task: Task,
    input: Value,
    past: Option<Past>,
    cancel: CancelToken,
) -> mpsc::Receiver<Produced> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let span = tracing::info_span!("generation", task = %task);
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            if let Err(e) = run_generation(deps, task, input, past, &tx, cancel).await {
                if tx.is_closed() {
                    // receiver dropped, nothing left to report
                    tracing::debug!("event receiver dropped, generation aborted");
                } else {
                    tracing::error!(error = %e, "generation failed before producing output");
                    let _ = tx.send(Produced::Failed(e.to_string())).await;
                }
            }
        },
        span,
    ));

    rx
}

async fn emit(tx: &mpsc::Sender<Produced>, event: Event) -> Result<()> {
    tx.send(Produced::Event(event))
        .await
        .map_err(|_| Error::Other("event receiver dropped".into()))
}

async fn run_generation(
    deps: GenerationDeps,
    task: Task,
    input: Value,
    past: Option<Past>,
    tx: &mpsc::Sender<Produced>,
    cancel: CancelToken,
) -> Result<()> {
    let adapter = adapter_for(task);

    // examples only exist for sparql-qa
    let config = if task == Task::SparqlQa {
        (*deps.config).clone()
    } else {
        let mut config = (*deps.config).clone();
        config.force_examples = None;
        config
    };

    let env = TaskEnv {
        managers: &deps.managers,
        client: deps.client.as_ref(),
        config: &config,
        general_notes: &deps.general_notes,
    };

    emit(tx, Event::Input {
        input: input.clone(),
    })
    .await?;

    let mut fns = kg_functions(&deps.managers, &config);
    fns.extend(adapter.functions(&env));

    let (input_text, mut state) = adapter.input_and_state(&input, &env).await?;

    let system_instruction = system_instructions(adapter, &env);
    emit(tx, Event::System {
        functions: fns.clone(),
        system_message: system_instruction.clone(),
    })
    .await?;

    tracing::debug!(
        functions = ?fns.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        "functions assembled"
    );

    // The system message is rebuilt even when resuming: the KG selection or
    // tool set may have changed since the past conversation was recorded.
    let mut messages = vec![Message::system(&system_instruction)];
    let mut inputs: Vec<String> = Vec::new();
    let mut known = KnownSet::new();

    if let Some(past) = past {
        if past.messages.first().map(|m| m.role) != Some(Role::System) {
            return Err(Error::Task(
                "first past message must be a system message".into(),
            ));
        }
        for message in past.messages.into_iter().skip(1) {
            if message.role == Role::User {
                if let Some(text) = message.content.text() {
                    inputs.push(text.to_string());
                }
            }
            messages.push(message);
        }
        known.extend(past.known.iter().map(String::as_str));
    }

    messages.push(Message::user(&input_text));
    inputs.push(input_text.clone());

    if let Some(mode) = config.force_examples {
        match sparql_qa::forced_examples(&env, mode, &input_text, &mut known).await {
            Ok((name, args, content, result)) => {
                let mut tool_call = ToolCall::new(fresh_id(), &name, args.clone());
                tool_call.result = Some(result.clone());
                messages.push(Message::assistant(Response {
                    id: fresh_id(),
                    message: Some(content.clone()),
                    reasoning: None,
                    tool_calls: vec![tool_call],
                    usage: None,
                }));

                emit(tx, Event::Model {
                    reasoning: None,
                    content: Some(content),
                })
                .await?;
                emit(tx, Event::Tool { name, args, result }).await?;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "force_examples specified but no example index available, ignoring"
                );
            }
        }
    }

    let start = Instant::now();
    let mut error: Option<GenerationError> = None;
    let mut last_hash: Option<String> = None;
    let mut retries = 0usize;
    let mut steps = 0usize;

    'sweep: loop {
        if steps >= config.max_steps {
            error = Some(GenerationError::new(
                ErrorReason::StepLimit,
                format!("Reached maximum number of steps ({})", config.max_steps),
            ));
            break;
        }
        if cancel.is_cancelled() {
            break;
        }
        steps += 1;

        let response = match deps.bridge.call(&messages, &fns, &config.model).await {
            Ok(response) => response,
            Err(Error::Timeout(_)) => {
                error = Some(GenerationError::new(ErrorReason::Timeout, "LLM API timed out"));
                tracing::error!("LLM API timed out");
                break;
            }
            Err(e) => {
                error = Some(GenerationError::new(
                    ErrorReason::Api,
                    format!("Failed to generate response:\n{e}"),
                ));
                tracing::error!(error = %e, "LLM API call failed");
                break;
            }
        };

        if response.is_empty() {
            error = Some(GenerationError::new(
                ErrorReason::Empty,
                "Empty response from LLM API",
            ));
            tracing::error!("empty response from LLM API");
            break;
        }

        let hash = response.content_hash();
        let has_content = response.has_content();
        let model_event = Event::Model {
            reasoning: response.reasoning_text().map(String::from),
            content: response.message.clone(),
        };
        let call_count = response.tool_calls.len();

        messages.push(Message::assistant(response));

        if last_hash.as_deref() == Some(hash.as_str()) {
            error = Some(GenerationError::new(
                ErrorReason::Loop,
                "Consecutive identical responses, model is stuck in a loop",
            ));
            tracing::error!("loop detected, stopping");
            break;
        }
        last_hash = Some(hash);

        if has_content {
            emit(tx, model_event).await?;
        }

        // no tool calls mean the model decided to stop
        let mut should_stop = call_count == 0;

        for i in 0..call_count {
            if cancel.is_cancelled() {
                break 'sweep;
            }

            let (name, args) = {
                let response = last_response(&messages);
                (
                    response.tool_calls[i].name.clone(),
                    response.tool_calls[i].args.clone(),
                )
            };

            let (result, is_error) =
                dispatch(adapter, &env, &name, &args, &mut state, &mut known).await;

            last_response_mut(&mut messages).tool_calls[i].result = Some(result.clone());

            emit(tx, Event::Tool {
                name: name.clone(),
                args,
                result,
            })
            .await?;

            // a failed terminal call must not end the loop; the model gets
            // the error back and may retry
            if adapter.is_terminal(&name) && !is_error {
                should_stop = true;
            }
        }

        let can_feedback = config.feedback
            && retries < config.max_feedbacks
            && adapter.feedback_system(&env).is_some();

        if !should_stop {
            continue;
        }
        if !can_feedback {
            break;
        }

        let Some(output) = adapter.output(&env, &messages, &state).await else {
            break;
        };

        let feedback = match generate_feedback(
            deps.bridge.as_ref(),
            adapter,
            &env,
            &config,
            &inputs,
            &output,
        )
        .await
        {
            Ok(Some(feedback)) => feedback,
            Ok(None) => break,
            Err(e) => {
                error = Some(GenerationError::new(
                    ErrorReason::Feedback,
                    format!("Failed to generate feedback:\n{e}"),
                ));
                tracing::error!(error = %e, "feedback generation failed");
                break;
            }
        };

        messages.push(Message::feedback(format_feedback(&feedback)));
        emit(tx, Event::Feedback {
            status: feedback.status,
            feedback: feedback.feedback.clone(),
        })
        .await?;

        if feedback.status == FeedbackStatus::Done {
            break;
        }

        // another sweep: the loop detector must not trip on the retry
        last_hash = None;
        retries += 1;
    }

    let output = adapter.output(&env, &messages, &state).await;

    emit(tx, Event::Output {
        task,
        output,
        elapsed: start.elapsed().as_secs_f64(),
        error,
        messages,
        known: known.to_sorted_vec(),
    })
    .await?;

    Ok(())
}

fn last_response(messages: &[Message]) -> &Response {
    match messages.last().map(|m| &m.content) {
        Some(MessageContent::Response(response)) => response,
        _ => unreachable!("assistant message was just pushed"),
    }
}

fn last_response_mut(messages: &mut [Message]) -> &mut Response {
    match messages.last_mut().map(|m| &mut m.content) {
        Some(MessageContent::Response(response)) => response,
        _ => unreachable!("assistant message was just pushed"),
    }
}

/// Route a tool call to the task adapter or the KG function set. Failures
/// become model-visible strings and never abort the loop.
async fn dispatch(
    adapter: &dyn TaskAdapter,
    env: &TaskEnv<'_>,
    name: &str,
    args: &Value,
    state: &mut TaskState,
    known: &mut KnownSet,
) -> (String, bool) {
    let result = if adapter.is_task_function(name) {
        adapter.call(env, name, args, state, known).await
    } else if is_kg_function(name, env.config.fn_set) {
        call_kg_function(env.managers, env.client, env.config, name, args, known).await
    } else {
        Err(Error::FunctionCall(format!("Unknown function: {name}")))
    };

    match result {
        Ok(result) => (result, false),
        Err(e) => (
            format!("Call to function {name} returned an error:\n{e}"),
            true,
        ),
    }
}
