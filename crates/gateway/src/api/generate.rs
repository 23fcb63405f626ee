//! Generation endpoints: `POST /run` (one-shot) and `GET /live` (streaming
//! WebSocket with per-event acknowledgements and cancellation).

use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use grasp_domain::event::Event;
use grasp_domain::request::{Request, Task};

use crate::runtime::{spawn_generation, CancelToken, Produced};
use crate::state::AppState;

/// WebSocket close code for "try again later".
const TRY_AGAIN_LATER: u16 = 1013;

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// The HTTP surface serves the four client-facing tasks; exploration runs
/// through the CLI note-taking path.
fn servable(task: Task) -> bool {
    task != Task::Exploration
}

/// Append a terminal output event to the configured JSONL log.
async fn log_output(state: &AppState, event: &Event) {
    let Some(path) = &state.config.server.log_outputs else {
        return;
    };
    let Ok(mut line) = serde_json::to_string(event) else {
        return;
    };
    line.push('\n');

    let result = async {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to log output");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /run (one-shot)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run(State(state): State<AppState>, Json(request): Json<Request>) -> Response {
    let _permit = match state.connections.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("run request refused: maximum number of active connections reached");
            return api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Server too busy, try again later",
            );
        }
    };
    tracing::info!(
        task = %request.task,
        available = state.connections.available_permits(),
        "run request started"
    );

    if !servable(request.task) {
        return api_error(StatusCode::BAD_REQUEST, "Unsupported task");
    }
    let deps = match state.deps_for(&request.knowledge_graphs) {
        Ok(deps) => deps,
        Err(_) => {
            tracing::error!(selection = ?request.knowledge_graphs, "unsupported KG selection");
            return api_error(
                StatusCode::BAD_REQUEST,
                "Unsupported knowledge graph selection",
            );
        }
    };

    let cancel = CancelToken::new();
    let mut rx = spawn_generation(deps, request.task, request.input, request.past, cancel.clone());

    let drain = async {
        let mut output: Option<Event> = None;
        let mut failure: Option<String> = None;
        while let Some(produced) = rx.recv().await {
            match produced {
                Produced::Event(event) if event.is_output() => output = Some(event),
                Produced::Event(_) => {}
                Produced::Failed(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        (output, failure)
    };

    let max_generation_time = Duration::from_secs(state.config.server.max_generation_time);
    match tokio::time::timeout(max_generation_time, drain).await {
        Err(_) => {
            cancel.cancel();
            tracing::warn!(
                "generation hit time limit of {} seconds",
                state.config.server.max_generation_time
            );
            api_error(
                StatusCode::GATEWAY_TIMEOUT,
                format!(
                    "Generation hit time limit of {} seconds",
                    state.config.server.max_generation_time
                ),
            )
        }
        Ok((Some(output), None)) => {
            log_output(&state, &output).await;
            Json(output).into_response()
        }
        Ok((_, Some(failure))) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to handle request:\n{failure}"),
        ),
        Ok((None, None)) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "No output produced")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /live (streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn live(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn close_socket(mut socket: WebSocket, reason: String) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: TRY_AGAIN_LATER,
            reason: reason.into(),
        })))
        .await;
}

async fn send_json(socket: &mut WebSocket, value: &impl serde::Serialize) -> bool {
    match serde_json::to_string(value) {
        Ok(text) => socket.send(WsMessage::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize frame");
            false
        }
    }
}

/// Wait for the next text frame, enforcing the idle timeout.
///
/// Returns `Ok(None)` when the client went away and `Err(())` when the idle
/// limit was hit (the socket is closed with 1013 in that case).
async fn receive_text(
    socket: &mut WebSocket,
    idle: Duration,
) -> std::result::Result<Option<String>, ()> {
    loop {
        let frame = match tokio::time::timeout(idle, socket.recv()).await {
            Err(_) => return Err(()),
            Ok(None) => return Ok(None),
            Ok(Some(Err(_))) => return Ok(None),
            Ok(Some(Ok(frame))) => frame,
        };
        match frame {
            WsMessage::Text(text) => return Ok(Some(text)),
            WsMessage::Close(_) => return Ok(None),
            // axum answers pings automatically
            _ => continue,
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let permit = match state.connections.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(
                "live connection immediately closed: maximum number of active \
                 connections reached"
            );
            close_socket(socket, "Server too busy, try again later".into()).await;
            return;
        }
    };
    tracing::info!(
        available = state.connections.available_permits(),
        "live client connected"
    );

    let idle = Duration::from_secs(state.config.server.max_idle_time);
    let max_generation_time = Duration::from_secs(state.config.server.max_generation_time);

    loop {
        let text = match receive_text(&mut socket, idle).await {
            Err(()) => {
                let reason = format!(
                    "Connection closed due to inactivity after {} seconds",
                    state.config.server.max_idle_time
                );
                tracing::info!("{reason}");
                close_socket(socket, reason).await;
                break;
            }
            Ok(None) => break,
            Ok(Some(text)) => text,
        };

        let request: Request = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(_) => {
                tracing::error!("invalid live request");
                if !send_json(&mut socket, &json!({"error": "Invalid request format"})).await {
                    break;
                }
                continue;
            }
        };

        if !servable(request.task) {
            if !send_json(&mut socket, &json!({"error": "Unsupported task"})).await {
                break;
            }
            continue;
        }
        let deps = match state.deps_for(&request.knowledge_graphs) {
            Ok(deps) => deps,
            Err(_) => {
                tracing::error!(
                    selection = ?request.knowledge_graphs,
                    "unsupported KG selection on live socket"
                );
                let frame = json!({"error": "Unsupported knowledge graph selection"});
                if !send_json(&mut socket, &frame).await {
                    break;
                }
                continue;
            }
        };

        tracing::info!(task = %request.task, "processing live request");

        let cancel = CancelToken::new();
        let mut rx =
            spawn_generation(deps, request.task, request.input, request.past, cancel.clone());

        let started = Instant::now();
        let mut cancelled = false;

        'generation: while let Some(produced) = rx.recv().await {
            let event = match produced {
                Produced::Event(event) => event,
                Produced::Failed(e) => {
                    cancel.cancel();
                    let frame = json!({"error": format!("Failed to handle request:\n{e}")});
                    if !send_json(&mut socket, &frame).await {
                        return;
                    }
                    break 'generation;
                }
            };

            if started.elapsed() > max_generation_time {
                cancel.cancel();
                let message = format!(
                    "Generation hit time limit of {} seconds",
                    state.config.server.max_generation_time
                );
                tracing::warn!("{message}");
                let _ = send_json(&mut socket, &json!({"error": message})).await;
                break 'generation;
            }

            let is_output = event.is_output();
            if is_output {
                log_output(&state, &event).await;
            }
            if !send_json(&mut socket, &event).await {
                cancel.cancel();
                return;
            }
            if is_output {
                break 'generation;
            }
            if cancelled {
                // post-cancel events are drained without acknowledgements
                continue;
            }

            // acknowledgement frame, possibly carrying a cancel
            let ack = match receive_text(&mut socket, idle).await {
                Err(()) => {
                    cancel.cancel();
                    let reason = format!(
                        "Connection closed due to inactivity after {} seconds",
                        state.config.server.max_idle_time
                    );
                    tracing::info!("{reason}");
                    close_socket(socket, reason).await;
                    return;
                }
                Ok(None) => {
                    cancel.cancel();
                    return;
                }
                Ok(Some(text)) => text,
            };

            let wants_cancel = serde_json::from_str::<Value>(&ack)
                .ok()
                .and_then(|v| v.get("cancel").and_then(Value::as_bool))
                .unwrap_or(false);
            if wants_cancel {
                tracing::info!("generation cancelled by client");
                cancel.cancel();
                cancelled = true;
                if !send_json(&mut socket, &json!({"cancelled": true})).await {
                    return;
                }
            }
        }
    }

    drop(permit);
    tracing::info!("live client disconnected");
}
