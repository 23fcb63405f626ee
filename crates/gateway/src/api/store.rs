//! Client UI state store: `POST /save` persists a state blob under a short
//! random id, `GET /load/{id}` returns it.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::state::AppState;

const ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 6;

#[derive(Serialize, Deserialize)]
struct SavedState {
    /// ISO-8601 UTC timestamp of the save.
    timestamp: String,
    state: Value,
}

fn new_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_LENGTH)
        .map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char)
        .collect();
    format!("grasp-{suffix}")
}

fn valid_id(id: &str) -> bool {
    id.strip_prefix("grasp-").is_some_and(|suffix| {
        suffix.len() == ID_LENGTH && suffix.bytes().all(|b| b.is_ascii_alphanumeric())
    })
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// POST /save
pub async fn save(State(state): State<AppState>, Json(blob): Json<Value>) -> Response {
    let Some(dir) = &state.config.server.save_dir else {
        return api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "state saving is not configured",
        );
    };

    let saved = SavedState {
        timestamp: chrono::Utc::now().to_rfc3339(),
        state: blob,
    };
    let Ok(contents) = serde_json::to_string_pretty(&saved) else {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode state");
    };

    let id = new_id();
    let path = dir.join(format!("{id}.json"));

    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::error!(error = %e, "failed to create save directory");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save state");
    }
    if let Err(e) = tokio::fs::write(&path, contents).await {
        tracing::error!(error = %e, path = %path.display(), "failed to write state");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save state");
    }

    tracing::info!(%id, "state saved");
    Json(json!({ "id": id, "url": format!("/load/{id}") })).into_response()
}

/// GET /load/{id}
pub async fn load(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(dir) = &state.config.server.save_dir else {
        return api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "state saving is not configured",
        );
    };
    if !valid_id(&id) {
        return api_error(StatusCode::NOT_FOUND, "unknown state id");
    }

    let path = dir.join(format!("{id}.json"));
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(_) => return api_error(StatusCode::NOT_FOUND, "unknown state id"),
    };

    match serde_json::from_str::<SavedState>(&contents) {
        Ok(saved) => Json(saved.state).into_response(),
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "corrupt state file");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load state")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_expected_shape() {
        let id = new_id();
        assert!(valid_id(&id));
        assert_eq!(id.len(), "grasp-".len() + ID_LENGTH);

        assert!(!valid_id("grasp-abc"));
        assert!(!valid_id("other-abcdef"));
        assert!(!valid_id("grasp-abc/../"));
    }
}
