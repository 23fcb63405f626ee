use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /knowledge_graphs — names of the configured KGs.
pub async fn knowledge_graphs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.kg_names())
}

/// GET /config — the request-time generation defaults.
pub async fn config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.generation.clone())
}
