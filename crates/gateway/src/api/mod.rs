//! The HTTP surface: KG listing, config echo, one-shot runs, the streaming
//! WebSocket endpoint, and the UI state store.

mod generate;
mod info;
mod store;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/knowledge_graphs", get(info::knowledge_graphs))
        .route("/config", get(info::config))
        .route("/run", post(generate::run))
        .route("/live", get(generate::live))
        .route("/save", post(store::save))
        .route("/load/:id", get(store::load))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
