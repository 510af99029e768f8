use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::server::AppState;

/// GET / - server descriptor and capability catalog
pub async fn root_info(State(state): State<AppState>) -> Json<Value> {
    let info = state.dispatcher.server_info();
    Json(json!({
        "name": info.name,
        "version": info.version,
        "transport": "sse",
        "endpoints": {
            "sse": state.config.server.sse_path,
            "messages": state.config.server.message_path
        },
        "capabilities": state.dispatcher.registry().catalog()
    }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.transport.active_count()
    }))
}

/// GET /metrics - Prometheus text format
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics disabled").into_response(),
    }
}
