//! HTTP endpoints beside the WebSocket.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use relay_core::SessionCode;
use relay_translate::TranslateRequest;

use crate::server::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let handlers = &state.handler_state;
    let mirror = handlers.hub.directory().mirror();
    Json(json!({
        "status": "ok",
        "clients": handlers.clients.count(),
        "sessions": handlers.hub.directory().len(),
        "uptimeSecs": handlers.uptime_secs(),
        "store": mirror.backend().unwrap_or("none"),
        "translationStats": handlers.translation.snapshot(),
        "metrics": handlers.metrics.snapshot(),
    }))
}

pub async fn translation_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.handler_state.translation.snapshot())
}

pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.handler_state.translation.clear_cache();
    Json(json!({
        "message": "Cache cleared",
        "clearedEntries": cleared,
    }))
}

pub async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> (StatusCode, Json<Value>) {
    let fallback = request.text.clone().unwrap_or_default();
    let query = match request.into_query() {
        Ok(query) => query,
        Err(err) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))),
    };

    match state.handler_state.translation.translate(query).await {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) if err.is_client_error() => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Translation failed",
                "message": err.to_string(),
                "fallback": fallback,
            })),
        ),
    }
}

/// Local and mirrored view of one session. Never includes resume tokens.
pub async fn debug_session(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Ok(code) = raw.parse::<SessionCode>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid session code: {raw}") })),
        );
    };

    let hub = &state.handler_state.hub;
    let local = hub.directory().snapshot(&code);
    let mirrored = match hub.directory().mirror().mirrored(&code).await {
        Ok(record) => json!(record),
        Err(err) => {
            tracing::warn!(code = %code, error = %err, "mirrored session lookup failed");
            Value::Null
        }
    };
    let members: Vec<Value> = hub
        .registry()
        .members(&code)
        .into_iter()
        .map(|(connection, role)| json!({ "connectionId": connection, "role": role }))
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "code": code,
            "local": local,
            "mirrored": mirrored,
            "members": members,
        })),
    )
}
