// HTTP surface: health check and the crypto service callback endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::crypto::CryptoService;
use common::errors::CryptoError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub crypto: Arc<CryptoService>,
}

/// Callback body posted by the crypto service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoCallback {
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CallbackAck {
    acknowledged: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/callbacks/crypto", post(crypto_callback))
        .with_state(state)
}

#[tracing::instrument]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Receive a crypto service callback.
///
/// Always acknowledges known-shaped callbacks, including ones whose
/// request id has no registered handler; the service retries anything
/// else and the registry already treats redelivery as a no-op.
#[tracing::instrument(skip(state, callback), fields(request_id = %callback.request_id))]
async fn crypto_callback(
    State(state): State<AppState>,
    Json(callback): Json<CryptoCallback>,
) -> impl IntoResponse {
    if callback.request_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(CallbackAck { acknowledged: false }));
    }

    let success = callback.status.eq_ignore_ascii_case("success");
    match state
        .crypto
        .handle_callback(
            &callback.request_id,
            callback.token.as_deref(),
            success,
            callback.error_message.as_deref(),
        )
        .await
    {
        Ok(()) => (StatusCode::OK, Json(CallbackAck { acknowledged: true })),
        Err(CryptoError::OperationNotFound(request_id)) => {
            tracing::warn!(request_id = %request_id, "Callback for unknown operation");
            (
                StatusCode::NOT_FOUND,
                Json(CallbackAck { acknowledged: false }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Callback handling failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CallbackAck { acknowledged: false }),
            )
        }
    }
}
