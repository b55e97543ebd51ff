// Ops HTTP listener: health, loop status and the run-once trigger

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::ops::Operations;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> IntoResponse for SuccessResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub fn create_router(operations: Operations) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ops/status", get(status))
        .route("/ops/run-once", post(run_once))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(operations)
}

#[tracing::instrument]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status(State(operations): State<Operations>) -> impl IntoResponse {
    SuccessResponse {
        data: operations.status(),
    }
}

async fn run_once(State(operations): State<Operations>) -> Response {
    match operations.run_once().await {
        Ok(report) => SuccessResponse { data: report }.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Run-once cycle failed");
            ErrorResponse::new("run_once_failed", e.to_string()).into_response()
        }
    }
}
