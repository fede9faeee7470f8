//! HTTP surface: `POST /identify` and `GET /healthz`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::{ErrorBody, ErrorType, IdentifyError};
use crate::reconcile;
use crate::state::AppState;
use crate::types::{HealthResponse, IdentifyRequest, IdentifyResponse};

/// Build the router with all routes and request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/identify", post(identify))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.bind_addr()` and serve until Ctrl-C.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    log::info!("contactlink listening on {}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("contactlink stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}

impl IntoResponse for IdentifyError {
    fn into_response(self) -> Response {
        let status = match &self {
            IdentifyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            IdentifyError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IdentifyError::ConsistencyViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.is_client_error() {
            log::debug!("identify rejected: {}", self);
        } else {
            log::error!("identify failed: {}", self);
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

async fn identify(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return IdentifyError::InvalidInput(rejection.body_text()).into_response();
        }
    };

    // SQLite calls block; keep them off the async workers
    let outcome = tokio::task::spawn_blocking(move || {
        let db = state.db.lock();
        reconcile::identify(&db, &request)
    })
    .await;

    match outcome {
        Ok(Ok(contact)) => Json(IdentifyResponse { contact }).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(join_err) => {
            log::error!("identify task panicked: {}", join_err);
            let body = ErrorBody {
                error: "Internal server error".to_string(),
                error_type: ErrorType::ConsistencyViolation,
                can_retry: false,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let count = tokio::task::spawn_blocking(move || state.db.lock().count_contacts()).await;

    match count {
        Ok(Ok(contacts)) => Json(HealthResponse {
            status: "ok".to_string(),
            contacts: Some(contacts),
            reason: None,
        })
        .into_response(),
        Ok(Err(e)) => unavailable(e.to_string()),
        Err(e) => unavailable(e.to_string()),
    }
}

fn unavailable(reason: String) -> Response {
    log::warn!("Health check failed: {}", reason);
    let body = HealthResponse {
        status: "unavailable".to_string(),
        contacts: None,
        reason: Some(reason),
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}
