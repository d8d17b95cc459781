//! HTTP API for submitting and inspecting certificate requests.
//!
//! Routes:
//!
//! - `GET /health` returns `ok`.
//! - `POST /v1/namespaces/{namespace}/requests` submits a request.
//! - `GET /v1/namespaces/{namespace}/requests/{name}` returns a request and
//!   its outcome, if decided.
//! - `GET /v1/policies` lists policies with their published status.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::controller::events::{EventSender, WatchEvent};
use crate::models::policy::Policy;
use crate::models::request::{
    CertificateRequest, IssuerTarget, RequestAttributes, RequestKey, RequesterIdentity,
};
use crate::persistence::Store;
use crate::{AppError, Result};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn Store>,
    events: EventSender,
}

impl ApiState {
    /// Build handler state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, events: EventSender) -> Self {
        Self { store, events }
    }
}

/// Body of `POST /v1/namespaces/{namespace}/requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewRequest {
    /// Request name, unique within the namespace.
    pub name: String,
    /// Target issuer.
    pub issuer_ref: IssuerTarget,
    /// Submitting identity.
    #[serde(default)]
    pub requester: RequesterIdentity,
    /// Opaque encoded signing request.
    #[serde(default)]
    pub request: String,
    /// Decoded request attributes.
    #[serde(default)]
    pub attributes: RequestAttributes,
}

/// Error body returned by every failing route.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps domain errors onto HTTP status codes.
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match err {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyDecided(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

/// Build the API router.
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/namespaces/{namespace}/requests", post(create_request))
        .route("/v1/namespaces/{namespace}/requests/{name}", get(get_request))
        .route("/v1/policies", get(list_policies))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_request(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Json(body): Json<NewRequest>,
) -> std::result::Result<(StatusCode, Json<CertificateRequest>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(AppError::Invalid("request name must not be empty".into()).into());
    }

    let mut request =
        CertificateRequest::new(namespace, body.name, body.issuer_ref, body.requester);
    request.request = body.request;
    request.attributes = body.attributes;

    let key = request.key();
    state
        .store
        .create_request(&request)
        .await
        .map_err(|err| match err {
            AppError::Invalid(msg) => ApiError(StatusCode::CONFLICT, msg),
            other => other.into(),
        })?;
    info!(request = %key, uid = %request.uid, "request submitted");

    if state
        .events
        .send(WatchEvent::RequestCreated(key))
        .await
        .is_err()
    {
        warn!("event channel closed, request will be picked up on resync");
    }

    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_request(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> std::result::Result<Json<CertificateRequest>, ApiError> {
    let key = RequestKey::new(namespace, name);
    let request = state
        .store
        .get_request(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {key} not found")))?;
    Ok(Json(request))
}

async fn list_policies(
    State(state): State<ApiState>,
) -> std::result::Result<Json<BTreeMap<String, Policy>>, ApiError> {
    let policies = state.store.list_policies().await?;
    Ok(Json(policies.into_iter().map(|p| (p.name.clone(), p)).collect()))
}

/// Serve the API on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve(listener: TcpListener, state: ApiState, ct: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "starting HTTP API");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("HTTP server error: {err}")))?;

    info!("HTTP API shut down");
    Ok(())
}

/// Bind `0.0.0.0:port` and serve the API until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound.
pub async fn serve_http(port: u16, state: ApiState, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP API on {bind}: {err}")))?;
    serve(listener, state, ct).await
}
