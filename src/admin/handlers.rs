use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::error::ProxyError;
use crate::routing::{RouteOptions, RouteSummary};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub hosts: usize,
    pub resolvers: usize,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub options: RouteOptions,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    pub source: String,
    /// Remove only this target; the whole route when absent.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnregisterResponse {
    pub removed: usize,
    pub host_emptied: bool,
}

/// Registration failures are the caller's fault.
pub struct ApiError(ProxyError);

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        hosts: state.proxy.routing().hosts().len(),
        resolvers: state.proxy.resolvers().len(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteSummary>> {
    Json(state.proxy.routing().summaries())
}

pub async fn register_route(
    State(state): State<AdminState>,
    Json(request): Json<RegisterRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .proxy
        .register(&request.source, &request.target, &request.options)?;
    Ok(StatusCode::CREATED)
}

pub async fn unregister_route(
    State(state): State<AdminState>,
    Json(request): Json<UnregisterRequest>,
) -> Result<Json<UnregisterResponse>, ApiError> {
    let outcome = state
        .proxy
        .unregister(&request.source, request.target.as_deref())?;
    Ok(Json(UnregisterResponse {
        removed: outcome.removed,
        host_emptied: outcome.host_emptied,
    }))
}
