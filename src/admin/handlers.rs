use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::admin::AppState;
use crate::error::DispatchError;
use crate::load_balancer::endpoint::EndpointStats;
use crate::observability::metrics::DispatchStats;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("unknown endpoint `{0}`")]
    UnknownEndpoint(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Dispatch(DispatchError::NoHealthyEndpoints { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub algorithm: String,
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
}

#[derive(Debug, Deserialize)]
pub struct HealthOverride {
    pub healthy: bool,
}

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub client: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Selection {
    pub endpoint_id: String,
    pub url: Option<String>,
}

/// Outcome of a request the caller sent to a selected endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub endpoint_id: String,
    pub latency_ms: u64,
    pub success: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let snapshot = state.dispatcher.registry().snapshot();
    let status = if snapshot.endpoints.is_empty() {
        "unavailable"
    } else if snapshot.healthy.len() < snapshot.endpoints.len() {
        "degraded"
    } else {
        "operational"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: status.to_string(),
        algorithm: state.dispatcher.algorithm().as_str().to_string(),
        total_endpoints: snapshot.endpoints.len(),
        healthy_endpoints: snapshot.healthy.len(),
    })
}

pub async fn get_endpoints(State(state): State<AppState>) -> Json<Vec<EndpointStats>> {
    let endpoints = state.dispatcher.registry().all();
    Json(endpoints.iter().map(|ep| ep.stats()).collect())
}

pub async fn get_stats(State(state): State<AppState>) -> Json<DispatchStats> {
    Json(state.dispatcher.stats())
}

pub async fn set_endpoint_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HealthOverride>,
) -> Result<Json<EndpointStats>, ApiError> {
    let endpoint = state
        .dispatcher
        .set_endpoint_health(&id, body.healthy)
        .await
        .ok_or_else(|| ApiError::UnknownEndpoint(id.clone()))?;

    tracing::info!(endpoint = %id, healthy = body.healthy, "Manual health override applied");
    Ok(Json(endpoint.stats()))
}

pub async fn next_endpoint(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
) -> Result<Json<Selection>, ApiError> {
    let endpoint = state.dispatcher.next_endpoint(query.client.as_deref()).await?;
    Ok(Json(Selection {
        endpoint_id: endpoint.id.clone(),
        url: endpoint.url.as_ref().map(|u| u.to_string()),
    }))
}

pub async fn report_outcome(
    State(state): State<AppState>,
    Json(report): Json<OutcomeReport>,
) -> Result<StatusCode, ApiError> {
    let endpoint = state
        .dispatcher
        .registry()
        .get(&report.endpoint_id)
        .ok_or_else(|| ApiError::UnknownEndpoint(report.endpoint_id.clone()))?;

    // The request already completed on the caller's side.
    state.dispatcher.record_request_start(&endpoint);
    state
        .dispatcher
        .record_request_end(&endpoint, Duration::from_millis(report.latency_ms), report.success);
    Ok(StatusCode::NO_CONTENT)
}
