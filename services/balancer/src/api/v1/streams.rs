//! Stream allocation endpoints.
//!
//! `POST /v1/streams/update` runs one allocation call for a namespace;
//! `GET /v1/guards/{guard_name}/environments/{environment}/streams` reads
//! the last committed allocation.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use streambal_engine::{ActiveStream, Namespace, StreamRequest, UpdateStreamsResponse};
use tracing::debug;

use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::state::AppState;

/// Create stream routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/streams/update", post(update_streams))
        .route(
            "/guards/{guard_name}/environments/{environment}/streams",
            get(list_streams),
        )
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Body of an allocation call.
#[derive(Debug, Deserialize)]
pub struct UpdateStreamsRequest {
    pub guard_name: String,
    pub environment: String,

    /// Streams to admit or update.
    #[serde(default)]
    pub requests: Vec<StreamRequest>,

    /// Ids of streams that have ended.
    #[serde(default)]
    pub ended: Vec<String>,
}

/// Committed allocation of one namespace.
#[derive(Debug, Serialize)]
pub struct StreamsResponse {
    pub guard_name: String,
    pub environment: String,
    pub version: u64,
    pub total_weight: u64,
    pub overall_capacity: u64,

    /// Active streams ordered by id.
    pub streams: Vec<ActiveStream>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn update_streams(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<UpdateStreamsRequest>, JsonRejection>,
) -> Result<Json<UpdateStreamsResponse>, ApiError> {
    let request_id = ctx.request_id;
    let Json(req) = payload.map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let mut missing = Vec::new();
    if req.guard_name.trim().is_empty() {
        missing.push(FieldError {
            field: "guard_name".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if req.environment.trim().is_empty() {
        missing.push(FieldError {
            field: "environment".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if !missing.is_empty() {
        return Err(
            ApiError::bad_request("invalid_request", "namespace is incomplete")
                .with_details(missing)
                .with_request_id(request_id),
        );
    }

    let namespace = Namespace::new(req.guard_name, req.environment);
    debug!(
        request_id = %request_id,
        namespace = %namespace,
        "Handling stream update"
    );

    let response = state
        .balancer()
        .update_streams(&namespace, &req.requests, &req.ended)
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;

    Ok(Json(response))
}

async fn list_streams(
    State(state): State<AppState>,
    Path((guard_name, environment)): Path<(String, String)>,
) -> Json<StreamsResponse> {
    let namespace = Namespace::new(guard_name, environment);
    let balancer = state.balancer();
    let allocation = balancer.streams(&namespace);

    Json(StreamsResponse {
        version: allocation.version,
        total_weight: allocation.total_weight(),
        overall_capacity: balancer.config_for(&namespace).overall_capacity,
        streams: allocation.streams.values().cloned().collect(),
        guard_name: namespace.guard_name,
        environment: namespace.environment,
    })
}
