//! Liveness and readiness endpoints.
//!
//! Allocation state lives in process, so the service is ready as soon as
//! the router is serving. `/readyz` also reports how many namespaces the
//! engine holds.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespaces: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uptime_seconds: Option<i64>,
}

impl HealthResponse {
    fn ok() -> Self {
        Self {
            status: "ok",
            service: "stream-balancer",
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().to_rfc3339(),
            namespaces: None,
            uptime_seconds: None,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(|| async { StatusCode::OK }))
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn readyz(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now() - state.started_at();
    Json(HealthResponse {
        namespaces: Some(state.balancer().namespaces().len()),
        uptime_seconds: Some(uptime.num_seconds()),
        ..HealthResponse::ok()
    })
}

#[cfg(test)]
mod tests {
    use streambal_engine::{GlobalConfig, GuardConfigs, Namespace, StreamBalancer, StreamRequest};

    use super::*;

    #[tokio::test]
    async fn test_healthz_omits_engine_details() {
        let Json(body) = healthz().await;
        assert_eq!(body.status, "ok");
        assert!(body.namespaces.is_none());
    }

    #[tokio::test]
    async fn test_readyz_counts_namespaces() {
        let balancer = StreamBalancer::new(GuardConfigs::new(GlobalConfig::default()))
            .expect("default config");
        balancer
            .update_streams(
                &Namespace::new("guard", "prod"),
                &[StreamRequest::new("s1", 1, 20)],
                &[],
            )
            .expect("update");

        let Json(body) = readyz(State(AppState::new(balancer))).await;
        assert_eq!(body.namespaces, Some(1));
        assert!(body.uptime_seconds.is_some_and(|s| s >= 0));
    }
}
