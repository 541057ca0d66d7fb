//! Application state shared across request handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use streambal_engine::StreamBalancer;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    balancer: StreamBalancer,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new application state around a ready balancer.
    pub fn new(balancer: StreamBalancer) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                balancer,
                started_at: Utc::now(),
            }),
        }
    }

    /// Get a reference to the allocation engine.
    pub fn balancer(&self) -> &StreamBalancer {
        &self.inner.balancer
    }

    /// When this process started serving.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}
