//! API v1 routes.

mod streams;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new().merge(streams::routes())
}
