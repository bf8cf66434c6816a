//! API route handlers - maps HTTP endpoints to repository store operations.
//!
//! - `repositories`: create, list, get, update and delete hosted repositories

pub mod repositories;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new().merge(repositories::routes(state))
}
