mod env;
mod logical;
mod physical;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::AppState;

pub fn database_router() -> Router<Arc<AppState>> {
    Router::new()
        // Physical schema routes
        .route("/schemas/sync", post(physical::sync_schema))
        .route("/schemas/registry", get(physical::list_registry))
        .route(
            "/schemas/registry/{app_id}/history",
            get(physical::list_history),
        )
        // Logical schema routes
        .route("/schemas", post(logical::create_schema))
        .route("/schemas", get(logical::list_schemas))
        .route("/schemas/versions", post(logical::create_version))
        .route("/schemas/versions", get(logical::list_versions))
        .route("/schemas/publish", post(logical::publish_version))
        .route("/schemas/current", get(logical::current_version))
        // Env assignment
        .route("/env", get(env::database_env))
}
