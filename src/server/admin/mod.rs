mod apps;
mod bundles;
mod upload;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::server::AppState;

pub use upload::MAX_UPLOAD_SIZE;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // Package upload (lenient pipeline)
        .route(
            "/apps/upload",
            post(upload::upload_package).layer(DefaultBodyLimit::max(upload::MAX_UPLOAD_SIZE)),
        )
        // Bundle routes (strict pipeline)
        .route("/bundles", post(bundles::create_bundle))
        .route("/bundles/{id}/publish", post(bundles::publish_bundle))
        .route("/bundles/{id}/result", get(bundles::get_result))
        // Directory routes
        .route("/apps", post(apps::upsert_app))
        .route("/apps", get(apps::list_apps))
}
