mod applications;
mod catalog;
mod roles;
mod versions;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use crate::server::AppState;

pub fn permission_router() -> Router<Arc<AppState>> {
    Router::new()
        // Application identity routes
        .route("/applications", post(applications::upsert_application))
        .route("/applications", get(applications::list_applications))
        // Signed registration
        .route("/register", post(catalog::register_permissions))
        // Catalog routes
        .route("/permissions", get(catalog::list_permissions))
        .route("/permissions/enable", patch(catalog::set_permission_enabled))
        // Version routes
        .route("/publish", post(versions::publish_version))
        .route("/version", get(versions::get_version))
        // Role routes
        .route("/roles", post(roles::create_role))
        .route("/roles", get(roles::list_roles))
        .route("/roles/{id}", get(roles::get_role))
        .route("/roles/{id}", put(roles::update_role))
        .route("/roles/{id}", delete(roles::delete_role))
        .route("/user-roles", get(roles::list_user_roles))
        .route("/user-roles", put(roles::assign_user_roles))
        .route("/permission-set", get(roles::get_permission_set))
}
