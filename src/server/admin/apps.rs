use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;

use crate::auth::RequireSession;
use crate::server::AppState;
use crate::server::dto::UpsertAppRequest;
use crate::server::response::{ApiError, ListResponse, StoreResultExt};
use crate::server::validation::validate_application_key;
use crate::types::AppRecord;

pub async fn upsert_app(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertAppRequest>,
) -> impl IntoResponse {
    let app_id = req.app_id.trim();
    validate_application_key(app_id)?;

    let app_name = req.app_name.trim();
    if app_name.is_empty() {
        return Err(ApiError::bad_request("appName is required"));
    }

    let app = AppRecord {
        app_id: app_id.to_string(),
        app_name: app_name.to_string(),
        description: req.description,
        latest_version: req.latest_version,
        url: req.url,
        menus: req.menus,
        updated_at: Utc::now(),
    };

    state
        .store
        .upsert_app(&app)
        .api_err("Failed to register app")?;

    Ok(Json(app))
}

pub async fn list_apps(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let apps = state.store.list_apps().api_err("Failed to list apps")?;
    Ok::<_, ApiError>(Json(ListResponse::new(apps)))
}
