use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::RequireSession;
use crate::orchestrator::{PublishFailure, PublishResult, StrictOrchestrator};
use crate::server::AppState;
use crate::server::dto::StoredBundle;
use crate::server::response::{ApiError, ApiResponse};
use crate::server::validation::validate_application_key;
use crate::types::RawBundle;

/// What gets written to `<id>.result.json` after a publish attempt.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum PublishRecord<'a> {
    Success(&'a PublishResult),
    Failed(&'a PublishFailure),
}

fn bundle_path(state: &AppState, id: &str) -> Result<PathBuf, ApiError> {
    let id = Uuid::parse_str(id).map_err(|_| ApiError::not_found("Bundle not found"))?;
    Ok(state.config.uploads_dir().join(format!("{id}.json")))
}

fn result_path(state: &AppState, id: &str) -> Result<PathBuf, ApiError> {
    let id = Uuid::parse_str(id).map_err(|_| ApiError::not_found("Bundle not found"))?;
    Ok(state.config.uploads_dir().join(format!("{id}.result.json")))
}

fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> Result<(), ApiError> {
    let write = || -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
        Ok(())
    };
    write().map_err(|e| {
        tracing::error!("Failed to write {}: {}", path.display(), e);
        ApiError::internal("Failed to persist bundle data")
    })
}

fn load_bundle(state: &AppState, id: &str) -> Result<StoredBundle, ApiError> {
    let path = bundle_path(state, id)?;
    let raw = std::fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::not_found("Bundle not found"),
        _ => {
            tracing::error!("Failed to read {}: {}", path.display(), e);
            ApiError::internal("Failed to read bundle")
        }
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        tracing::error!("Corrupt bundle {}: {}", path.display(), e);
        ApiError::internal("Failed to read bundle")
    })
}

/// POST /bundles - validate and store a bundle for a later publish.
pub async fn create_bundle(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Json(raw): Json<RawBundle>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = raw.normalize().map_err(ApiError::from)?;
    validate_application_key(&bundle.application_key)?;

    let stored = StoredBundle {
        id: Uuid::new_v4().to_string(),
        bundle,
    };
    write_json(&bundle_path(&state, &stored.id)?, &stored)?;

    tracing::info!(
        "Stored bundle {} for {}",
        stored.id,
        stored.bundle.application_key
    );

    Ok((StatusCode::CREATED, Json(stored)))
}

/// POST /bundles/{id}/publish - run the strict pipeline for a stored bundle.
///
/// The first failing step ends the run with a 502 naming that step. The outcome
/// is recorded either way.
pub async fn publish_bundle(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let stored = load_bundle(&state, &id)?;
    let path = result_path(&state, &id)?;

    let orchestrator = StrictOrchestrator::new(state.client.with_session(&session.token));
    match orchestrator.publish(&stored.bundle).await {
        Ok(result) => {
            write_json(&path, &PublishRecord::Success(&result))?;
            tracing::info!(
                "Published bundle {} (permission version {})",
                id,
                result.permission_version
            );
            Ok(Json(ApiResponse::success(result)).into_response())
        }
        Err(failure) => {
            write_json(&path, &PublishRecord::Failed(&failure))?;
            let body = json!({
                "data": null,
                "error": failure.error,
                "step": failure.step,
            });
            Ok((StatusCode::BAD_GATEWAY, Json(body)).into_response())
        }
    }
}

/// GET /bundles/{id}/result - the recorded outcome of the last publish.
pub async fn get_result(
    _session: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    load_bundle(&state, &id)?;

    let path = result_path(&state, &id)?;
    let raw = std::fs::read(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::not_found("No publish result recorded"),
        _ => {
            tracing::error!("Failed to read {}: {}", path.display(), e);
            ApiError::internal("Failed to read publish result")
        }
    })?;
    let value: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
        tracing::error!("Corrupt publish result {}: {}", path.display(), e);
        ApiError::internal("Failed to read publish result")
    })?;

    Ok(Json(ApiResponse::success(value)))
}
