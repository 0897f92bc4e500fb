use std::path::Path;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireSession;
use crate::orchestrator::LenientOrchestrator;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse};
use crate::types::{
    AppConfig, AppPackage, CONFIG_FILE, DEFAULT_MIGRATIONS_DIR, MigrationFile, is_safe_segment,
};

pub const MAX_UPLOAD_SIZE: usize = 20 * 1024 * 1024;

struct PackageUpload {
    config: String,
    migrations: Vec<MigrationFile>,
}

fn multipart_error(context: &str, err: &MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::payload_too_large(format!(
            "Package exceeds the {} MB upload limit",
            MAX_UPLOAD_SIZE / (1024 * 1024)
        ));
    }
    ApiError::bad_request(format!("{context}: {err}"))
}

async fn parse_package_upload(multipart: &mut Multipart) -> Result<PackageUpload, ApiError> {
    let mut config: Option<String> = None;
    let mut migrations = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to read multipart", &e))?
    {
        match field.name() {
            Some("config") => {
                config = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| multipart_error("Failed to read config", &e))?,
                );
            }
            Some("migration") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("Migration part needs a filename"))?;
                if !is_safe_segment(&filename) || !filename.ends_with(".sql") {
                    return Err(ApiError::bad_request(format!(
                        "Invalid migration filename: {filename}"
                    )));
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(&format!("Failed to read {filename}"), &e))?;
                let content = String::from_utf8(data.to_vec()).map_err(|_| {
                    ApiError::bad_request(format!("{filename} is not valid UTF-8"))
                })?;
                migrations.push(MigrationFile { filename, content });
            }
            _ => {}
        }
    }

    let config = config.ok_or_else(|| ApiError::bad_request("Config field is required"))?;
    Ok(PackageUpload { config, migrations })
}

fn write_package(root: &Path, upload: &PackageUpload, config: &AppConfig) -> Result<(), ApiError> {
    let migrations_dir = config.migrations_dir().unwrap_or(DEFAULT_MIGRATIONS_DIR);
    if !migrations_dir.split('/').all(is_safe_segment) {
        return Err(ApiError::bad_request(format!(
            "Invalid migrations directory: {migrations_dir}"
        )));
    }

    let write = || -> std::io::Result<()> {
        if root.exists() {
            std::fs::remove_dir_all(root)?;
        }
        std::fs::create_dir_all(root)?;
        std::fs::write(root.join(CONFIG_FILE), &upload.config)?;

        if !upload.migrations.is_empty() {
            let dir = root.join(migrations_dir);
            std::fs::create_dir_all(&dir)?;
            for migration in &upload.migrations {
                std::fs::write(dir.join(&migration.filename), &migration.content)?;
            }
        }
        Ok(())
    };

    write().map_err(|e| {
        tracing::error!("Failed to write package to {}: {}", root.display(), e);
        ApiError::internal("Failed to store package")
    })
}

/// POST /apps/upload - store a package and run the lenient publish pipeline.
///
/// Integration failures are reported per step; only an unreadable package fails the request.
pub async fn upload_package(
    session: RequireSession,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = parse_package_upload(&mut multipart).await?;
    let config = AppConfig::parse(&upload.config).map_err(ApiError::from)?;

    let root = state
        .config
        .apps_dir()
        .join(&config.app_id)
        .join(&config.version);
    write_package(&root, &upload, &config)?;

    let package = AppPackage::load(&root).map_err(ApiError::from)?;
    tracing::info!(
        "Received package {}@{} from {} ({} migration(s))",
        config.app_id,
        config.version,
        session.operator.name,
        upload.migrations.len()
    );

    let client = state.client.with_session(&session.token);
    let report = LenientOrchestrator::new(state.store.as_ref(), &state.config, client)
        .run(&package)
        .await;

    Ok(Json(ApiResponse::success(report)))
}
