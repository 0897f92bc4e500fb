use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::steps;
use super::{StepOutcome, StepRecord};
use crate::client::PlatformClient;
use crate::config::ServerConfig;
use crate::env::{AppEnvConfig, calc_port, calc_url, render_env_file};
use crate::registry::{SyncRequest, SyncStatus, schema_name_for};
use crate::store::Store;
use crate::types::{AppPackage, AppRecord, DeclaredPermission, normalize_code};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub app_id: String,
    pub version: String,
    pub steps: Vec<StepRecord>,
}

impl UploadReport {
    #[must_use]
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Failed)
            .count()
    }
}

/// Best-effort pipeline run after a package upload. Every integration step is
/// attempted and recorded; none of them aborts the run.
pub struct LenientOrchestrator<'a> {
    store: &'a dyn Store,
    config: &'a ServerConfig,
    client: PlatformClient,
}

impl<'a> LenientOrchestrator<'a> {
    pub fn new(store: &'a dyn Store, config: &'a ServerConfig, client: PlatformClient) -> Self {
        Self {
            store,
            config,
            client,
        }
    }

    pub async fn run(&self, package: &AppPackage) -> UploadReport {
        let config = &package.config;
        let schema_name = config
            .database
            .as_ref()
            .map(|db| schema_name_for(&config.app_id, &db.schema_name));

        let port = calc_port(
            &config.app_id,
            self.config.port_range_start,
            self.config.port_range_end,
        );
        let url = calc_url(&self.config.app_domain, port);

        let mut records = Vec::new();
        records.push(self.write_env(package, port, &url, schema_name.as_deref()).await);
        records.extend(self.register_permissions(package).await);
        records.push(self.sync_database(package, schema_name.as_deref()).await);
        records.push(self.register_directory(package, &url));

        let report = UploadReport {
            app_id: config.app_id.clone(),
            version: config.version.clone(),
            steps: records,
        };
        tracing::info!(
            "Published {}@{} ({} failed step(s))",
            report.app_id,
            report.version,
            report.failed_steps()
        );
        report
    }

    async fn write_env(
        &self,
        package: &AppPackage,
        port: u16,
        url: &str,
        schema_name: Option<&str>,
    ) -> StepRecord {
        let app_id = &package.config.app_id;

        let mut database_vars = BTreeMap::new();
        let mut note = String::new();
        if let Some(schema_name) = schema_name {
            match self.client.database_env(app_id, schema_name).await {
                Ok(vars) => database_vars = vars,
                Err(e) => {
                    tracing::warn!("Database env for {} unavailable: {e}", app_id);
                    note = format!(" (database env unavailable: {e})");
                }
            }
        }

        let env = AppEnvConfig {
            app_id: app_id.clone(),
            port,
            url: url.to_string(),
            database_url: database_vars.remove("DATABASE_URL").unwrap_or_default(),
            schema_name: database_vars
                .remove("SCHEMA_NAME")
                .or_else(|| schema_name.map(str::to_string))
                .unwrap_or_default(),
            permission_service_url: self.client.permission_url().to_string(),
            database_service_url: self.client.database_url().to_string(),
            admin_service_url: self.config.admin_url(),
            custom: database_vars,
        };

        let path = package.root.join(".env");
        match std::fs::write(&path, render_env_file(&env)) {
            Ok(()) => StepRecord::ok(steps::ENV, format!("{url}{note}")),
            Err(e) => StepRecord::failed(
                steps::ENV,
                format!("failed to write {}: {e}", path.display()),
            ),
        }
    }

    async fn register_permissions(&self, package: &AppPackage) -> Vec<StepRecord> {
        let config = &package.config;
        let permissions: Vec<DeclaredPermission> = config
            .permissions
            .iter()
            .filter_map(|p| {
                let code = normalize_code(&config.app_id, &p.code);
                let name = p.name.trim();
                (!code.is_empty() && !name.is_empty()).then(|| DeclaredPermission {
                    code,
                    name: name.to_string(),
                })
            })
            .collect();

        if permissions.is_empty() {
            return vec![
                StepRecord::skipped(steps::PERMISSION_APPLICATION, "no permissions declared"),
                StepRecord::skipped(steps::PERMISSION_REGISTER, "no permissions declared"),
            ];
        }

        let credentials = match self
            .client
            .upsert_application(&config.app_id, &config.app_name)
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => {
                return vec![
                    StepRecord::failed(steps::PERMISSION_APPLICATION, e.to_string()),
                    StepRecord::skipped(steps::PERMISSION_REGISTER, "no application identity"),
                ];
            }
        };
        let application = StepRecord::ok(steps::PERMISSION_APPLICATION, credentials.key.clone());

        let register = match self
            .client
            .register_permissions(&credentials.key, &credentials.secret, &permissions)
            .await
        {
            Ok(response) => StepRecord::ok(
                steps::PERMISSION_REGISTER,
                format!("{} permission(s) registered", response.count),
            ),
            Err(e) => StepRecord::failed(steps::PERMISSION_REGISTER, e.to_string()),
        };

        vec![application, register]
    }

    async fn sync_database(&self, package: &AppPackage, schema_name: Option<&str>) -> StepRecord {
        let Some(schema_name) = schema_name else {
            return StepRecord::skipped(steps::DATABASE_SYNC, "no database declared");
        };

        let migrations = match package.migrations() {
            Ok(migrations) => migrations,
            Err(e) => return StepRecord::failed(steps::DATABASE_SYNC, e.to_string()),
        };

        let request = SyncRequest {
            app_id: package.config.app_id.clone(),
            app_name: package.config.app_name.clone(),
            schema_name: schema_name.to_string(),
            migrations,
        };

        match self.client.sync_schema(&request).await {
            Ok(report) if report.status == SyncStatus::Success => {
                StepRecord::ok(steps::DATABASE_SYNC, report.schema_name)
            }
            Ok(report) => StepRecord::failed(
                steps::DATABASE_SYNC,
                report
                    .error
                    .unwrap_or_else(|| format!("provisioning {} failed", report.schema_name)),
            ),
            Err(e) => StepRecord::failed(steps::DATABASE_SYNC, e.to_string()),
        }
    }

    fn register_directory(&self, package: &AppPackage, url: &str) -> StepRecord {
        let config = &package.config;
        let app = AppRecord {
            app_id: config.app_id.clone(),
            app_name: config.app_name.clone(),
            description: None,
            latest_version: Some(config.version.clone()),
            url: Some(url.to_string()),
            menus: config.menus.clone(),
            updated_at: Utc::now(),
        };

        match self.store.upsert_app(&app) {
            Ok(()) => StepRecord::ok(steps::DIRECTORY_REGISTER, config.version.clone()),
            Err(e) => StepRecord::failed(steps::DIRECTORY_REGISTER, e.to_string()),
        }
    }
}
