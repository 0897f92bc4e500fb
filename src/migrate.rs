use serde::Serialize;

use crate::error::Result;
use crate::provision::SchemaProvisioner;
use crate::store::Store;
use crate::types::MigrationFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MigrationStatus {
    Applied,
    Failed { error: String },
    /// Already attempted in an earlier run, successfully or not.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub filename: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

/// Applies migration files to one application's schema, at most once per filename.
///
/// Failed files are recorded and never retried automatically. A failure does not
/// stop the remaining files from running.
pub struct MigrationExecutor<'a> {
    store: &'a dyn Store,
    provisioner: &'a dyn SchemaProvisioner,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(store: &'a dyn Store, provisioner: &'a dyn SchemaProvisioner) -> Self {
        Self { store, provisioner }
    }

    pub fn run(
        &self,
        schema_name: &str,
        app_id: &str,
        migrations: &[MigrationFile],
    ) -> Result<Vec<MigrationOutcome>> {
        let mut attempted = self.store.list_attempted_migrations(app_id)?;
        let mut outcomes = Vec::with_capacity(migrations.len());

        for migration in migrations {
            if !attempted.insert(migration.filename.clone()) {
                tracing::debug!("Skipping {} for {}", migration.filename, app_id);
                outcomes.push(MigrationOutcome {
                    filename: migration.filename.clone(),
                    status: MigrationStatus::Skipped,
                });
                continue;
            }

            let status = match self
                .provisioner
                .execute_in_schema(schema_name, &migration.content)
            {
                Ok(()) => {
                    tracing::info!("Applied {} to {}", migration.filename, schema_name);
                    MigrationStatus::Applied
                }
                Err(e) => {
                    tracing::warn!("Migration {} failed for {}: {e}", migration.filename, app_id);
                    MigrationStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };

            let error = match &status {
                MigrationStatus::Failed { error } => Some(error.as_str()),
                _ => None,
            };
            match self.store.record_migration(
                app_id,
                &migration.filename,
                matches!(status, MigrationStatus::Applied),
                error,
            ) {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    "History for {}/{} was written concurrently",
                    app_id,
                    migration.filename
                ),
                // The SQL already ran; keep going so later files still get their turn.
                Err(e) => tracing::error!(
                    "Failed to record {} for {}: {e}",
                    migration.filename,
                    app_id
                ),
            }

            outcomes.push(MigrationOutcome {
                filename: migration.filename.clone(),
                status,
            });
        }

        Ok(outcomes)
    }
}
