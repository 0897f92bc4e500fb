//! Schema registry sync: the per-application provisioning state machine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::migrate::{MigrationExecutor, MigrationOutcome, MigrationStatus};
use crate::provision::SchemaProvisioner;
use crate::store::Store;
use crate::types::{MigrationFile, SchemaRegistryEntry, SchemaStatus};

pub const MAX_SCHEMA_NAME_LEN: usize = 63;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub app_id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub schema_name: String,
    #[serde(default)]
    pub migrations: Vec<MigrationFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub schema_name: String,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub migrations: Vec<MigrationOutcome>,
}

/// Derives the physical schema name for an application.
///
/// A declared name is prefixed with `<appId>_` unless it is empty, equal to the
/// app id or already carries that prefix. The result is lowercased, anything
/// outside `[a-z0-9_]` becomes `_`, runs of `_` collapse, a leading digit gets
/// an `s_` prefix and the name is capped at 63 characters.
#[must_use]
pub fn schema_name_for(app_id: &str, name: &str) -> String {
    let app = sanitize(app_id.trim());
    let name = sanitize(name.trim());
    let raw = if name.is_empty() || name == app || name.starts_with(&format!("{app}_")) {
        if name.is_empty() { app } else { name }
    } else {
        format!("{app}_{name}")
    };

    let mut out = sanitize(&raw);
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "s_");
    }
    out.truncate(MAX_SCHEMA_NAME_LEN);
    out
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

/// True when `name` is already in the form `schema_name_for` produces.
#[must_use]
pub fn is_safe_schema_name(name: &str) -> bool {
    !name.is_empty() && schema_name_for(name, "") == name
}

/// Exclusive per-application lease held for one sync call. Released on drop.
pub struct MigrationLease<'a> {
    store: &'a dyn Store,
    app_id: String,
    holder: String,
}

impl<'a> MigrationLease<'a> {
    pub fn acquire(store: &'a dyn Store, app_id: &str, ttl_secs: u64) -> Result<Self> {
        let holder = Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let expires_at_ms = now_ms.saturating_add(ttl_ms);

        if !store.try_acquire_lease(app_id, &holder, now_ms, expires_at_ms)? {
            return Err(Error::Conflict(format!(
                "a schema sync for '{app_id}' is already running"
            )));
        }

        Ok(Self {
            store,
            app_id: app_id.to_string(),
            holder,
        })
    }
}

impl Drop for MigrationLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lease(&self.app_id, &self.holder) {
            tracing::warn!("Failed to release migration lease for {}: {e}", self.app_id);
        }
    }
}

fn transition(
    store: &dyn Store,
    entry: &mut SchemaRegistryEntry,
    next: SchemaStatus,
) -> Result<()> {
    if !entry.status.can_transition_to(next) {
        return Err(Error::InvalidTransition {
            from: entry.status.to_string(),
            to: next.to_string(),
        });
    }
    store.update_registry_status(&entry.app_id, next)?;
    tracing::debug!("Schema {}: {} -> {}", entry.schema_name, entry.status, next);
    entry.status = next;
    Ok(())
}

/// Provisions an application's schema and applies its pending migrations.
///
/// Provisioning failures are reported in the returned report with status
/// `failed` and leave the registry row `archived`. Individual migration
/// failures only show up in migration history; the row still ends `active`.
pub fn sync_schema(
    store: &dyn Store,
    provisioner: &dyn SchemaProvisioner,
    request: &SyncRequest,
    lease_ttl_secs: u64,
) -> Result<SyncReport> {
    let app_id = request.app_id.trim();
    if app_id.is_empty() {
        return Err(Error::BadRequest("appId is required".to_string()));
    }

    let requested = if request.schema_name.trim().is_empty() {
        schema_name_for(app_id, "")
    } else {
        request.schema_name.trim().to_string()
    };
    if !is_safe_schema_name(&requested) {
        return Err(Error::BadRequest(format!(
            "schema name '{requested}' must match [a-z_][a-z0-9_]* and be at most {MAX_SCHEMA_NAME_LEN} characters"
        )));
    }

    let _lease = MigrationLease::acquire(store, app_id, lease_ttl_secs)?;

    let (mut entry, is_new) = match store.get_registry_entry(app_id)? {
        Some(mut existing) => {
            if existing.schema_name != requested {
                tracing::info!(
                    "Keeping registered schema {} for {} (requested {})",
                    existing.schema_name,
                    app_id,
                    requested
                );
            }
            transition(store, &mut existing, SchemaStatus::Migrating)?;
            (existing, false)
        }
        None => (store.create_registry_entry(app_id, &requested)?, true),
    };
    let schema_name = entry.schema_name.clone();

    if let Err(e) = provisioner.create_schema(&schema_name) {
        tracing::error!("Provisioning {} for {} failed: {e}", schema_name, app_id);
        transition(store, &mut entry, SchemaStatus::Archived)?;
        return Ok(SyncReport {
            schema_name,
            status: SyncStatus::Failed,
            error: Some(e.to_string()),
            migrations: Vec::new(),
        });
    }

    if is_new {
        transition(store, &mut entry, SchemaStatus::Migrating)?;
    }

    let migrations = match MigrationExecutor::new(store, provisioner).run(
        &schema_name,
        app_id,
        &request.migrations,
    ) {
        Ok(migrations) => migrations,
        Err(e) => {
            tracing::error!("Migrating {} for {} failed: {e}", schema_name, app_id);
            if let Err(archive_err) = transition(store, &mut entry, SchemaStatus::Archived) {
                tracing::error!("Failed to archive {}: {archive_err}", schema_name);
            }
            return Err(e);
        }
    };

    transition(store, &mut entry, SchemaStatus::Active)?;

    let failed = migrations
        .iter()
        .filter(|m| matches!(m.status, MigrationStatus::Failed { .. }))
        .count();
    tracing::info!(
        "Synced schema {} for {} ({} migrations, {} failed)",
        schema_name,
        app_id,
        migrations.len(),
        failed
    );

    Ok(SyncReport {
        schema_name,
        status: SyncStatus::Success,
        error: None,
        migrations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::SqliteProvisioner;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore, SqliteProvisioner) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let provisioner = SqliteProvisioner::new(temp.path().join("schemas"));
        (temp, store, provisioner)
    }

    fn orders_request() -> SyncRequest {
        SyncRequest {
            app_id: "orders".to_string(),
            app_name: "Orders".to_string(),
            schema_name: "orders".to_string(),
            migrations: vec![
                MigrationFile {
                    filename: "a.sql".to_string(),
                    content: "CREATE TABLE broken (".to_string(),
                },
                MigrationFile {
                    filename: "b.sql".to_string(),
                    content: "CREATE TABLE orders (id INTEGER PRIMARY KEY);".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_schema_name_for() {
        assert_eq!(schema_name_for("orders", ""), "orders");
        assert_eq!(schema_name_for("orders", "orders"), "orders");
        assert_eq!(schema_name_for("order-mgmt", "Main DB"), "order_mgmt_main_db");
        assert_eq!(schema_name_for("order-mgmt", "order-mgmt"), "order_mgmt");
        assert_eq!(schema_name_for("crm", "crm_data"), "crm_data");
        assert_eq!(schema_name_for("crm", "crm-data"), "crm_data");
        assert_eq!(schema_name_for("crm", "crmx"), "crm_crmx");
        assert_eq!(schema_name_for("a--b", ""), "a_b");
        assert_eq!(schema_name_for("1app", ""), "s_1app");
        assert_eq!(schema_name_for(&"x".repeat(80), "").len(), MAX_SCHEMA_NAME_LEN);
    }

    #[test]
    fn test_is_safe_schema_name() {
        assert!(is_safe_schema_name("orders"));
        assert!(is_safe_schema_name("order_mgmt"));
        assert!(!is_safe_schema_name(""));
        assert!(!is_safe_schema_name("Orders"));
        assert!(!is_safe_schema_name("orders;drop"));
        assert!(!is_safe_schema_name("9lives"));
        assert!(!is_safe_schema_name("a__b"));
    }

    #[test]
    fn test_sync_with_partial_failure_ends_active() {
        let (_temp, store, provisioner) = setup();

        let report = sync_schema(&store, &provisioner, &orders_request(), 600).unwrap();
        assert_eq!(report.status, SyncStatus::Success);
        assert!(matches!(report.migrations[0].status, MigrationStatus::Failed { .. }));
        assert_eq!(report.migrations[1].status, MigrationStatus::Applied);

        let entry = store.get_registry_entry("orders").unwrap().unwrap();
        assert_eq!(entry.status, SchemaStatus::Active);

        let history = store.list_migration_history("orders").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].filename, "a.sql");
        assert!(!history[0].success);
        assert_eq!(history[1].filename, "b.sql");
        assert!(history[1].success);
    }

    #[test]
    fn test_second_sync_changes_nothing() {
        let (_temp, store, provisioner) = setup();

        sync_schema(&store, &provisioner, &orders_request(), 600).unwrap();
        let report = sync_schema(&store, &provisioner, &orders_request(), 600).unwrap();

        assert!(report
            .migrations
            .iter()
            .all(|m| m.status == MigrationStatus::Skipped));
        assert_eq!(store.list_migration_history("orders").unwrap().len(), 2);
        assert_eq!(
            store.get_registry_entry("orders").unwrap().unwrap().status,
            SchemaStatus::Active
        );
    }

    #[test]
    fn test_registered_schema_name_wins() {
        let (_temp, store, provisioner) = setup();
        sync_schema(&store, &provisioner, &orders_request(), 600).unwrap();

        let mut request = orders_request();
        request.schema_name = "orders_v2".to_string();
        let report = sync_schema(&store, &provisioner, &request, 600).unwrap();
        assert_eq!(report.schema_name, "orders");
    }

    #[test]
    fn test_busy_lease_conflicts_without_changes() {
        let (_temp, store, provisioner) = setup();
        let _held = MigrationLease::acquire(&store, "orders", 600).unwrap();

        let err = sync_schema(&store, &provisioner, &orders_request(), 600).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(store.get_registry_entry("orders").unwrap().is_none());
        assert!(store.list_migration_history("orders").unwrap().is_empty());
    }

    #[test]
    fn test_lease_released_after_sync() {
        let (_temp, store, provisioner) = setup();
        sync_schema(&store, &provisioner, &orders_request(), 600).unwrap();
        assert!(MigrationLease::acquire(&store, "orders", 600).is_ok());
    }

    #[test]
    fn test_provisioning_failure_archives_softly() {
        let (temp, store, _) = setup();
        let blocker = temp.path().join("blocked");
        std::fs::write(&blocker, "file").unwrap();
        let provisioner = SqliteProvisioner::new(&blocker);

        let report = sync_schema(&store, &provisioner, &orders_request(), 600).unwrap();
        assert_eq!(report.status, SyncStatus::Failed);
        assert!(report.error.is_some());
        assert_eq!(
            store.get_registry_entry("orders").unwrap().unwrap().status,
            SchemaStatus::Archived
        );
        assert!(store.list_migration_history("orders").unwrap().is_empty());

        // An archived row can be revived by the next sync.
        let (_temp2, _, working) = setup();
        let report = sync_schema(&store, &working, &orders_request(), 600).unwrap();
        assert_eq!(report.status, SyncStatus::Success);
    }

    #[test]
    fn test_unreadable_history_archives_and_errors() {
        let (_temp, store, provisioner) = setup();
        store
            .connection()
            .execute_batch("DROP TABLE migration_history;")
            .unwrap();

        assert!(sync_schema(&store, &provisioner, &orders_request(), 600).is_err());
        assert_eq!(
            store.get_registry_entry("orders").unwrap().unwrap().status,
            SchemaStatus::Archived
        );
        assert!(MigrationLease::acquire(&store, "orders", 600).is_ok());
    }

    #[test]
    fn test_rejects_unsafe_schema_name() {
        let (_temp, store, provisioner) = setup();
        let mut request = orders_request();
        request.schema_name = "Orders; DROP".to_string();
        assert!(matches!(
            sync_schema(&store, &provisioner, &request, 600),
            Err(Error::BadRequest(_))
        ));
    }
}
