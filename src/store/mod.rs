mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::HashSet;

use crate::error::Result;
use crate::types::*;

/// Store defines the platform database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Operator and session operations
    fn create_operator(&self, operator: &Operator) -> Result<()>;
    fn get_operator(&self, id: &str) -> Result<Option<Operator>>;
    fn has_operator(&self) -> Result<bool>;
    fn create_session(&self, session: &Session) -> Result<()>;
    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>>;
    fn update_session_last_used(&self, id: &str) -> Result<()>;

    // Application identity operations
    /// Inserts the identity with `new_secret`, or updates the name of an existing one.
    /// The stored secret is never replaced.
    fn upsert_application(
        &self,
        key: &str,
        name: &str,
        new_secret: &str,
    ) -> Result<ApplicationIdentity>;
    fn get_application(&self, key: &str) -> Result<Option<ApplicationIdentity>>;
    fn list_applications(&self) -> Result<Vec<ApplicationIdentity>>;

    /// Records a nonce until `expires_at_ms`. Returns false when it was already seen.
    fn record_nonce(&self, app_key: &str, nonce: &str, expires_at_ms: i64, now_ms: i64)
    -> Result<bool>;

    // Permission catalog operations
    fn upsert_permissions(&self, permissions: &[PermissionDefinition]) -> Result<usize>;
    fn list_permissions(&self, application_key: &str) -> Result<Vec<PermissionDefinition>>;
    fn set_permission_enabled(&self, code: &str, is_enabled: bool) -> Result<usize>;

    // Permission version operations
    fn publish_permission_version(&self, application_key: &str) -> Result<PermissionVersion>;
    fn latest_permission_version(&self, application_key: &str) -> Result<i64>;

    // Role operations
    /// Inserts the role and its grants. Every granted code must exist in the
    /// role's application catalog.
    fn create_role(&self, role: &Role) -> Result<()>;
    fn get_role(&self, id: &str) -> Result<Option<Role>>;
    fn list_roles(&self, application_key: Option<&str>) -> Result<Vec<Role>>;
    /// Rewrites name, description and grants. Returns false when the role is missing.
    fn update_role(&self, role: &Role) -> Result<bool>;
    fn delete_role(&self, id: &str) -> Result<bool>;

    // User role operations
    /// Replaces every role assignment of `user_id`.
    fn set_user_roles(&self, user_id: &str, role_ids: &[String]) -> Result<()>;
    fn list_user_roles(&self, user_id: &str) -> Result<Vec<Role>>;
    /// Enabled codes granted to `user_id` through roles of `application_key`, sorted.
    fn enabled_codes_for_user(&self, user_id: &str, application_key: &str)
    -> Result<Vec<String>>;

    // Schema registry operations
    fn create_registry_entry(&self, app_id: &str, schema_name: &str) -> Result<SchemaRegistryEntry>;
    fn get_registry_entry(&self, app_id: &str) -> Result<Option<SchemaRegistryEntry>>;
    fn list_registry_entries(&self) -> Result<Vec<SchemaRegistryEntry>>;
    fn update_registry_status(&self, app_id: &str, status: SchemaStatus) -> Result<()>;

    // Migration history operations
    fn list_attempted_migrations(&self, app_id: &str) -> Result<HashSet<String>>;
    /// Appends a history row. Returns false when the (app_id, filename) pair already exists.
    fn record_migration(
        &self,
        app_id: &str,
        filename: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<bool>;
    fn list_migration_history(&self, app_id: &str) -> Result<Vec<MigrationRecord>>;

    // Migration lease operations
    /// Takes the per-application lease unless another holder owns an unexpired one.
    fn try_acquire_lease(
        &self,
        app_id: &str,
        holder: &str,
        now_ms: i64,
        expires_at_ms: i64,
    ) -> Result<bool>;
    fn release_lease(&self, app_id: &str, holder: &str) -> Result<()>;

    // Logical schema operations
    fn create_logical_schema(&self, schema: &LogicalSchema) -> Result<()>;
    fn get_logical_schema(&self, id: &str) -> Result<Option<LogicalSchema>>;
    fn list_logical_schemas(&self, application_key: Option<&str>) -> Result<Vec<LogicalSchema>>;

    // Schema version operations
    fn create_schema_version(
        &self,
        schema_id: &str,
        definition: &serde_json::Value,
    ) -> Result<SchemaVersion>;
    fn get_schema_version(&self, id: &str) -> Result<Option<SchemaVersion>>;
    fn list_schema_versions(&self, schema_id: &str) -> Result<Vec<SchemaVersion>>;
    /// Archives the currently published version of the same schema and publishes `id`,
    /// atomically.
    fn publish_schema_version(&self, id: &str) -> Result<()>;
    fn current_schema_version(&self, schema_id: &str) -> Result<Option<SchemaVersion>>;

    // Application directory operations
    fn upsert_app(&self, app: &AppRecord) -> Result<()>;
    fn get_app(&self, app_id: &str) -> Result<Option<AppRecord>>;
    fn list_apps(&self) -> Result<Vec<AppRecord>>;
}
