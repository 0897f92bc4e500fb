use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use uuid::Uuid;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        operator_id: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expires_at: row
            .get::<_, Option<String>>(5)?
            .map(|s| parse_datetime(&s)),
        last_used_at: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_datetime(&s)),
    })
}

fn row_to_application(row: &Row<'_>) -> rusqlite::Result<ApplicationIdentity> {
    Ok(ApplicationIdentity {
        key: row.get(0)?,
        name: row.get(1)?,
        secret: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn row_to_permission(row: &Row<'_>) -> rusqlite::Result<PermissionDefinition> {
    Ok(PermissionDefinition {
        code: row.get(0)?,
        application_key: row.get(1)?,
        name: row.get(2)?,
        is_enabled: row.get(3)?,
    })
}

fn row_to_role(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        application_key: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        permissions: Vec::new(),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn load_grants(conn: &Connection, role_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT permission_code FROM role_permissions WHERE role_id = ?1 ORDER BY permission_code",
    )?;
    let rows = stmt.query_map(params![role_id], |row| row.get(0))?;
    rows.collect()
}

/// Rejects codes that are missing from the catalog or belong to another application.
fn check_grants(conn: &Connection, application_key: &str, codes: &[String]) -> Result<()> {
    for code in codes {
        let owner: Option<String> = conn
            .query_row(
                "SELECT application_key FROM permissions WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => {
                return Err(Error::BadRequest(format!("unknown permission code '{code}'")));
            }
            Some(owner) if owner != application_key => {
                return Err(Error::BadRequest(format!(
                    "permission '{code}' belongs to '{owner}'"
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn write_grants(conn: &Connection, role_id: &str, codes: &[String]) -> Result<()> {
    let now = format_datetime(&Utc::now());
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_code, created_at)
         VALUES (?1, ?2, ?3)",
    )?;
    for code in codes {
        stmt.execute(params![role_id, code, now])?;
    }
    Ok(())
}

fn role_name_conflict(result: rusqlite::Result<usize>, role: &Role) -> Result<usize> {
    match result {
        Ok(rows) => Ok(rows),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::Conflict(format!(
                "role '{}' already exists in '{}'",
                role.name, role.application_key
            )))
        }
        Err(e) => Err(e.into()),
    }
}

fn row_to_registry_entry(row: &Row<'_>) -> rusqlite::Result<SchemaRegistryEntry> {
    let status: String = row.get(3)?;
    Ok(SchemaRegistryEntry {
        id: row.get(0)?,
        app_id: row.get(1)?,
        schema_name: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn row_to_migration(row: &Row<'_>) -> rusqlite::Result<MigrationRecord> {
    Ok(MigrationRecord {
        id: row.get(0)?,
        app_id: row.get(1)?,
        filename: row.get(2)?,
        executed_at: parse_datetime(&row.get::<_, String>(3)?),
        success: row.get(4)?,
        error: row.get(5)?,
    })
}

fn row_to_logical_schema(row: &Row<'_>) -> rusqlite::Result<LogicalSchema> {
    Ok(LogicalSchema {
        id: row.get(0)?,
        application_key: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn row_to_schema_version(row: &Row<'_>) -> rusqlite::Result<SchemaVersion> {
    let status: String = row.get(3)?;
    let definition: String = row.get(4)?;
    Ok(SchemaVersion {
        id: row.get(0)?,
        schema_id: row.get(1)?,
        number: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        definition: serde_json::from_str(&definition).map_err(|e| conversion_error(4, e))?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn row_to_app(row: &Row<'_>) -> rusqlite::Result<AppRecord> {
    let menus: String = row.get(5)?;
    Ok(AppRecord {
        app_id: row.get(0)?,
        app_name: row.get(1)?,
        description: row.get(2)?,
        latest_version: row.get(3)?,
        url: row.get(4)?,
        menus: serde_json::from_str(&menus).map_err(|e| conversion_error(5, e))?,
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

const SESSION_COLUMNS: &str =
    "id, token_hash, token_lookup, operator_id, created_at, expires_at, last_used_at";
const ROLE_COLUMNS: &str = "id, application_key, name, description, created_at";
const REGISTRY_COLUMNS: &str = "id, app_id, schema_name, status, created_at, updated_at";
const VERSION_COLUMNS: &str = "id, schema_id, number, status, definition, created_at";

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Operator and session operations

    fn create_operator(&self, operator: &Operator) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO operators (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![
                operator.id,
                operator.name,
                format_datetime(&operator.created_at)
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_operator(&self, id: &str) -> Result<Option<Operator>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM operators WHERE id = ?1",
            params![id],
            |row| {
                Ok(Operator {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn has_operator(&self) -> Result<bool> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM operators", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn create_session(&self, session: &Session) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO sessions (id, token_hash, token_lookup, operator_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.token_hash,
                session.token_lookup,
                session.operator_id,
                format_datetime(&session.created_at),
                session.expires_at.as_ref().map(format_datetime),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::SessionLookupCollision)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_lookup = ?1"),
            params![lookup],
            row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_session_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Application identity operations

    fn upsert_application(
        &self,
        key: &str,
        name: &str,
        new_secret: &str,
    ) -> Result<ApplicationIdentity> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO applications (key, name, secret, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET name = excluded.name",
            params![key, name, new_secret, format_datetime(&Utc::now())],
        )?;
        let identity = tx.query_row(
            "SELECT key, name, secret, created_at FROM applications WHERE key = ?1",
            params![key],
            row_to_application,
        )?;
        tx.commit()?;
        Ok(identity)
    }

    fn get_application(&self, key: &str) -> Result<Option<ApplicationIdentity>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT key, name, secret, created_at FROM applications WHERE key = ?1",
            params![key],
            row_to_application,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_applications(&self) -> Result<Vec<ApplicationIdentity>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT key, name, secret, created_at FROM applications ORDER BY key")?;
        let rows = stmt.query_map([], row_to_application)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn record_nonce(
        &self,
        app_key: &str,
        nonce: &str,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM seen_nonces WHERE expires_at <= ?1",
            params![now_ms],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO seen_nonces (app_key, nonce, expires_at) VALUES (?1, ?2, ?3)",
            params![app_key, nonce, expires_at_ms],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }

    // Permission catalog operations

    fn upsert_permissions(&self, permissions: &[PermissionDefinition]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO permissions (code, application_key, name, is_enabled, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(code) DO UPDATE SET
                     name = excluded.name,
                     application_key = excluded.application_key,
                     is_enabled = 1",
            )?;
            let now = format_datetime(&Utc::now());
            for permission in permissions {
                count += stmt.execute(params![
                    permission.code,
                    permission.application_key,
                    permission.name,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    fn list_permissions(&self, application_key: &str) -> Result<Vec<PermissionDefinition>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT code, application_key, name, is_enabled
             FROM permissions WHERE application_key = ?1 ORDER BY code",
        )?;
        let rows = stmt.query_map(params![application_key], row_to_permission)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn set_permission_enabled(&self, code: &str, is_enabled: bool) -> Result<usize> {
        let rows = self.conn().execute(
            "UPDATE permissions SET is_enabled = ?1 WHERE code = ?2",
            params![is_enabled, code],
        )?;
        Ok(rows)
    }

    // Permission version operations

    fn publish_permission_version(&self, application_key: &str) -> Result<PermissionVersion> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: i64 = tx.query_row(
            "SELECT COALESCE(MAX(number), 0) FROM permission_versions WHERE application_key = ?1",
            params![application_key],
            |row| row.get(0),
        )?;
        let version = PermissionVersion {
            id: Uuid::new_v4().to_string(),
            application_key: application_key.to_string(),
            number: current + 1,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO permission_versions (id, application_key, number, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                version.id,
                version.application_key,
                version.number,
                format_datetime(&version.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(version)
    }

    fn latest_permission_version(&self, application_key: &str) -> Result<i64> {
        let number = self.conn().query_row(
            "SELECT COALESCE(MAX(number), 0) FROM permission_versions WHERE application_key = ?1",
            params![application_key],
            |row| row.get(0),
        )?;
        Ok(number)
    }

    // Role operations

    fn create_role(&self, role: &Role) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        check_grants(&tx, &role.application_key, &role.permissions)?;

        let inserted = tx.execute(
            "INSERT INTO roles (id, application_key, name, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                role.id,
                role.application_key,
                role.name,
                role.description,
                format_datetime(&role.created_at),
            ],
        );
        role_name_conflict(inserted, role)?;
        write_grants(&tx, &role.id, &role.permissions)?;

        tx.commit()?;
        Ok(())
    }

    fn get_role(&self, id: &str) -> Result<Option<Role>> {
        let conn = self.conn();
        let role = conn
            .query_row(
                &format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?1"),
                params![id],
                row_to_role,
            )
            .optional()?;
        match role {
            Some(mut role) => {
                role.permissions = load_grants(&conn, &role.id)?;
                Ok(Some(role))
            }
            None => Ok(None),
        }
    }

    fn list_roles(&self, application_key: Option<&str>) -> Result<Vec<Role>> {
        let conn = self.conn();
        let mut roles = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROLE_COLUMNS} FROM roles
                 WHERE ?1 IS NULL OR application_key = ?1 ORDER BY application_key, name"
            ))?;
            let rows = stmt.query_map(params![application_key], row_to_role)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        for role in &mut roles {
            role.permissions = load_grants(&conn, &role.id)?;
        }
        Ok(roles)
    }

    fn update_role(&self, role: &Role) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let application_key: Option<String> = tx
            .query_row(
                "SELECT application_key FROM roles WHERE id = ?1",
                params![role.id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(application_key) = application_key else {
            return Ok(false);
        };
        check_grants(&tx, &application_key, &role.permissions)?;

        let updated = tx.execute(
            "UPDATE roles SET name = ?1, description = ?2 WHERE id = ?3",
            params![role.name, role.description, role.id],
        );
        role_name_conflict(updated, role)?;
        tx.execute(
            "DELETE FROM role_permissions WHERE role_id = ?1",
            params![role.id],
        )?;
        write_grants(&tx, &role.id, &role.permissions)?;

        tx.commit()?;
        Ok(true)
    }

    fn delete_role(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM roles WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // User role operations

    fn set_user_roles(&self, user_id: &str, role_ids: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        for role_id in role_ids {
            let exists: Option<String> = tx
                .query_row(
                    "SELECT id FROM roles WHERE id = ?1",
                    params![role_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(Error::BadRequest(format!("unknown role '{role_id}'")));
            }
        }

        tx.execute("DELETE FROM user_roles WHERE user_id = ?1", params![user_id])?;
        {
            let now = format_datetime(&Utc::now());
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id, created_at) VALUES (?1, ?2, ?3)",
            )?;
            for role_id in role_ids {
                stmt.execute(params![user_id, role_id, now])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn list_user_roles(&self, user_id: &str) -> Result<Vec<Role>> {
        let conn = self.conn();
        let mut roles = {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.application_key, r.name, r.description, r.created_at
                 FROM user_roles ur JOIN roles r ON r.id = ur.role_id
                 WHERE ur.user_id = ?1 ORDER BY r.application_key, r.name",
            )?;
            let rows = stmt.query_map(params![user_id], row_to_role)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        for role in &mut roles {
            role.permissions = load_grants(&conn, &role.id)?;
        }
        Ok(roles)
    }

    fn enabled_codes_for_user(
        &self,
        user_id: &str,
        application_key: &str,
    ) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT p.code
             FROM user_roles ur
             JOIN roles r ON r.id = ur.role_id
             JOIN role_permissions rp ON rp.role_id = r.id
             JOIN permissions p ON p.code = rp.permission_code
             WHERE ur.user_id = ?1 AND r.application_key = ?2 AND p.is_enabled = 1
             ORDER BY p.code",
        )?;
        let rows = stmt.query_map(params![user_id, application_key], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Schema registry operations

    fn create_registry_entry(&self, app_id: &str, schema_name: &str) -> Result<SchemaRegistryEntry> {
        let conn = self.conn();
        let now = format_datetime(&Utc::now());
        let result = conn.execute(
            "INSERT INTO schema_registry (app_id, schema_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![app_id, schema_name, SchemaStatus::Creating.as_str(), now],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(Error::Conflict(format!(
                    "schema '{schema_name}' is already registered"
                )));
            }
            Err(e) => return Err(e.into()),
        }
        conn.query_row(
            &format!("SELECT {REGISTRY_COLUMNS} FROM schema_registry WHERE app_id = ?1"),
            params![app_id],
            row_to_registry_entry,
        )
        .map_err(Error::from)
    }

    fn get_registry_entry(&self, app_id: &str) -> Result<Option<SchemaRegistryEntry>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REGISTRY_COLUMNS} FROM schema_registry WHERE app_id = ?1"),
            params![app_id],
            row_to_registry_entry,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_registry_entries(&self) -> Result<Vec<SchemaRegistryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REGISTRY_COLUMNS} FROM schema_registry ORDER BY app_id"
        ))?;
        let rows = stmt.query_map([], row_to_registry_entry)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_registry_status(&self, app_id: &str, status: SchemaStatus) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE schema_registry SET status = ?1, updated_at = ?2 WHERE app_id = ?3",
            params![status.as_str(), format_datetime(&Utc::now()), app_id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Migration history operations

    fn list_attempted_migrations(&self, app_id: &str) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT filename FROM migration_history WHERE app_id = ?1")?;
        let rows = stmt.query_map(params![app_id], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(Error::from)
    }

    fn record_migration(
        &self,
        app_id: &str,
        filename: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO migration_history (app_id, filename, executed_at, success, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                app_id,
                filename,
                format_datetime(&Utc::now()),
                success,
                error
            ],
        )?;
        Ok(rows > 0)
    }

    fn list_migration_history(&self, app_id: &str) -> Result<Vec<MigrationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, app_id, filename, executed_at, success, error
             FROM migration_history WHERE app_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![app_id], row_to_migration)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Migration lease operations

    fn try_acquire_lease(
        &self,
        app_id: &str,
        holder: &str,
        now_ms: i64,
        expires_at_ms: i64,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM migration_leases WHERE app_id = ?1 AND expires_at <= ?2",
            params![app_id, now_ms],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO migration_leases (app_id, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![app_id, holder, format_datetime(&Utc::now()), expires_at_ms],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }

    fn release_lease(&self, app_id: &str, holder: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM migration_leases WHERE app_id = ?1 AND holder = ?2",
            params![app_id, holder],
        )?;
        Ok(())
    }

    // Logical schema operations

    fn create_logical_schema(&self, schema: &LogicalSchema) -> Result<()> {
        self.conn().execute(
            "INSERT INTO logical_schemas (id, application_key, name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                schema.id,
                schema.application_key,
                schema.name,
                format_datetime(&schema.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_logical_schema(&self, id: &str) -> Result<Option<LogicalSchema>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, application_key, name, created_at FROM logical_schemas WHERE id = ?1",
            params![id],
            row_to_logical_schema,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_logical_schemas(&self, application_key: Option<&str>) -> Result<Vec<LogicalSchema>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, application_key, name, created_at FROM logical_schemas
             WHERE ?1 IS NULL OR application_key = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![application_key], row_to_logical_schema)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Schema version operations

    fn create_schema_version(
        &self,
        schema_id: &str,
        definition: &serde_json::Value,
    ) -> Result<SchemaVersion> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM logical_schemas WHERE id = ?1",
                params![schema_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(Error::NotFound);
        }

        let current: i64 = tx.query_row(
            "SELECT COALESCE(MAX(number), 0) FROM schema_versions WHERE schema_id = ?1",
            params![schema_id],
            |row| row.get(0),
        )?;

        let version = SchemaVersion {
            id: Uuid::new_v4().to_string(),
            schema_id: schema_id.to_string(),
            number: current + 1,
            status: VersionStatus::Draft,
            definition: definition.clone(),
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO schema_versions (id, schema_id, number, status, definition, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                version.id,
                version.schema_id,
                version.number,
                version.status.as_str(),
                serde_json::to_string(&version.definition)?,
                format_datetime(&version.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(version)
    }

    fn get_schema_version(&self, id: &str) -> Result<Option<SchemaVersion>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM schema_versions WHERE id = ?1"),
            params![id],
            row_to_schema_version,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_schema_versions(&self, schema_id: &str) -> Result<Vec<SchemaVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM schema_versions
             WHERE schema_id = ?1 ORDER BY number DESC, created_at ASC"
        ))?;
        let rows = stmt.query_map(params![schema_id], row_to_schema_version)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn publish_schema_version(&self, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let schema_id: String = tx
            .query_row(
                "SELECT schema_id FROM schema_versions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(Error::NotFound)?;

        tx.execute(
            "UPDATE schema_versions SET status = 'archived'
             WHERE schema_id = ?1 AND status = 'published' AND id != ?2",
            params![schema_id, id],
        )?;
        tx.execute(
            "UPDATE schema_versions SET status = 'published' WHERE id = ?1",
            params![id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn current_schema_version(&self, schema_id: &str) -> Result<Option<SchemaVersion>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM schema_versions
                 WHERE schema_id = ?1 AND status = 'published' ORDER BY number DESC LIMIT 1"
            ),
            params![schema_id],
            row_to_schema_version,
        )
        .optional()
        .map_err(Error::from)
    }

    // Application directory operations

    fn upsert_app(&self, app: &AppRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO apps (app_id, app_name, description, latest_version, url, menus, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(app_id) DO UPDATE SET
                 app_name = excluded.app_name,
                 description = excluded.description,
                 latest_version = excluded.latest_version,
                 url = excluded.url,
                 menus = excluded.menus,
                 updated_at = excluded.updated_at",
            params![
                app.app_id,
                app.app_name,
                app.description,
                app.latest_version,
                app.url,
                serde_json::to_string(&app.menus)?,
                format_datetime(&app.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_app(&self, app_id: &str) -> Result<Option<AppRecord>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT app_id, app_name, description, latest_version, url, menus, updated_at
             FROM apps WHERE app_id = ?1",
            params![app_id],
            row_to_app,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_apps(&self) -> Result<Vec<AppRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT app_id, app_name, description, latest_version, url, menus, updated_at
             FROM apps ORDER BY app_id",
        )?;
        let rows = stmt.query_map([], row_to_app)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn permission(code: &str, name: &str, key: &str) -> PermissionDefinition {
        PermissionDefinition {
            code: code.to_string(),
            name: name.to_string(),
            application_key: key.to_string(),
            is_enabled: true,
        }
    }

    fn logical_schema(store: &SqliteStore, id: &str) {
        store
            .create_logical_schema(&LogicalSchema {
                id: id.to_string(),
                application_key: "crm".to_string(),
                name: format!("schema-{id}"),
                created_at: Utc::now(),
            })
            .unwrap();
    }

    fn role(id: &str, key: &str, name: &str, codes: &[&str]) -> Role {
        Role {
            id: id.to_string(),
            application_key: key.to_string(),
            name: name.to_string(),
            description: None,
            permissions: codes.iter().map(|c| c.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn seed_catalog(store: &SqliteStore) {
        store
            .upsert_permissions(&[
                permission("crm:user:read", "Read users", "crm"),
                permission("crm:user:write", "Write users", "crm"),
                permission("billing:invoice:read", "Read invoices", "billing"),
            ])
            .unwrap();
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = test_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "operators",
            "sessions",
            "applications",
            "seen_nonces",
            "permissions",
            "permission_versions",
            "roles",
            "role_permissions",
            "user_roles",
            "schema_registry",
            "migration_history",
            "migration_leases",
            "logical_schemas",
            "schema_versions",
            "apps",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_application_upsert_keeps_secret() {
        let (_temp, store) = test_store();

        let first = store.upsert_application("crm", "CRM", "secret-1").unwrap();
        assert_eq!(first.secret, "secret-1");

        let second = store
            .upsert_application("crm", "Customer CRM", "secret-2")
            .unwrap();
        assert_eq!(second.secret, "secret-1");
        assert_eq!(second.name, "Customer CRM");
        assert_eq!(store.list_applications().unwrap().len(), 1);
    }

    #[test]
    fn test_nonce_is_single_use_until_expiry() {
        let (_temp, store) = test_store();

        assert!(store.record_nonce("crm", "n1", 1_000, 0).unwrap());
        assert!(!store.record_nonce("crm", "n1", 1_000, 500).unwrap());
        assert!(store.record_nonce("billing", "n1", 1_000, 500).unwrap());
        // Pruned once expired.
        assert!(store.record_nonce("crm", "n1", 3_000, 2_000).unwrap());
    }

    #[test]
    fn test_permission_upsert_overwrites_and_reenables() {
        let (_temp, store) = test_store();

        store
            .upsert_permissions(&[permission("crm:user:read", "Read", "crm")])
            .unwrap();
        assert_eq!(store.set_permission_enabled("crm:user:read", false).unwrap(), 1);

        store
            .upsert_permissions(&[permission("crm:user:read", "Read users", "crm")])
            .unwrap();
        let list = store.list_permissions("crm").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Read users");
        assert!(list[0].is_enabled);

        assert_eq!(store.set_permission_enabled("crm:missing", true).unwrap(), 0);
    }

    #[test]
    fn test_permission_versions_are_monotonic_per_application() {
        let (_temp, store) = test_store();

        assert_eq!(store.latest_permission_version("crm").unwrap(), 0);
        assert_eq!(store.publish_permission_version("crm").unwrap().number, 1);
        assert_eq!(store.publish_permission_version("crm").unwrap().number, 2);
        assert_eq!(store.publish_permission_version("billing").unwrap().number, 1);
        assert_eq!(store.latest_permission_version("crm").unwrap(), 2);
    }

    #[test]
    fn test_registry_entry_lifecycle() {
        let (_temp, store) = test_store();

        let entry = store.create_registry_entry("orders", "orders").unwrap();
        assert_eq!(entry.status, SchemaStatus::Creating);

        store
            .update_registry_status("orders", SchemaStatus::Active)
            .unwrap();
        let entry = store.get_registry_entry("orders").unwrap().unwrap();
        assert_eq!(entry.status, SchemaStatus::Active);

        assert!(matches!(
            store.update_registry_status("missing", SchemaStatus::Active),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            store.create_registry_entry("other", "orders"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_migration_record_is_append_only() {
        let (_temp, store) = test_store();

        assert!(store.record_migration("orders", "a.sql", false, Some("boom")).unwrap());
        assert!(!store.record_migration("orders", "a.sql", true, None).unwrap());
        assert!(store.record_migration("orders", "b.sql", true, None).unwrap());

        let history = store.list_migration_history("orders").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].success);
        assert_eq!(history[0].error.as_deref(), Some("boom"));

        let attempted = store.list_attempted_migrations("orders").unwrap();
        assert!(attempted.contains("a.sql") && attempted.contains("b.sql"));
    }

    #[test]
    fn test_lease_is_exclusive_until_released_or_expired() {
        let (_temp, store) = test_store();

        assert!(store.try_acquire_lease("orders", "h1", 0, 1_000).unwrap());
        assert!(!store.try_acquire_lease("orders", "h2", 10, 1_010).unwrap());
        assert!(store.try_acquire_lease("billing", "h2", 10, 1_010).unwrap());

        // A foreign holder cannot release the lease.
        store.release_lease("orders", "h2").unwrap();
        assert!(!store.try_acquire_lease("orders", "h3", 20, 1_020).unwrap());

        store.release_lease("orders", "h1").unwrap();
        assert!(store.try_acquire_lease("orders", "h3", 30, 1_030).unwrap());

        // Expired leases are taken over.
        assert!(store.try_acquire_lease("orders", "h4", 2_000, 3_000).unwrap());
    }

    #[test]
    fn test_schema_version_numbers_and_single_published() {
        let (_temp, store) = test_store();
        logical_schema(&store, "s1");

        let v1 = store.create_schema_version("s1", &json!({"v": 1})).unwrap();
        let v2 = store.create_schema_version("s1", &json!({"v": 2})).unwrap();
        assert_eq!((v1.number, v2.number), (1, 2));
        assert_eq!(v1.status, VersionStatus::Draft);

        store.publish_schema_version(&v1.id).unwrap();
        store.publish_schema_version(&v2.id).unwrap();
        store.publish_schema_version(&v2.id).unwrap();

        let versions = store.list_schema_versions("s1").unwrap();
        let published: Vec<_> = versions
            .iter()
            .filter(|v| v.status == VersionStatus::Published)
            .collect();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, v2.id);

        let archived = store.get_schema_version(&v1.id).unwrap().unwrap();
        assert_eq!(archived.status, VersionStatus::Archived);
        assert_eq!(archived.definition, json!({"v": 1}));

        let current = store.current_schema_version("s1").unwrap().unwrap();
        assert_eq!(current.id, v2.id);
    }

    #[test]
    fn test_schema_version_requires_existing_schema() {
        let (_temp, store) = test_store();
        assert!(matches!(
            store.create_schema_version("nope", &json!({})),
            Err(Error::NotFound)
        ));
        assert!(matches!(
            store.publish_schema_version("nope"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_logical_schema_filtering() {
        let (_temp, store) = test_store();
        logical_schema(&store, "s1");
        store
            .create_logical_schema(&LogicalSchema {
                id: "s2".to_string(),
                application_key: "billing".to_string(),
                name: "invoices".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();

        assert_eq!(store.list_logical_schemas(None).unwrap().len(), 2);
        let crm = store.list_logical_schemas(Some("crm")).unwrap();
        assert_eq!(crm.len(), 1);
        assert_eq!(crm[0].id, "s1");
    }

    #[test]
    fn test_app_directory_upsert() {
        let (_temp, store) = test_store();
        let mut app = AppRecord {
            app_id: "orders".to_string(),
            app_name: "Orders".to_string(),
            description: None,
            latest_version: Some("1.0.0".to_string()),
            url: None,
            menus: json!([{"title": "Orders"}]),
            updated_at: Utc::now(),
        };
        store.upsert_app(&app).unwrap();
        app.latest_version = Some("1.1.0".to_string());
        store.upsert_app(&app).unwrap();

        let apps = store.list_apps().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].latest_version.as_deref(), Some("1.1.0"));
        assert_eq!(apps[0].menus, json!([{"title": "Orders"}]));
    }

    #[test]
    fn test_role_grants_must_belong_to_application() {
        let (_temp, store) = test_store();
        seed_catalog(&store);

        let unknown = store.create_role(&role("r1", "crm", "Viewer", &["crm:user:delete"]));
        assert!(matches!(unknown, Err(Error::BadRequest(_))));
        let foreign = store.create_role(&role("r1", "crm", "Viewer", &["billing:invoice:read"]));
        assert!(matches!(foreign, Err(Error::BadRequest(_))));
        assert!(store.get_role("r1").unwrap().is_none());

        store
            .create_role(&role("r1", "crm", "Viewer", &["crm:user:read"]))
            .unwrap();
        let duplicate = store.create_role(&role("r2", "crm", "Viewer", &[]));
        assert!(matches!(duplicate, Err(Error::Conflict(_))));
        // Same name in another application is fine.
        store.create_role(&role("r3", "billing", "Viewer", &[])).unwrap();
    }

    #[test]
    fn test_role_update_replaces_grants_and_delete_cascades() {
        let (_temp, store) = test_store();
        seed_catalog(&store);
        store
            .create_role(&role("r1", "crm", "Viewer", &["crm:user:read"]))
            .unwrap();
        store.set_user_roles("alice", &["r1".to_string()]).unwrap();

        let mut updated = role("r1", "crm", "Editor", &["crm:user:write", "crm:user:read"]);
        updated.description = Some("Can edit users".to_string());
        assert!(store.update_role(&updated).unwrap());

        let stored = store.get_role("r1").unwrap().unwrap();
        assert_eq!(stored.name, "Editor");
        assert_eq!(stored.description.as_deref(), Some("Can edit users"));
        assert_eq!(stored.permissions, vec!["crm:user:read", "crm:user:write"]);
        assert!(!store.update_role(&role("ghost", "crm", "X", &[])).unwrap());

        assert!(store.delete_role("r1").unwrap());
        assert!(!store.delete_role("r1").unwrap());
        assert!(store.list_user_roles("alice").unwrap().is_empty());
    }

    #[test]
    fn test_user_roles_are_replaced_wholesale() {
        let (_temp, store) = test_store();
        seed_catalog(&store);
        store.create_role(&role("r1", "crm", "Viewer", &[])).unwrap();
        store.create_role(&role("r2", "crm", "Editor", &[])).unwrap();

        store
            .set_user_roles("alice", &["r1".to_string(), "r2".to_string()])
            .unwrap();
        assert_eq!(store.list_user_roles("alice").unwrap().len(), 2);

        store.set_user_roles("alice", &["r2".to_string()]).unwrap();
        let roles = store.list_user_roles("alice").unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "Editor");

        let unknown = store.set_user_roles("alice", &["missing".to_string()]);
        assert!(matches!(unknown, Err(Error::BadRequest(_))));
        assert_eq!(store.list_user_roles("alice").unwrap().len(), 1);

        store.set_user_roles("alice", &[]).unwrap();
        assert!(store.list_user_roles("alice").unwrap().is_empty());
    }

    #[test]
    fn test_enabled_codes_for_user() {
        let (_temp, store) = test_store();
        seed_catalog(&store);
        store
            .create_role(&role("r1", "crm", "Viewer", &["crm:user:read"]))
            .unwrap();
        store
            .create_role(&role("r2", "crm", "Editor", &["crm:user:read", "crm:user:write"]))
            .unwrap();
        store
            .create_role(&role("r3", "billing", "Clerk", &["billing:invoice:read"]))
            .unwrap();
        store
            .set_user_roles(
                "alice",
                &["r1".to_string(), "r2".to_string(), "r3".to_string()],
            )
            .unwrap();

        assert_eq!(
            store.enabled_codes_for_user("alice", "crm").unwrap(),
            vec!["crm:user:read", "crm:user:write"]
        );

        store.set_permission_enabled("crm:user:write", false).unwrap();
        assert_eq!(
            store.enabled_codes_for_user("alice", "crm").unwrap(),
            vec!["crm:user:read"]
        );
        assert!(store.enabled_codes_for_user("bob", "crm").unwrap().is_empty());
    }
}
