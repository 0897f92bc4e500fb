//! Physical schema provisioning.
//!
//! Every application owns one isolated SQLite database file under the
//! provisioner root. Migration SQL runs against that file only.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::registry::is_safe_schema_name;

pub trait SchemaProvisioner: Send + Sync {
    /// Creates the physical schema if it does not exist yet.
    fn create_schema(&self, schema_name: &str) -> Result<()>;

    /// Runs raw SQL against an existing schema.
    ///
    /// SQL that opens its own transaction runs as-is. Anything else is wrapped in
    /// a single transaction.
    fn execute_in_schema(&self, schema_name: &str, sql: &str) -> Result<()>;

    /// Connection string handed to the application through its env file.
    fn connection_url(&self, schema_name: &str) -> String;
}

pub struct SqliteProvisioner {
    root: PathBuf,
}

impl SqliteProvisioner {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn schema_path(&self, schema_name: &str) -> Result<PathBuf> {
        if !is_safe_schema_name(schema_name) {
            return Err(Error::Provision(format!(
                "refusing unsafe schema name '{schema_name}'"
            )));
        }
        Ok(self.root.join(format!("{schema_name}.db")))
    }
}

/// True when the first statement of `sql` is `BEGIN`, ignoring comments.
fn manages_own_transaction(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if let Some(line) = rest.strip_prefix("--") {
            rest = line.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(block) = rest.strip_prefix("/*") {
            rest = block.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            break;
        }
    }

    let keyword: String = rest
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    keyword.eq_ignore_ascii_case("begin")
}

impl SchemaProvisioner for SqliteProvisioner {
    fn create_schema(&self, schema_name: &str) -> Result<()> {
        let path = self.schema_path(schema_name)?;
        std::fs::create_dir_all(&self.root).map_err(|e| {
            Error::Provision(format!("cannot create {}: {e}", self.root.display()))
        })?;

        let conn = Connection::open(&path)
            .map_err(|e| Error::Provision(format!("cannot open {}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Provision(e.to_string()))?;

        tracing::debug!("Schema {} ready at {}", schema_name, path.display());
        Ok(())
    }

    fn execute_in_schema(&self, schema_name: &str, sql: &str) -> Result<()> {
        let path = self.schema_path(schema_name)?;
        let mut conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Provision(format!("schema '{schema_name}' is not provisioned: {e}")))?;

        if manages_own_transaction(sql) {
            if let Err(e) = conn.execute_batch(sql) {
                // Don't leave the file's own transaction dangling.
                if !conn.is_autocommit() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
                return Err(Error::Provision(e.to_string()));
            }
            return Ok(());
        }

        let tx = conn
            .transaction()
            .map_err(|e| Error::Provision(e.to_string()))?;
        tx.execute_batch(sql)
            .map_err(|e| Error::Provision(e.to_string()))?;
        tx.commit().map_err(|e| Error::Provision(e.to_string()))?;
        Ok(())
    }

    fn connection_url(&self, schema_name: &str) -> String {
        format!(
            "sqlite://{}",
            self.root.join(format!("{schema_name}.db")).display()
        )
    }
}
