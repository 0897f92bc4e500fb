use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "openone.config.json";
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredPermission {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub schema_name: String,
    /// Directory inside the package holding `*.sql` files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrations: Option<String>,
}

/// Contents of `openone.config.json` shipped inside an application package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub app_id: String,
    pub app_name: String,
    pub version: String,
    #[serde(default)]
    pub permissions: Vec<DeclaredPermission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub menus: serde_json::Value,
}

impl AppConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(raw)
            .map_err(|e| Error::BadRequest(format!("{CONFIG_FILE} is malformed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("appId", &self.app_id),
            ("appName", &self.app_name),
            ("version", &self.version),
        ] {
            if value.trim().is_empty() {
                return Err(Error::BadRequest(format!("{CONFIG_FILE}: {field} is required")));
            }
        }
        if !is_safe_segment(&self.app_id) || !is_safe_segment(&self.version) {
            return Err(Error::BadRequest(format!(
                "{CONFIG_FILE}: appId and version must be plain path segments"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn migrations_dir(&self) -> Option<&str> {
        self.database
            .as_ref()
            .map(|db| db.migrations.as_deref().unwrap_or(DEFAULT_MIGRATIONS_DIR))
    }
}

/// A migration file as shipped by an application: executed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    pub filename: String,
    pub content: String,
}

/// An extracted package on disk.
#[derive(Debug, Clone)]
pub struct AppPackage {
    pub root: PathBuf,
    pub config: AppConfig,
}

impl AppPackage {
    pub fn load(root: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(root.join(CONFIG_FILE)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::BadRequest(format!("package is missing {CONFIG_FILE}"))
            }
            _ => Error::Io(e),
        })?;
        let config = AppConfig::parse(&raw)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Reads the declared migrations, sorted by filename. A missing directory yields none.
    pub fn migrations(&self) -> Result<Vec<MigrationFile>> {
        let Some(dir) = self.config.migrations_dir() else {
            return Ok(Vec::new());
        };
        let dir = self.root.join(dir);
        if !dir.is_dir() {
            tracing::warn!("Migrations directory not found: {}", dir.display());
            return Ok(Vec::new());
        }

        let pattern = dir.join("*.sql");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| Error::Config(format!("non-utf8 path {}", dir.display())))?;

        let mut files = Vec::new();
        for entry in glob::glob(pattern).map_err(|e| Error::Config(e.to_string()))? {
            let path = entry.map_err(|e| Error::Io(e.into_error()))?;
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            files.push(MigrationFile {
                filename: filename.to_string(),
                content: std::fs::read_to_string(&path)?,
            });
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }
}

/// Bundle accepted by the strict publish path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub application_key: String,
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<DeclaredPermission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<BundleSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSchema {
    pub name: String,
    pub definition: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBundle {
    #[serde(default)]
    pub application_key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<RawPermission>,
    #[serde(default)]
    pub schema: Option<RawBundleSchema>,
}

#[derive(Debug, Deserialize)]
pub struct RawPermission {
    pub code: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawBundleSchema {
    pub name: Option<String>,
    pub definition: Option<serde_json::Value>,
}

impl RawBundle {
    /// Trims fields, drops incomplete permissions and keeps the schema only when it has
    /// an object definition. The schema name falls back to the bundle name.
    pub fn normalize(self) -> Result<Bundle> {
        let application_key = self.application_key.trim().to_string();
        let name = self.name.trim().to_string();
        if application_key.is_empty() || name.is_empty() {
            return Err(Error::BadRequest(
                "applicationKey and name are required".to_string(),
            ));
        }

        let permissions = self
            .permissions
            .into_iter()
            .filter_map(|p| {
                let code = p.code?.trim().to_string();
                let name = p.name?.trim().to_string();
                (!code.is_empty() && !name.is_empty()).then_some(DeclaredPermission { code, name })
            })
            .collect();

        let schema = self.schema.and_then(|s| {
            let definition = s.definition.filter(serde_json::Value::is_object)?;
            let schema_name = s
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| name.clone());
            Some(BundleSchema {
                name: schema_name,
                definition,
            })
        });

        Ok(Bundle {
            application_key,
            name,
            permissions,
            schema,
        })
    }
}

/// Prefixes a declared permission code with its application key unless already owned.
#[must_use]
pub fn normalize_code(application_key: &str, code: &str) -> String {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let prefix = format!("{application_key}:");
    if trimmed.starts_with(&prefix) {
        return trimmed.to_string();
    }
    format!("{prefix}{}", trimmed.trim_start_matches(':'))
}

/// True when `value` can be used as a single directory name.
#[must_use]
pub fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
