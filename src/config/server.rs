use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::env::{DEFAULT_PORT_RANGE_END, DEFAULT_PORT_RANGE_START};
use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "openone.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Public base URL for external access (e.g., "https://platform.example.com").
    /// Defaults to `http://<host>:<port>`.
    pub public_url: Option<String>,
    pub port_range_start: u16,
    pub port_range_end: u16,
    /// Domain deployed applications are served from.
    pub app_domain: String,
    /// Base URL of the permission service. Defaults to this server.
    pub permission_service_url: Option<String>,
    /// Base URL of the database service. Defaults to this server.
    pub database_service_url: Option<String>,
    pub outbound_timeout_secs: u64,
    pub migration_lease_secs: u64,
}

impl ServerConfig {
    /// Defaults overlaid with `<data_dir>/openone.toml` when present.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str::<ServerConfig>(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            ServerConfig::default()
        };
        config.data_dir = data_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_range_start > self.port_range_end {
            return Err(Error::Config(format!(
                "port_range_start ({}) is above port_range_end ({})",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.outbound_timeout_secs == 0 {
            return Err(Error::Config(
                "outbound_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("openone.db")
    }

    #[must_use]
    pub fn schemas_dir(&self) -> PathBuf {
        self.data_dir.join("schemas")
    }

    #[must_use]
    pub fn apps_dir(&self) -> PathBuf {
        self.data_dir.join("apps")
    }

    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    #[must_use]
    pub fn session_token_path(&self) -> PathBuf {
        self.data_dir.join(".session_token")
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    #[must_use]
    pub fn permission_url(&self) -> String {
        self.permission_service_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/v1/permission", self.base_url()))
    }

    #[must_use]
    pub fn database_url(&self) -> String {
        self.database_service_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/v1/database", self.base_url()))
    }

    #[must_use]
    pub fn admin_url(&self) -> String {
        format!("{}/api/v1/admin", self.base_url())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            public_url: None,
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
            app_domain: "localhost".to_string(),
            permission_service_url: None,
            database_service_url: None,
            outbound_timeout_secs: 10,
            migration_lease_secs: 600,
        }
    }
}
