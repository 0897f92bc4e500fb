mod commands;
pub mod http_client;
mod info;
mod publish;

pub use commands::AdminCommands;
pub use info::run_info;
pub use publish::run_publish;

use crate::config::ServerConfig;
use crate::store::SqliteStore;

/// Open the store for a data directory, checking it was initialized.
pub fn init_store(data_dir: &str) -> anyhow::Result<(ServerConfig, SqliteStore)> {
    let config = ServerConfig::load(std::path::Path::new(data_dir))?;
    let db_path = config.db_path();

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'openone admin init' first.",
            db_path.display()
        );
    }

    let store = SqliteStore::new(&db_path)?;
    Ok((config, store))
}
