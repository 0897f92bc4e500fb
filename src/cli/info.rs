use serde::Serialize;

use super::init_store;
use crate::store::Store;
use crate::types::SchemaStatus;

#[derive(Serialize)]
struct ServerInfo {
    data_dir: String,
    applications: usize,
    schemas: usize,
    active_schemas: usize,
    apps: usize,
}

pub fn run_info(data_dir: &str, json: bool) -> anyhow::Result<()> {
    let (config, store) = init_store(data_dir)?;

    let registry = store.list_registry_entries()?;
    let info = ServerInfo {
        data_dir: config.data_dir.display().to_string(),
        applications: store.list_applications()?.len(),
        schemas: registry.len(),
        active_schemas: registry
            .iter()
            .filter(|e| e.status == SchemaStatus::Active)
            .count(),
        apps: store.list_apps()?.len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Data directory: {}", info.data_dir);
    println!("Applications:   {}", info.applications);
    println!(
        "Schemas:        {} ({} active)",
        info.schemas, info.active_schemas
    );
    println!("Apps:           {}", info.apps);

    Ok(())
}
