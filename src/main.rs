use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use openone::auth::TokenGenerator;
use openone::cli::{AdminCommands, run_info, run_publish};
use openone::config::ServerConfig;
use openone::provision::SqliteProvisioner;
use openone::server::{AppState, create_router};
use openone::store::{SqliteStore, Store};
use openone::types::{Operator, Session};

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "openone")]
#[command(about = "Publish orchestration for micro-applications", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Start the permission, database and admin services
    Serve {
        /// Host to bind to (overrides openone.toml)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides openone.toml)
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for database, schemas and packages
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Public base URL for external access (e.g., "https://platform.example.com")
        #[arg(long)]
        public_url: Option<String>,
    },

    /// Upload an application package and run the publish pipeline
    Publish {
        /// Package directory containing openone.config.json
        dir: PathBuf,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Operator session token. Defaults to the token written by `admin init`.
        #[arg(long)]
        token: Option<String>,

        /// Data directory holding the session token file
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },
}

fn run_init(data_dir: &str, name: &str) -> anyhow::Result<()> {
    let data_path = Path::new(data_dir);
    fs::create_dir_all(data_path)?;

    let config = ServerConfig::load(data_path)?;
    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let token_file = config.session_token_path();

    if store.has_operator()? {
        bail!(
            "Server already initialized. Session token exists at: {}",
            token_file.display()
        );
    }

    let now = Utc::now();
    let operator = Operator {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: now,
    };

    let generator = TokenGenerator::new();
    let (raw_token, lookup, hash) = generator.generate()?;
    let session = Session {
        id: Uuid::new_v4().to_string(),
        token_hash: hash,
        token_lookup: lookup,
        operator_id: operator.id.clone(),
        created_at: now,
        expires_at: None,
        last_used_at: None,
    };

    store.create_operator(&operator)?;
    store.create_session(&session)?;
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    println!();
    println!("========================================");
    println!("Operator '{name}' session token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("========================================");
    println!();

    Ok(())
}

async fn run_serve(
    host: Option<String>,
    port: Option<u16>,
    data_dir: &str,
    public_url: Option<String>,
) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(Path::new(data_dir))?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if public_url.is_some() {
        config.public_url = public_url;
    }

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;
    if !store.has_operator()? {
        bail!(
            "Server not initialized. Run 'openone admin init' first to create the database and operator session."
        );
    }

    let provisioner = SqliteProvisioner::new(config.schemas_dir());
    let addr = config.socket_addr()?;
    info!("Physical schemas stored under {}", config.schemas_dir().display());
    info!("Permission service at {}", config.permission_url());
    info!("Database service at {}", config.database_url());

    let state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(provisioner),
        config,
    )?);
    let app = create_router(state);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn resolve_token(token: Option<String>, data_dir: &str) -> anyhow::Result<String> {
    if let Some(token) = token {
        return Ok(token);
    }
    let config = ServerConfig::load(Path::new(data_dir))?;
    let path = config.session_token_path();
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(raw.trim().to_string()),
        Err(_) => bail!(
            "No session token given and none found at {}. Pass --token or run 'openone admin init'.",
            path.display()
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("openone=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir, name } => run_init(&data_dir, &name)?,
            AdminCommands::Info { data_dir, json } => run_info(&data_dir, json)?,
        },
        Commands::Serve {
            host,
            port,
            data_dir,
            public_url,
        } => run_serve(host, port, &data_dir, public_url).await?,
        Commands::Publish {
            dir,
            server,
            token,
            data_dir,
        } => {
            let token = resolve_token(token, &data_dir)?;
            // The blocking client must not run on the async runtime's worker.
            tokio::task::spawn_blocking(move || run_publish(&dir, &server, &token)).await??;
        }
    }

    Ok(())
}
