//! # OpenOne
//!
//! Publish orchestration for micro-applications that share one database and one
//! permission space. Three services run on one router:
//!
//! - permission (`/api/v1/permission`): application identities, signed
//!   permission registration and versioned catalogs
//! - database (`/api/v1/database`): physical schema provisioning with
//!   migration tracking, plus logical schema versions
//! - admin (`/api/v1/admin`): package upload, bundle publish and the app
//!   directory
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! openone = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::path::Path;
//! use openone::config::ServerConfig;
//! use openone::provision::SqliteProvisioner;
//! use openone::server::{AppState, create_router};
//! use openone::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::load(Path::new("./data")).unwrap();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let provisioner = SqliteProvisioner::new(config.schemas_dir());
//! let state = Arc::new(AppState::new(Arc::new(store), Arc::new(provisioner), config).unwrap());
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod migrate;
pub mod orchestrator;
pub mod provision;
pub mod registry;
pub mod server;
pub mod store;
pub mod types;
