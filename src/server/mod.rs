mod admin;
mod database;
pub mod dto;
mod permission;
pub mod response;
mod router;
pub mod validation;

pub use admin::admin_router;
pub use database::database_router;
pub use permission::permission_router;
pub use router::{AppState, create_router};
