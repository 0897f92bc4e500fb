mod models;
mod package;

pub use models::*;
pub use package::*;
