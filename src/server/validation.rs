use crate::registry::{MAX_SCHEMA_NAME_LEN, is_safe_schema_name};
use crate::server::response::ApiError;

const MAX_KEY_LEN: usize = 64;

fn is_valid_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn validate_name(name: &str, entity: &str, max_len: usize) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} cannot exceed {max_len} characters"));
    }
    if !name.chars().all(is_valid_key_char) {
        return Err(format!(
            "{entity} can only contain alphanumeric characters, hyphens, and underscores"
        ));
    }
    if name.starts_with('-') || name.starts_with('_') {
        return Err(format!("{entity} cannot start with a hyphen or underscore"));
    }
    Ok(())
}

/// Application keys prefix permission codes, so `:` is never allowed in them.
pub fn validate_application_key(key: &str) -> Result<(), ApiError> {
    validate_name(key, "Application key", MAX_KEY_LEN).map_err(ApiError::bad_request)
}

pub fn validate_schema_name(name: &str) -> Result<(), ApiError> {
    if is_safe_schema_name(name) {
        return Ok(());
    }
    Err(ApiError::bad_request(format!(
        "Schema name must be lowercase letters, digits and single underscores, not start with a digit, and be at most {MAX_SCHEMA_NAME_LEN} characters"
    )))
}
