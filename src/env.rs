//! Deterministic environment assignment for deployed applications.

use std::collections::BTreeMap;

pub const DEFAULT_PORT_RANGE_START: u16 = 4000;
pub const DEFAULT_PORT_RANGE_END: u16 = 4999;

/// Everything needed to render an application's `.env` file.
#[derive(Debug, Clone, Default)]
pub struct AppEnvConfig {
    pub app_id: String,
    pub port: u16,
    pub url: String,
    pub database_url: String,
    pub schema_name: String,
    pub permission_service_url: String,
    pub database_service_url: String,
    pub admin_service_url: String,
    pub custom: BTreeMap<String, String>,
}

/// Maps an application id onto a stable port inside `[start, end]`.
///
/// Uses the classic 31-multiplier string hash over UTF-16 code units with
/// 32-bit wrapping, so the same id always lands on the same port.
#[must_use]
pub fn calc_port(app_id: &str, start: u16, end: u16) -> u16 {
    let (start, end) = if end < start { (end, start) } else { (start, end) };
    let hash = app_id
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    let range = u32::from(end - start) + 1;
    let offset = hash.unsigned_abs() % range;
    start + offset as u16
}

#[must_use]
pub fn calc_url(domain: &str, port: u16) -> String {
    let scheme = if domain == "localhost" { "http" } else { "https" };
    format!("{scheme}://{domain}:{port}")
}

/// Renders a `.env` document. Output depends only on `config`.
#[must_use]
pub fn render_env_file(config: &AppEnvConfig) -> String {
    let mut lines = vec![
        format!("# === {} environment (generated by openone) ===", config.app_id),
        String::new(),
        "# --- admin ---".to_string(),
        format!("PORT={}", config.port),
        format!("NEXT_PUBLIC_APP_URL={}", config.url),
        format!("ADMIN_APP_URL={}", config.admin_service_url),
        String::new(),
        "# --- database ---".to_string(),
        format!("DATABASE_URL={}", config.database_url),
        format!("SCHEMA_NAME={}", config.schema_name),
        String::new(),
        "# --- permission ---".to_string(),
        format!("PERMISSION_APP_URL={}", config.permission_service_url),
        String::new(),
        "# --- service discovery ---".to_string(),
        format!("DB_MANAGER_APP_URL={}", config.database_service_url),
    ];

    if !config.custom.is_empty() {
        lines.push(String::new());
        lines.push("# --- custom ---".to_string());
        for (key, value) in &config.custom {
            lines.push(format!("{key}={value}"));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

/// Reads `KEY=value` pairs, skipping blank lines, comments and lines without `=`.
#[must_use]
pub fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter_map(|(key, value)| {
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}
