use serde::{Deserialize, Serialize};

use crate::auth::SignedPayload;
use crate::types::{Bundle, RawPermission, SchemaVersion};

// Permission service

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateApplicationRequest {
    pub key: String,
    pub name: String,
}

/// Returned to operators only; the secret never appears in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationCredentials {
    pub key: String,
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub list: Vec<RawPermission>,
}

impl SignedPayload for RegisterRequest {
    fn validate(&self) -> Result<(), String> {
        if self.list.is_empty() {
            return Err("list must contain at least one permission".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub is_success: bool,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationKeyParams {
    pub application_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetEnabledRequest {
    pub code: String,
    pub is_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPermissionsRequest {
    pub application_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    pub application_key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Permission codes to grant; a bare `resource:action` gets the application prefix.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Absent fields keep their stored value.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRolesParams {
    #[serde(default)]
    pub application_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdParams {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRolesRequest {
    pub user_id: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignRolesResponse {
    pub assigned: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSetParams {
    pub application_key: String,
    pub user_id: String,
}

// Database service

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSchemasParams {
    #[serde(default)]
    pub application_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchemaRequest {
    pub application_key: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionRequest {
    pub schema_id: String,
    pub definition: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaIdParams {
    pub schema_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishVersionRequest {
    pub version_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    pub is_success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentVersionResponse {
    pub current: Option<SchemaVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvParams {
    pub app_id: String,
    #[serde(default)]
    pub schema_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

// Admin service

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredBundle {
    pub id: String,
    pub bundle: Bundle,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertAppRequest {
    pub app_id: String,
    pub app_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub menus: serde_json::Value,
}
