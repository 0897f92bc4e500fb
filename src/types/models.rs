use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A human operator allowed to drive the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub operator_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Identity an application signs its permission registrations with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub key: String,
    pub name: String,
    #[serde(skip)]
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDefinition {
    pub code: String,
    pub name: String,
    pub application_key: String,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionVersion {
    pub id: String,
    pub application_key: String,
    pub number: i64,
    pub created_at: DateTime<Utc>,
}

/// A named bundle of permission codes inside one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub application_key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Granted permission codes, sorted.
    #[serde(default)]
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// What a user may do in one application, tagged with the permission version
/// it was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub version: String,
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaStatus {
    Creating,
    Migrating,
    Active,
    Archived,
}

impl SchemaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaStatus::Creating => "creating",
            SchemaStatus::Migrating => "migrating",
            SchemaStatus::Active => "active",
            SchemaStatus::Archived => "archived",
        }
    }

    /// Whether the provisioning pipeline may move a registry row from `self` to `next`.
    /// `active -> archived` is deliberately absent: deletion happens outside the pipeline.
    #[must_use]
    pub fn can_transition_to(self, next: SchemaStatus) -> bool {
        use SchemaStatus::*;
        matches!(
            (self, next),
            (Creating, Migrating)
                | (Creating, Archived)
                | (Migrating, Migrating)
                | (Migrating, Active)
                | (Migrating, Archived)
                | (Active, Migrating)
                | (Archived, Migrating)
        )
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(SchemaStatus::Creating),
            "migrating" => Ok(SchemaStatus::Migrating),
            "active" => Ok(SchemaStatus::Active),
            "archived" => Ok(SchemaStatus::Archived),
            other => Err(Error::BadRequest(format!("unknown schema status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRegistryEntry {
    pub id: i64,
    pub app_id: String,
    pub schema_name: String,
    pub status: SchemaStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attempted migration file. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub id: i64,
    pub app_id: String,
    pub filename: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalSchema {
    pub id: String,
    pub application_key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Draft,
    Published,
    Archived,
}

impl VersionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionStatus::Draft => "draft",
            VersionStatus::Published => "published",
            VersionStatus::Archived => "archived",
        }
    }
}

impl FromStr for VersionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(VersionStatus::Draft),
            "published" => Ok(VersionStatus::Published),
            "archived" => Ok(VersionStatus::Archived),
            other => Err(Error::BadRequest(format!("unknown version status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    pub id: String,
    pub schema_id: String,
    pub number: i64,
    pub status: VersionStatus,
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Entry in the admin-side application directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub app_id: String,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub menus: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
