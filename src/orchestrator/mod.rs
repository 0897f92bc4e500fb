//! Publish pipelines run by the admin service.
//!
//! `lenient` runs at package upload time and never fails once the package
//! parsed. `strict` runs for operator-triggered bundle publishes and halts on
//! the first failing step.

mod lenient;
mod strict;

pub use lenient::{LenientOrchestrator, UploadReport};
pub use strict::{PublishFailure, PublishResult, StrictOrchestrator};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    Skipped,
    Failed,
}

/// Diagnostic record for one pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepRecord {
    pub fn ok(step: &str, detail: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            outcome: StepOutcome::Ok,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(step: &str, detail: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            outcome: StepOutcome::Skipped,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(step: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::warn!("Step {} failed: {}", step, detail);
        Self {
            step: step.to_string(),
            outcome: StepOutcome::Failed,
            detail: Some(detail),
        }
    }
}

pub mod steps {
    pub const ENV: &str = "env";
    pub const PERMISSION_APPLICATION: &str = "permission.application";
    pub const PERMISSION_REGISTER: &str = "permission.register";
    pub const PERMISSION_PUBLISH: &str = "permission.publish";
    pub const DATABASE_SYNC: &str = "database.sync";
    pub const DIRECTORY_REGISTER: &str = "directory.register";
    pub const DB_SCHEMA_LIST: &str = "db.schema.list";
    pub const DB_SCHEMA_CREATE: &str = "db.schema.create";
    pub const DB_SCHEMA_VERSION: &str = "db.schema.version";
    pub const DB_SCHEMA_PUBLISH: &str = "db.schema.publish";
}
