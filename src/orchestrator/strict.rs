use serde::{Deserialize, Serialize};

use super::StepRecord;
use super::steps;
use crate::client::{GatewayError, PlatformClient};
use crate::types::{Bundle, DeclaredPermission, SchemaVersion, normalize_code};

/// Outcome of a bundle publish that ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub application_key: String,
    pub permission_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<SchemaVersion>,
    pub steps: Vec<StepRecord>,
}

/// The step a bundle publish stopped at, along with what the sibling said.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishFailure {
    pub step: String,
    pub error: String,
    /// HTTP status when the sibling answered with a rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub retryable: bool,
    /// Steps that completed before the failure.
    pub steps: Vec<StepRecord>,
}

impl PublishFailure {
    fn new(step: &str, error: &GatewayError, steps: Vec<StepRecord>) -> Self {
        tracing::warn!("Bundle publish halted at {}: {}", step, error);
        let http_status = match error {
            GatewayError::Rejected { status, .. } => Some(*status),
            _ => None,
        };
        Self {
            step: step.to_string(),
            error: error.to_string(),
            http_status,
            retryable: error.is_retryable(),
            steps,
        }
    }
}

/// Ordered pipeline that stops at the first failing sibling call.
pub struct StrictOrchestrator {
    client: PlatformClient,
}

impl StrictOrchestrator {
    pub fn new(client: PlatformClient) -> Self {
        Self { client }
    }

    pub async fn publish(&self, bundle: &Bundle) -> Result<PublishResult, PublishFailure> {
        let key = bundle.application_key.as_str();
        let mut done = Vec::new();

        let credentials = match self.client.upsert_application(key, &bundle.name).await {
            Ok(credentials) => credentials,
            Err(e) => return Err(PublishFailure::new(steps::PERMISSION_APPLICATION, &e, done)),
        };
        done.push(StepRecord::ok(steps::PERMISSION_APPLICATION, key));

        let permissions: Vec<DeclaredPermission> = bundle
            .permissions
            .iter()
            .map(|p| DeclaredPermission {
                code: normalize_code(key, &p.code),
                name: p.name.clone(),
            })
            .collect();

        if permissions.is_empty() {
            done.push(StepRecord::skipped(
                steps::PERMISSION_REGISTER,
                "no permissions declared",
            ));
        } else {
            match self
                .client
                .register_permissions(key, &credentials.secret, &permissions)
                .await
            {
                Ok(response) => done.push(StepRecord::ok(
                    steps::PERMISSION_REGISTER,
                    format!("{} permission(s) registered", response.count),
                )),
                Err(e) => return Err(PublishFailure::new(steps::PERMISSION_REGISTER, &e, done)),
            }
        }

        let permission_version = match self.client.publish_permissions(key).await {
            Ok(version) => version,
            Err(e) => return Err(PublishFailure::new(steps::PERMISSION_PUBLISH, &e, done)),
        };
        done.push(StepRecord::ok(steps::PERMISSION_PUBLISH, &permission_version));

        let Some(schema) = &bundle.schema else {
            done.push(StepRecord::skipped(steps::DB_SCHEMA_LIST, "no schema declared"));
            return Ok(PublishResult {
                application_key: key.to_string(),
                permission_version,
                schema_id: None,
                schema_version: None,
                steps: done,
            });
        };

        let existing = match self.client.list_schemas(key).await {
            Ok(list) => list.into_iter().find(|s| s.name == schema.name),
            Err(e) => return Err(PublishFailure::new(steps::DB_SCHEMA_LIST, &e, done)),
        };

        let schema_id = match existing {
            Some(found) => {
                done.push(StepRecord::ok(steps::DB_SCHEMA_LIST, &found.id));
                found.id
            }
            None => {
                done.push(StepRecord::ok(steps::DB_SCHEMA_LIST, "not found"));
                match self.client.create_schema(key, &schema.name).await {
                    Ok(created) => {
                        done.push(StepRecord::ok(steps::DB_SCHEMA_CREATE, &created.id));
                        created.id
                    }
                    Err(e) => return Err(PublishFailure::new(steps::DB_SCHEMA_CREATE, &e, done)),
                }
            }
        };

        let version = match self
            .client
            .create_schema_version(&schema_id, &schema.definition)
            .await
        {
            Ok(version) => version,
            Err(e) => return Err(PublishFailure::new(steps::DB_SCHEMA_VERSION, &e, done)),
        };
        done.push(StepRecord::ok(
            steps::DB_SCHEMA_VERSION,
            format!("version {}", version.number),
        ));

        if let Err(e) = self.client.publish_schema_version(&version.id).await {
            return Err(PublishFailure::new(steps::DB_SCHEMA_PUBLISH, &e, done));
        }
        done.push(StepRecord::ok(steps::DB_SCHEMA_PUBLISH, &version.id));

        Ok(PublishResult {
            application_key: key.to_string(),
            permission_version,
            schema_id: Some(schema_id),
            schema_version: Some(version),
            steps: done,
        })
    }
}
