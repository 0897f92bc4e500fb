//! Outbound calls from the admin service to its sibling services.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::signature::SignedHeaders;
use crate::error::{Error, Result};
use crate::registry::{SyncRequest, SyncStatus};
use crate::server::dto::{
    ApplicationCredentials, CreateApplicationRequest, CreateSchemaRequest, CreateVersionRequest,
    PublishPermissionsRequest, PublishVersionRequest, RegisterResponse, SuccessResponse,
    VersionResponse,
};
use crate::server::response::ListResponse;
use crate::types::{DeclaredPermission, LogicalSchema, SchemaVersion};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("request could not be built: {0}")]
    Request(String),
}

impl GatewayError {
    /// Timeouts and connection failures may succeed on a later attempt.
    /// Rejections will not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Transport(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<String>,
}

/// Subset of the schema sync report the orchestrators act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSyncReport {
    pub schema_name: String,
    pub status: SyncStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SyncEnvelope {
    data: RemoteSyncReport,
}

#[derive(Clone)]
pub struct PlatformClient {
    http: Client,
    permission_url: String,
    database_url: String,
    session: Option<String>,
}

impl PlatformClient {
    pub fn new(permission_url: &str, database_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            permission_url: permission_url.trim_end_matches('/').to_string(),
            database_url: database_url.trim_end_matches('/').to_string(),
            session: None,
        })
    }

    /// Returns a client that forwards `token` as the bearer session on every call.
    #[must_use]
    pub fn with_session(&self, token: &str) -> Self {
        Self {
            session: Some(token.to_string()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn permission_url(&self) -> &str {
        &self.permission_url
    }

    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<T> {
        let request = match &self.session {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }

    // Permission service

    pub async fn upsert_application(
        &self,
        key: &str,
        name: &str,
    ) -> GatewayResult<ApplicationCredentials> {
        let url = format!("{}/applications", self.permission_url);
        let body = CreateApplicationRequest {
            key: key.to_string(),
            name: name.to_string(),
        };
        self.send(self.http.post(url).json(&body)).await
    }

    /// Pushes declared permissions through the signed registration endpoint.
    pub async fn register_permissions(
        &self,
        key: &str,
        secret: &str,
        permissions: &[DeclaredPermission],
    ) -> GatewayResult<RegisterResponse> {
        let url = format!("{}/register", self.permission_url);
        let body = serde_json::to_vec(&json!({ "list": permissions }))
            .map_err(|e| GatewayError::Request(e.to_string()))?;
        let signed = SignedHeaders::sign(key, secret, &body, Utc::now().timestamp_millis())
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        for (name, value) in signed.pairs() {
            request = request.header(name, value);
        }
        // Signed calls carry no session.
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn publish_permissions(&self, key: &str) -> GatewayResult<String> {
        let url = format!("{}/publish", self.permission_url);
        let body = PublishPermissionsRequest {
            application_key: key.to_string(),
        };
        let response: VersionResponse = self.send(self.http.post(url).json(&body)).await?;
        Ok(response.version)
    }

    // Database service

    pub async fn database_env(
        &self,
        app_id: &str,
        schema_name: &str,
    ) -> GatewayResult<BTreeMap<String, String>> {
        let url = format!("{}/env", self.database_url);
        let request = self
            .http
            .get(url)
            .query(&[("appId", app_id), ("schemaName", schema_name)]);
        let envelope: Envelope<BTreeMap<String, String>> = self.send(request).await?;
        envelope
            .data
            .ok_or_else(|| GatewayError::Decode(envelope.error.unwrap_or_default()))
    }

    pub async fn sync_schema(&self, request: &SyncRequest) -> GatewayResult<RemoteSyncReport> {
        let url = format!("{}/schemas/sync", self.database_url);
        let envelope: SyncEnvelope = self.send(self.http.post(url).json(request)).await?;
        Ok(envelope.data)
    }

    pub async fn list_schemas(&self, application_key: &str) -> GatewayResult<Vec<LogicalSchema>> {
        let url = format!("{}/schemas", self.database_url);
        let request = self
            .http
            .get(url)
            .query(&[("applicationKey", application_key)]);
        let response: ListResponse<LogicalSchema> = self.send(request).await?;
        Ok(response.list)
    }

    pub async fn create_schema(
        &self,
        application_key: &str,
        name: &str,
    ) -> GatewayResult<LogicalSchema> {
        let url = format!("{}/schemas", self.database_url);
        let body = CreateSchemaRequest {
            application_key: application_key.to_string(),
            name: name.to_string(),
        };
        self.send(self.http.post(url).json(&body)).await
    }

    pub async fn create_schema_version(
        &self,
        schema_id: &str,
        definition: &serde_json::Value,
    ) -> GatewayResult<SchemaVersion> {
        let url = format!("{}/schemas/versions", self.database_url);
        let body = CreateVersionRequest {
            schema_id: schema_id.to_string(),
            definition: definition.clone(),
        };
        self.send(self.http.post(url).json(&body)).await
    }

    pub async fn publish_schema_version(&self, version_id: &str) -> GatewayResult<()> {
        let url = format!("{}/schemas/publish", self.database_url);
        let body = PublishVersionRequest {
            version_id: version_id.to_string(),
        };
        let response: SuccessResponse = self.send(self.http.post(url).json(&body)).await?;
        if !response.is_success {
            return Err(GatewayError::Decode("publish was not acknowledged".to_string()));
        }
        Ok(())
    }
}
