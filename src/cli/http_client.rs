use std::time::Duration;

use reqwest::blocking::{Client, Response, multipart};
use serde::{Deserialize, de::DeserializeOwned};

use crate::orchestrator::UploadReport;
use crate::types::MigrationFile;

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(server_url: &str, token: &str) -> anyhow::Result<Self> {
        // Uploads wait for the whole publish pipeline.
        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;
        Ok(Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn upload_package(
        &self,
        config: &str,
        migrations: &[MigrationFile],
    ) -> anyhow::Result<UploadReport> {
        let url = format!("{}/api/v1/admin/apps/upload", self.base_url);

        let mut form = multipart::Form::new().text("config", config.to_string());
        for migration in migrations {
            let part = multipart::Part::text(migration.content.clone())
                .file_name(migration.filename.clone())
                .mime_str("application/sql")?;
            form = form.part("migration", part);
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()?;
        self.handle_response(resp)
    }

    fn handle_response<T: DeserializeOwned>(&self, resp: Response) -> anyhow::Result<T> {
        let status = resp.status();
        let api_resp: ApiResponse<T> = resp.json()?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(api_resp.error.unwrap_or_else(|| {
                format!("Server error {status} (no details provided)")
            })));
        }
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("Server returned an empty response"))
    }
}
