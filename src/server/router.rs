use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::admin::admin_router;
use super::database::database_router;
use super::permission::permission_router;
use crate::client::PlatformClient;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::provision::SchemaProvisioner;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub provisioner: Arc<dyn SchemaProvisioner>,
    pub config: ServerConfig,
    /// Client the admin service uses to reach the permission and database services.
    pub client: PlatformClient,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        provisioner: Arc<dyn SchemaProvisioner>,
        config: ServerConfig,
    ) -> Result<Self> {
        let client = PlatformClient::new(
            &config.permission_url(),
            &config.database_url(),
            Duration::from_secs(config.outbound_timeout_secs),
        )?;
        Ok(Self {
            store,
            provisioner,
            config,
            client,
        })
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/permission", permission_router())
        .nest("/api/v1/database", database_router())
        .nest("/api/v1/admin", admin_router())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::TokenGenerator;
    use crate::provision::SqliteProvisioner;
    use crate::store::{SqliteStore, Store};
    use crate::types::{Operator, Session};

    fn seed_session(store: &SqliteStore) -> String {
        let operator = Operator {
            id: "op-1".to_string(),
            name: "admin".to_string(),
            created_at: chrono::Utc::now(),
        };
        store.create_operator(&operator).unwrap();
        let (raw, lookup, hash) = TokenGenerator::new().generate().unwrap();
        store
            .create_session(&Session {
                id: "session-1".to_string(),
                token_hash: hash,
                token_lookup: lookup,
                operator_id: operator.id,
                created_at: chrono::Utc::now(),
                expires_at: None,
                last_used_at: None,
            })
            .unwrap();
        raw
    }

    fn test_router(temp: &TempDir) -> Router {
        test_router_with_session(temp).0
    }

    fn test_router_with_session(temp: &TempDir) -> (Router, String) {
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let token = seed_session(&store);
        let config = ServerConfig {
            data_dir: temp.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let provisioner = SqliteProvisioner::new(config.schemas_dir());
        let state = AppState::new(Arc::new(store), Arc::new(provisioner), config).unwrap();
        (create_router(Arc::new(state)), token)
    }

    #[tokio::test]
    async fn test_health() {
        let temp = TempDir::new().unwrap();
        let response = test_router(&temp)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_requires_session() {
        let temp = TempDir::new().unwrap();
        let response = test_router(&temp)
            .oneshot(Request::get("/api/v1/admin/apps").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn test_register_requires_signature() {
        let temp = TempDir::new().unwrap();
        let request = Request::post("/api/v1/permission/register")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"list":[{"code":"crm:a","name":"A"}]}"#))
            .unwrap();
        let response = test_router(&temp).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_database_env_is_public() {
        let temp = TempDir::new().unwrap();
        let response = test_router(&temp)
            .oneshot(
                Request::get("/api/v1/database/env?appId=order-mgmt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (router, token) = test_router_with_session(&temp);

        let boundary = "openone-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"migration\"; filename=\"0001.sql\"\r\n\r\n"
        )
        .into_bytes();
        body.extend(vec![b'-'; crate::server::admin::MAX_UPLOAD_SIZE + 1]);
        body.extend(format!("\r\n--{boundary}--\r\n").into_bytes());

        let request = Request::post("/api/v1/admin/apps/upload")
            .header("authorization", format!("Bearer {token}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
