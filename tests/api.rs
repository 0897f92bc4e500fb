mod common;

use chrono::Utc;
use openone::auth::signature::SignedHeaders;
use reqwest::{Client, StatusCode, multipart};
use serde_json::{Value, json};

use common::TestServer;

async fn create_application(server: &TestServer, key: &str) -> String {
    let resp: Value = Client::new()
        .post(server.url("/permission/applications"))
        .bearer_auth(&server.session_token)
        .json(&json!({"key": key, "name": key.to_uppercase()}))
        .send()
        .await
        .expect("create application")
        .json()
        .await
        .expect("parse application response");
    resp["secret"].as_str().expect("application secret").to_string()
}

async fn send_signed(
    server: &TestServer,
    headers: &SignedHeaders,
    body: &[u8],
) -> reqwest::Response {
    let mut request = Client::new()
        .post(server.url("/permission/register"))
        .header("content-type", "application/json")
        .body(body.to_vec());
    for (name, value) in headers.pairs() {
        request = request.header(name, value);
    }
    request.send().await.expect("send signed request")
}

#[tokio::test]
async fn signed_registration_enforces_namespace_and_freshness() {
    let server = TestServer::start().await;
    let secret = create_application(&server, "crm").await;
    let now = Utc::now().timestamp_millis();

    let body = serde_json::to_vec(&json!({"list": [
        {"code": "crm:customer:read", "name": "Read customers"},
        {"code": "hr:salary:read", "name": "Foreign"},
        {"code": "crm:incomplete"},
    ]}))
    .unwrap();
    let headers = SignedHeaders::sign("crm", &secret, &body, now).unwrap();

    let resp = send_signed(&server, &headers, &body).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let result: Value = resp.json().await.unwrap();
    assert_eq!(result["isSuccess"], true);
    assert_eq!(result["count"], 1);

    // Same nonce again
    let resp = send_signed(&server, &headers, &body).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let stale = SignedHeaders::sign("crm", &secret, &body, now - 10 * 60 * 1000).unwrap();
    let resp = send_signed(&server, &stale, &body).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let forged = SignedHeaders::sign("crm", "not-the-secret", &body, now).unwrap();
    let resp = send_signed(&server, &forged, &body).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let unknown = SignedHeaders::sign("nobody", &secret, &body, now).unwrap();
    let resp = send_signed(&server, &unknown, &body).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let foreign = serde_json::to_vec(&json!({"list": [{"code": "hr:x", "name": "X"}]})).unwrap();
    let headers = SignedHeaders::sign("crm", &secret, &foreign, now).unwrap();
    let resp = send_signed(&server, &headers, &foreign).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let empty = serde_json::to_vec(&json!({"list": []})).unwrap();
    let headers = SignedHeaders::sign("crm", &secret, &empty, now).unwrap();
    let resp = send_signed(&server, &headers, &empty).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let catalog: Value = Client::new()
        .get(server.url("/permission/permissions?applicationKey=crm"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let list = catalog["list"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["code"], "crm:customer:read");
    assert_eq!(list[0]["isEnabled"], true);
}

#[tokio::test]
async fn permission_versions_increase_by_one() {
    let server = TestServer::start().await;
    create_application(&server, "crm").await;
    let client = Client::new();

    let mut versions = Vec::new();
    for _ in 0..3 {
        let resp = client
            .post(server.url("/permission/publish"))
            .bearer_auth(&server.session_token)
            .json(&json!({"applicationKey": "crm"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.unwrap();
        versions.push(body["version"].as_str().unwrap().to_string());
    }
    assert_eq!(versions, ["1", "2", "3"]);

    let current: Value = client
        .get(server.url("/permission/version?applicationKey=crm"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["version"], "3");
}

#[tokio::test]
async fn roles_drive_the_permission_set() {
    let server = TestServer::start().await;
    let secret = create_application(&server, "crm").await;
    let client = Client::new();
    let token = &server.session_token;

    let body = serde_json::to_vec(&json!({"list": [
        {"code": "crm:customer:read", "name": "Read customers"},
        {"code": "crm:customer:write", "name": "Write customers"},
    ]}))
    .unwrap();
    let headers = SignedHeaders::sign("crm", &secret, &body, Utc::now().timestamp_millis()).unwrap();
    assert_eq!(send_signed(&server, &headers, &body).await.status(), StatusCode::OK);

    let resp = client
        .post(server.url("/permission/publish"))
        .bearer_auth(token)
        .json(&json!({"applicationKey": "crm"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = client
        .post(server.url("/permission/roles"))
        .bearer_auth(token)
        .json(&json!({"applicationKey": "crm", "name": "Sales", "permissions": ["customer:read", "crm:customer:write"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let role: Value = resp.json().await.unwrap();
    let role_id = role["id"].as_str().unwrap().to_string();
    assert_eq!(role["permissions"], json!(["crm:customer:read", "crm:customer:write"]));

    let resp = client
        .post(server.url("/permission/roles"))
        .bearer_auth(token)
        .json(&json!({"applicationKey": "crm", "name": "Ghost", "permissions": ["customer:delete"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(server.url("/permission/roles"))
        .bearer_auth(token)
        .json(&json!({"applicationKey": "crm", "name": "Sales"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = client
        .put(server.url("/permission/user-roles"))
        .bearer_auth(token)
        .json(&json!({"userId": "alice", "roleIds": [role_id]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let assigned: Value = resp.json().await.unwrap();
    assert_eq!(assigned["assigned"], 1);

    let resp = client
        .put(server.url("/permission/user-roles"))
        .bearer_auth(token)
        .json(&json!({"userId": "alice", "roleIds": ["missing"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let permission_set = |user: &'static str| {
        client
            .get(server.url(&format!(
                "/permission/permission-set?applicationKey=crm&userId={user}"
            )))
            .bearer_auth(token)
            .send()
    };

    let set: Value = permission_set("alice").await.unwrap().json().await.unwrap();
    assert_eq!(
        set,
        json!({"version": "1", "codes": ["crm:customer:read", "crm:customer:write"]})
    );
    let set: Value = permission_set("bob").await.unwrap().json().await.unwrap();
    assert_eq!(set, json!({"version": "1", "codes": []}));

    let resp = client
        .patch(server.url("/permission/permissions/enable"))
        .bearer_auth(token)
        .json(&json!({"code": "crm:customer:write", "isEnabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let set: Value = permission_set("alice").await.unwrap().json().await.unwrap();
    assert_eq!(set["codes"], json!(["crm:customer:read"]));

    let resp = client
        .put(server.url(&format!("/permission/roles/{role_id}")))
        .bearer_auth(token)
        .json(&json!({"name": "Sales team", "permissions": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let roles: Value = client
        .get(server.url("/permission/user-roles?userId=alice"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(roles["list"][0]["name"], "Sales team");
    assert_eq!(roles["list"][0]["permissions"], json!([]));

    let resp = client
        .delete(server.url(&format!("/permission/roles/{role_id}")))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(server.url(&format!("/permission/roles/{role_id}")))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .get(server.url("/permission/permission-set?applicationKey=crm&userId=alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn schema_sync_applies_only_pending_migrations() {
    let server = TestServer::start().await;
    let client = Client::new();
    let request = json!({
        "appId": "order-mgmt",
        "appName": "Orders",
        "schemaName": "order_mgmt",
        "migrations": [
            {"filename": "0001_init.sql", "content": "CREATE TABLE orders (id INTEGER PRIMARY KEY);"},
            {"filename": "0002_broken.sql", "content": "THIS IS NOT SQL;"},
            {"filename": "0003_items.sql", "content": "CREATE TABLE items (id INTEGER PRIMARY KEY);"},
        ],
    });

    let resp = client
        .post(server.url("/database/schemas/sync"))
        .bearer_auth(&server.session_token)
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "success");
    let statuses: Vec<&str> = body["data"]["migrations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, ["applied", "failed", "applied"]);

    let body: Value = client
        .post(server.url("/database/schemas/sync"))
        .bearer_auth(&server.session_token)
        .json(&request)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let statuses: Vec<&str> = body["data"]["migrations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, ["skipped", "skipped", "skipped"]);

    let registry: Value = client
        .get(server.url("/database/schemas/registry"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(registry["list"][0]["status"], "active");
    assert_eq!(registry["list"][0]["schemaName"], "order_mgmt");

    let history: Value = client
        .get(server.url("/database/schemas/registry/order-mgmt/history"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["list"].as_array().unwrap().len(), 3);

    let env: Value = client
        .get(server.url("/database/env?appId=order-mgmt&schemaName=ignored"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(env["data"]["SCHEMA_NAME"], "order_mgmt");
    assert!(
        env["data"]["DATABASE_URL"]
            .as_str()
            .unwrap()
            .starts_with("sqlite://")
    );
}

#[tokio::test]
async fn schema_sync_requires_session() {
    let server = TestServer::start().await;
    let resp = Client::new()
        .post(server.url("/database/schemas/sync"))
        .json(&json!({"appId": "crm", "migrations": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logical_schema_keeps_one_published_version() {
    let server = TestServer::start().await;
    let client = Client::new();

    let resp = client
        .post(server.url("/database/schemas"))
        .bearer_auth(&server.session_token)
        .json(&json!({"applicationKey": "crm", "name": "customers"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let schema: Value = resp.json().await.unwrap();
    let schema_id = schema["id"].as_str().unwrap().to_string();

    let mut version_ids = Vec::new();
    for n in 1..=2 {
        let version: Value = client
            .post(server.url("/database/schemas/versions"))
            .bearer_auth(&server.session_token)
            .json(&json!({"schemaId": schema_id, "definition": {"revision": n}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(version["number"], n);
        assert_eq!(version["status"], "draft");
        version_ids.push(version["id"].as_str().unwrap().to_string());
    }

    for id in &version_ids {
        let resp = client
            .post(server.url("/database/schemas/publish"))
            .bearer_auth(&server.session_token)
            .json(&json!({"versionId": id}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let versions: Value = client
        .get(server.url(&format!("/database/schemas/versions?schemaId={schema_id}")))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let published: Vec<&Value> = versions["list"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|v| v["status"] == "published")
        .collect();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["number"], 2);

    let current: Value = client
        .get(server.url(&format!("/database/schemas/current?schemaId={schema_id}")))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["current"]["number"], 2);

    let resp = client
        .post(server.url("/database/schemas/publish"))
        .bearer_auth(&server.session_token)
        .json(&json!({"versionId": "missing"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

fn package_form() -> multipart::Form {
    let config = json!({
        "appId": "order-mgmt",
        "appName": "Orders",
        "version": "1.2.0",
        "permissions": [{"code": "order:read", "name": "Read orders"}],
        "database": {"schemaName": "order-mgmt"},
        "menus": [{"title": "Orders", "path": "/orders"}],
    });
    multipart::Form::new()
        .text("config", config.to_string())
        .part(
            "migration",
            multipart::Part::text("CREATE TABLE orders (id INTEGER PRIMARY KEY);")
                .file_name("0001_init.sql"),
        )
}

#[tokio::test]
async fn package_upload_runs_every_step() {
    let server = TestServer::start().await;
    let client = Client::new();

    let resp = client
        .post(server.url("/admin/apps/upload"))
        .bearer_auth(&server.session_token)
        .multipart(package_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let steps = body["data"]["steps"].as_array().unwrap();
    for step in steps {
        assert_eq!(step["outcome"], "ok", "step {} did not succeed", step["step"]);
    }

    let env_file = server.data_dir().join("apps/order-mgmt/1.2.0/.env");
    let env = std::fs::read_to_string(env_file).unwrap();
    assert!(env.contains("SCHEMA_NAME=order_mgmt"));

    let apps: Value = client
        .get(server.url("/admin/apps"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(apps["list"][0]["appId"], "order-mgmt");
    assert_eq!(apps["list"][0]["latestVersion"], "1.2.0");

    let catalog: Value = client
        .get(server.url("/permission/permissions?applicationKey=order-mgmt"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(catalog["list"][0]["code"], "order-mgmt:order:read");
}

#[tokio::test]
async fn package_upload_survives_unreachable_database_service() {
    let server =
        TestServer::start_with_config("database_service_url = \"http://127.0.0.1:9\"\n").await;

    let resp = Client::new()
        .post(server.url("/admin/apps/upload"))
        .bearer_auth(&server.session_token)
        .multipart(package_form())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let outcome = |name: &str| {
        body["data"]["steps"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["step"] == name)
            .map(|s| s["outcome"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(outcome("env"), "ok");
    assert_eq!(outcome("permission.register"), "ok");
    assert_eq!(outcome("database.sync"), "failed");
    assert_eq!(outcome("directory.register"), "ok");
}

#[tokio::test]
async fn package_upload_rejects_malformed_config() {
    let server = TestServer::start().await;
    let form = multipart::Form::new().text("config", "{\"appId\": \"x\"}");
    let resp = Client::new()
        .post(server.url("/admin/apps/upload"))
        .bearer_auth(&server.session_token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

async fn create_bundle(server: &TestServer) -> String {
    let resp = Client::new()
        .post(server.url("/admin/bundles"))
        .bearer_auth(&server.session_token)
        .json(&json!({
            "applicationKey": "hr",
            "name": "HR",
            "permissions": [
                {"code": "leave:approve", "name": "Approve leave"},
                {"code": "  "},
            ],
            "schema": {"name": "hr-main", "definition": {"tables": ["leave"]}},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["bundle"]["permissions"].as_array().unwrap().len(), 1);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn bundle_publish_completes_and_records_result() {
    let server = TestServer::start().await;
    let client = Client::new();
    let id = create_bundle(&server).await;

    let resp = client
        .get(server.url(&format!("/admin/bundles/{id}/result")))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .post(server.url(&format!("/admin/bundles/{id}/publish")))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["permissionVersion"], "1");
    assert_eq!(body["data"]["schemaVersion"]["status"], "draft");

    let current: Value = client
        .get(server.url(&format!(
            "/database/schemas/current?schemaId={}",
            body["data"]["schemaId"].as_str().unwrap()
        )))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(current["current"]["number"], 1);
    assert_eq!(current["current"]["status"], "published");

    let result: Value = client
        .get(server.url(&format!("/admin/bundles/{id}/result")))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["data"]["status"], "success");

    // Publishing again reuses the logical schema and adds version 2
    let body: Value = client
        .post(server.url(&format!("/admin/bundles/{id}/publish")))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["permissionVersion"], "2");
    assert_eq!(body["data"]["schemaVersion"]["number"], 2);

    let schemas: Value = client
        .get(server.url("/database/schemas?applicationKey=hr"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(schemas["list"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bundle_publish_halts_at_failing_step() {
    let server =
        TestServer::start_with_config("database_service_url = \"http://127.0.0.1:9\"\n").await;
    let client = Client::new();
    let id = create_bundle(&server).await;

    let resp = client
        .post(server.url(&format!("/admin/bundles/{id}/publish")))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["step"], "db.schema.list");
    assert!(body["error"].is_string());

    let result_file = server
        .data_dir()
        .join("uploads")
        .join(format!("{id}.result.json"));
    let recorded: Value = serde_json::from_slice(&std::fs::read(result_file).unwrap()).unwrap();
    assert_eq!(recorded["status"], "failed");
    assert_eq!(recorded["step"], "db.schema.list");
    assert_eq!(recorded["steps"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_bundle_is_not_found() {
    let server = TestServer::start().await;
    let resp = Client::new()
        .post(server.url("/admin/bundles/../../etc/publish"))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = Client::new()
        .post(server.url(&format!("/admin/bundles/{}/publish", uuid::Uuid::new_v4())))
        .bearer_auth(&server.session_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
