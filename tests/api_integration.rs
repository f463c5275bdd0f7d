use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use ipscope::lookup::{AccountInfo, HostLookup, LookupError, RawHostData};
use ipscope::server::{router, AppState};
use ipscope::storage::Database;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tower::ServiceExt;

const KEY: &str = "valid-key";

/// Lookup stand-in with fixed answers
struct StubLookup {
    hosts: HashMap<String, Vec<u16>>,
}

#[async_trait]
impl HostLookup for StubLookup {
    async fn fetch_host(&self, _credential: &str, ip: &str) -> Result<RawHostData, LookupError> {
        let ports = self.hosts.get(ip).cloned().ok_or(LookupError::NotFound)?;
        Ok(RawHostData {
            ip_str: Some(ip.to_string()),
            country_name: Some("United States".to_string()),
            hostnames: Some(vec!["host.example".to_string()]),
            ports: Some(ports),
            vulns: Some(vec!["CVE-2024-0001".to_string()]),
            ..RawHostData::default()
        })
    }

    async fn fetch_account_info(&self, credential: &str) -> Result<AccountInfo, LookupError> {
        if credential == KEY {
            Ok(AccountInfo {
                plan: "dev".to_string(),
                query_credits: Some(100),
                scan_credits: Some(5),
            })
        } else {
            Err(LookupError::Unauthorized("Invalid API key".to_string()))
        }
    }
}

/// Stub lookup that takes a while per host
struct SlowLookup {
    inner: StubLookup,
    delay: Duration,
}

#[async_trait]
impl HostLookup for SlowLookup {
    async fn fetch_host(&self, credential: &str, ip: &str) -> Result<RawHostData, LookupError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_host(credential, ip).await
    }

    async fn fetch_account_info(&self, credential: &str) -> Result<AccountInfo, LookupError> {
        self.inner.fetch_account_info(credential).await
    }
}

fn stub_lookup() -> StubLookup {
    StubLookup {
        hosts: HashMap::from([
            ("8.8.8.8".to_string(), vec![53, 443]),
            ("1.1.1.1".to_string(), vec![80]),
        ]),
    }
}

fn build_app(
    lookup: Arc<dyn HostLookup>,
    default_api_key: Option<&str>,
    pool_size: u32,
) -> (TempDir, Arc<Database>, Router) {
    let temp_dir = TempDir::new().unwrap();
    let database =
        Arc::new(Database::with_pool_size(&temp_dir.path().join("api.db"), pool_size).unwrap());
    let state = AppState::new(
        database.clone(),
        lookup,
        default_api_key.map(str::to_string),
    );
    (temp_dir, database, router(state, true))
}

fn test_app() -> (TempDir, Arc<Database>, Router) {
    build_app(Arc::new(stub_lookup()), None, 4)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

fn post_json(uri: &str, key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Pull (event, data) pairs out of a text/event-stream body
fn parse_sse(body: &[u8]) -> Vec<(String, Value)> {
    let text = String::from_utf8(body.to_vec()).unwrap();
    let mut events = Vec::new();
    for block in text.split("\n\n") {
        let mut name = None;
        let mut data = None;
        for line in block.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                name = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                data = Some(serde_json::from_str::<Value>(value.trim()).unwrap());
            }
        }
        if let (Some(name), Some(data)) = (name, data) {
            events.push((name, data));
        }
    }
    events
}

#[tokio::test]
async fn test_health() {
    let (_dir, _db, app) = test_app();
    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["database"], "connected");
}

#[tokio::test]
async fn test_validate_api_key() {
    let (_dir, _db, app) = test_app();

    let (status, body) = send(
        &app,
        post_json("/api/validate-api-key", None, json!({ "api_key": KEY })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["is_valid"], true);

    let (status, body) = send(
        &app,
        post_json("/api/validate-api-key", None, json!({ "api_key": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["is_valid"], false);

    let (status, _) = send(&app, post_json("/api/validate-api-key", None, json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_info() {
    let (_dir, _db, app) = test_app();

    let request = Request::builder()
        .uri("/api/api-info")
        .header("x-api-key", KEY)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["plan"], "dev");
    assert_eq!(body["query_credits"], 100);

    let request = Request::builder()
        .uri("/api/api-info")
        .header("x-api-key", "wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, get("/api/api-info")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_buffered_all_success() {
    let (_dir, _db, app) = test_app();

    let (status, body) = send(
        &app,
        post_json("/api/ips", Some(KEY), json!({ "ips": "8.8.8.8 1.1.1.1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let records = json_body(&body);
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["ip_address"], "8.8.8.8");
    assert_eq!(records[0]["ports"], json!([53, 443]));
    assert_eq!(records[0]["city"], "N/A");
    assert_eq!(records[0]["hostname"], "host.example");
    assert_eq!(records[0]["vulns"], json!(["CVE-2024-0001"]));
    assert!(records[0]["id"].is_i64());
    assert!(records[0]["last_updated"].is_string());

    let (status, body) = send(&app, get("/api/ips")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_buffered_partial_success() {
    let (_dir, db, app) = test_app();

    let (status, body) = send(
        &app,
        post_json(
            "/api/ips",
            Some(KEY),
            json!({ "ips": "8.8.8.8 not-an-ip 1.1.1.1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);

    let body = json_body(&body);
    assert_eq!(body["enriched_ips"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["errors"],
        json!(["Skipping invalid input: 'not-an-ip' is not a valid IP address."])
    );
    assert_eq!(db.stats().unwrap().host_count, 2);
}

#[tokio::test]
async fn test_buffered_rejects_bad_key_and_empty_input() {
    let (_dir, db, app) = test_app();

    let (status, body) = send(
        &app,
        post_json("/api/ips", Some("wrong"), json!({ "ips": "8.8.8.8" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["error"], "Invalid or missing API key");

    let (status, _) = send(&app, post_json("/api/ips", None, json!({ "ips": "8.8.8.8" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, post_json("/api/ips", Some(KEY), json!({ "ips": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "No IPs provided");

    assert_eq!(db.stats().unwrap().host_count, 0);
}

#[tokio::test]
async fn test_missing_key_wins_over_bad_body() {
    let (_dir, db, app) = test_app();

    // No key, no body, no content type
    let request = Request::builder()
        .method("POST")
        .uri("/api/ips")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["error"], "Invalid or missing API key");

    // No key, malformed JSON, streaming endpoint
    let request = Request::builder()
        .method("POST")
        .uri("/api/ips/stream")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // No key, multipart upload
    let boundary = "ipscopeboundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"ips.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n8.8.8.8\n\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/ips")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(db.stats().unwrap().host_count, 0);
}

#[tokio::test]
async fn test_default_key_does_not_authorize_enrichment() {
    let (_dir, db, app) = build_app(Arc::new(stub_lookup()), Some(KEY), 4);

    for uri in ["/api/ips", "/api/ips/stream"] {
        let (status, _) = send(&app, post_json(uri, None, json!({ "ips": "8.8.8.8" }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{} accepted a request without X-API-Key", uri);
    }
    assert_eq!(db.stats().unwrap().host_count, 0);

    // Account info still falls back to the configured key
    let (status, body) = send(&app, get("/api/api-info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["plan"], "dev");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_answers_during_slow_enrichment() {
    let lookup = Arc::new(SlowLookup {
        inner: stub_lookup(),
        delay: Duration::from_millis(800),
    });
    let (_dir, db, app) = build_app(lookup, None, 1);

    let batch = {
        let app = app.clone();
        tokio::spawn(async move {
            send(
                &app,
                post_json("/api/ips", Some(KEY), json!({ "ips": "8.8.8.8 1.1.1.1" })),
            )
            .await
        })
    };

    // Let the batch reach its first lookup
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let (status, _) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "health check waited {:?} behind the batch",
        started.elapsed()
    );

    let (status, _) = send(&app, get("/api/ips")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = batch.await.unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(db.stats().unwrap().host_count, 2);
}

#[tokio::test]
async fn test_buffered_file_upload() {
    let (_dir, _db, app) = test_app();

    let boundary = "ipscopeboundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"ips.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n8.8.8.8\n\n1.1.1.1\n\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/ips")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header("x-api-key", KEY)
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_resubmission_replaces_record() {
    let (_dir, db, app) = test_app();

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            post_json("/api/ips", Some(KEY), json!({ "ips": "8.8.8.8" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let stats = db.stats().unwrap();
    assert_eq!(stats.host_count, 1);
    assert_eq!(stats.port_count, 2);
}

#[tokio::test]
async fn test_stream_event_order() {
    let (_dir, _db, app) = test_app();

    let (status, body) = send(
        &app,
        post_json(
            "/api/ips/stream",
            Some(KEY),
            json!({ "ips": "8.8.8.8 not-an-ip 9.9.9.9" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = parse_sse(&body);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "processing",
            "enriched",
            "processing",
            "error",
            "processing",
            "error",
            "complete"
        ]
    );

    assert_eq!(events[0].1["ip"], "8.8.8.8");
    assert_eq!(events[1].1["record"]["ip_address"], "8.8.8.8");
    assert_eq!(events[2].1["ip"], "not-an-ip");
    assert_eq!(
        events[5].1["error"],
        "Could not enrich 9.9.9.9: Not found"
    );
    assert_eq!(events[6].1["enriched"], 1);
    assert_eq!(events[6].1["failed"], 2);
    assert!(events.iter().all(|(_, data)| data["timestamp"].is_string()));
}

#[tokio::test]
async fn test_stream_rejects_bad_key_before_streaming() {
    let (_dir, db, app) = test_app();

    let (status, body) = send(
        &app,
        post_json("/api/ips/stream", Some("wrong"), json!({ "ips": "8.8.8.8" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json_body(&body)["error"].is_string());
    assert_eq!(db.stats().unwrap().host_count, 0);
}

#[tokio::test]
async fn test_get_and_delete_one() {
    let (_dir, _db, app) = test_app();

    let (_, body) = send(
        &app,
        post_json("/api/ips", Some(KEY), json!({ "ips": "8.8.8.8" })),
    )
    .await;
    let id = json_body(&body)[0]["id"].as_i64().unwrap();

    let (status, body) = send(&app, get(&format!("/api/ips/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["ip_address"], "8.8.8.8");

    let delete = |id: i64| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/ips/{}", id))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(&app, delete(id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body)["message"],
        "IP address deleted successfully"
    );

    let (status, body) = send(&app, delete(id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"], "IP address not found");

    let (status, _) = send(&app, get(&format!("/api/ips/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_delete() {
    let (_dir, db, app) = test_app();

    let (_, body) = send(
        &app,
        post_json("/api/ips", Some(KEY), json!({ "ips": "8.8.8.8 1.1.1.1" })),
    )
    .await;
    let records = json_body(&body);
    let first = records[0]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        post_json("/api/ips/bulk-delete", None, json!({ "ids": [first] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["deleted_count"], 1);

    let remaining = db.session().unwrap().list_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].ip_address, "1.1.1.1");
    assert_eq!(db.stats().unwrap().port_count, 1);

    let (status, body) = send(
        &app,
        post_json("/api/ips/bulk-delete", None, json!({ "ids": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "No IDs provided");
}

#[tokio::test]
async fn test_bulk_delete_failure_is_generic_500() {
    let (_dir, db, app) = test_app();

    let (_, body) = send(
        &app,
        post_json("/api/ips", Some(KEY), json!({ "ips": "8.8.8.8 1.1.1.1" })),
    )
    .await;
    let ids: Vec<i64> = json_body(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();

    db.get_conn()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER block_delete BEFORE DELETE ON ip_addresses
             WHEN OLD.ip_address = '1.1.1.1'
             BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
        )
        .unwrap();

    let (status, body) = send(
        &app,
        post_json("/api/ips/bulk-delete", None, json!({ "ids": ids })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(&body)["error"],
        "An error occurred while deleting IP addresses"
    );

    let stats = db.stats().unwrap();
    assert_eq!(stats.host_count, 2);
    assert_eq!(stats.port_count, 3);
}
