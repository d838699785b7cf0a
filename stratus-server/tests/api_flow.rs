//! HTTP-level flows through the full router: the emulator as an SDK
//! would see it.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use stratus_blob::BlobStore;
use stratus_compute::{ComputeService, NetworkSettings};
use stratus_core::Config;
use stratus_db::Database;
use stratus_iam::{IamService, seed_predefined_roles};
use stratus_object::StorageService;
use stratus_runtime::FakeRuntime;
use stratus_server::{AppState, app};
use tower::util::ServiceExt;

async fn test_app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    let db = Database::in_memory().await.unwrap();
    let blobs = BlobStore::open(dir.path()).await.unwrap();
    seed_predefined_roles(&db).await.unwrap();

    let storage = StorageService::new(db.clone(), blobs);
    let iam = IamService::new(db.clone());
    let compute = ComputeService::new(
        db,
        Arc::new(FakeRuntime::new()),
        NetworkSettings::from_config(&config).unwrap(),
    );
    let state = AppState::new(config, "http://localhost:8080", storage, iam, compute);
    (dir, app(state))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, body)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn media_upload_then_download_matches_the_wire_contract() {
    let (_dir, app) = test_app().await;

    let (status, _) = send_json(
        &app,
        post_json("/storage/v1/b?project=p", json!({ "name": "demo" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // PUT-style media upload with literal known content.
    let upload = Request::builder()
        .method("POST")
        .uri("/upload/storage/v1/b/demo/o?uploadType=media&name=hello.txt")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hi\n"))
        .unwrap();
    let (status, doc) = send_json(&app, upload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["kind"], "storage#object");
    assert_eq!(doc["generation"], "1");
    assert_eq!(doc["size"], "3");
    assert_eq!(doc["etag"], "\"b1946ac92492d2347c6235b4d2611184\"");

    let (status, body) = send(&app, get("/storage/v1/b/demo/o/hello.txt?alt=media")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hi\n");

    let response = app
        .clone()
        .oneshot(get("/storage/v1/b/demo/o/hello.txt?alt=media"))
        .await
        .unwrap();
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(response.headers()[header::ETAG], "\"b1946ac92492d2347c6235b4d2611184\"");
    assert_eq!(response.headers()["x-goog-generation"], "1");
}

#[tokio::test]
async fn guarded_reupload_returns_412() {
    let (_dir, app) = test_app().await;
    send_json(&app, post_json("/storage/v1/b?project=p", json!({ "name": "demo" }))).await;

    let upload = |body: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/upload/storage/v1/b/demo/o?uploadType=media&name=once.txt&ifGenerationMatch=0")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(body))
            .unwrap()
    };
    let (status, _) = send_json(&app, upload("first")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, doc) = send_json(&app, upload("second")).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(doc["error"]["errors"][0]["reason"], "conditionNotMet");
}

#[tokio::test]
async fn range_request_returns_206_with_content_range() {
    let (_dir, app) = test_app().await;
    send_json(&app, post_json("/storage/v1/b?project=p", json!({ "name": "demo" }))).await;
    let upload = Request::builder()
        .method("POST")
        .uri("/upload/storage/v1/b/demo/o?uploadType=media&name=digits")
        .body(Body::from("0123456789"))
        .unwrap();
    send_json(&app, upload).await;

    let request = Request::builder()
        .uri("/storage/v1/b/demo/o/digits?alt=media")
        .header(header::RANGE, "bytes=2-5")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"2345");
}

#[tokio::test]
async fn multipart_upload_carries_metadata_and_media() {
    let (_dir, app) = test_app().await;
    send_json(&app, post_json("/storage/v1/b?project=p", json!({ "name": "demo" }))).await;

    let body = "--boundary42\r\nContent-Type: application/json\r\n\r\n{\"name\":\"notes.txt\",\"contentType\":\"text/plain\"}\r\n--boundary42\r\nContent-Type: text/plain\r\n\r\nmultipart body\r\n--boundary42--";
    let request = Request::builder()
        .method("POST")
        .uri("/upload/storage/v1/b/demo/o?uploadType=multipart")
        .header(header::CONTENT_TYPE, "multipart/related; boundary=boundary42")
        .body(Body::from(body))
        .unwrap();
    let (status, doc) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["name"], "notes.txt");
    assert_eq!(doc["contentType"], "text/plain");

    let (_, bytes) = send(&app, get("/storage/v1/b/demo/o/notes.txt?alt=media")).await;
    assert_eq!(bytes, b"multipart body");
}

#[tokio::test]
async fn resumable_upload_via_http_chunks() {
    let (_dir, app) = test_app().await;
    send_json(&app, post_json("/storage/v1/b?project=p", json!({ "name": "demo" }))).await;

    let initiate = Request::builder()
        .method("POST")
        .uri("/upload/storage/v1/b/demo/o?uploadType=resumable")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-upload-content-length", "11")
        .body(Body::from(json!({ "name": "big.bin" }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(initiate).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    let session_path = location.strip_prefix("http://localhost:8080").unwrap().to_string();

    let chunk = |range: &'static str, data: &'static str| {
        Request::builder()
            .method("PUT")
            .uri(session_path.clone())
            .header(header::CONTENT_RANGE, range)
            .body(Body::from(data))
            .unwrap()
    };

    let response = app.clone().oneshot(chunk("bytes 0-5/11", "hello ")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()[header::RANGE], "bytes=0-5");

    // Wrong offset: 308 again, offset unchanged.
    let response = app.clone().oneshot(chunk("bytes 0-5/11", "hello ")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers()[header::RANGE], "bytes=0-5");

    let (status, doc) = send_json(&app, chunk("bytes 6-10/11", "world")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["size"], "11");

    let (_, bytes) = send(&app, get("/storage/v1/b/demo/o/big.bin?alt=media")).await;
    assert_eq!(bytes, b"hello world");
}

#[tokio::test]
async fn signed_url_round_trip_over_http() {
    let (_dir, app) = test_app().await;
    send_json(&app, post_json("/storage/v1/b?project=p", json!({ "name": "demo" }))).await;
    let upload = Request::builder()
        .method("POST")
        .uri("/upload/storage/v1/b/demo/o?uploadType=media&name=doc")
        .body(Body::from("signed content"))
        .unwrap();
    send_json(&app, upload).await;

    let (status, doc) = send_json(
        &app,
        post_json("/storage/v1/b/demo/o/doc/signUrl", json!({ "method": "GET", "ttlSeconds": 300 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = doc["url"].as_str().unwrap();
    let path = url.strip_prefix("http://localhost:8080").unwrap();

    let (status, bytes) = send(&app, get(path)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"signed content");

    // Wrong method on the same token.
    let delete = Request::builder().method("DELETE").uri(path).body(Body::empty()).unwrap();
    let (status, _) = send_json(&app, delete).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Garbage token.
    let (status, _) = send(&app, get("/download/storage/v1/b/demo/o/doc?token=deadbeef")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auto_network_aggregated_listing_has_one_subnet_per_region() {
    let (_dir, app) = test_app().await;

    let (status, op) = send_json(
        &app,
        post_json(
            "/compute/v1/projects/p/global/networks",
            json!({ "name": "auto-vpc", "autoCreateSubnetworks": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(op["kind"], "compute#operation");
    assert_eq!(op["status"], "DONE");

    let (status, doc) = send_json(&app, get("/compute/v1/projects/p/aggregated/subnetworks")).await;
    assert_eq!(status, StatusCode::OK);
    let items = doc["items"].as_object().unwrap();
    assert_eq!(items.len(), 16);
    let us_central = &items["regions/us-central1"]["subnetworks"][0];
    assert_eq!(us_central["ipCidrRange"], "10.128.0.0/20");
    assert_eq!(us_central["gatewayAddress"], "10.128.0.1");
    assert!(
        items.values().all(|v| v["subnetworks"][0]["ipCidrRange"]
            .as_str()
            .unwrap()
            .ends_with("/20"))
    );
}

#[tokio::test]
async fn instances_run_and_get_sequential_ips() {
    let (_dir, app) = test_app().await;
    send_json(
        &app,
        post_json(
            "/compute/v1/projects/p/global/networks",
            json!({ "name": "auto-vpc", "autoCreateSubnetworks": true }),
        ),
    )
    .await;

    let instance_body = |name: &str| {
        json!({
            "name": name,
            "machineType": "zones/us-central1-a/machineTypes/e2-micro",
            "disks": [{
                "boot": true,
                "initializeParams": { "sourceImage": "projects/debian-cloud/global/images/family/debian-11" }
            }],
            "networkInterfaces": [{
                "network": "global/networks/auto-vpc",
                "subnetwork": "regions/us-central1/subnetworks/auto-vpc-us-central1"
            }]
        })
    };

    let (status, op) = send_json(
        &app,
        post_json("/compute/v1/projects/p/zones/us-central1-a/instances", instance_body("vm1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(op["status"], "DONE");
    assert!(op.get("error").is_none());

    let (status, doc) =
        send_json(&app, get("/compute/v1/projects/p/zones/us-central1-a/instances/vm1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["status"], "RUNNING");
    assert_eq!(doc["networkInterfaces"][0]["networkIP"], "10.128.0.2");

    send_json(
        &app,
        post_json("/compute/v1/projects/p/zones/us-central1-a/instances", instance_body("vm2")),
    )
    .await;
    let (_, doc) =
        send_json(&app, get("/compute/v1/projects/p/zones/us-central1-a/instances/vm2")).await;
    assert_eq!(doc["networkInterfaces"][0]["networkIP"], "10.128.0.3");

    // Colon-suffix verbs work.
    let (status, op) = send_json(
        &app,
        post_json("/compute/v1/projects/p/zones/us-central1-a/instances/vm1:stop", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(op["operationType"], "stop");
    let (_, doc) =
        send_json(&app, get("/compute/v1/projects/p/zones/us-central1-a/instances/vm1")).await;
    assert_eq!(doc["status"], "TERMINATED");
}

#[tokio::test]
async fn overlapping_subnets_fail_with_subnet_overlap() {
    let (_dir, app) = test_app().await;
    send_json(
        &app,
        post_json(
            "/compute/v1/projects/p/global/networks",
            json!({ "name": "net", "autoCreateSubnetworks": false, "IPv4Range": "10.0.0.0/16" }),
        ),
    )
    .await;

    let (status, _) = send_json(
        &app,
        post_json(
            "/compute/v1/projects/p/regions/us-central1/subnetworks",
            json!({ "name": "sub-a", "network": "net", "ipCidrRange": "10.0.1.0/24" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, doc) = send_json(
        &app,
        post_json(
            "/compute/v1/projects/p/regions/us-central1/subnetworks",
            json!({ "name": "sub-b", "network": "net", "ipCidrRange": "10.0.1.128/25" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(doc["error"]["errors"][0]["reason"], "subnetOverlap");
}

#[tokio::test]
async fn zones_and_machine_types_are_listable() {
    let (_dir, app) = test_app().await;
    let (status, doc) = send_json(&app, get("/compute/v1/projects/p/zones")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["items"].as_array().unwrap().len(), 48);

    let (status, doc) =
        send_json(&app, get("/compute/v1/projects/p/zones/us-central1-a/machineTypes")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["items"].as_array().unwrap().iter().any(|m| m["name"] == "e2-micro"));
}

#[tokio::test]
async fn iam_policy_etag_conflict_over_http() {
    let (_dir, app) = test_app().await;

    let (status, policy) = send_json(&app, post_json("/v1/projects/p:getIamPolicy", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let etag = policy["etag"].as_str().unwrap().to_string();

    let bindings = json!([{ "role": "roles/viewer", "members": ["user:dev@example.com"] }]);
    let (status, updated) = send_json(
        &app,
        post_json(
            "/v1/projects/p:setIamPolicy",
            json!({ "policy": { "bindings": bindings, "etag": etag } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let fresh_etag = updated["etag"].as_str().unwrap().to_string();
    assert_ne!(fresh_etag, etag);

    // Stale etag loses with 409.
    let (status, _) = send_json(
        &app,
        post_json(
            "/v1/projects/p:setIamPolicy",
            json!({ "policy": { "bindings": bindings, "etag": etag } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Fresh etag wins.
    let (status, _) = send_json(
        &app,
        post_json(
            "/v1/projects/p:setIamPolicy",
            json!({ "policy": { "bindings": bindings, "etag": fresh_etag } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn service_accounts_and_keys_over_http() {
    let (_dir, app) = test_app().await;

    let (status, account) = send_json(
        &app,
        post_json(
            "/v1/projects/p/serviceAccounts",
            json!({ "accountId": "build-bot", "serviceAccount": { "displayName": "Build Bot" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["email"], "build-bot@p.iam.gserviceaccount.com");

    let email = account["email"].as_str().unwrap();
    let (status, key) = send_json(
        &app,
        post_json(&format!("/v1/projects/p/serviceAccounts/{email}/keys"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(key["privateKeyData"].as_str().is_some());

    // Listings omit the blob.
    let (_, listed) =
        send_json(&app, get(&format!("/v1/projects/p/serviceAccounts/{email}/keys"))).await;
    assert!(listed["keys"][0].get("privateKeyData").is_none());

    // Disable via the colon verb.
    let (status, doc) = send_json(
        &app,
        post_json(&format!("/v1/projects/p/serviceAccounts/{email}:disable"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["disabled"], true);

    let (status, doc) = send_json(&app, get("/v1/roles")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["roles"].as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn missing_resources_render_the_error_envelope() {
    let (_dir, app) = test_app().await;
    let (status, doc) = send_json(&app, get("/storage/v1/b/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(doc["error"]["code"], 404);
    assert_eq!(doc["error"]["errors"][0]["reason"], "notFound");
    assert!(doc["error"]["message"].as_str().unwrap().contains("missing"));
}
