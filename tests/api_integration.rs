//! End-to-end tests for the HTTP API, run against a live server.

use folio::config::{parse_config, Config};
use folio::server::run_server;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

fn test_config_with_port(tmp: &TempDir, port: u16, static_dir: Option<&Path>) -> Config {
    let root = tmp.path();
    let static_line = static_dir
        .map(|d| format!("static_dir = \"{}\"", d.display()))
        .unwrap_or_default();
    let config_content = format!(
        r#"
[store]
path = "{root}/data/schema.json"

[server]
bind = "127.0.0.1:{port}"
{static_line}

[uploads]
dir = "{root}/uploads"
max_bytes = 1024
allowed_types = ["image/*"]

[contact]
outbox = "{root}/data/contact.jsonl"
"#,
        root = root.display(),
        port = port,
        static_line = static_line
    );
    parse_config(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/api/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server on a free port; returns its base URL.
async fn start_server(tmp: &TempDir) -> (String, tokio::task::JoinHandle<()>) {
    start_server_with(tmp, None).await
}

async fn start_server_with(
    tmp: &TempDir,
    static_dir: Option<&Path>,
) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_free_port();
    let cfg = test_config_with_port(tmp, port, static_dir);
    let handle = tokio::spawn(async move {
        run_server(&cfg).await.ok();
    });
    wait_for_server(port).await;
    (format!("http://127.0.0.1:{}", port), handle)
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;

    let body: Value = reqwest::get(format!("{}/api/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["media"], "local");

    // The server creates the document on startup.
    assert!(tmp.path().join("data").join("schema.json").exists());

    handle.abort();
}

#[tokio::test]
async fn test_project_crud_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    // Create
    let resp = client
        .post(format!("{}/api/projects", base))
        .json(&json!({
            "title": "Log Shipper",
            "description": "Ships logs",
            "technologies": ["Rust"],
            "image": "/uploads/shot.png",
            "customField": 7
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(created["image"], "/uploads/shot.png");
    assert_eq!(created["customField"], 7);
    let created_at = created["createdAt"].clone();

    // Read
    let fetched: Value = client
        .get(format!("{}/api/projects/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["title"], "Log Shipper");

    // Update cannot change id or createdAt
    let resp = client
        .put(format!("{}/api/projects/{}", base, id))
        .json(&json!({ "featured": true, "id": "other", "createdAt": "1999" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["id"], id.as_str());
    assert_eq!(updated["createdAt"], created_at);
    assert_eq!(updated["featured"], true);
    assert_eq!(updated["description"], "Ships logs");

    // Filter
    let featured: Value = client
        .get(format!("{}/api/projects?featured=true", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(featured.as_array().unwrap().len(), 1);

    // Delete, then 404
    let resp = client
        .delete(format!("{}/api/projects/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let deleted: Value = resp.json().await.unwrap();
    assert_eq!(deleted["deleted"]["id"], id.as_str());

    let resp = client
        .get(format!("{}/api/projects/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");

    handle.abort();
}

#[tokio::test]
async fn test_create_validation_and_conflict() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/content", base))
        .json(&json!({ "description": "no title" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/content", base))
        .header("content-type", "application/json")
        .body("{ broken")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");

    let item = json!({ "id": "c1", "title": "Async Rust", "platform": "YouTube" });
    let resp = client
        .post(format!("{}/api/content", base))
        .json(&item)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{}/api/content", base))
        .json(&item)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    handle.abort();
}

#[tokio::test]
async fn test_profile_update() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{}/api/profile", base))
        .json(&json!({ "name": "Ada", "avatar": "me.jpg", "skills": ["Rust"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let profile: Value = client
        .get(format!("{}/api/profile", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["name"], "Ada");
    assert_eq!(profile["avatar"], "/uploads/me.jpg");
    assert!(profile["updatedAt"].is_string());

    handle.abort();
}

#[tokio::test]
async fn test_search_endpoints() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    for body in [
        json!({ "title": "Rust Log Shipper", "technologies": ["Rust"] }),
        json!({ "title": "Recipe Planner", "technologies": ["TypeScript"] }),
    ] {
        client
            .post(format!("{}/api/projects", base))
            .json(&body)
            .send()
            .await
            .unwrap();
    }
    client
        .post(format!("{}/api/content", base))
        .json(&json!({ "title": "Why I like rust", "platform": "Blog" }))
        .send()
        .await
        .unwrap();

    let all: Value = client
        .get(format!("{}/api/search?q=RUST", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["query"], "RUST");
    assert_eq!(all["projects"].as_array().unwrap().len(), 1);
    assert_eq!(all["content"].as_array().unwrap().len(), 1);

    let projects: Value = client
        .get(format!("{}/api/search/projects?q=planner", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(projects[0]["title"], "Recipe Planner");

    let empty: Value = client
        .get(format!("{}/api/search/content", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty, json!([]));

    handle.abort();
}

#[tokio::test]
async fn test_multipart_upload_and_serve() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4];
    let form = reqwest::multipart::Form::new()
        .text("caption", "ignored")
        .part(
            "file",
            reqwest::multipart::Part::bytes(png.clone())
                .file_name("My Logo.PNG")
                .mime_str("image/png")
                .unwrap(),
        );
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    let name = files[0]["name"].as_str().unwrap().to_string();
    let url = files[0]["url"].as_str().unwrap().to_string();
    assert!(name.ends_with("-my-logo.png"), "unexpected name {}", name);
    assert_eq!(url, format!("/uploads/{}", name));
    assert_eq!(files[0]["originalName"], "My Logo.PNG");

    // Served back from the uploads mount
    let served = client
        .get(format!("{}{}", base, url))
        .send()
        .await
        .unwrap();
    assert_eq!(served.status(), 200);
    assert_eq!(served.bytes().await.unwrap().to_vec(), png);

    // Listed
    let listed: Value = client
        .get(format!("{}/api/uploads", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["files"][0]["name"], name.as_str());

    // Deleted
    let resp = client
        .delete(format!("{}/api/upload/{}", base, name))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .delete(format!("{}/api/upload/{}", base, name))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    handle.abort();
}

#[tokio::test]
async fn test_upload_rejections() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    // Disallowed type
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(b"<html></html>".to_vec())
            .file_name("page.html")
            .mime_str("text/html")
            .unwrap(),
    );
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);

    // Over uploads.max_bytes (1024)
    let resp = client
        .post(format!("{}/api/upload/base64", base))
        .json(&json!({
            "filename": "big.png",
            "data": format!("data:image/png;base64,{}", "A".repeat(2000)),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);

    // No file parts at all
    let form = reqwest::multipart::Form::new().text("caption", "nothing");
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let listed: Value = client
        .get(format!("{}/api/uploads", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["files"], json!([]));

    handle.abort();
}

#[tokio::test]
async fn test_base64_upload() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    // "hello" in base64
    let resp = client
        .post(format!("{}/api/upload/base64", base))
        .json(&json!({ "filename": "pic.gif", "data": "data:image/gif;base64,aGVsbG8=" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["files"][0]["contentType"], "image/gif");
    assert_eq!(body["files"][0]["size"], 5);

    handle.abort();
}

#[tokio::test]
async fn test_contact_form() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/contact", base))
        .json(&json!({ "name": "Ada", "email": "not-an-email", "message": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/contact", base))
        .json(&json!({ "name": "Ada", "email": "ada@example.com", "message": "Hello!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["delivery"]["relayed"], false);

    let outbox = std::fs::read_to_string(tmp.path().join("data").join("contact.jsonl")).unwrap();
    assert_eq!(outbox.lines().count(), 1);

    handle.abort();
}

#[tokio::test]
async fn test_chat_disabled() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({ "message": "What do you build?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "chat_disabled");

    handle.abort();
}

#[tokio::test]
async fn test_multipart_rejection_removes_earlier_files() {
    let tmp = TempDir::new().unwrap();
    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(vec![0x89, b'P', b'N', b'G'])
                .file_name("first.png")
                .mime_str("image/png")
                .unwrap(),
        )
        .part(
            "file",
            reqwest::multipart::Part::bytes(b"<html></html>".to_vec())
                .file_name("second.html")
                .mime_str("text/html")
                .unwrap(),
        );
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);

    let listed: Value = client
        .get(format!("{}/api/uploads", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["files"], json!([]));

    handle.abort();
}

#[tokio::test]
async fn test_unknown_api_path_is_json_404_with_frontend() {
    let tmp = TempDir::new().unwrap();
    let site = tmp.path().join("site");
    std::fs::create_dir_all(&site).unwrap();
    std::fs::write(site.join("index.html"), "<!doctype html><div id=root></div>").unwrap();

    let (base, handle) = start_server_with(&tmp, Some(&site)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");

    // Client-side routes still get the app shell.
    let resp = client
        .get(format!("{}/projects/ray-tracer", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("id=root"));

    handle.abort();
}

#[tokio::test]
async fn test_legacy_document_is_served() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(
        data.join("schema.json"),
        r#"{ "projects": [{ "id": 1700000000000, "title": "Old" }], "profile": { "name": "Ada" } }"#,
    )
    .unwrap();

    let (base, handle) = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/projects/1700000000000", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let project: Value = resp.json().await.unwrap();
    assert_eq!(project["id"], "1700000000000");

    let resp = client.get(format!("{}/api/profile", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    handle.abort();
}
