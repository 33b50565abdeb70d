use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use docseek::{
    LibraryDb,
    Result,
    answer::{AnswerExtractor, AnswerSpan},
    chunking::ChunkingConfig,
    embedding::Embedder,
    web::{AppState, router},
};
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "docseek-test-boundary";

/// Deterministic bag-of-words embedding over a tiny vocabulary.
struct FakeModels;

const VOCAB: [&str; 4] = ["ownership", "borrow", "garbage", "python"];

impl Embedder for FakeModels {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCAB
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .chain([0.05])
                    .collect()
            })
            .collect())
    }
}

impl AnswerExtractor for FakeModels {
    fn extract(&mut self, question: &str, passage: &str) -> Result<Option<AnswerSpan>> {
        let word = question
            .split_whitespace()
            .last()
            .unwrap_or_default()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        Ok(passage.to_lowercase().find(&word).map(|start| AnswerSpan {
            start,
            end: start + word.len(),
            score: 1.0,
        }))
    }
}

fn app() -> (tempfile::TempDir, Router) {
    let tmp = tempfile::tempdir().unwrap();
    let library = LibraryDb::open(&tmp.path().join("library.redb")).unwrap();
    let state = Arc::new(AppState::new(library, ChunkingConfig::default(), FakeModels));
    (tmp, router(state))
}

fn multipart_upload(filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/documents")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

const RUST_NOTES: &str = "Rust manages memory through ownership rules.\n\
                          The borrow checker enforces ownership at compile time.\n";
const PYTHON_NOTES: &str = "Python relies on a garbage collector for memory.\n\
                            Reference counting frees most python objects early.\n";

#[tokio::test]
async fn upload_search_and_delete_roundtrip() {
    let (_tmp, app) = app();

    let (status, uploaded) =
        send(&app, multipart_upload("rust.txt", RUST_NOTES.as_bytes())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(uploaded["document"]["title"], "rust.txt");
    assert_eq!(uploaded["replaced"], false);
    assert_eq!(uploaded["chunks"].as_array().unwrap().len(), 1);
    let rust_id = uploaded["document"]["id"].as_str().unwrap().to_string();

    let (status, _) =
        send(&app, multipart_upload("python.txt", PYTHON_NOTES.as_bytes())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, listed) = send(&app, empty_request("GET", "/api/documents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let (status, found) = send(
        &app,
        json_request("POST", "/api/search", json!({ "query": "who handles ownership" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["resultCount"], 2);
    let top = &found["results"][0];
    assert_eq!(top["title"], "rust.txt");
    assert_eq!(top["rank"], 1);
    assert_eq!(top["answer"], "ownership");
    assert!(top["highlighted"].as_str().unwrap().contains("**ownership**"));
    let range = &top["answerRange"];
    let text = top["text"].as_str().unwrap();
    let (start, end) = (
        range["start"].as_u64().unwrap() as usize,
        range["end"].as_u64().unwrap() as usize,
    );
    assert_eq!(&text[start..end], "ownership");

    let (status, chunks) = send(
        &app,
        empty_request("GET", &format!("/api/documents/{rust_id}/chunks")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chunks["chunks"][0]["order"], 0);
    assert!(
        chunks["chunks"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Rust manages memory")
    );

    let (status, _) =
        send(&app, empty_request("DELETE", &format!("/api/documents/{rust_id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, error) =
        send(&app, empty_request("DELETE", &format!("/api/documents/{rust_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error["message"].as_str().unwrap().contains("not found"));

    let (_, found) = send(
        &app,
        json_request("POST", "/api/search", json!({ "query": "ownership", "limit": 5 })),
    )
    .await;
    assert_eq!(found["resultCount"], 1);
    assert_eq!(found["results"][0]["title"], "python.txt");
}

#[tokio::test]
async fn reupload_replaces_existing_document() {
    let (_tmp, app) = app();

    let (first, _) = send(&app, multipart_upload("rust.txt", RUST_NOTES.as_bytes())).await;
    let (second, body) =
        send(&app, multipart_upload("rust.txt", RUST_NOTES.as_bytes())).await;
    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["replaced"], true);

    let (_, listed) = send(&app, empty_request("GET", "/api/documents")).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn delete_requires_full_document_id() {
    let (_tmp, app) = app();
    let (_, uploaded) =
        send(&app, multipart_upload("rust.txt", RUST_NOTES.as_bytes())).await;
    let id = uploaded["document"]["id"].as_str().unwrap().to_string();

    for reference in [&id[..1], &id[..8], "rust.txt"] {
        let (status, error) = send(
            &app,
            empty_request("DELETE", &format!("/api/documents/{reference}")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "reference {reference}");
        assert!(error["message"].as_str().unwrap().contains("hex document id"));
    }

    let (_, listed) = send(&app, empty_request("GET", "/api/documents")).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) =
        send(&app, empty_request("DELETE", &format!("/api/documents/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn non_pdf_bytes_are_rejected() {
    let (_tmp, app) = app();
    let (status, error) =
        send(&app, multipart_upload("paper.pdf", b"definitely not a pdf")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["message"].as_str().unwrap().contains("PDF"));
}

#[tokio::test]
async fn empty_document_is_rejected() {
    let (_tmp, app) = app();
    let (status, error) = send(&app, multipart_upload("blank.txt", b"tiny\n12\n")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["message"].as_str().unwrap().contains("blank.txt"));
}

#[tokio::test]
async fn search_validation_errors_are_json() {
    let (_tmp, app) = app();

    let (status, error) =
        send(&app, json_request("POST", "/api/search", json!({ "query": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["message"].is_string());

    let (status, error) =
        send(&app, json_request("POST", "/api/search", json!({ "limit": 3 }))).await;
    assert!(status.is_client_error());
    assert!(error["message"].is_string());
}

#[tokio::test]
async fn search_on_empty_library_returns_no_results() {
    let (_tmp, app) = app();
    let (status, found) =
        send(&app, json_request("POST", "/api/search", json!({ "query": "anything" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["resultCount"], 0);
}

#[tokio::test]
async fn unknown_document_chunks_are_not_found() {
    let (_tmp, app) = app();
    let (status, _) = send(
        &app,
        empty_request("GET", "/api/documents/0123456789abcdef/chunks"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn index_serves_the_ui() {
    let (_tmp, app) = app();
    let response = app.oneshot(empty_request("GET", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Retrieval"));
    assert!(html.contains("/api/search"));
}
