//! Shared helpers for router level tests.

use axum::Router;
use axum::body::{Body as AxumBody, to_bytes};
use axum::http::{Request, StatusCode, header};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::server::build_router;
use crate::storage::Storage;
use crate::upload::UploadConfig;

pub const TEST_UPLOAD_KEY: &str = "secret";
pub const TEST_BUFFER_LIMIT: usize = 1024;
const BOUNDARY: &str = "simple-cdn-test-boundary";

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

/// Router over a fresh content root at `<tempdir>/content`.
pub fn make_app(max_size: u64) -> (TempDir, Arc<Storage>, Router) {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("content");
    std::fs::create_dir_all(&root).expect("create content root");
    let storage = Arc::new(Storage::new(root));
    let upload = Arc::new(UploadConfig {
        upload_key: TEST_UPLOAD_KEY.to_string(),
        max_size,
        buffer_limit: TEST_BUFFER_LIMIT,
    });
    let app = build_router(storage.clone(), upload, None);
    (temp, storage, app)
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(parts: &[Part<'_>]) -> Request<AxumBody> {
    raw_upload_request(multipart_body(parts))
}

/// Upload request with a caller supplied (possibly malformed) multipart body.
pub fn raw_upload_request(body: Vec<u8>) -> Request<AxumBody> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(AxumBody::from(body))
        .expect("build upload request")
}

pub fn get_request(uri: &str) -> Request<AxumBody> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(AxumBody::empty())
        .expect("build get request")
}

pub async fn send(app: &Router, request: Request<AxumBody>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    (status, String::from_utf8_lossy(&body).into_owned())
}
