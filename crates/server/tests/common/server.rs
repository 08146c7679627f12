//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use sieve_core::config::AppConfig;
use sieve_server::{AppState, create_router};
use sieve_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use super::fixtures::{ChunkForm, chunk_request};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary directories.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&config.storage.upload_dir)
                .await
                .expect("Failed to create storage backend"),
        );

        sieve_server::metrics::register_metrics();
        let state = AppState::new(config, storage);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and return status plus raw body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    /// Send a request and decode the body as JSON (`Null` when empty or not JSON).
    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// GET a path and decode JSON.
    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send_json(request).await
    }

    /// POST a JSON body.
    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();
        self.send_json(request).await
    }

    /// Upload one chunk of `file_name`.
    pub async fn upload_chunk(
        &self,
        upload_id: Option<&str>,
        index: usize,
        total: usize,
        file_name: &str,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let index = index.to_string();
        let total = total.to_string();
        let form = ChunkForm {
            chunk_number: Some(&index),
            total_chunks: Some(&total),
            file_name: Some(file_name),
            upload_id,
            legacy_names: false,
        };
        self.send_json(chunk_request(&form, Some(data))).await
    }

    /// Upload every chunk in `order`; chunk 0 must come first. Returns the upload id.
    pub async fn upload_in_order(&self, file_name: &str, chunks: &[Vec<u8>], order: &[usize]) -> String {
        assert_eq!(order.first(), Some(&0), "chunk 0 mints the upload id");
        let total = chunks.len();
        let (status, body) = self.upload_chunk(None, 0, total, file_name, &chunks[0]).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let id = body["uploadId"].as_str().unwrap().to_string();

        for &index in &order[1..] {
            let (status, body) = self
                .upload_chunk(Some(&id), index, total, file_name, &chunks[index])
                .await;
            assert_eq!(status, StatusCode::OK, "chunk {index}: {body}");
        }
        id
    }
}
