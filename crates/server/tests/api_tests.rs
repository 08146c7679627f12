//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::fixtures::{ChunkForm, chunk_request, padded_people_csv, people_csv};
use common::TestServer;
use serde_json::{Value, json};
use std::io::Read;

const MIB: usize = 1024 * 1024;
const CLIENT_UPLOAD_ID: &str = "5f0c6a0e-7d52-4c3e-9a51-2b1f0e8d4c11";

fn split(data: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut offset = 0;
    for &size in sizes {
        out.push(data[offset..offset + size].to_vec());
        offset += size;
    }
    out.push(data[offset..].to_vec());
    out
}

fn zip_entries(bytes: Vec<u8>) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            (entry.name().to_string(), content)
        })
        .collect()
}

async fn download(server: &TestServer, archive_name: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("GET")
        .uri(format!("/api/files/download/{archive_name}"))
        .body(Body::empty())
        .unwrap();
    server.send(request).await
}

async fn process(server: &TestServer, upload_id: &str, total: usize) -> (StatusCode, Value) {
    server
        .post_json(
            "/api/files/process",
            &json!({"fileName": "people.csv", "totalChunks": total, "uploadId": upload_id}),
        )
        .await
}

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::new().await;
    let (status, body) = server.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn capabilities_reflect_config() {
    let server = TestServer::with_config(|c| c.server.max_chunk_size = MIB as u64).await;
    let (status, body) = server.get_json("/api/files/capabilities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["maxChunkSize"], MIB);
    assert_eq!(body["defaultChunkSize"], MIB);
    assert_eq!(body["partitionColumn"], "gender");
    assert_eq!(body["archiveEntries"], json!(["males.csv", "females.csv"]));
}

#[tokio::test]
async fn first_chunk_mints_upload_id() {
    let server = TestServer::new().await;
    let (status, body) = server
        .upload_chunk(None, 0, 2, "people.csv", b"id,name,gender\n")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Chunk uploaded successfully");
    let id = body["uploadId"].as_str().unwrap();

    let (status, body) = server.get_json(&format!("/api/files/uploads/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["receivedChunks"], json!([0]));
    assert_eq!(body["totalChunks"], 2);
    assert_eq!(body["merging"], false);
}

#[tokio::test]
async fn legacy_field_names_are_accepted() {
    let server = TestServer::new().await;
    let form = ChunkForm {
        chunk_number: Some("0"),
        total_chunks: Some("1"),
        file_name: Some("people.csv"),
        upload_id: Some(CLIENT_UPLOAD_ID),
        legacy_names: true,
    };
    let (status, body) = server
        .send_json(chunk_request(&form, Some(b"id,gender\n")))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["uploadId"], CLIENT_UPLOAD_ID);
}

#[tokio::test]
async fn malformed_chunk_metadata_is_rejected() {
    let server = TestServer::new().await;
    let cases = [
        ChunkForm {
            chunk_number: None,
            total_chunks: Some("2"),
            file_name: Some("people.csv"),
            ..ChunkForm::default()
        },
        ChunkForm {
            chunk_number: Some("one"),
            total_chunks: Some("2"),
            file_name: Some("people.csv"),
            ..ChunkForm::default()
        },
        ChunkForm {
            chunk_number: Some("0"),
            total_chunks: Some("0"),
            file_name: Some("people.csv"),
            ..ChunkForm::default()
        },
        ChunkForm {
            chunk_number: Some("0"),
            total_chunks: Some("2"),
            ..ChunkForm::default()
        },
        // Only chunk 0 may omit the upload id.
        ChunkForm {
            chunk_number: Some("1"),
            total_chunks: Some("2"),
            file_name: Some("people.csv"),
            ..ChunkForm::default()
        },
    ];
    for form in cases {
        let (status, body) = server.send_json(chunk_request(&form, Some(b"x"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{form:?}: {body}");
        assert_eq!(body["code"], "bad_request");
    }

    let form = ChunkForm {
        chunk_number: Some("0"),
        total_chunks: Some("1"),
        file_name: Some("people.csv"),
        ..ChunkForm::default()
    };
    let (status, body) = server.send_json(chunk_request(&form, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("file"));

    // Nothing was written for any rejected chunk.
    let listed = server.state.chunk_store.storage().list("chunks/").await.unwrap();
    assert!(listed.is_empty(), "{listed:?}");
}

#[tokio::test]
async fn non_csv_upload_is_unsupported_media_type() {
    let server = TestServer::new().await;
    let (status, body) = server
        .upload_chunk(None, 0, 1, "people.xlsx", b"PK")
        .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["code"], "unsupported_media_type");
}

#[tokio::test]
async fn oversized_chunk_is_rejected() {
    let server = TestServer::with_config(|c| c.server.max_chunk_size = 1024).await;
    let (status, body) = server
        .upload_chunk(None, 0, 1, "people.csv", &vec![b'a'; 2048])
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{body}");
}

#[tokio::test]
async fn conflicting_declaration_is_conflict() {
    let server = TestServer::new().await;
    let (_, body) = server.upload_chunk(None, 0, 3, "people.csv", b"a").await;
    let id = body["uploadId"].as_str().unwrap().to_string();

    let (status, body) = server
        .upload_chunk(Some(&id), 1, 4, "people.csv", b"b")
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["code"], "upload_mismatch");
}

#[tokio::test]
async fn end_to_end_three_chunks_in_order() {
    let server = TestServer::new().await;
    let csv = padded_people_csv(&["Male", "Male", "Female", ""], 5 * MIB);
    assert!(csv.len() >= 5 * MIB);
    let chunks = split(csv.as_bytes(), &[2 * MIB, 2 * MIB]);
    assert_eq!(chunks.len(), 3);

    let id = server.upload_in_order("people.csv", &chunks, &[0, 1, 2]).await;
    let (status, body) = process(&server, &id, 3).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["positiveRows"], 2);
    assert_eq!(body["negativeRows"], 2);
    assert_eq!(body["mergedBytes"], csv.len());
    let archive_name = body["archiveName"].as_str().unwrap().to_string();
    assert_eq!(archive_name, format!("{id}.zip"));

    let request = Request::builder()
        .uri(format!("/api/files/download/{archive_name}"))
        .body(Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(server.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/zip");
    let disposition = response.headers()["content-disposition"].to_str().unwrap();
    assert!(disposition.contains(&archive_name), "{disposition}");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let entries = zip_entries(bytes.to_vec());
    assert_eq!(entries.len(), 2);
    let (males_name, males) = &entries[0];
    let (females_name, females) = &entries[1];
    assert_eq!(males_name, "males.csv");
    assert_eq!(females_name, "females.csv");
    assert!(males.starts_with("id,name,gender\n"));
    assert!(females.starts_with("id,name,gender\n"));
    assert_eq!(males.lines().count(), 3);
    assert_eq!(females.lines().count(), 3);
    assert!(females.ends_with("2,person-2,Female\n3,person-3,\n"), "{females}");
}

#[tokio::test]
async fn out_of_order_arrival_matches_in_order() {
    let csv = people_csv(&["male", "female", "MALE", "other", "Female", "male"]);
    let chunks = split(csv.as_bytes(), &[20, 30]);
    assert_eq!(chunks.len(), 3);

    let in_order = TestServer::new().await;
    let id = in_order.upload_in_order("people.csv", &chunks, &[0, 1, 2]).await;
    let (status, body) = process(&in_order, &id, 3).await;
    assert_eq!(status, StatusCode::OK);
    let (_, expected) = download(&in_order, body["archiveName"].as_str().unwrap()).await;

    // A client-chosen id lets chunk 2 arrive before chunk 0.
    let shuffled = TestServer::new().await;
    for index in [2, 0, 1] {
        let (status, body) = shuffled
            .upload_chunk(Some(CLIENT_UPLOAD_ID), index, 3, "people.csv", &chunks[index])
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
    let (status, body) = process(&shuffled, CLIENT_UPLOAD_ID, 3).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["positiveRows"], 3);
    assert_eq!(body["negativeRows"], 3);
    let (status, actual) = download(&shuffled, body["archiveName"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(zip_entries(actual), zip_entries(expected));
}

#[tokio::test]
async fn missing_chunk_reports_index_and_produces_nothing() {
    let server = TestServer::new().await;
    let csv = people_csv(&["male"; 40]);
    let chunks = split(csv.as_bytes(), &[100, 100, 100, 100]);
    assert_eq!(chunks.len(), 5);

    let (_, body) = server.upload_chunk(None, 0, 5, "people.csv", &chunks[0]).await;
    let id = body["uploadId"].as_str().unwrap().to_string();
    for index in 1..4 {
        let (status, _) = server
            .upload_chunk(Some(&id), index, 5, "people.csv", &chunks[index])
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = process(&server, &id, 5).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["code"], "missing_chunk");
    assert!(body["message"].as_str().unwrap().contains("chunk 4"), "{body}");
    assert!(body.get("archiveName").is_none());

    let (status, body) = download(&server, &format!("{id}.zip")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "not_found");

    // The partial upload is left for inspection.
    let (status, body) = server.get_json(&format!("/api/files/uploads/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["receivedChunks"], json!([0, 1, 2, 3]));
}

#[tokio::test]
async fn process_request_validation() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/files/process")
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = server.send_json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .post_json(
            "/api/files/process",
            &json!({"fileName": "people.csv", "uploadId": CLIENT_UPLOAD_ID}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .post_json(
            "/api/files/process",
            &json!({"fileName": "people.csv", "totalChunks": "3"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // `fileId` and string counts are accepted.
    let (status, body) = server
        .post_json(
            "/api/files/process",
            &json!({"fileName": "people.csv", "totalChunks": "1", "fileId": CLIENT_UPLOAD_ID}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
}

#[tokio::test]
async fn processed_upload_cannot_be_processed_again() {
    let server = TestServer::new().await;
    let csv = people_csv(&["male", "female"]);
    let chunks = split(csv.as_bytes(), &[]);
    let id = server.upload_in_order("people.csv", &chunks, &[0]).await;

    let (status, _) = process(&server, &id, 1).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = process(&server, &id, 1).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    // The archive from the first run is still served.
    let (status, _) = download(&server, &format!("{id}.zip")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn download_rejects_bad_names() {
    let server = TestServer::new().await;
    let (status, _) = download(&server, "result.zip").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = download(&server, "..%2Fsecret.zip").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = download(&server, &format!("{CLIENT_UPLOAD_ID}.zip")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_upload_status_is_not_found() {
    let server = TestServer::new().await;
    let (status, _) = server
        .get_json(&format!("/api/files/uploads/{CLIENT_UPLOAD_ID}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server.get_json("/api/files/uploads/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_endpoint_follows_config() {
    let server = TestServer::new().await;
    server.upload_chunk(None, 0, 1, "people.csv", b"id\n").await;
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let (status, body) = server.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("sieve_chunks_received_total"), "{text}");

    let server = TestServer::with_config(|c| c.server.metrics_enabled = false).await;
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let (status, _) = server.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_headers_follow_config() {
    use tower::ServiceExt;

    let preflight = || {
        Request::builder()
            .method("OPTIONS")
            .uri("/api/files/chunks")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap()
    };

    let server = TestServer::new().await;
    let response = server.router.clone().oneshot(preflight()).await.unwrap();
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "{:?}",
        response.headers()
    );

    let server = TestServer::with_config(|c| c.server.cors_enabled = false).await;
    let response = server.router.clone().oneshot(preflight()).await.unwrap();
    assert!(!response.headers().contains_key("access-control-allow-origin"));
}
