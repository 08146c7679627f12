//! Test fixtures for building requests and CSV payloads.

use axum::body::Body;
use axum::http::Request;
use bytes::Bytes;

pub const BOUNDARY: &str = "sieve-test-boundary";

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    Bytes::from(data)
}

/// CSV with the `id,name,gender` header and the given gender per row.
#[allow(dead_code)]
pub fn people_csv(genders: &[&str]) -> String {
    let mut out = String::from("id,name,gender\n");
    for (i, gender) in genders.iter().enumerate() {
        out.push_str(&format!("{i},person-{i},{gender}\n"));
    }
    out
}

/// Pad a CSV to at least `len` bytes by widening the name column of the
/// first data row, so row count and routing stay unchanged.
#[allow(dead_code)]
pub fn padded_people_csv(genders: &[&str], len: usize) -> String {
    let base = people_csv(genders);
    if base.len() >= len || genders.is_empty() {
        return base;
    }
    let pad = "x".repeat(len - base.len());
    base.replacen("0,person-0,", &format!("0,person-0{pad},"), 1)
}

/// Metadata for one chunk part of a multipart form.
#[derive(Clone, Debug, Default)]
pub struct ChunkForm<'a> {
    pub chunk_number: Option<&'a str>,
    pub total_chunks: Option<&'a str>,
    pub file_name: Option<&'a str>,
    pub upload_id: Option<&'a str>,
    /// Send `originalname` and `fileId` instead of the current field names.
    pub legacy_names: bool,
}

/// Encode a chunk upload as `multipart/form-data`.
#[allow(dead_code)]
pub fn multipart_body(form: &ChunkForm<'_>, data: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    let mut text = |name: &str, value: &str| {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    };

    let (name_field, id_field) = if form.legacy_names {
        ("originalname", "fileId")
    } else {
        ("originalFileName", "uploadId")
    };
    if let Some(v) = form.chunk_number {
        text("chunkNumber", v);
    }
    if let Some(v) = form.total_chunks {
        text("totalChunks", v);
    }
    if let Some(v) = form.file_name {
        text(name_field, v);
    }
    if let Some(v) = form.upload_id {
        text(id_field, v);
    }

    if let Some(data) = data {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Build a chunk upload request.
#[allow(dead_code)]
pub fn chunk_request(form: &ChunkForm<'_>, data: Option<&[u8]>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/files/chunks")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(form, data)))
        .unwrap()
}
