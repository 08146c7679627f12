use bytes::Bytes;
use sieve_core::{ChunkSubmission, RawChunkMetadata, UploadId};
use sieve_pipeline::ChunkStore;

/// A CSV of `rows` people; every third row is male, with mixed casing.
pub fn people_csv(rows: usize) -> String {
    let mut out = String::from("id,name,gender\n");
    for i in 0..rows {
        let gender = match i % 6 {
            0 => "male",
            3 => "Male",
            1 | 4 => "female",
            _ => "Female",
        };
        out.push_str(&format!("{i},person-{i:06},{gender}\n"));
    }
    out
}

/// Split `data` into consecutive pieces of the given sizes; the last piece
/// takes whatever remains.
pub fn split_sizes(data: &[u8], sizes: &[usize]) -> Vec<Bytes> {
    let mut pieces = Vec::with_capacity(sizes.len() + 1);
    let mut offset = 0;
    for &size in sizes {
        let end = (offset + size).min(data.len());
        pieces.push(Bytes::copy_from_slice(&data[offset..end]));
        offset = end;
    }
    if offset < data.len() {
        pieces.push(Bytes::copy_from_slice(&data[offset..]));
    }
    pieces
}

pub fn submission(
    upload_id: Option<UploadId>,
    index: usize,
    total: usize,
    file_name: &str,
    data: Bytes,
) -> ChunkSubmission {
    ChunkSubmission::from_raw(
        RawChunkMetadata {
            chunk_number: Some(index.to_string()),
            total_chunks: Some(total.to_string()),
            original_file_name: Some(file_name.to_string()),
            upload_id: upload_id.map(|id| id.to_string()),
        },
        data,
    )
    .unwrap()
}

/// Upload chunk 0 to mint the id, then the rest in `order`.
pub async fn upload_all(
    store: &ChunkStore,
    file_name: &str,
    chunks: &[Bytes],
    order: &[usize],
) -> UploadId {
    upload_declaring(store, file_name, chunks, order, chunks.len()).await
}

/// Like [`upload_all`], but every chunk claims the upload has `total` chunks.
pub async fn upload_declaring(
    store: &ChunkStore,
    file_name: &str,
    chunks: &[Bytes],
    order: &[usize],
    total: usize,
) -> UploadId {
    let first = store
        .save(submission(None, 0, total, file_name, chunks[0].clone()))
        .await
        .unwrap();
    for &index in order.iter().filter(|&&i| i != 0) {
        store
            .save(submission(
                Some(first.upload_id),
                index,
                total,
                file_name,
                chunks[index].clone(),
            ))
            .await
            .unwrap();
    }
    first.upload_id
}
