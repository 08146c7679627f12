//! Upload identifiers, file names and merge requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum accepted length for an original file name, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// File extension accepted for uploads.
const CSV_EXTENSION: &str = ".csv";

/// File extension of produced archives.
const ARCHIVE_EXTENSION: &str = ".zip";

/// Unique identifier correlating the chunks of one logical upload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidUploadId(format!("{s:?}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The original name of an uploaded file.
///
/// Validated so it can be embedded in a storage key or a local path
/// without escaping its directory.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    /// Parse and validate a file name.
    ///
    /// Structural problems are reported as `InvalidFileName`; a well-formed
    /// name without a `.csv` extension is reported as `UnsupportedMediaType`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidFileName(
                "file name is empty".to_string(),
            ));
        }
        if s.len() > MAX_FILE_NAME_LEN {
            return Err(crate::Error::InvalidFileName(format!(
                "file name is {} bytes (max {MAX_FILE_NAME_LEN})",
                s.len()
            )));
        }
        if s == "." || s == ".." || s.contains(['/', '\\', '\0']) {
            return Err(crate::Error::InvalidFileName(format!(
                "file name must not contain path components: {s:?}"
            )));
        }
        if s.chars().any(char::is_control) {
            return Err(crate::Error::InvalidFileName(format!(
                "file name contains control characters: {s:?}"
            )));
        }

        let lower = s.to_ascii_lowercase();
        if !lower.ends_with(CSV_EXTENSION) || lower.len() == CSV_EXTENSION.len() {
            return Err(crate::Error::UnsupportedMediaType(format!(
                "only {CSV_EXTENSION} files are accepted, got {s:?}"
            )));
        }

        Ok(Self(s.to_string()))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FileName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<FileName> for String {
    fn from(value: FileName) -> Self {
        value.0
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileName({:?})", self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public name of a produced archive: `{upload_id}.zip`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveName(UploadId);

impl ArchiveName {
    /// The archive name derived from an upload.
    pub fn for_upload(upload_id: UploadId) -> Self {
        Self(upload_id)
    }

    /// Parse a caller-supplied archive name.
    ///
    /// Only names of the exact form `<uuid>.zip` are accepted.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let stem = s
            .strip_suffix(ARCHIVE_EXTENSION)
            .ok_or_else(|| crate::Error::InvalidArchiveName(s.to_string()))?;
        let uuid =
            Uuid::parse_str(stem).map_err(|_| crate::Error::InvalidArchiveName(s.to_string()))?;
        Ok(Self(UploadId(uuid)))
    }

    /// The upload this archive was produced from.
    pub fn upload_id(&self) -> UploadId {
        self.0
    }

    /// File name of the archive on disk.
    pub fn file_name(&self) -> String {
        format!("{}{ARCHIVE_EXTENSION}", self.0)
    }
}

impl fmt::Debug for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveName({})", self.file_name())
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Merge trigger as received from a caller, before validation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMergeRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    /// Accepted as a JSON number or a decimal string.
    #[serde(default)]
    pub total_chunks: Option<serde_json::Value>,
    #[serde(default, alias = "fileId")]
    pub upload_id: Option<String>,
}

/// A validated request to merge and process one upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeRequest {
    pub upload_id: UploadId,
    pub file_name: FileName,
    pub total_chunks: u32,
}

impl TryFrom<RawMergeRequest> for MergeRequest {
    type Error = crate::Error;

    fn try_from(raw: RawMergeRequest) -> crate::Result<Self> {
        let file_name = raw
            .file_name
            .as_deref()
            .ok_or_else(|| crate::Error::InvalidMergeRequest("fileName is required".to_string()))
            .and_then(FileName::parse)?;

        let total_chunks = match raw.total_chunks {
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    crate::Error::InvalidMergeRequest(format!(
                        "totalChunks must be a positive integer, got {n}"
                    ))
                })?,
            Some(serde_json::Value::String(s)) => {
                parse_count("totalChunks", &s).map_err(crate::Error::InvalidMergeRequest)?
            }
            Some(other) => {
                return Err(crate::Error::InvalidMergeRequest(format!(
                    "totalChunks must be numeric, got {other}"
                )));
            }
            None => {
                return Err(crate::Error::InvalidMergeRequest(
                    "totalChunks is required".to_string(),
                ));
            }
        };
        validate_total_chunks(total_chunks).map_err(crate::Error::InvalidMergeRequest)?;

        let upload_id = raw
            .upload_id
            .as_deref()
            .ok_or_else(|| crate::Error::InvalidMergeRequest("uploadId is required".to_string()))
            .and_then(UploadId::parse)?;

        Ok(Self {
            upload_id,
            file_name,
            total_chunks,
        })
    }
}

/// Parse a non-negative decimal count supplied as text.
pub(crate) fn parse_count(field: &str, raw: &str) -> std::result::Result<u32, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(format!("{field} is empty"));
    }
    trimmed
        .parse::<u32>()
        .map_err(|_| format!("{field} must be a non-negative integer, got {raw:?}"))
}

/// Check a declared chunk count is usable.
pub(crate) fn validate_total_chunks(total: u32) -> std::result::Result<(), String> {
    if total == 0 {
        return Err("totalChunks must be positive".to_string());
    }
    if total > crate::MAX_TOTAL_CHUNKS {
        return Err(format!(
            "totalChunks {total} exceeds maximum {}",
            crate::MAX_TOTAL_CHUNKS
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawMergeRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_upload_id_roundtrip() {
        let id = UploadId::new();
        let parsed = UploadId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.as_uuid(), parsed.as_uuid());
        assert!(UploadId::parse("not-a-uuid").is_err());
        assert!(UploadId::parse("../../etc").is_err());
    }

    #[test]
    fn test_file_name_validation() {
        assert_eq!(FileName::parse("people.csv").unwrap().as_str(), "people.csv");
        assert!(FileName::parse("PEOPLE.CSV").is_ok());

        for bad in ["", ".", "..", "a/b.csv", "..\\x.csv", "nul\0.csv"] {
            assert!(
                matches!(FileName::parse(bad), Err(crate::Error::InvalidFileName(_))),
                "expected {bad:?} to be rejected"
            );
        }

        assert!(matches!(
            FileName::parse("report.xlsx"),
            Err(crate::Error::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            FileName::parse(".csv"),
            Err(crate::Error::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_archive_name_parse() {
        let id = UploadId::new();
        let name = ArchiveName::for_upload(id);
        assert_eq!(name.file_name(), format!("{id}.zip"));
        assert_eq!(ArchiveName::parse(&name.to_string()).unwrap(), name);
        assert_eq!(name.upload_id(), id);

        assert!(ArchiveName::parse("result.zip").is_err());
        assert!(ArchiveName::parse(&id.to_string()).is_err());
        assert!(ArchiveName::parse(&format!("../{id}.zip")).is_err());
    }

    #[test]
    fn test_merge_request_accepts_number_or_string() {
        let id = UploadId::new();
        let from_number = MergeRequest::try_from(raw(json!({
            "fileName": "people.csv",
            "totalChunks": 3,
            "uploadId": id.to_string(),
        })))
        .unwrap();
        assert_eq!(from_number.total_chunks, 3);
        assert_eq!(from_number.upload_id, id);

        let from_string = MergeRequest::try_from(raw(json!({
            "fileName": "people.csv",
            "totalChunks": "3",
            "fileId": id.to_string(),
        })))
        .unwrap();
        assert_eq!(from_string, from_number);
    }

    #[test]
    fn test_merge_request_rejects_bad_input() {
        let id = UploadId::new().to_string();
        let cases = [
            json!({"totalChunks": 1, "uploadId": id}),
            json!({"fileName": "a.csv", "uploadId": id}),
            json!({"fileName": "a.csv", "totalChunks": 0, "uploadId": id}),
            json!({"fileName": "a.csv", "totalChunks": -2, "uploadId": id}),
            json!({"fileName": "a.csv", "totalChunks": "two", "uploadId": id}),
            json!({"fileName": "a.csv", "totalChunks": true, "uploadId": id}),
            json!({"fileName": "a.csv", "totalChunks": 1.5, "uploadId": id}),
            json!({"fileName": "a.csv", "totalChunks": 1}),
        ];
        for case in cases {
            assert!(
                MergeRequest::try_from(raw(case.clone())).is_err(),
                "expected rejection for {case}"
            );
        }
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("n", " 7 ").unwrap(), 7);
        assert!(parse_count("n", "").is_err());
        assert!(parse_count("n", "-1").is_err());
        assert!(parse_count("n", "1e3").is_err());
    }
}
