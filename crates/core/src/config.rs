//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum chunk size in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Answer cross-origin requests from any origin, for browser clients.
    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cors_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            metrics_enabled: default_metrics_enabled(),
            cors_enabled: default_cors_enabled(),
        }
    }
}

impl ServerConfig {
    /// Validate the server configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.bind.trim().is_empty() {
            return Err("server.bind cannot be empty".to_string());
        }
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be positive".to_string());
        }
        // The body limit is a usize on the request path.
        if usize::try_from(self.max_chunk_size).is_err() {
            return Err(format!(
                "server.max_chunk_size {} exceeds the platform limit",
                self.max_chunk_size
            ));
        }
        Ok(())
    }
}

/// Local directories used by the service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the chunk object store.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Where reassembled files are written.
    #[serde(default = "default_merged_dir")]
    pub merged_dir: PathBuf,
    /// Where partition outputs and archives are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

fn default_merged_dir() -> PathBuf {
    PathBuf::from("./data/merged")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data/output")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            merged_dir: default_merged_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl StorageConfig {
    /// Create a configuration rooted in a single directory.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            upload_dir: root.join("uploads"),
            merged_dir: root.join("merged"),
            output_dir: root.join("output"),
        }
    }

    /// Validate the storage configuration.
    pub fn validate(&self) -> Result<(), String> {
        for (name, dir) in [
            ("storage.upload_dir", &self.upload_dir),
            ("storage.merged_dir", &self.merged_dir),
            ("storage.output_dir", &self.output_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(format!("{name} cannot be empty"));
            }
        }
        if self.merged_dir == self.upload_dir {
            return Err("storage.merged_dir must differ from storage.upload_dir".to_string());
        }
        Ok(())
    }
}

/// How rows are routed into the two partition outputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Header name of the column the predicate reads.
    #[serde(default = "default_column")]
    pub column: String,
    /// Value routed to the positive output, compared ASCII case-insensitively.
    #[serde(default = "default_positive_value")]
    pub positive_value: String,
    /// File name of the positive output.
    #[serde(default = "default_positive_file_name")]
    pub positive_file_name: String,
    /// File name of the negative output.
    #[serde(default = "default_negative_file_name")]
    pub negative_file_name: String,
    /// Rows buffered per output before flushing.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_column() -> String {
    "gender".to_string()
}

fn default_positive_value() -> String {
    "male".to_string()
}

fn default_positive_file_name() -> String {
    "males.csv".to_string()
}

fn default_negative_file_name() -> String {
    "females.csv".to_string()
}

fn default_batch_size() -> usize {
    5000
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            column: default_column(),
            positive_value: default_positive_value(),
            positive_file_name: default_positive_file_name(),
            negative_file_name: default_negative_file_name(),
            batch_size: default_batch_size(),
        }
    }
}

impl PartitionConfig {
    /// Validate the partition configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.column.is_empty() {
            return Err("partition.column cannot be empty".to_string());
        }
        if self.batch_size == 0 {
            return Err("partition.batch_size must be positive".to_string());
        }
        for (name, value) in [
            ("partition.positive_file_name", &self.positive_file_name),
            ("partition.negative_file_name", &self.negative_file_name),
        ] {
            crate::FileName::parse(value).map_err(|e| format!("{name}: {e}"))?;
        }
        if self.positive_file_name == self.negative_file_name {
            return Err(
                "partition.positive_file_name and partition.negative_file_name must differ"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Archive settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Deflate level, 1 (fastest) to 9 (smallest).
    #[serde(default = "default_compression_level")]
    pub compression_level: i64,
}

fn default_compression_level() -> i64 {
    9
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=9).contains(&self.compression_level) {
            return Err(format!(
                "archive.compression_level {} must be between 1 and 9",
                self.compression_level
            ));
        }
        Ok(())
    }
}

/// Per-stage limits and retention for processing runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum duration of the merge step, in seconds.
    #[serde(default = "default_merge_timeout_secs")]
    pub merge_timeout_secs: u64,
    /// Maximum duration of the partition step, in seconds.
    #[serde(default = "default_partition_timeout_secs")]
    pub partition_timeout_secs: u64,
    /// Maximum duration of the archive step, in seconds.
    #[serde(default = "default_archive_timeout_secs")]
    pub archive_timeout_secs: u64,
    /// Keep the merged file and partition outputs after a successful run.
    #[serde(default)]
    pub retain_intermediates: bool,
    /// Seconds without a chunk after which an unprocessed upload is dropped
    /// from the in-memory registry. Its stored chunks are kept.
    #[serde(default = "default_upload_idle_timeout_secs")]
    pub upload_idle_timeout_secs: u64,
}

fn default_merge_timeout_secs() -> u64 {
    600
}

fn default_partition_timeout_secs() -> u64 {
    600
}

fn default_archive_timeout_secs() -> u64 {
    300
}

fn default_upload_idle_timeout_secs() -> u64 {
    24 * 60 * 60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            merge_timeout_secs: default_merge_timeout_secs(),
            partition_timeout_secs: default_partition_timeout_secs(),
            archive_timeout_secs: default_archive_timeout_secs(),
            retain_intermediates: false,
            upload_idle_timeout_secs: default_upload_idle_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }

    pub fn partition_timeout(&self) -> Duration {
        Duration::from_secs(self.partition_timeout_secs)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }

    pub fn upload_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_idle_timeout_secs)
    }

    /// Validate the pipeline configuration.
    pub fn validate(&self) -> Result<(), String> {
        for (name, secs) in [
            ("pipeline.merge_timeout_secs", self.merge_timeout_secs),
            ("pipeline.partition_timeout_secs", self.partition_timeout_secs),
            ("pipeline.archive_timeout_secs", self.archive_timeout_secs),
            ("pipeline.upload_idle_timeout_secs", self.upload_idle_timeout_secs),
        ] {
            if secs == 0 {
                return Err(format!("{name} cannot be 0"));
            }
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Local directories.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Row routing.
    #[serde(default)]
    pub partition: PartitionConfig,
    /// Archive settings.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Stage limits and retention.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Create a test configuration with every directory under `root`.
    ///
    /// **For testing only.**
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::under(root),
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.partition.validate()?;
        self.archive.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}
