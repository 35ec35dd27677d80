//! Layered configuration for the retrieval core.
//!
//! Settings are resolved from, in increasing priority:
//! - built-in defaults
//! - `.docqa/settings.toml`, found by walking up from the current directory
//! - environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `DOCQA_` and use double
//! underscores to separate nested levels:
//! - `DOCQA_INDEX__NUM_SHARDS=8` sets `index.num_shards`
//! - `DOCQA_RATE_LIMITS__RETRIEVAL__BURST_SIZE=50` sets `rate_limits.retrieval.burst_size`
//! - `DOCQA_STREAMING__CHUNK_SIZE=25` sets `streaming.chunk_size`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;
use crate::ratelimit::{RateLimitConfig, default_rate_limits};
use crate::streaming::StreamingConfig;
use crate::vector::{IndexConfig, ShardKind};

/// Directory holding the settings file and, by default, the index.
pub const CONFIG_DIR: &str = ".docqa";

const SETTINGS_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "DOCQA_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub index: IndexSettings,

    /// Admission control limits keyed by component name
    #[serde(default = "default_rate_limits")]
    pub rate_limits: HashMap<String, RateLimitConfig>,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexSettings {
    /// Directory the index is saved to, relative to the workspace root
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_num_shards")]
    pub num_shards: usize,

    #[serde(default)]
    pub shard_kind: ShardKind,

    /// Inverted lists per partitioned shard
    #[serde(default = "default_nlist")]
    pub nlist: usize,

    /// Lists scanned per query on partitioned shards
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    #[serde(default)]
    pub use_accelerator: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_dimension() -> usize {
    IndexConfig::default().dimension
}
fn default_num_shards() -> usize {
    IndexConfig::default().num_shards
}
fn default_nlist() -> usize {
    IndexConfig::default().nlist
}
fn default_nprobe() -> usize {
    IndexConfig::default().nprobe
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index: IndexSettings::default(),
            rate_limits: default_rate_limits(),
            streaming: StreamingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        let config = IndexConfig::default();
        Self {
            path: default_index_path(),
            dimension: config.dimension,
            num_shards: config.num_shards,
            shard_kind: config.shard_kind,
            nlist: config.nlist,
            nprobe: config.nprobe,
            use_accelerator: config.use_accelerator,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IndexSettings {
    /// Constructor parameters for a new index.
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            dimension: self.dimension,
            num_shards: self.num_shards,
            shard_kind: self.shard_kind,
            nlist: self.nlist,
            nprobe: self.nprobe,
            use_accelerator: self.use_accelerator,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, ConfigurationError> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still layering env vars on top
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels, single underscores
            // stay part of the field name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Find `.docqa/settings.toml` from the current directory upwards
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(SETTINGS_FILE))
    }

    /// Get the workspace root directory (where .docqa is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Index directory, resolved against the workspace root when relative
    pub fn index_dir(&self) -> PathBuf {
        if self.index.path.is_absolute() {
            return self.index.path.clone();
        }
        match Self::workspace_root() {
            Some(root) => root.join(&self.index.path),
            None => self.index.path.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.index.index_config().validate()?;
        for config in self.rate_limits.values() {
            config.validate()?;
        }
        self.streaming.validate()?;
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with comments in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, TEMPLATE)?;
        tracing::info!(path = %config_path.display(), force, "wrote configuration file");

        Ok(config_path)
    }
}

const TEMPLATE: &str = r#"# docqa retrieval configuration

# Version of the configuration schema
version = 1

[index]
# Directory the index is saved to (relative to the workspace root)
path = ".docqa/index"

# Embedding dimension; every ingested and queried vector must match it
dimension = 384

# Number of shards; vectors are split contiguously at insertion time
num_shards = 4

# "exhaustive" scans every vector, "partitioned" trains inverted lists
# with k-means on `optimize` and scans only `nprobe` of them per query
shard_kind = "exhaustive"
nlist = 100
nprobe = 10

# Falls back to CPU when no accelerator backend is available
use_accelerator = false

# Admission control per component. Requests beyond `burst_size` wait for
# tokens at `requests_per_second`, at most `requests_per_second *
# window_size_seconds` are admitted per window, and a request whose wait
# would exceed `max_delay_seconds` is rejected.
[rate_limits.embedding]
requests_per_second = 10.0
burst_size = 20
window_size_seconds = 60.0
max_delay_seconds = 5.0

[rate_limits.retrieval]
requests_per_second = 50.0
burst_size = 100
window_size_seconds = 60.0
max_delay_seconds = 2.0

[rate_limits.ingestion]
requests_per_second = 5.0
burst_size = 10
window_size_seconds = 60.0
max_delay_seconds = 30.0

# Used for any component without its own entry
[rate_limits.default]
requests_per_second = 20.0
burst_size = 40
window_size_seconds = 60.0
max_delay_seconds = 5.0

[streaming]
# Records per streamed chunk
chunk_size = 10

# Chunks buffered before the producer waits
buffer_max_size = 100

# Timeout of one buffer put or get
chunk_timeout_seconds = 30.0

# Chunks handed to the transform at once (unset: one at a time)
# batch_size = 4

[logging]
# Overridden by RUST_LOG
level = "info"
"#;
