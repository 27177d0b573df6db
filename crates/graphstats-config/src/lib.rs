use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use graphstats_space::{GB, MB};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Largest number of chunks a row can track; chunk ids are `u16`.
pub const MAX_CHUNKS: u32 = u16::MAX as u32;

/// A byte size which supports both raw byte counts and human-friendly suffixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Human(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(value) => Ok(ByteSize(value)),
            Repr::Human(value) => graphstats_space::parse_byte_size(&value)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding partition files, overflow files and `statistics.meta`.
    #[serde(default = "StorageConfig::default_dir")]
    pub dir: PathBuf,

    /// Requested block size; rounded down to whole rows.
    #[serde(default = "StorageConfig::default_block_size")]
    pub block_size: ByteSize,

    /// Resources per partition file.
    #[serde(default = "StorageConfig::default_rows_per_file")]
    pub rows_per_file: u64,

    /// Partition accessors kept open at once.
    #[serde(default = "StorageConfig::default_max_open_files")]
    pub max_open_files: usize,

    /// Blocks cached by each file-backed store; `0` disables the block cache.
    #[serde(default = "StorageConfig::default_file_cache_blocks")]
    pub file_cache_blocks: usize,

    /// Number of graph chunks tracked per resource.
    #[serde(default = "StorageConfig::default_chunks")]
    pub chunks: u32,
}

impl StorageConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from("graphstats-data")
    }

    fn default_block_size() -> ByteSize {
        ByteSize(4096)
    }

    fn default_rows_per_file() -> u64 {
        1 << 20
    }

    fn default_max_open_files() -> usize {
        64
    }

    fn default_file_cache_blocks() -> usize {
        16
    }

    fn default_chunks() -> u32 {
        4
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            block_size: Self::default_block_size(),
            rows_per_file: Self::default_rows_per_file(),
            max_open_files: Self::default_max_open_files(),
            file_cache_blocks: Self::default_file_cache_blocks(),
            chunks: Self::default_chunks(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpaceConfig {
    /// Share one budget between all partition accessors. When disabled every
    /// accessor gets `total_bytes` for itself.
    #[serde(default = "SpaceConfig::default_shared")]
    pub shared: bool,

    #[serde(default = "SpaceConfig::default_total_bytes")]
    pub total_bytes: ByteSize,

    /// Budget of the overflow store.
    #[serde(default = "SpaceConfig::default_extra_total_bytes")]
    pub extra_total_bytes: ByteSize,
}

impl SpaceConfig {
    fn default_shared() -> bool {
        true
    }

    fn default_total_bytes() -> ByteSize {
        ByteSize(256 * MB)
    }

    fn default_extra_total_bytes() -> ByteSize {
        ByteSize(32 * MB)
    }
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            shared: Self::default_shared(),
            total_bytes: Self::default_total_bytes(),
            extra_total_bytes: Self::default_extra_total_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphStatsConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub space: SpaceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid value for `{toml_path}`: {message}")]
    Invalid { toml_path: String, message: String },
}

/// Redacts quoted and backticked user values from a TOML error message.
fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();
    static BACKTICK_VALUE_RE: OnceLock<regex::Regex> = OnceLock::new();

    let quoted = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#)
            .expect("quoted-string regex should compile")
    });
    let out = quoted.replace_all(message, r#""<redacted>""#);

    // `missing field `x`` names a schema field and stays readable.
    let backticked = BACKTICK_VALUE_RE.get_or_init(|| {
        regex::Regex::new(r"(unknown field|unknown variant|invalid type: [a-z ]+|invalid value: [a-z ]+) `[^`]*`")
            .expect("backtick regex should compile")
    });
    backticked
        .replace_all(&out, "$1 `<redacted>`")
        .into_owned()
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a source snippet; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl GraphStatsConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: GraphStatsConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Checks values the storage layer cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;
        let invalid = |toml_path: &str, message: &str| {
            Err(ConfigError::Invalid {
                toml_path: toml_path.to_owned(),
                message: message.to_owned(),
            })
        };

        if storage.chunks == 0 {
            return invalid("storage.chunks", "must be >= 1");
        }
        if storage.chunks > MAX_CHUNKS {
            return invalid("storage.chunks", "must be <= 65535");
        }
        if storage.rows_per_file == 0 {
            return invalid("storage.rows_per_file", "must be >= 1");
        }
        if storage.block_size.0 == 0 {
            return invalid("storage.block_size", "must be >= 1");
        }
        if storage.block_size.0 > GB {
            return invalid("storage.block_size", "must be <= 1GiB");
        }
        if storage.max_open_files == 0 {
            return invalid("storage.max_open_files", "must be >= 1");
        }
        Ok(())
    }
}
