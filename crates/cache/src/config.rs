//! Configuration for the frame cache and prefetching.
//!
//! Settings come from built-in defaults, then an optional TOML file, then
//! environment variables, each layer overriding the previous one.

use crate::store::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default number of frames kept in bounded mode
pub const DEFAULT_MAX_FRAMES: usize = 50;

/// Default number of neighbours prefetched on each side of the current frame
pub const DEFAULT_PREFETCH_RADIUS: u32 = 5;

/// Default number of concurrent fetches per bulk preload batch
pub const DEFAULT_BATCH_WIDTH: usize = 8;

/// Default annotation backend
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

const ENV_MAX_FRAMES: &str = "FRAME_ANNOTATOR_MAX_FRAMES";
const ENV_PREFETCH_RADIUS: &str = "FRAME_ANNOTATOR_PREFETCH_RADIUS";
const ENV_BATCH_WIDTH: &str = "FRAME_ANNOTATOR_BATCH_WIDTH";
const ENV_BULK_PRELOAD: &str = "FRAME_ANNOTATOR_BULK_PRELOAD";
const ENV_SERVER_URL: &str = "FRAME_ANNOTATOR_SERVER_URL";

/// Settings for the frame cache, prefetcher and backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorConfig {
    /// Retention policy of the frame store
    pub retention: RetentionPolicy,
    /// Neighbours fetched on each side of the current frame
    pub prefetch_radius: u32,
    /// Sweep the whole video into the cache after loading it
    pub bulk_preload: bool,
    /// Concurrent fetches per bulk preload batch
    pub bulk_batch_width: usize,
    /// Drop the cache when the page is hidden, not only on unload
    pub clear_on_hide: bool,
    /// Base URL of the annotation backend
    pub server_url: String,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::Bounded {
                max_frames: DEFAULT_MAX_FRAMES,
            },
            prefetch_radius: DEFAULT_PREFETCH_RADIUS,
            bulk_preload: false,
            bulk_batch_width: DEFAULT_BATCH_WIDTH,
            clear_on_hide: false,
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RetentionKind {
    Bounded,
    Unbounded,
}

/// On-disk layout; every key is optional so partial files work.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    retention: Option<RetentionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_frames: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefetch_radius: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bulk_preload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bulk_batch_width: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clear_on_hide: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_url: Option<String>,
}

impl AnnotatorConfig {
    /// Sets a bounded retention policy.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.retention = RetentionPolicy::Bounded { max_frames };
        self
    }

    /// Sets the unbounded retention policy.
    pub fn with_unbounded_cache(mut self) -> Self {
        self.retention = RetentionPolicy::Unbounded;
        self
    }

    pub fn with_prefetch_radius(mut self, radius: u32) -> Self {
        self.prefetch_radius = radius;
        self
    }

    /// Enables bulk preloading with the given batch width.
    pub fn with_bulk_preload(mut self, batch_width: usize) -> Self {
        self.bulk_preload = true;
        self.bulk_batch_width = batch_width;
        self
    }

    pub fn with_clear_on_hide(mut self, clear_on_hide: bool) -> Self {
        self.clear_on_hide = clear_on_hide;
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Returns the default configuration file path for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/frame-annotator/config.toml
    /// - Linux: ~/.config/frame-annotator/config.toml
    /// - Windows: %APPDATA%\frame-annotator\config.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("frame-annotator").join("config.toml")
        } else {
            PathBuf::from("frame-annotator.toml")
        }
    }

    /// Loads the effective configuration.
    ///
    /// Reads `path` (or the default path) if the file exists, then applies
    /// environment overrides. A missing file is not an error.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if an environment variable holds an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        let config = if path.exists() {
            tracing::debug!(path = %path.display(), "loading configuration file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env()
    }

    /// Loads configuration from environment variables on top of defaults.
    ///
    /// Environment variables:
    /// - `FRAME_ANNOTATOR_MAX_FRAMES`: frame limit, `0` or `unbounded` for no limit
    /// - `FRAME_ANNOTATOR_PREFETCH_RADIUS`: neighbours per side (default: 5)
    /// - `FRAME_ANNOTATOR_BATCH_WIDTH`: bulk preload batch width (default: 8)
    /// - `FRAME_ANNOTATOR_BULK_PRELOAD`: `true`/`false`
    /// - `FRAME_ANNOTATOR_SERVER_URL`: backend base URL
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var(ENV_MAX_FRAMES) {
            self.retention = parse_max_frames(ENV_MAX_FRAMES, &val)?;
        }

        if let Ok(val) = std::env::var(ENV_PREFETCH_RADIUS) {
            self.prefetch_radius = parse_value(ENV_PREFETCH_RADIUS, &val)?;
        }

        if let Ok(val) = std::env::var(ENV_BATCH_WIDTH) {
            self.bulk_batch_width = parse_value(ENV_BATCH_WIDTH, &val)?;
        }

        if let Ok(val) = std::env::var(ENV_BULK_PRELOAD) {
            self.bulk_preload = parse_value(ENV_BULK_PRELOAD, &val)?;
        }

        if let Ok(val) = std::env::var(ENV_SERVER_URL) {
            self.server_url = val;
        }

        self.validate()?;
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// retention = "bounded"
    /// max_frames = 50
    /// prefetch_radius = 5
    /// bulk_preload = false
    /// bulk_batch_width = 8
    /// clear_on_hide = false
    /// server_url = "http://127.0.0.1:5000"
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error on malformed TOML, unknown keys or invalid values.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(toml_str)?;
        let mut config = Self::default();

        let max_frames = file.max_frames.unwrap_or(DEFAULT_MAX_FRAMES);
        config.retention = match file.retention {
            Some(RetentionKind::Unbounded) => RetentionPolicy::Unbounded,
            Some(RetentionKind::Bounded) | None => RetentionPolicy::Bounded { max_frames },
        };
        if let Some(radius) = file.prefetch_radius {
            config.prefetch_radius = radius;
        }
        if let Some(bulk) = file.bulk_preload {
            config.bulk_preload = bulk;
        }
        if let Some(width) = file.bulk_batch_width {
            config.bulk_batch_width = width;
        }
        if let Some(clear) = file.clear_on_hide {
            config.clear_on_hide = clear;
        }
        if let Some(url) = file.server_url {
            config.server_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let (retention, max_frames) = match self.retention {
            RetentionPolicy::Bounded { max_frames } => (RetentionKind::Bounded, Some(max_frames)),
            RetentionPolicy::Unbounded => (RetentionKind::Unbounded, None),
        };
        let file = FileConfig {
            retention: Some(retention),
            max_frames,
            prefetch_radius: Some(self.prefetch_radius),
            bulk_preload: Some(self.bulk_preload),
            bulk_batch_width: Some(self.bulk_batch_width),
            clear_on_hide: Some(self.clear_on_hide),
            server_url: Some(self.server_url.clone()),
        };
        Ok(toml::to_string(&file)?)
    }

    /// Checks that limits are usable.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for a zero frame limit in
    /// bounded mode or a zero batch width.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let RetentionPolicy::Bounded { max_frames: 0 } = self.retention {
            return Err(ConfigError::InvalidValue {
                key: "max_frames".to_string(),
                value: "0".to_string(),
            });
        }
        if self.bulk_batch_width == 0 {
            return Err(ConfigError::InvalidValue {
                key: "bulk_batch_width".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_max_frames(key: &str, value: &str) -> Result<RetentionPolicy, ConfigError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("unbounded") {
        return Ok(RetentionPolicy::Unbounded);
    }
    match parse_value::<usize>(key, trimmed)? {
        0 => Ok(RetentionPolicy::Unbounded),
        max_frames => Ok(RetentionPolicy::Bounded { max_frames }),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value {value:?} for configuration key {key}")]
    InvalidValue { key: String, value: String },
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed configuration file
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    /// Configuration could not be rendered as TOML
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
