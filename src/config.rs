//! Tunables shared by writers, readers and the merge policy.

use crate::encoding::{EncodingKind, EncodingOption};
use crate::error::{Error, Result};
use crate::format::StorageFormat;
use crate::toast::ToastOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_GROUP_LIMIT: usize = 128 * 1024;
const DEFAULT_GROUP_SIZE_LIMIT: usize = 64 * 1024 * 1024;
const DEFAULT_TAIL_READ_SIZE: usize = 16 * 1024;
const DEFAULT_SPLIT_THRESHOLD: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnarConfig {
    /// Rows per stripe before a flush.
    pub group_limit: usize,
    /// Buffered bytes per stripe before a flush.
    pub group_size_limit: usize,
    pub storage_format: StorageFormat,
    pub default_encoding: EncodingOption,
    pub toast: ToastOptions,
    /// Trailing bytes fetched by the first read of a file.
    pub tail_read_size: usize,
    /// Upper bound on rows of a merged micro-partition.
    pub split_threshold: usize,
}

impl Default for ColumnarConfig {
    fn default() -> Self {
        Self {
            group_limit: DEFAULT_GROUP_LIMIT,
            group_size_limit: DEFAULT_GROUP_SIZE_LIMIT,
            storage_format: StorageFormat::RowMajor,
            default_encoding: EncodingOption::default(),
            toast: ToastOptions::default(),
            tail_read_size: DEFAULT_TAIL_READ_SIZE,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
        }
    }
}

impl ColumnarConfig {
    pub fn validate(&self) -> Result<()> {
        if self.group_limit == 0 {
            return Err(Error::Config("group_limit must be positive".into()));
        }
        if self.group_size_limit == 0 {
            return Err(Error::Config("group_size_limit must be positive".into()));
        }
        if self.tail_read_size < crate::format::POST_SCRIPT_SIZE {
            return Err(Error::Config(format!(
                "tail_read_size must be at least {} bytes",
                crate::format::POST_SCRIPT_SIZE
            )));
        }
        if self.split_threshold == 0 {
            return Err(Error::Config("split_threshold must be positive".into()));
        }
        if self.toast.enabled {
            if self.toast.external_threshold < self.toast.threshold {
                return Err(Error::Config(
                    "toast external_threshold must not be below threshold".into(),
                ));
            }
            if !self.toast.compression.is_block() {
                return Err(Error::Config(format!(
                    "toast compression must be a block codec, got {:?}",
                    self.toast.compression
                )));
            }
        }
        let kinds = [
            self.default_encoding.kind,
            self.default_encoding.lengths_kind,
            self.toast.compression,
        ];
        if !cfg!(feature = "zstd-compression") && kinds.contains(&EncodingKind::CompressZstd) {
            return Err(Error::Config(
                "zstd encoding requires the 'zstd-compression' feature".into(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("JSON parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("JSON serialize error: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Applies `LIGHTNING_COLUMNAR_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        fn parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
            match std::env::var(name) {
                Ok(value) => value
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::Config(format!("Invalid {}: {}", name, value))),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = parse("LIGHTNING_COLUMNAR_GROUP_LIMIT")? {
            self.group_limit = v;
        }
        if let Some(v) = parse("LIGHTNING_COLUMNAR_GROUP_SIZE_LIMIT")? {
            self.group_size_limit = v;
        }
        if let Some(v) = parse("LIGHTNING_COLUMNAR_TAIL_READ_SIZE")? {
            self.tail_read_size = v;
        }
        if let Some(v) = parse("LIGHTNING_COLUMNAR_SPLIT_THRESHOLD")? {
            self.split_threshold = v;
        }
        if let Some(v) = parse("LIGHTNING_COLUMNAR_TOAST_ENABLED")? {
            self.toast.enabled = v;
        }
        if let Ok(format) = std::env::var("LIGHTNING_COLUMNAR_STORAGE_FORMAT") {
            self.storage_format = match format.to_ascii_lowercase().as_str() {
                "row_major" | "rowmajor" => StorageFormat::RowMajor,
                "columnar" => StorageFormat::Columnar,
                _ => {
                    return Err(Error::Config(format!(
                        "Invalid LIGHTNING_COLUMNAR_STORAGE_FORMAT: {}",
                        format
                    )))
                }
            };
        }
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = ColumnarConfig::default();
        config.validate().unwrap();
        assert_eq!(config.group_limit, 131072);
        assert_eq!(config.tail_read_size, 16 * 1024);
    }

    #[test]
    fn test_validation_errors() {
        let config = ColumnarConfig {
            group_limit: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = ColumnarConfig::default();
        config.toast.external_threshold = 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = ColumnarConfig::default();
        config.toast.compression = EncodingKind::RleV2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_and_partial_input() {
        let mut config = ColumnarConfig::default();
        config.storage_format = StorageFormat::Columnar;
        config.group_limit = 1000;
        let text = config.to_json_string().unwrap();
        assert_eq!(ColumnarConfig::from_json_str(&text).unwrap(), config);

        let partial = ColumnarConfig::from_json_str(r#"{"group_limit": 42}"#).unwrap();
        assert_eq!(partial.group_limit, 42);
        assert_eq!(partial.split_threshold, DEFAULT_SPLIT_THRESHOLD);

        assert!(ColumnarConfig::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("columnar.json");
        std::fs::write(&path, r#"{"group_size_limit": 4096}"#).unwrap();
        assert_eq!(ColumnarConfig::from_file(&path).unwrap().group_size_limit, 4096);
        assert!(ColumnarConfig::from_file(&dir.path().join("missing.json")).is_err());
    }
}
