//! Configuration parsing.
//!
//! Handles loading export configuration from YAML files. Command-line flags
//! are layered on top by the binary before validation.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyDestinationSnafu, InvalidDelimiterSnafu, ReadFileSnafu, YamlParseSnafu,
};
use crate::pipeline::ExportOptions;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Main configuration structure for an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where records are read from.
    #[serde(default)]
    pub source: SourceConfig,
    /// Where the compressed CSV is written.
    pub destination: DestinationConfig,
    /// CSV output options.
    #[serde(default)]
    pub csv: CsvConfig,
    /// Gzip options.
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Multipart upload options.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Record source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Delimited text file to read, or "-" for stdin (default: "-").
    #[serde(default = "default_source_path")]
    pub path: String,

    /// Field delimiter of the input (default: ',').
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Whether the first input record holds the column names (default: true).
    #[serde(default = "default_true")]
    pub has_headers: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            delimiter: default_delimiter(),
            has_headers: true,
        }
    }
}

fn default_source_path() -> String {
    "-".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

/// Convert a configured delimiter to the single byte the CSV layer uses.
pub fn delimiter_byte(delimiter: char) -> Result<u8, ConfigError> {
    ensure!(delimiter.is_ascii(), InvalidDelimiterSnafu { delimiter });
    Ok(delimiter as u8)
}

/// Destination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Object URL or local path.
    /// Examples: "s3://bucket/exports/orders.csv.gz", "/tmp/orders.csv.gz"
    pub path: String,

    /// Storage options (credentials, region, endpoint, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// CSV output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    /// Output field delimiter (default: ',').
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Write a header row before the data (default: true).
    #[serde(default = "default_true")]
    pub write_headers: bool,

    /// Header names to write instead of the source column names.
    #[serde(default)]
    pub headers: Option<Vec<String>>,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            write_headers: true,
            headers: None,
        }
    }
}

/// Gzip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Gzip level, 0-9 (default: 6).
    #[serde(default = "default_compression_level")]
    pub level: u32,

    /// Uncompressed bytes buffered between compressor flushes in KB (default: 1024).
    #[serde(default = "default_flush_size_kb")]
    pub flush_size_kb: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: default_compression_level(),
            flush_size_kb: default_flush_size_kb(),
        }
    }
}

fn default_compression_level() -> u32 {
    6
}

fn default_flush_size_kb() -> usize {
    1024
}

/// Multipart upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Target size per multipart part in MB (default: 50)
    #[serde(default = "default_part_size_mb")]
    pub part_size_mb: usize,

    /// Smallest non-final part the store accepts, in MB (default: 5)
    #[serde(default = "default_min_part_size_mb")]
    pub min_part_size_mb: usize,

    /// Maximum number of parts per upload (default: 10000)
    #[serde(default = "default_max_parts")]
    pub max_parts: u32,

    /// Concurrent part uploads (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Parts buffered between producer and workers (default: same as workers)
    #[serde(default)]
    pub queue_depth: Option<usize>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size_mb: default_part_size_mb(),
            min_part_size_mb: default_min_part_size_mb(),
            max_parts: default_max_parts(),
            workers: default_workers(),
            queue_depth: None,
        }
    }
}

impl UploadConfig {
    /// Queue depth, falling back to the worker count.
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.workers)
    }
}

fn default_part_size_mb() -> usize {
    50
}

fn default_min_part_size_mb() -> usize {
    5
}

fn default_max_parts() -> u32 {
    10_000
}

fn default_workers() -> usize {
    4
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Configuration with defaults for everything but the destination.
    pub fn for_destination(path: impl Into<String>) -> Self {
        Self {
            source: SourceConfig::default(),
            destination: DestinationConfig {
                path: path.into(),
                storage_options: HashMap::new(),
            },
            csv: CsvConfig::default(),
            compression: CompressionConfig::default(),
            upload: UploadConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// The result is not validated yet, since command-line overrides may
    /// still be applied. Call [`Config::validate`] afterwards.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).context(YamlParseSnafu)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.destination.path.is_empty(), EmptyDestinationSnafu);
        delimiter_byte(self.source.delimiter)?;
        ExportOptions::from_config(self)?;
        Ok(())
    }
}
