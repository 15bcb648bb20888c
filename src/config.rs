//! Configuration for compatibility runs
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (compat.toml)
//! - Environment variables (COMPAT__*)
//!
//! ## Example config file (compat.toml):
//! ```toml
//! [layout]
//! root = "./test-data"
//! dataset_dir = "datasets"
//! version_prefix = "release-"
//!
//! [conversion]
//! delimiter = "|"
//! variants = ["plain", "dict"]
//!
//! [comparison]
//! max_rows_in_memory = 100000
//!
//! [runner]
//! current_version = "1.2.0"
//! concurrency = 4
//! external_producers = ["external"]
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::equivalence::{SortConfig, DEFAULT_MAX_ROWS_IN_MEMORY};
use crate::format::{EncodeOptions, DEFAULT_ROW_GROUP_SIZE};
use crate::locate::ArtifactLayout;
use crate::transcode::{RecordTranscoder, DEFAULT_DELIMITER};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatConfig {
    /// Directory layout and file naming
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Text and columnar conversion settings
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Row comparison settings
    #[serde(default)]
    pub comparison: ComparisonConfig,

    /// Matrix runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Test-data root
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Reference text and schema files, relative to root
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: PathBuf,

    /// Where this release writes its artifacts; `<root>/<prefix><current>` when unset
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Prefix of per-release directory names
    #[serde(default = "default_version_prefix")]
    pub version_prefix: String,

    /// Per-producer artifact trees, relative to root
    #[serde(default = "default_external_dir")]
    pub external_dir: PathBuf,

    #[serde(default = "default_text_extension")]
    pub text_extension: String,

    #[serde(default = "default_schema_extension")]
    pub schema_extension: String,

    #[serde(default = "default_columnar_extension")]
    pub columnar_extension: String,
}

/// Conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Field delimiter of text artifacts
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Encoding variants written and checked for every dataset
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,

    /// Rows per columnar row group
    #[serde(default = "default_row_group_size")]
    pub row_group_size: usize,

    /// Delete previous outputs before regenerating
    #[serde(default = "default_true")]
    pub replace_existing: bool,
}

/// Comparison configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Rows per in-memory chunk of the external sort
    #[serde(default = "default_max_rows_in_memory")]
    pub max_rows_in_memory: usize,

    /// Parent directory for sort scratch space
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Release under test
    #[serde(default = "default_current_version")]
    pub current_version: String,

    /// Worker threads; 0 uses one per core
    #[serde(default)]
    pub concurrency: usize,

    /// Producer tags to check under the external directory
    #[serde(default = "default_external_producers")]
    pub external_producers: Vec<String>,

    /// Fail instead of skipping when a prior release lacks an artifact
    #[serde(default)]
    pub require_prior_artifacts: bool,
}

// Default value functions
fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_dataset_dir() -> PathBuf {
    PathBuf::from("datasets")
}

fn default_version_prefix() -> String {
    "release-".to_string()
}

fn default_external_dir() -> PathBuf {
    PathBuf::from("external")
}

fn default_text_extension() -> String {
    "csv".to_string()
}

fn default_schema_extension() -> String {
    "schema".to_string()
}

fn default_columnar_extension() -> String {
    "col".to_string()
}

fn default_delimiter() -> char {
    DEFAULT_DELIMITER
}

fn default_variants() -> Vec<String> {
    vec!["plain".to_string(), "dict".to_string()]
}

fn default_row_group_size() -> usize {
    DEFAULT_ROW_GROUP_SIZE
}

fn default_true() -> bool {
    true
}

fn default_max_rows_in_memory() -> usize {
    DEFAULT_MAX_ROWS_IN_MEMORY
}

fn default_current_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_external_producers() -> Vec<String> {
    vec!["external".to_string()]
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            dataset_dir: default_dataset_dir(),
            output_dir: None,
            version_prefix: default_version_prefix(),
            external_dir: default_external_dir(),
            text_extension: default_text_extension(),
            schema_extension: default_schema_extension(),
            columnar_extension: default_columnar_extension(),
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            variants: default_variants(),
            row_group_size: default_row_group_size(),
            replace_existing: true,
        }
    }
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            max_rows_in_memory: default_max_rows_in_memory(),
            scratch_dir: None,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            current_version: default_current_version(),
            concurrency: 0,
            external_producers: default_external_producers(),
            require_prior_artifacts: false,
        }
    }
}

impl CompatConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["compat.toml", ".compat.toml", "config/compat.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "columnar", "compat") {
            let xdg_config = config_dir.config_dir().join("compat.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // COMPAT__RUNNER__CONCURRENCY=4
        builder = builder.add_source(
            Environment::with_prefix("COMPAT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)
    }

    /// Test-data root (resolves relative paths)
    pub fn root(&self) -> PathBuf {
        if self.layout.root.is_absolute() {
            self.layout.root.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.layout.root)
        }
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.root().join(&self.layout.dataset_dir)
    }

    pub fn external_dir(&self) -> PathBuf {
        self.root().join(&self.layout.external_dir)
    }

    /// Output directory for the release under test
    pub fn output_dir(&self, current: &crate::version::VersionId) -> PathBuf {
        match &self.layout.output_dir {
            Some(dir) => self.root().join(dir),
            None => self.root().join(self.artifact_layout().version_dir_name(current)),
        }
    }

    pub fn artifact_layout(&self) -> ArtifactLayout {
        ArtifactLayout {
            text_extension: self.layout.text_extension.clone(),
            schema_extension: self.layout.schema_extension.clone(),
            columnar_extension: self.layout.columnar_extension.clone(),
            version_prefix: self.layout.version_prefix.clone(),
        }
    }

    pub fn transcoder(&self) -> RecordTranscoder {
        RecordTranscoder::new(self.conversion.delimiter)
    }

    pub fn encode_options(&self, variant: &str) -> EncodeOptions {
        EncodeOptions::for_variant(variant, self.conversion.row_group_size.max(1))
    }

    pub fn sort_config(&self) -> SortConfig {
        SortConfig {
            max_rows_in_memory: self.comparison.max_rows_in_memory,
            scratch_dir: self.comparison.scratch_dir.clone(),
        }
    }
}
