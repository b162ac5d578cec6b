//! Configuration System
//!
//! Layered configuration for clustering parameters, session staging and
//! logging. Sources are merged in order: built-in defaults, the global file,
//! the workspace file, then `CANOPY__`-prefixed environment variables.

use crate::error::ClusterError;
use crate::logging::LoggingConfig;
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use sources::global_file::global_config_path;
pub use sources::workspace_file::WORKSPACE_CONFIG_FILE;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanopyConfig {
    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Parameters of the canonical ordering function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Maximum direct entries in a leaf before it splits into buckets
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,

    /// Bits of the sort key consumed by the root's buckets
    #[serde(default = "default_root_bucket_bits")]
    pub root_bucket_bits: u32,

    /// Bits consumed at every level below the root
    #[serde(default = "default_level_bucket_bits")]
    pub level_bucket_bits: u32,
}

fn default_size_limit() -> usize {
    512
}

fn default_root_bucket_bits() -> u32 {
    5
}

fn default_level_bucket_bits() -> u32 {
    3
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            size_limit: default_size_limit(),
            root_bucket_bits: default_root_bucket_bits(),
            level_bucket_bits: default_level_bucket_bits(),
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.size_limit == 0 {
            return Err("size_limit must be greater than zero".to_string());
        }
        for (field, bits) in [
            ("root_bucket_bits", self.root_bucket_bits),
            ("level_bucket_bits", self.level_bucket_bits),
        ] {
            if !(1..=8).contains(&bits) {
                return Err(format!("{} must be between 1 and 8, got {}", field, bits));
            }
        }
        Ok(())
    }
}

/// Where a session keeps its staged DAGs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Heap,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Object store location, relative to the workspace root unless absolute
    #[serde(default = "default_object_store_path")]
    pub object_store_path: PathBuf,
}

fn default_object_store_path() -> PathBuf {
    PathBuf::from(".canopy/objects")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            object_store_path: default_object_store_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.object_store_path.as_os_str().is_empty() {
            return Err("object_store_path cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn resolve_object_store_path(&self, workspace_root: &Path) -> PathBuf {
        if self.object_store_path.is_absolute() {
            self.object_store_path.clone()
        } else {
            workspace_root.join(&self.object_store_path)
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Clustering(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Clustering(msg) => write!(f, "Clustering: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl CanopyConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if let Err(e) = self.clustering.validate() {
            errors.push(ValidationError::Clustering(e));
        }
        if let Err(e) = self.storage.validate() {
            errors.push(ValidationError::Storage(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one error
    pub fn ensure_valid(&self) -> Result<(), ClusterError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ClusterError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })
    }
}

/// Loads [`CanopyConfig`] from its layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, `<workspace_root>/canopy.toml`, then environment.
    pub fn load(workspace_root: &Path) -> Result<CanopyConfig, ClusterError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(Environment::with_prefix("CANOPY").separator("__"));

        let config: CanopyConfig = builder.build()?.try_deserialize()?;
        config.ensure_valid()?;
        debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// A single file layered over the defaults
    pub fn load_from_file(path: &Path) -> Result<CanopyConfig, ClusterError> {
        let config: CanopyConfig = merge::merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Built-in defaults only
    pub fn defaults() -> Result<CanopyConfig, ClusterError> {
        let config: CanopyConfig = merge::merge_policy::builder_with_defaults()?
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
