//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("clustering.size_limit", 512)?
        .set_default("clustering.root_bucket_bits", 5)?
        .set_default("clustering.level_bucket_bits", 3)?
        .set_default("storage.backend", "heap")?
        .set_default("storage.object_store_path", ".canopy/objects")
}
