//! Configuration types deserialized from `vellum.toml`.

use serde::Deserialize;
use std::path::PathBuf;

/// The top-level cache configuration parsed from `vellum.toml`.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Where originals and rendered artifacts live on disk.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Render cache behavior (opacity, mapping bound).
    #[serde(default)]
    pub render: RenderConfig,
    /// Background worker pool sizing.
    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Persistence locations and store names.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all cache data. Falls back to `$VELLUM_CACHE_DIR`,
    /// then to `<tmp>/vellum`.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Name of the original store.
    #[serde(default = "default_originals_name")]
    pub originals: String,
    /// Name of the render cache.
    #[serde(default = "default_renders_name")]
    pub renders: String,
    /// Delete every rendered artifact when the render cache is opened.
    #[serde(default)]
    pub purge_renders_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            originals: default_originals_name(),
            renders: default_renders_name(),
            purge_renders_on_start: false,
        }
    }
}

fn default_originals_name() -> String {
    "default".to_string()
}

fn default_renders_name() -> String {
    "renders".to_string()
}

/// Render cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Render opaque artifacts (alpha ignored, black background).
    #[serde(default = "default_opaque")]
    pub opaque: bool,
    /// Upper bound on simultaneously mapped artifacts. Unbounded when absent.
    #[serde(default)]
    pub max_mapped_entries: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            opaque: default_opaque(),
            max_mapped_entries: None,
        }
    }
}

fn default_opaque() -> bool {
    true
}

/// Worker pool settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    /// Number of I/O worker threads. Uses the pool's default when absent.
    #[serde(default)]
    pub threads: Option<usize>,
}
