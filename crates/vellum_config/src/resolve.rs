//! Persistence directory resolution.

use crate::error::ConfigError;
use crate::types::CacheConfig;
use std::path::PathBuf;

/// Environment variable overriding the cache root when the config has none.
pub const CACHE_DIR_ENV: &str = "VELLUM_CACHE_DIR";

/// Concrete directories derived from a [`CacheConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// The cache root.
    pub root: PathBuf,
    /// `<root>/originals/<originals>`.
    pub originals_dir: PathBuf,
    /// `<root>/renders/<originals>-<renders>`.
    pub renders_dir: PathBuf,
}

/// Resolves persistence directories, consulting `$VELLUM_CACHE_DIR` when the
/// configuration does not name a root.
pub fn resolve_paths(config: &CacheConfig) -> Result<ResolvedPaths, ConfigError> {
    let env_root = std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from);
    resolve_paths_with(config, env_root)
}

/// Resolves persistence directories with an explicit fallback root.
///
/// Precedence: `storage.root`, then `env_root`, then `<tmp>/vellum`. An empty
/// fallback is rejected so a store is never opened relative to an unknown
/// working directory by accident.
pub fn resolve_paths_with(
    config: &CacheConfig,
    env_root: Option<PathBuf>,
) -> Result<ResolvedPaths, ConfigError> {
    let root = match (&config.storage.root, env_root) {
        (Some(root), _) => root.clone(),
        (None, Some(env)) if env.as_os_str().is_empty() => {
            return Err(ConfigError::EmptyRoot {
                origin: CACHE_DIR_ENV,
            });
        }
        (None, Some(env)) => env,
        (None, None) => std::env::temp_dir().join("vellum"),
    };

    let originals = &config.storage.originals;
    let renders = &config.storage.renders;
    Ok(ResolvedPaths {
        originals_dir: root.join("originals").join(originals),
        renders_dir: root.join("renders").join(format!("{originals}-{renders}")),
        root,
    })
}
