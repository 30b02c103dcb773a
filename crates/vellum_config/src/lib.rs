//! Parsing and validation of `vellum.toml` cache configuration files.
//!
//! This crate reads the cache configuration file and produces a strongly-typed
//! [`CacheConfig`], then resolves it into the concrete persistence directories
//! used by the original store and the render cache.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE};
pub use resolve::{resolve_paths, resolve_paths_with, ResolvedPaths, CACHE_DIR_ENV};
pub use types::*;
