//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Why a `vellum.toml` could not be turned into a usable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// The file that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML content is malformed or has fields of the wrong type.
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A store name is empty or not a single safe path component.
    #[error("{field} must be a plain directory name, got '{name}'")]
    InvalidStoreName {
        /// The offending key, e.g. `storage.renders`.
        field: &'static str,
        /// The rejected value.
        name: String,
    },

    /// A numeric setting is zero where at least one is required.
    #[error("{field} must be at least 1")]
    Zero {
        /// The offending key, e.g. `workers.threads`.
        field: &'static str,
    },

    /// A configured or inherited cache root is the empty path.
    #[error("cache root from {origin} is empty")]
    EmptyRoot {
        /// Where the root came from: the config key or an environment variable.
        origin: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_store_name_names_the_field() {
        let err = ConfigError::InvalidStoreName {
            field: "storage.originals",
            name: "../x".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "storage.originals must be a plain directory name, got '../x'"
        );
    }

    #[test]
    fn zero_display() {
        let err = ConfigError::Zero {
            field: "workers.threads",
        };
        assert_eq!(err.to_string(), "workers.threads must be at least 1");
    }

    #[test]
    fn empty_root_display() {
        let err = ConfigError::EmptyRoot {
            origin: "VELLUM_CACHE_DIR",
        };
        assert_eq!(err.to_string(), "cache root from VELLUM_CACHE_DIR is empty");
    }

    #[test]
    fn read_error_includes_path() {
        let err = ConfigError::Read {
            path: PathBuf::from("/etc/vellum.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let display = err.to_string();
        assert!(display.starts_with("cannot read /etc/vellum.toml"));
        assert!(display.contains("file not found"));
    }

    #[test]
    fn parse_error_wraps_toml() {
        let toml_err = toml::from_str::<toml::Value>("a = {").unwrap_err();
        let err = ConfigError::from(toml_err);
        assert!(err.to_string().starts_with("malformed configuration:"));
    }
}
