//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::CacheConfig;
use std::path::Path;

/// Name of the configuration file looked up in a directory.
pub const CONFIG_FILE: &str = "vellum.toml";

/// Loads and validates a `vellum.toml` configuration from a directory.
///
/// Reads `<dir>/vellum.toml`, parses it, and validates it.
pub fn load_config(dir: &Path) -> Result<CacheConfig, ConfigError> {
    load_config_file(&dir.join(CONFIG_FILE))
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<CacheConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    load_config_from_str(&content)
}

/// Parses and validates a `vellum.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<CacheConfig, ConfigError> {
    let config: CacheConfig = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Returns `true` if `name` can be used as a single directory component.
pub(crate) fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Validates store names and numeric bounds.
fn validate_config(config: &CacheConfig) -> Result<(), ConfigError> {
    let names = [
        ("storage.originals", &config.storage.originals),
        ("storage.renders", &config.storage.renders),
    ];
    if let Some((field, name)) = names.into_iter().find(|(_, name)| !is_safe_component(name)) {
        return Err(ConfigError::InvalidStoreName {
            field,
            name: name.clone(),
        });
    }
    let counts = [
        ("render.max_mapped_entries", config.render.max_mapped_entries),
        ("workers.threads", config.workers.threads),
    ];
    if let Some((field, _)) = counts.into_iter().find(|(_, n)| *n == Some(0)) {
        return Err(ConfigError::Zero { field });
    }
    if config
        .storage
        .root
        .as_ref()
        .is_some_and(|root| root.as_os_str().is_empty())
    {
        return Err(ConfigError::EmptyRoot {
            origin: "storage.root",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.storage.originals, "default");
        assert!(config.render.opaque);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[storage]
root = "/var/cache/vellum"
originals = "avatars"
renders = "thumbs"
purge_renders_on_start = true

[render]
opaque = false
max_mapped_entries = 256

[workers]
threads = 3
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(
            config.storage.root.as_deref(),
            Some(Path::new("/var/cache/vellum"))
        );
        assert_eq!(config.storage.originals, "avatars");
        assert_eq!(config.storage.renders, "thumbs");
        assert!(config.storage.purge_renders_on_start);
        assert!(!config.render.opaque);
        assert_eq!(config.render.max_mapped_entries, Some(256));
        assert_eq!(config.workers.threads, Some(3));
    }

    #[test]
    fn store_name_with_separator_errors() {
        let toml = r#"
[storage]
originals = "a/b"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidStoreName {
                field: "storage.originals",
                ..
            }
        ));
    }

    #[test]
    fn dot_dot_store_name_errors() {
        let err = load_config_from_str("[storage]\nrenders = \"..\"\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidStoreName {
                field: "storage.renders",
                ..
            }
        ));
    }

    #[test]
    fn zero_mapped_entries_errors() {
        let err = load_config_from_str("[render]\nmax_mapped_entries = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Zero {
                field: "render.max_mapped_entries"
            }
        ));
    }

    #[test]
    fn zero_threads_errors() {
        let err = load_config_from_str("[workers]\nthreads = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Zero {
                field: "workers.threads"
            }
        ));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[storage]\nrenders = \"grid\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.storage.renders, "grid");
    }

    #[test]
    fn load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[workers]\nthreads = 3\n").unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.workers.threads, Some(3));
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        match err {
            ConfigError::Read { path, .. } => {
                assert_eq!(path, Path::new("/nonexistent/dir").join(CONFIG_FILE));
            }
            other => panic!("expected Read error, got {other:?}"),
        }
    }

    #[test]
    fn empty_root_errors() {
        let err = load_config_from_str("[storage]\nroot = \"\"\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EmptyRoot {
                origin: "storage.root"
            }
        ));
    }

    #[test]
    fn wrong_type_is_parse_error() {
        let err = load_config_from_str("[render]\nopaque = \"yes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn safe_components() {
        assert!(is_safe_component("thumbs-2x"));
        assert!(is_safe_component("v1.2"));
        assert!(!is_safe_component(""));
        assert!(!is_safe_component("."));
        assert!(!is_safe_component("a b"));
        assert!(!is_safe_component("a\\b"));
    }
}
