use serde::Deserialize;
use std::path::PathBuf;

// =============================================================================
// Validation limits
// =============================================================================

/// Minimum length of a module name.
pub const MODULE_NAME_MIN_LEN: usize = 3;

/// Maximum length of a module name.
pub const MODULE_NAME_MAX_LEN: usize = 64;

/// Maximum number of tags a module may carry.
pub const MAX_TAGS: usize = 8;

// =============================================================================
// Query pagination
// =============================================================================

/// Default number of modules per query page.
pub const DEFAULT_QUERY_LIMIT: usize = 25;

/// Largest accepted query page size.
pub const MAX_QUERY_LIMIT: usize = 100;

// =============================================================================
// Cache TTLs
// =============================================================================

/// How long the distinct-tags cache stays fresh (5 minutes).
pub const TAGS_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// How long the known-mod-versions cache stays fresh (1 hour).
pub const MOD_VERSIONS_CACHE_TTL_MS: u64 = 60 * 60 * 1000;

/// Registry configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// When true, server-side error detail is redacted from responses.
    pub production: bool,
    pub cache: CacheConfig,
}

/// Cache-related configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Tags cache TTL in milliseconds
    pub tags_ttl: u64,
    /// Known-mod-versions cache TTL in milliseconds
    pub mod_versions_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tags_ttl: TAGS_CACHE_TTL_MS,
            mod_versions_ttl: MOD_VERSIONS_CACHE_TTL_MS,
        }
    }
}

/// Returns the path to the data directory for modshelf.
/// Uses $XDG_DATA_HOME/modshelf if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/modshelf,
/// or ./modshelf if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the registry database file.
pub fn db_path() -> PathBuf {
    data_dir().join("registry.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("modshelf.log")
}

/// Returns the root directory for stored release artifacts.
pub fn artifacts_dir() -> PathBuf {
    data_dir().join("artifacts")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("modshelf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_config_from_partial_object_uses_defaults_for_missing_fields() {
        let result = serde_json::from_value::<RegistryConfig>(json!({
            "cache": {
                "tagsTtl": 1000
            }
        }))
        .unwrap();

        assert_eq!(result.cache.tags_ttl, 1000);
        assert_eq!(result.cache.mod_versions_ttl, MOD_VERSIONS_CACHE_TTL_MS);
        assert!(!result.production);
    }

    #[test]
    fn registry_config_from_full_object_parses_all_fields() {
        let result = serde_json::from_value::<RegistryConfig>(json!({
            "production": true,
            "cache": {
                "tagsTtl": 5000,
                "modVersionsTtl": 9000
            }
        }))
        .unwrap();

        assert_eq!(
            result,
            RegistryConfig {
                production: true,
                cache: CacheConfig {
                    tags_ttl: 5000,
                    mod_versions_ttl: 9000,
                },
            }
        );
    }

    #[test]
    fn data_dir_with_env_uses_xdg_data_home_when_set() {
        let path = data_dir_with_env(
            Some("/tmp/test-data".to_string()),
            Some(PathBuf::from("/home/user")),
        );

        assert_eq!(path, PathBuf::from("/tmp/test-data/modshelf"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_home_local_share() {
        let path = data_dir_with_env(None, Some(PathBuf::from("/home/user")));

        assert_eq!(path, PathBuf::from("/home/user/.local/share/modshelf"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_current_dir_when_no_dirs_available() {
        let path = data_dir_with_env(None, None);
        assert_eq!(path, PathBuf::from("./modshelf"));
    }
}
