//! Searcher cache configuration
//!
//! Two ways in:
//! - Builder: `SearcherCacheConfig::default().num_search_threads(4)`
//! - YAML (schema v1): `SearcherCacheConfig::from_yaml("searcher.yaml")?`
//!
//! ```yaml
//! version: 1
//! num_search_threads: -1      # <0 auto, 0 inline, >0 fixed
//! thread_group: search-pool
//! refresh_on_fetch: true
//! ```

pub mod error;

pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::execution::ThreadPoolSize;

/// Supported YAML schema versions
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Upper bound for an explicit pool size
pub const MAX_SEARCH_THREADS: i32 = 4096;

pub const DEFAULT_THREAD_GROUP: &str = "search-pool";

/// Searcher cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearcherCacheConfig {
    /// Search pool size: `<0` auto (`2 + 2 * cpus`), `0` no pool, `>0` fixed
    pub num_search_threads: i32,

    /// Thread group name; workers are named `{thread_group}-thread-N`
    pub thread_group: String,

    /// Best-effort refresh of an already open index on every fetch
    pub refresh_on_fetch: bool,
}

impl Default for SearcherCacheConfig {
    fn default() -> Self {
        Self {
            num_search_threads: -1,
            thread_group: DEFAULT_THREAD_GROUP.to_string(),
            refresh_on_fetch: true,
        }
    }
}

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    num_search_threads: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    thread_group: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_on_fetch: Option<bool>,
}

impl SearcherCacheConfig {
    pub fn num_search_threads(mut self, threads: i32) -> Self {
        self.num_search_threads = threads;
        self
    }

    pub fn thread_group(mut self, group: impl Into<String>) -> Self {
        self.thread_group = group.into();
        self
    }

    pub fn refresh_on_fetch(mut self, enabled: bool) -> Self {
        self.refresh_on_fetch = enabled;
        self
    }

    /// Sizing policy derived from `num_search_threads`
    pub fn pool_size(&self) -> ThreadPoolSize {
        ThreadPoolSize::from_setting(self.num_search_threads)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.num_search_threads > MAX_SEARCH_THREADS {
            return Err(ConfigError::Range {
                field: "num_search_threads".to_string(),
                value: self.num_search_threads.to_string(),
                min: i32::MIN.to_string(),
                max: MAX_SEARCH_THREADS.to_string(),
                hint: "Use a negative value to size the pool from the CPU count.".to_string(),
            });
        }

        if self.thread_group.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "thread_group".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.thread_group.contains('\0') {
            return Err(ConfigError::Invalid {
                field: "thread_group".to_string(),
                reason: "thread names cannot contain NUL bytes".to_string(),
            });
        }

        Ok(())
    }

    /// Load and validate a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(yaml)?;

        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let mut config = Self::default();
        if let Some(threads) = file.num_search_threads {
            config.num_search_threads = threads;
        }
        if let Some(group) = file.thread_group {
            config.thread_group = group;
        }
        if let Some(refresh) = file.refresh_on_fetch {
            config.refresh_on_fetch = refresh;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            num_search_threads: Some(self.num_search_threads),
            thread_group: Some(self.thread_group.clone()),
            refresh_on_fetch: Some(self.refresh_on_fetch),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_auto_size() {
        let config = SearcherCacheConfig::default();
        assert_eq!(config.num_search_threads, -1);
        assert_eq!(config.pool_size(), ThreadPoolSize::Auto);
        assert_eq!(config.thread_group, "search-pool");
        assert!(config.refresh_on_fetch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = SearcherCacheConfig::default()
            .num_search_threads(3)
            .thread_group("batch-search")
            .refresh_on_fetch(false);

        assert_eq!(config.pool_size(), ThreadPoolSize::Fixed(3));
        assert_eq!(config.thread_group, "batch-search");
        assert!(!config.refresh_on_fetch);
    }

    #[test]
    fn test_yaml_loading() {
        let yaml_content = r#"
version: 1
num_search_threads: 0
thread_group: web-search
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = SearcherCacheConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.pool_size(), ThreadPoolSize::Disabled);
        assert_eq!(config.thread_group, "web-search");
        // untouched fields keep their defaults
        assert!(config.refresh_on_fetch);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = SearcherCacheConfig::default().num_search_threads(8);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("num_search_threads: 8"));

        let loaded = SearcherCacheConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = SearcherCacheConfig::from_yaml_str("num_search_threads: 2\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = SearcherCacheConfig::from_yaml_str("version: 7\n");
        match result {
            Err(ConfigError::UnsupportedVersion { found, supported }) => {
                assert_eq!(found, 7);
                assert_eq!(supported, vec![1]);
            }
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let result = SearcherCacheConfig::from_yaml_str("version: 1\nsearch_threads: 2\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_validate_range() {
        let config = SearcherCacheConfig::default().num_search_threads(MAX_SEARCH_THREADS + 1);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Range { .. }));
        assert!(err.to_string().contains("num_search_threads"));
        assert!(err.to_string().contains("-2147483648..=4096"));

        // every negative value is a valid auto-size request
        let lowest = SearcherCacheConfig::default().num_search_threads(i32::MIN);
        assert!(lowest.validate().is_ok());
    }

    #[test]
    fn test_validate_thread_group() {
        let empty = SearcherCacheConfig::default().thread_group("  ");
        assert!(matches!(empty.validate(), Err(ConfigError::Invalid { .. })));

        let nul = SearcherCacheConfig::default().thread_group("search\0pool");
        assert!(matches!(nul.validate(), Err(ConfigError::Invalid { .. })));
    }
}
