//! Loader configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LoaderError, Result};

/// What happens when one loader fetches the same URL twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Every load fetches again.
    #[default]
    None,
    /// Successful responses are kept per URL for the loader's lifetime.
    PerUrl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderConfig {
    /// Directory that non-HTTP references are read from.
    pub root: PathBuf,
    /// Connect/read/write timeout for HTTP fetches, in milliseconds.
    pub timeout_ms: u64,
    /// Prefix of the per-component scope attribute.
    pub scope_prefix: String,
    pub cache: CachePolicy,
    /// Named dependencies available to `require`.
    pub dependencies: HashMap<String, Value>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            timeout_ms: 30_000,
            scope_prefix: "data-s-".to_string(),
            cache: CachePolicy::None,
            dependencies: HashMap::new(),
        }
    }
}

impl LoaderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LoaderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.scope_prefix.is_empty()
            || !self
                .scope_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(LoaderError::Config(format!(
                "scopePrefix '{}' is not a valid attribute name prefix",
                self.scope_prefix
            )));
        }
        if self.timeout_ms == 0 {
            return Err(LoaderError::Config("timeoutMs must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.scope_prefix, "data-s-");
        assert_eq!(config.cache, CachePolicy::None);
        assert_eq!(config.root, PathBuf::from("."));
    }

    #[test]
    fn test_from_json_partial() {
        let config = LoaderConfig::from_json_str(
            r#"{ "root": "public", "cache": "per-url", "dependencies": { "version": "1.2" } }"#,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("public"));
        assert_eq!(config.cache, CachePolicy::PerUrl);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(
            config.dependencies.get("version"),
            Some(&Value::String("1.2".to_string()))
        );
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let err = LoaderConfig::from_json_str(r#"{ "scopePrefix": "data s" }"#).unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.json");
        std::fs::write(&path, r#"{ "timeoutMs": 500 }"#).unwrap();
        let config = LoaderConfig::from_file(&path).unwrap();
        assert_eq!(config.timeout_ms, 500);
    }
}
