//! Audit configuration
//!
//! Values can come from code through [`AuditConfig::builder`] or from the
//! process environment through [`AuditConfig::from_env`]:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LEXAUDIT_SYSTEM_VERSION` | `system_version` |
//! | `LEXAUDIT_EXECUTION_MODE` | `execution_mode` (`strict` / `permissive`) |
//! | `LEXAUDIT_CHUNK_PREFIX` | `chunk_prefix` |
//! | `LEXAUDIT_FUTURE_TOLERANCE_SECS` | `future_tolerance` |
//! | `LEXAUDIT_STORAGE_DIR` | `storage_dir` |

use std::path::PathBuf;

use chrono::Duration;

use crate::error::{AuditError, Result};
use crate::manifest::SchemaVersions;
use crate::trace::{ExecutionMode, DEFAULT_CHUNK_PREFIX, DEFAULT_FUTURE_TOLERANCE_SECS};

pub const ENV_SYSTEM_VERSION: &str = "LEXAUDIT_SYSTEM_VERSION";
pub const ENV_EXECUTION_MODE: &str = "LEXAUDIT_EXECUTION_MODE";
pub const ENV_CHUNK_PREFIX: &str = "LEXAUDIT_CHUNK_PREFIX";
pub const ENV_FUTURE_TOLERANCE_SECS: &str = "LEXAUDIT_FUTURE_TOLERANCE_SECS";
pub const ENV_STORAGE_DIR: &str = "LEXAUDIT_STORAGE_DIR";

/// Audit configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AuditConfig {
    /// Version string stamped on traces and manifests
    pub system_version: String,
    /// Versions of the schemas an audit depends on
    pub schema_versions: SchemaVersions,
    /// Mode recorded on new traces
    pub execution_mode: ExecutionMode,
    /// Evidence ids with this prefix are registered as chunk ids
    pub chunk_prefix: String,
    /// Clock-skew allowance for the future-timestamp replay check
    pub future_tolerance: Duration,
    /// Root directory for file storage
    pub storage_dir: Option<PathBuf>,
}

impl AuditConfig {
    /// Create a new configuration builder
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::default()
    }

    /// Defaults overlaid with the `LEXAUDIT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(version) = get(ENV_SYSTEM_VERSION) {
            builder = builder.system_version(version);
        }

        if let Some(mode) = get(ENV_EXECUTION_MODE) {
            let mode = mode
                .parse::<ExecutionMode>()
                .map_err(|reason| AuditError::InvalidConfig {
                    key: ENV_EXECUTION_MODE.to_string(),
                    reason,
                })?;
            builder = builder.execution_mode(mode);
        }

        if let Some(prefix) = get(ENV_CHUNK_PREFIX) {
            builder = builder.chunk_prefix(prefix);
        }

        if let Some(secs) = get(ENV_FUTURE_TOLERANCE_SECS) {
            let secs = secs
                .trim()
                .parse::<u32>()
                .map_err(|e| AuditError::InvalidConfig {
                    key: ENV_FUTURE_TOLERANCE_SECS.to_string(),
                    reason: format!("expected whole seconds: {}", e),
                })?;
            builder = builder.future_tolerance(Duration::seconds(i64::from(secs)));
        }

        if let Some(dir) = get(ENV_STORAGE_DIR) {
            builder = builder.storage_dir(dir);
        }

        Ok(builder.build())
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for AuditConfig
#[derive(Debug, Default)]
pub struct AuditConfigBuilder {
    system_version: Option<String>,
    schema_versions: Option<SchemaVersions>,
    execution_mode: Option<ExecutionMode>,
    chunk_prefix: Option<String>,
    future_tolerance: Option<Duration>,
    storage_dir: Option<PathBuf>,
}

impl AuditConfigBuilder {
    pub fn system_version(mut self, version: impl Into<String>) -> Self {
        self.system_version = Some(version.into());
        self
    }

    pub fn schema_versions(mut self, versions: SchemaVersions) -> Self {
        self.schema_versions = Some(versions);
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn chunk_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.chunk_prefix = Some(prefix.into());
        self
    }

    /// Negative tolerances are clamped to zero
    pub fn future_tolerance(mut self, tolerance: Duration) -> Self {
        self.future_tolerance = Some(tolerance.max(Duration::zero()));
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> AuditConfig {
        AuditConfig {
            system_version: self
                .system_version
                .unwrap_or_else(|| crate::SYSTEM_VERSION.to_string()),
            schema_versions: self.schema_versions.unwrap_or_default(),
            execution_mode: self.execution_mode.unwrap_or_default(),
            chunk_prefix: self
                .chunk_prefix
                .unwrap_or_else(|| DEFAULT_CHUNK_PREFIX.to_string()),
            future_tolerance: self
                .future_tolerance
                .unwrap_or_else(|| Duration::seconds(DEFAULT_FUTURE_TOLERANCE_SECS)),
            storage_dir: self.storage_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.system_version, crate::SYSTEM_VERSION);
        assert_eq!(config.execution_mode, ExecutionMode::Strict);
        assert_eq!(config.chunk_prefix, "chunk:");
        assert_eq!(config.future_tolerance, Duration::seconds(5));
        assert_eq!(config.schema_versions.trace, crate::trace::TRACE_SCHEMA_VERSION);
        assert!(config.storage_dir.is_none());
    }

    #[test]
    fn test_builder() {
        let config = AuditConfig::builder()
            .system_version("2.3.1")
            .execution_mode(ExecutionMode::Permissive)
            .chunk_prefix("ev")
            .future_tolerance(Duration::seconds(-3))
            .storage_dir("/tmp/audit")
            .build();

        assert_eq!(config.system_version, "2.3.1");
        assert_eq!(config.execution_mode, ExecutionMode::Permissive);
        assert_eq!(config.chunk_prefix, "ev");
        assert_eq!(config.future_tolerance, Duration::zero());
        assert_eq!(config.storage_dir, Some(PathBuf::from("/tmp/audit")));
    }

    #[test]
    fn test_from_lookup_overlays_values() {
        let config = AuditConfig::from_lookup(lookup(&[
            (ENV_SYSTEM_VERSION, "9.9.9"),
            (ENV_EXECUTION_MODE, "PERMISSIVE"),
            (ENV_FUTURE_TOLERANCE_SECS, "30"),
            (ENV_CHUNK_PREFIX, ""),
        ]))
        .unwrap();

        assert_eq!(config.system_version, "9.9.9");
        assert_eq!(config.execution_mode, ExecutionMode::Permissive);
        assert_eq!(config.future_tolerance, Duration::seconds(30));
        assert_eq!(config.chunk_prefix, "chunk:");
    }

    #[test]
    fn test_from_lookup_rejects_malformed_values() {
        let err = AuditConfig::from_lookup(lookup(&[(ENV_EXECUTION_MODE, "lenient")])).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");

        let err =
            AuditConfig::from_lookup(lookup(&[(ENV_FUTURE_TOLERANCE_SECS, "five")])).unwrap_err();
        assert!(matches!(err, AuditError::InvalidConfig { ref key, .. } if key == ENV_FUTURE_TOLERANCE_SECS));
    }
}
