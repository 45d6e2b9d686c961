// Run configuration
//
// Every field has a default, so an empty file (or no file at all) is a valid
// configuration. CLI flags override whatever the file sets.

use crate::error::{IngestError, Result};
use crate::span_record::TraceKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration
///
/// # Example TOML
/// ```toml
/// [loader]
/// batch_size = 500
/// io_pattern = "trace_io_*.log"
///
/// [pipeline]
/// workers = 8
/// flush_bytes = 1048576
///
/// [store]
/// page_size = 25
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SysspanConfig {
    pub loader: LoaderConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
}

/// Settings for the trace-file loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Spans per store insert
    ///
    /// Default: 100
    pub batch_size: usize,

    /// Clock reference file name, relative to the logs directory
    ///
    /// Default: `reference_timestamps.json`
    pub reference_file: String,

    pub io_pattern: String,
    pub meta_pattern: String,
    pub memory_pattern: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::span_buffer::DEFAULT_BATCH_SIZE,
            reference_file: "reference_timestamps.json".to_string(),
            io_pattern: "trace_io_*.log".to_string(),
            meta_pattern: "trace_meta_*.log".to_string(),
            memory_pattern: "trace_memory_*.log".to_string(),
        }
    }
}

impl LoaderConfig {
    /// File-name pattern for one trace kind
    pub fn pattern(&self, kind: TraceKind) -> &str {
        match kind {
            TraceKind::Io => &self.io_pattern,
            TraceKind::Meta => &self.meta_pattern,
            TraceKind::Memory => &self.memory_pattern,
        }
    }
}

/// Settings for the JSON-lines partitioning pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Input file name, relative to the base directory
    pub input_name: String,

    /// Lines per worker batch
    ///
    /// Default: 2000
    pub batch_lines: usize,

    /// Payloads a partition queue holds before the router blocks
    ///
    /// Default: 8000
    pub queue_capacity: usize,

    /// Buffered bytes that trigger a writer flush
    ///
    /// Default: 4 MiB
    pub flush_bytes: usize,

    /// Worker threads; 0 means one per available core
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_name: "logs.jsonl".to_string(),
            batch_lines: 2000,
            queue_capacity: 8000,
            flush_bytes: 4 * 1024 * 1024,
            workers: 0,
        }
    }
}

impl PipelineConfig {
    /// Worker count with `0` resolved to the available parallelism
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Settings for store listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Rows per page in summaries
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}

impl SysspanConfig {
    /// Load and validate a TOML configuration file
    ///
    /// # Errors
    /// Returns [`IngestError::Config`] if the file cannot be read, is not
    /// valid TOML, names unknown keys, or sets a size to zero.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| IngestError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or never flush
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("loader.batch_size", self.loader.batch_size),
            ("pipeline.batch_lines", self.pipeline.batch_lines),
            ("pipeline.queue_capacity", self.pipeline.queue_capacity),
            ("pipeline.flush_bytes", self.pipeline.flush_bytes),
            ("store.page_size", self.store.page_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(IngestError::Config(format!("{} must be at least 1", name)));
            }
        }

        for kind in TraceKind::ALL {
            let pattern = self.loader.pattern(kind);
            if pattern.matches('*').count() > 1 {
                return Err(IngestError::Config(format!(
                    "{} pattern '{}' has more than one '*'",
                    kind, pattern
                )));
            }
        }

        if self.loader.reference_file.is_empty() || self.pipeline.input_name.is_empty() {
            return Err(IngestError::Config("file names must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Match a file name against a pattern with at most one `*` wildcard
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SysspanConfig::default();
        assert_eq!(config.loader.batch_size, 100);
        assert_eq!(config.loader.reference_file, "reference_timestamps.json");
        assert_eq!(config.pipeline.batch_lines, 2000);
        assert_eq!(config.pipeline.queue_capacity, 8000);
        assert_eq!(config.pipeline.flush_bytes, 4_194_304);
        assert_eq!(config.store.page_size, 10);
        assert!(config.validate().is_ok());
        assert!(config.pipeline.effective_workers() >= 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SysspanConfig::from_toml_str(
            r#"
            [loader]
            batch_size = 7

            [pipeline]
            workers = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.loader.batch_size, 7);
        assert_eq!(config.loader.io_pattern, "trace_io_*.log");
        assert_eq!(config.pipeline.effective_workers(), 3);
        assert_eq!(config.store.page_size, 10);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(SysspanConfig::from_toml_str("").unwrap(), SysspanConfig::default());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let err = SysspanConfig::from_toml_str("[pipeline]\nqueue_capacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("pipeline.queue_capacity"));
        assert!(SysspanConfig::from_toml_str("[loader]\nbatch_size = 0\n").is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(SysspanConfig::from_toml_str("[loader]\nbatchsize = 5\n").is_err());
    }

    #[test]
    fn test_two_wildcards_rejected() {
        assert!(SysspanConfig::from_toml_str("[loader]\nio_pattern = \"*io*\"\n").is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysspan.toml");
        fs::write(&path, "[store]\npage_size = 3\n").unwrap();
        assert_eq!(SysspanConfig::from_toml(&path).unwrap().store.page_size, 3);

        let missing = SysspanConfig::from_toml(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(IngestError::Config(_))));
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("trace_io_*.log", "trace_io_0.log"));
        assert!(matches_pattern("trace_io_*.log", "trace_io_.log"));
        assert!(!matches_pattern("trace_io_*.log", "trace_meta_0.log"));
        assert!(!matches_pattern("trace_io_*.log", "trace_io_0.log.bak"));
        assert!(matches_pattern("exact.log", "exact.log"));
        assert!(!matches_pattern("exact.log", "exact.log2"));
        // prefix and suffix may not overlap
        assert!(!matches_pattern("ab*ba", "aba"));
    }
}
