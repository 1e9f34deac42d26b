//! Pluggable Storage Backend
//!
//! Traces and manifests are write-once: storing a second trace with an
//! existing id, or a second manifest for a trace, fails. Nothing in this
//! module can update or delete a stored record.
//!
//! # Example
//!
//! ```rust
//! use lexaudit_core::storage::{InMemoryStorage, TraceStore};
//!
//! let storage = InMemoryStorage::new();
//! assert!(storage.health_check().is_ok());
//! assert!(storage.list_traces().unwrap().is_empty());
//! ```

mod service;

pub use service::{AuditReport, CertificationService};

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{AuditError, Result};
use crate::manifest::HardManifest;
use crate::trace::ExecutionTrace;

/// Storage backend trait for persisting traces and manifests
///
/// All methods take `&self` to allow for interior mutability patterns.
pub trait TraceStore: Send + Sync {
    /// Store a finished trace; fails with `TraceAlreadyExists` on a repeated id
    fn store_trace(&self, trace: &ExecutionTrace) -> Result<()>;

    fn get_trace(&self, trace_id: &str) -> Result<Option<ExecutionTrace>>;

    /// The stored trace for `case_id` with the latest execution timestamp
    fn latest_trace_for_case(&self, case_id: &str) -> Result<Option<ExecutionTrace>>;

    /// Ids of all stored traces, sorted
    fn list_traces(&self) -> Result<Vec<String>>;

    /// Store a manifest; fails with `ManifestAlreadyExists` if its trace is
    /// already certified
    fn store_manifest(&self, manifest: &HardManifest) -> Result<()>;

    fn get_manifest(&self, trace_id: &str) -> Result<Option<HardManifest>>;

    /// Check if backend is healthy
    fn health_check(&self) -> Result<()>;

    /// Get backend name (for logging/debugging)
    fn name(&self) -> &'static str;
}

fn latest<I>(traces: I, case_id: &str) -> Option<ExecutionTrace>
where
    I: IntoIterator<Item = ExecutionTrace>,
{
    traces
        .into_iter()
        .filter(|t| t.case_id() == case_id)
        .max_by(|a, b| {
            a.execution_timestamp()
                .cmp(&b.execution_timestamp())
                .then_with(|| a.trace_id().cmp(b.trace_id()))
        })
}

/// In-memory storage backend (default)
///
/// Records are lost on restart. Thread-safe via RwLock.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    traces: RwLock<HashMap<String, ExecutionTrace>>,
    manifests: RwLock<HashMap<String, HardManifest>>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn manifest_count(&self) -> usize {
        self.manifests.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl TraceStore for InMemoryStorage {
    fn store_trace(&self, trace: &ExecutionTrace) -> Result<()> {
        let mut traces = self.traces.write().map_err(|_| AuditError::StorageLocked)?;
        if traces.contains_key(trace.trace_id()) {
            return Err(AuditError::TraceAlreadyExists {
                trace_id: trace.trace_id().to_string(),
            });
        }
        traces.insert(trace.trace_id().to_string(), trace.clone());
        tracing::info!(trace_id = %trace.trace_id(), backend = "in-memory", "trace stored");
        Ok(())
    }

    fn get_trace(&self, trace_id: &str) -> Result<Option<ExecutionTrace>> {
        let traces = self.traces.read().map_err(|_| AuditError::StorageLocked)?;
        Ok(traces.get(trace_id).cloned())
    }

    fn latest_trace_for_case(&self, case_id: &str) -> Result<Option<ExecutionTrace>> {
        let traces = self.traces.read().map_err(|_| AuditError::StorageLocked)?;
        Ok(latest(traces.values().cloned(), case_id))
    }

    fn list_traces(&self) -> Result<Vec<String>> {
        let traces = self.traces.read().map_err(|_| AuditError::StorageLocked)?;
        let mut ids: Vec<String> = traces.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn store_manifest(&self, manifest: &HardManifest) -> Result<()> {
        let mut manifests = self
            .manifests
            .write()
            .map_err(|_| AuditError::StorageLocked)?;
        if manifests.contains_key(manifest.trace_id()) {
            return Err(AuditError::ManifestAlreadyExists {
                trace_id: manifest.trace_id().to_string(),
            });
        }
        manifests.insert(manifest.trace_id().to_string(), manifest.clone());
        tracing::info!(trace_id = %manifest.trace_id(), backend = "in-memory", "manifest stored");
        Ok(())
    }

    fn get_manifest(&self, trace_id: &str) -> Result<Option<HardManifest>> {
        let manifests = self
            .manifests
            .read()
            .map_err(|_| AuditError::StorageLocked)?;
        Ok(manifests.get(trace_id).cloned())
    }

    fn health_check(&self) -> Result<()> {
        let _traces = self.traces.read().map_err(|_| AuditError::StorageLocked)?;
        let _manifests = self
            .manifests
            .read()
            .map_err(|_| AuditError::StorageLocked)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// File-based storage backend
///
/// One pretty-printed JSON file per record:
///
/// ```text
/// <root>/traces/<trace_id>.json
/// <root>/manifests/<trace_id>.json
/// ```
///
/// Files are created with `create_new`, so a second writer for the same id
/// loses even across processes.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Create a new file storage in the given directory
    pub fn new<P: Into<PathBuf>>(directory: P) -> Result<Self> {
        let directory = directory.into();
        for sub in ["traces", "manifests"] {
            std::fs::create_dir_all(directory.join(sub)).map_err(|e| AuditError::IoError {
                message: format!("Failed to create storage directory: {}", e),
            })?;
        }
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_file(&self, kind: &str, trace_id: &str) -> Result<PathBuf> {
        let safe = !trace_id.is_empty()
            && trace_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(AuditError::IoError {
                message: format!("Trace id '{}' cannot be used as a file name", trace_id),
            });
        }
        Ok(self.directory.join(kind).join(format!("{}.json", trace_id)))
    }

    /// Write `json` to a new file; `Ok(false)` if the file already exists
    fn write_new(path: &Path, json: &str) -> Result<bool> {
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(AuditError::IoError {
                    message: format!("Failed to open file: {}", e),
                })
            }
        };

        let written = file.write_all(json.as_bytes()).and_then(|_| file.sync_all());
        drop(file);
        Self::keep_or_discard(path, written)?;
        Ok(true)
    }

    /// Remove a freshly created file whose write failed
    ///
    /// A partial record would otherwise block its id for good.
    fn keep_or_discard(path: &Path, written: std::io::Result<()>) -> Result<()> {
        written.map_err(|e| {
            if let Err(cleanup) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %cleanup, "failed to remove partial record");
            }
            AuditError::IoError {
                message: format!("Failed to write {}: {}", path.display(), e),
            }
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuditError::IoError {
                message: format!("Failed to read {}: {}", path.display(), e),
            }),
        }
    }

    fn trace_files(&self) -> Result<Vec<PathBuf>> {
        let entries =
            std::fs::read_dir(self.directory.join("traces")).map_err(|e| AuditError::IoError {
                message: format!("Failed to list traces: {}", e),
            })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl TraceStore for FileStorage {
    fn store_trace(&self, trace: &ExecutionTrace) -> Result<()> {
        let path = self.record_file("traces", trace.trace_id())?;
        let json = serde_json::to_string_pretty(trace)?;
        if !Self::write_new(&path, &json)? {
            return Err(AuditError::TraceAlreadyExists {
                trace_id: trace.trace_id().to_string(),
            });
        }
        tracing::info!(trace_id = %trace.trace_id(), path = %path.display(), "trace stored");
        Ok(())
    }

    fn get_trace(&self, trace_id: &str) -> Result<Option<ExecutionTrace>> {
        Self::read_json(&self.record_file("traces", trace_id)?)
    }

    fn latest_trace_for_case(&self, case_id: &str) -> Result<Option<ExecutionTrace>> {
        let mut traces = Vec::new();
        for path in self.trace_files()? {
            match Self::read_json::<ExecutionTrace>(&path) {
                Ok(Some(trace)) => traces.push(trace),
                Ok(None) => {}
                Err(AuditError::JsonError(e)) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable trace file");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(latest(traces, case_id))
    }

    fn list_traces(&self) -> Result<Vec<String>> {
        Ok(self
            .trace_files()?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect())
    }

    fn store_manifest(&self, manifest: &HardManifest) -> Result<()> {
        let path = self.record_file("manifests", manifest.trace_id())?;
        let json = serde_json::to_string_pretty(manifest)?;
        if !Self::write_new(&path, &json)? {
            return Err(AuditError::ManifestAlreadyExists {
                trace_id: manifest.trace_id().to_string(),
            });
        }
        tracing::info!(trace_id = %manifest.trace_id(), path = %path.display(), "manifest stored");
        Ok(())
    }

    fn get_manifest(&self, trace_id: &str) -> Result<Option<HardManifest>> {
        Self::read_json(&self.record_file("manifests", trace_id)?)
    }

    fn health_check(&self) -> Result<()> {
        if self.directory.join("traces").is_dir() && self.directory.join("manifests").is_dir() {
            Ok(())
        } else {
            Err(AuditError::IoError {
                message: "Storage directory does not exist".to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
