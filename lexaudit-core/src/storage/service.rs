//! Certification and audit over a trace store

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::manifest::{verify_manifest, Certifier, FinOpsSnapshot, HardManifest, SchemaVersions};
use crate::timing::Clock;
use crate::trace::{ExecutionTrace, ReplayResult, Replayer};

use super::TraceStore;

/// Everything an auditor needs to judge one stored trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub trace: ExecutionTrace,
    pub manifest: Option<HardManifest>,
    pub replay: ReplayResult,
    /// `None` when the trace has not been certified
    pub manifest_verified: Option<bool>,
}

impl AuditReport {
    /// Replay is clean and any manifest verifies
    pub fn is_trustworthy(&self) -> bool {
        self.replay.is_valid && self.manifest_verified != Some(false)
    }
}

/// Certifies stored traces and serves read-only audits of them
#[derive(Debug)]
pub struct CertificationService<S: TraceStore> {
    storage: S,
    certifier: Certifier,
    replayer: Replayer,
    system_version: String,
    schema_versions: SchemaVersions,
}

impl<S: TraceStore> CertificationService<S> {
    /// Service with default configuration on the system clock
    pub fn new(storage: S) -> Self {
        Self::from_config(storage, &AuditConfig::default())
    }

    pub fn from_config(storage: S, config: &AuditConfig) -> Self {
        Self {
            storage,
            certifier: Certifier::new(),
            replayer: Replayer::from_config(config),
            system_version: config.system_version.clone(),
            schema_versions: config.schema_versions.clone(),
        }
    }

    /// Use `clock` for manifest signing and replay verification time
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.certifier = self.certifier.with_clock(clock.clone());
        self.replayer = self.replayer.with_clock(clock);
        self
    }

    pub fn with_certifier(mut self, certifier: Certifier) -> Self {
        self.certifier = certifier;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Persist a finished trace
    pub fn record(&self, trace: &ExecutionTrace) -> Result<()> {
        self.storage.store_trace(trace)
    }

    /// Certify the latest stored trace for `case_id`
    ///
    /// Refuses traces without a completion timestamp and traces that already
    /// have a manifest.
    pub fn certify(&self, case_id: &str, finops: Option<FinOpsSnapshot>) -> Result<HardManifest> {
        let trace = self
            .storage
            .latest_trace_for_case(case_id)?
            .ok_or_else(|| AuditError::NoTraceForCase {
                case_id: case_id.to_string(),
            })?;

        if trace.completed_at().is_none() {
            tracing::warn!(trace_id = %trace.trace_id(), "refusing to certify aborted run");
            return Err(AuditError::TraceNotCompleted {
                trace_id: trace.trace_id().to_string(),
            });
        }

        if self.storage.get_manifest(trace.trace_id())?.is_some() {
            return Err(AuditError::ManifestAlreadyExists {
                trace_id: trace.trace_id().to_string(),
            });
        }

        let manifest = self.certifier.create_manifest(
            &trace,
            self.system_version.clone(),
            self.schema_versions.clone(),
            finops,
        );
        self.storage.store_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Replay a stored trace against its manifest, if any
    ///
    /// Read-only: nothing is written to storage.
    pub fn audit(&self, trace_id: &str) -> Result<AuditReport> {
        let trace = self
            .storage
            .get_trace(trace_id)?
            .ok_or_else(|| AuditError::TraceNotFound {
                trace_id: trace_id.to_string(),
            })?;
        self.report(trace)
    }

    /// Audit the latest stored trace for `case_id`
    pub fn audit_case(&self, case_id: &str) -> Result<AuditReport> {
        let trace = self
            .storage
            .latest_trace_for_case(case_id)?
            .ok_or_else(|| AuditError::NoTraceForCase {
                case_id: case_id.to_string(),
            })?;
        self.report(trace)
    }

    fn report(&self, trace: ExecutionTrace) -> Result<AuditReport> {
        let manifest = self.storage.get_manifest(trace.trace_id())?;
        let replay = self.replayer.replay(&trace, manifest.as_ref());
        let manifest_verified = manifest.as_ref().map(|m| verify_manifest(m, &trace));

        tracing::debug!(
            trace_id = %trace.trace_id(),
            valid = replay.is_valid,
            ?manifest_verified,
            "audit complete"
        );

        Ok(AuditReport {
            trace,
            manifest,
            replay,
            manifest_verified,
        })
    }
}
