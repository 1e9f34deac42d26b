//! Manifest creation and verification

use std::sync::Arc;

use crate::error::{AuditError, Result};
use crate::timing::{Clock, SystemClock};
use crate::trace::ExecutionTrace;

use super::hard::{ExecutionLimits, FinOpsSnapshot, HardManifest, IntegrityScheme, SchemaVersions};
use super::MANIFEST_VERSION;

/// Creates manifests for finished traces
///
/// The certifier holds only a clock and the digest scheme; it keeps no record
/// of what it has certified.
#[derive(Debug, Clone)]
pub struct Certifier {
    clock: Arc<dyn Clock>,
    scheme: IntegrityScheme,
}

impl Certifier {
    /// Certifier on the system clock using the full-content digest
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            scheme: IntegrityScheme::FullContent,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scheme(mut self, scheme: IntegrityScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn scheme(&self) -> IntegrityScheme {
        self.scheme
    }

    /// Bind a new manifest to `trace`
    ///
    /// Whether the trace may be certified at all (completed, not yet
    /// certified) is decided by the caller.
    pub fn create_manifest(
        &self,
        trace: &ExecutionTrace,
        system_version: impl Into<String>,
        schema_versions: SchemaVersions,
        finops_snapshot: Option<FinOpsSnapshot>,
    ) -> HardManifest {
        let manifest = HardManifest {
            manifest_version: MANIFEST_VERSION.to_string(),
            trace_id: trace.trace_id().to_string(),
            case_id: trace.case_id().to_string(),
            schema_versions,
            integrity_hash: self.scheme.digest(trace),
            integrity_scheme: self.scheme,
            execution_limits: ExecutionLimits::CONSERVATIVE,
            finops_snapshot,
            signed_at: self.clock.now(),
            system_version: system_version.into(),
        };

        tracing::info!(
            trace_id = %manifest.trace_id,
            case_id = %manifest.case_id,
            scheme = %manifest.integrity_scheme,
            "manifest created"
        );

        manifest
    }
}

impl Default for Certifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a manifest with the default certifier
pub fn create_manifest(
    trace: &ExecutionTrace,
    system_version: impl Into<String>,
    schema_versions: SchemaVersions,
    finops_snapshot: Option<FinOpsSnapshot>,
) -> HardManifest {
    Certifier::new().create_manifest(trace, system_version, schema_versions, finops_snapshot)
}

/// Check that `manifest` binds `trace`
///
/// Reports the first mismatch found: trace id, case id, then integrity hash.
pub fn check_binding(manifest: &HardManifest, trace: &ExecutionTrace) -> Result<()> {
    let mismatch = |reason: String| {
        tracing::warn!(trace_id = %trace.trace_id(), "manifest mismatch: {}", reason);
        Err(AuditError::ManifestBindingMismatch {
            trace_id: trace.trace_id().to_string(),
            reason,
        })
    };

    if manifest.trace_id != trace.trace_id() {
        return mismatch(format!(
            "manifest binds trace '{}'",
            manifest.trace_id
        ));
    }
    if manifest.case_id != trace.case_id() {
        return mismatch(format!(
            "manifest case '{}' differs from trace case '{}'",
            manifest.case_id,
            trace.case_id()
        ));
    }
    if !manifest.verify_integrity(trace) {
        return mismatch(format!(
            "{} digest does not reproduce integrity hash {}",
            manifest.integrity_scheme, manifest.integrity_hash
        ));
    }
    Ok(())
}

/// True only if `manifest` binds `trace` and its digest reproduces
pub fn verify_manifest(manifest: &HardManifest, trace: &ExecutionTrace) -> bool {
    check_binding(manifest, trace).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    use crate::timing::MockClock;
    use crate::trace::{DecisionKind, TraceBuilder};

    fn clock() -> Arc<MockClock> {
        Arc::new(MockClock::ticking(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            Duration::milliseconds(10),
        ))
    }

    fn trace_for(case_id: &str, description: &str) -> ExecutionTrace {
        let mut builder = TraceBuilder::with_clock(case_id, clock());
        builder
            .decide("ingest", DecisionKind::Validation, description)
            .unwrap();
        builder.mark_completed();
        builder.build().unwrap()
    }

    #[test]
    fn test_create_then_verify() {
        let trace = trace_for("C1", "validated 3 documents");
        let certifier = Certifier::new().with_clock(clock());
        let manifest = certifier.create_manifest(
            &trace,
            "1.0.0",
            SchemaVersions::default(),
            Some(FinOpsSnapshot {
                total_cost_usd: 0.42,
                llm_calls: 3,
                retrieval_calls: 2,
                total_tokens: 1800,
            }),
        );

        assert_eq!(manifest.trace_id(), trace.trace_id());
        assert_eq!(manifest.case_id(), "C1");
        assert_eq!(manifest.manifest_version(), MANIFEST_VERSION);
        assert_eq!(manifest.integrity_hash().len(), 64);
        assert_eq!(manifest.integrity_scheme(), IntegrityScheme::FullContent);
        assert!(manifest.execution_limits().is_conservative());
        assert_eq!(
            manifest.signed_at(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert!(verify_manifest(&manifest, &trace));
        assert!(manifest.verify_integrity(&trace));
    }

    #[test]
    fn test_full_content_detects_description_change() {
        let original = trace_for("C1", "validated 3 documents");
        let edited = trace_for("C1", "validated 4 documents");
        assert_eq!(original.trace_id(), edited.trace_id());

        let full = create_manifest(&original, "1.0.0", SchemaVersions::default(), None);
        assert!(!verify_manifest(&full, &edited));

        // The summary digest does not cover descriptions
        let summary = Certifier::new()
            .with_scheme(IntegrityScheme::Summary)
            .create_manifest(&original, "1.0.0", SchemaVersions::default(), None);
        assert!(verify_manifest(&summary, &edited));
    }

    #[test]
    fn test_check_binding_reports_trace_mismatch() {
        let trace = trace_for("C1", "validated 3 documents");
        let other = trace_for("C2", "validated 3 documents");
        let manifest = create_manifest(&trace, "1.0.0", SchemaVersions::default(), None);

        let err = check_binding(&manifest, &other).unwrap_err();
        assert_eq!(err.error_code(), "MANIFEST_BINDING_MISMATCH");
        assert!(!verify_manifest(&manifest, &other));
    }

    #[test]
    fn test_check_binding_reports_case_mismatch() {
        let trace = trace_for("C1", "validated 3 documents");
        let manifest = create_manifest(&trace, "1.0.0", SchemaVersions::default(), None);

        // Same trace id and digest, different case
        let mut value = serde_json::to_value(&manifest).unwrap();
        value["case_id"] = serde_json::json!("C9");
        let relabeled: HardManifest = serde_json::from_value(value).unwrap();
        assert_eq!(relabeled.trace_id(), trace.trace_id());
        assert!(relabeled.verify_integrity(&trace));

        assert!(!verify_manifest(&relabeled, &trace));
        match check_binding(&relabeled, &trace) {
            Err(AuditError::ManifestBindingMismatch { reason, .. }) => {
                assert!(reason.contains("C9"), "{}", reason);
                assert!(reason.contains("C1"), "{}", reason);
            }
            other => panic!("expected case mismatch, got {:?}", other),
        }

        let result = crate::trace::replay(&trace, Some(&relabeled));
        assert!(!result.is_valid);
        let found = result.divergences_of(crate::trace::DivergenceKind::ManifestMismatch);
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("C9"));
        assert!(result
            .divergences_of(crate::trace::DivergenceKind::IntegrityMismatch)
            .is_empty());
    }

    #[test]
    fn test_system_version_change_breaks_verification() {
        let trace = trace_for("C1", "validated 3 documents");
        let manifest = create_manifest(&trace, "1.0.0", SchemaVersions::default(), None);

        let mut parts = trace.to_parts();
        parts.system_version = "9.9.9".to_string();
        let rederived = ExecutionTrace::new(parts).unwrap();

        assert_ne!(rederived.compute_hash(), trace.compute_hash());
        assert!(!verify_manifest(&manifest, &rederived));
    }
}
