//! Trace Replayer
//!
//! Logic-free verification of a finished trace. Replay does not re-run the
//! pipeline and knows nothing about business outcomes; it only checks that the
//! record is structurally, temporally and referentially coherent.
//!
//! Checks, in order:
//!
//! 1. Basic structure: identifiers present, trace id re-derivable, decisions
//!    non-empty, schema version known
//! 2. Temporal coherence: start not in the future, decisions ascending,
//!    completion after start and after the last decision
//! 3. Evidence integrity: every referenced evidence id is a registered chunk
//! 4. Decision validity: step names and descriptions still well-formed,
//!    repeated step names
//! 5. Manifest binding (only when a manifest is supplied)
//!
//! Findings that invalidate the record are divergences; the rest are
//! warnings. Replay never fails and never mutates its input, so it can run
//! concurrently over any number of traces.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AuditConfig;
use crate::manifest::HardManifest;
use crate::timing::{Clock, SystemClock};

use super::diff::TraceDiff;
use super::entry::{description_problem, DecisionKind};
use super::execution::ExecutionTrace;
use super::TRACE_SCHEMA_VERSION;

/// Default clock-skew allowance for the future-timestamp check
pub const DEFAULT_FUTURE_TOLERANCE_SECS: i64 = 5;

/// Kind of finding that invalidates a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    MissingIdentifier,
    TraceIdMismatch,
    EmptyDecisionLog,
    FutureExecutionTimestamp,
    UnorderedDecisions,
    CompletedBeforeStart,
    CompletedBeforeLastDecision,
    OrphanEvidence,
    EmptyStepName,
    InvalidDescription,
    ManifestMismatch,
    IntegrityMismatch,
}

impl DivergenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceKind::MissingIdentifier => "missing_identifier",
            DivergenceKind::TraceIdMismatch => "trace_id_mismatch",
            DivergenceKind::EmptyDecisionLog => "empty_decision_log",
            DivergenceKind::FutureExecutionTimestamp => "future_execution_timestamp",
            DivergenceKind::UnorderedDecisions => "unordered_decisions",
            DivergenceKind::CompletedBeforeStart => "completed_before_start",
            DivergenceKind::CompletedBeforeLastDecision => "completed_before_last_decision",
            DivergenceKind::OrphanEvidence => "orphan_evidence",
            DivergenceKind::EmptyStepName => "empty_step_name",
            DivergenceKind::InvalidDescription => "invalid_description",
            DivergenceKind::ManifestMismatch => "manifest_mismatch",
            DivergenceKind::IntegrityMismatch => "integrity_mismatch",
        }
    }
}

impl std::fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of informational finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Chunks were consulted but no report hash was registered
    PossiblyIncompleteRun,
    /// The same step name appears on more than one decision
    DuplicateStepName,
    /// No completion timestamp
    RunAborted,
    /// An error the pipeline did not recover from
    UnrecoveredError,
    /// Trace written under a different schema version
    SchemaVersionMismatch,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::PossiblyIncompleteRun => "possibly_incomplete_run",
            WarningKind::DuplicateStepName => "duplicate_step_name",
            WarningKind::RunAborted => "run_aborted",
            WarningKind::UnrecoveredError => "unrecovered_error",
            WarningKind::SchemaVersionMismatch => "schema_version_mismatch",
        }
    }
}

impl std::fmt::Display for WarningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A finding that fails certification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub kind: DivergenceKind,
    pub message: String,
    /// Decision the finding points at, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_index: Option<usize>,
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.decision_index {
            Some(i) => write!(f, "[{}] decision {}: {}", self.kind, i, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// A finding that does not fail certification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl std::fmt::Display for ReplayWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// What happened at one point of the reconstructed flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    Start,
    Decision { kind: DecisionKind },
    Error { code: String, recovered: bool },
    Completed,
    Aborted,
}

impl FlowEvent {
    /// Order among entries sharing a timestamp
    fn tie_rank(&self) -> u8 {
        match self {
            FlowEvent::Start => 0,
            FlowEvent::Decision { .. } | FlowEvent::Error { .. } => 1,
            FlowEvent::Completed | FlowEvent::Aborted => 2,
        }
    }
}

/// One line of the chronological audit display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: FlowEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_ids: Vec<String>,
}

/// Verdict of a replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Trace that was replayed
    pub trace_id: String,
    /// True when there are no divergences
    pub is_valid: bool,
    pub divergences: Vec<Divergence>,
    pub warnings: Vec<ReplayWarning>,
    /// Decisions, errors and start/end markers in chronological order
    pub reconstructed_flow: Vec<FlowEntry>,
}

impl ReplayResult {
    /// Divergences of one kind
    pub fn divergences_of(&self, kind: DivergenceKind) -> Vec<&Divergence> {
        self.divergences.iter().filter(|d| d.kind == kind).collect()
    }

    /// Warnings of one kind
    pub fn warnings_of(&self, kind: WarningKind) -> Vec<&ReplayWarning> {
        self.warnings.iter().filter(|w| w.kind == kind).collect()
    }

    /// One-line summary for logs and CLIs
    pub fn summary(&self) -> String {
        format!(
            "trace {}: {} ({} divergence(s), {} warning(s), {} flow entries)",
            self.trace_id,
            if self.is_valid { "VALID" } else { "INVALID" },
            self.divergences.len(),
            self.warnings.len(),
            self.reconstructed_flow.len()
        )
    }
}

/// Accumulates findings during one replay
#[derive(Default)]
struct Findings {
    divergences: Vec<Divergence>,
    warnings: Vec<ReplayWarning>,
}

impl Findings {
    fn diverge(&mut self, kind: DivergenceKind, decision_index: Option<usize>, message: String) {
        self.divergences.push(Divergence {
            kind,
            message,
            decision_index,
        });
    }

    fn warn(&mut self, kind: WarningKind, message: String) {
        self.warnings.push(ReplayWarning { kind, message });
    }
}

/// Trace Replayer
///
/// Holds only configuration; every replay is independent.
#[derive(Debug, Clone)]
pub struct Replayer {
    clock: Arc<dyn Clock>,
    future_tolerance: Duration,
    expected_schema_version: String,
}

impl Replayer {
    /// Create a replayer on the system clock
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            future_tolerance: Duration::seconds(DEFAULT_FUTURE_TOLERANCE_SECS),
            expected_schema_version: TRACE_SCHEMA_VERSION.to_string(),
        }
    }

    /// Create a replayer configured from `config`
    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new()
            .with_future_tolerance(config.future_tolerance)
            .with_expected_schema_version(config.schema_versions.trace.clone())
    }

    /// Read "now" from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Allow the execution timestamp to be this far ahead of verification time
    pub fn with_future_tolerance(mut self, tolerance: Duration) -> Self {
        self.future_tolerance = tolerance;
        self
    }

    /// Schema version this replayer expects traces to carry
    pub fn with_expected_schema_version(mut self, version: impl Into<String>) -> Self {
        self.expected_schema_version = version.into();
        self
    }

    /// Replay `trace`, verified as of the replayer clock's current time
    pub fn replay(&self, trace: &ExecutionTrace, manifest: Option<&HardManifest>) -> ReplayResult {
        self.replay_at(trace, manifest, self.clock.now())
    }

    /// Replay `trace` as of `verified_at`
    pub fn replay_at(
        &self,
        trace: &ExecutionTrace,
        manifest: Option<&HardManifest>,
        verified_at: DateTime<Utc>,
    ) -> ReplayResult {
        let mut findings = Findings::default();

        self.check_structure(trace, &mut findings);
        self.check_temporal(trace, verified_at, &mut findings);
        self.check_evidence(trace, &mut findings);
        self.check_decisions(trace, &mut findings);
        self.check_errors(trace, &mut findings);
        if let Some(manifest) = manifest {
            self.check_manifest(trace, manifest, &mut findings);
        }

        let result = ReplayResult {
            trace_id: trace.trace_id().to_string(),
            is_valid: findings.divergences.is_empty(),
            divergences: findings.divergences,
            warnings: findings.warnings,
            reconstructed_flow: reconstruct_flow(trace),
        };

        if result.is_valid {
            tracing::info!(
                trace_id = %result.trace_id,
                warnings = result.warnings.len(),
                "replay valid"
            );
        } else {
            for divergence in &result.divergences {
                tracing::warn!(trace_id = %result.trace_id, "replay divergence: {}", divergence);
            }
        }

        result
    }

    /// Compare the step sequences of two equivalent runs
    pub fn diff(&self, first: &ExecutionTrace, second: &ExecutionTrace) -> TraceDiff {
        super::diff::diff(first, second)
    }

    fn check_structure(&self, trace: &ExecutionTrace, findings: &mut Findings) {
        if trace.trace_id().trim().is_empty() {
            findings.diverge(
                DivergenceKind::MissingIdentifier,
                None,
                "trace_id is empty".to_string(),
            );
        }
        if trace.case_id().trim().is_empty() {
            findings.diverge(
                DivergenceKind::MissingIdentifier,
                None,
                "case_id is empty".to_string(),
            );
        }

        let expected_id =
            ExecutionTrace::derive_trace_id(trace.case_id(), trace.execution_timestamp());
        if !trace.trace_id().trim().is_empty() && trace.trace_id() != expected_id {
            findings.diverge(
                DivergenceKind::TraceIdMismatch,
                None,
                format!(
                    "trace_id {} is not derived from case_id and execution_timestamp (expected {})",
                    trace.trace_id(),
                    expected_id
                ),
            );
        }

        if trace.decisions().is_empty() {
            findings.diverge(
                DivergenceKind::EmptyDecisionLog,
                None,
                "trace has no decisions".to_string(),
            );
        }

        if trace.trace_schema_version() != self.expected_schema_version {
            findings.warn(
                WarningKind::SchemaVersionMismatch,
                format!(
                    "trace schema version {} differs from expected {}",
                    trace.trace_schema_version(),
                    self.expected_schema_version
                ),
            );
        }
    }

    fn check_temporal(
        &self,
        trace: &ExecutionTrace,
        verified_at: DateTime<Utc>,
        findings: &mut Findings,
    ) {
        let started = trace.execution_timestamp();
        if started > verified_at + self.future_tolerance {
            findings.diverge(
                DivergenceKind::FutureExecutionTimestamp,
                None,
                format!(
                    "execution_timestamp {} is after verification time {}",
                    started, verified_at
                ),
            );
        }

        // Construction enforced this; storage or transport may not have kept it
        for (i, pair) in trace.decisions().windows(2).enumerate() {
            if pair[1].timestamp() < pair[0].timestamp() {
                findings.diverge(
                    DivergenceKind::UnorderedDecisions,
                    Some(i + 1),
                    format!(
                        "decision at {} precedes previous decision at {}",
                        pair[1].timestamp(),
                        pair[0].timestamp()
                    ),
                );
            }
        }

        if let Some(completed) = trace.completed_at() {
            if completed < started {
                findings.diverge(
                    DivergenceKind::CompletedBeforeStart,
                    None,
                    format!(
                        "completed_at {} precedes execution_timestamp {}",
                        completed, started
                    ),
                );
            }
            if let Some(last) = trace.last_decision_at() {
                if completed < last {
                    findings.diverge(
                        DivergenceKind::CompletedBeforeLastDecision,
                        Some(trace.decisions().len() - 1),
                        format!(
                            "completed_at {} precedes last decision at {}",
                            completed, last
                        ),
                    );
                }
            }
        } else {
            findings.warn(
                WarningKind::RunAborted,
                "trace has no completed_at; the run was aborted".to_string(),
            );
        }
    }

    fn check_evidence(&self, trace: &ExecutionTrace, findings: &mut Findings) {
        // One divergence per orphan id, pointing at the first decision using it
        let mut orphans: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for (i, decision) in trace.decisions().iter().enumerate() {
            let referenced: BTreeSet<&str> =
                decision.evidence_ids().iter().map(String::as_str).collect();
            for id in referenced {
                if !trace.chunk_ids().contains(id) {
                    orphans.entry(id).or_insert((i, 0)).1 += 1;
                }
            }
        }
        for (id, (first, count)) in orphans {
            findings.diverge(
                DivergenceKind::OrphanEvidence,
                Some(first),
                format!(
                    "evidence id '{}' is referenced by {} decision(s) but not registered in chunk_ids",
                    id, count
                ),
            );
        }

        if !trace.chunk_ids().is_empty() && trace.legal_report_hash().is_none() {
            findings.warn(
                WarningKind::PossiblyIncompleteRun,
                format!(
                    "{} chunk(s) consulted but no legal report hash registered; possible incomplete run",
                    trace.chunk_ids().len()
                ),
            );
        }
    }

    fn check_decisions(&self, trace: &ExecutionTrace, findings: &mut Findings) {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();

        for (i, decision) in trace.decisions().iter().enumerate() {
            if decision.step_name().trim().is_empty() {
                findings.diverge(
                    DivergenceKind::EmptyStepName,
                    Some(i),
                    "step_name is empty".to_string(),
                );
            } else {
                *seen.entry(decision.step_name()).or_insert(0) += 1;
            }

            if let Some(reason) = description_problem(decision.description()) {
                findings.diverge(DivergenceKind::InvalidDescription, Some(i), reason);
            }
        }

        for (step, count) in seen.into_iter().filter(|(_, c)| *c > 1) {
            findings.warn(
                WarningKind::DuplicateStepName,
                format!("step_name '{}' appears on {} decisions", step, count),
            );
        }
    }

    fn check_errors(&self, trace: &ExecutionTrace, findings: &mut Findings) {
        for error in trace.errors().iter().filter(|e| !e.recovered()) {
            findings.warn(
                WarningKind::UnrecoveredError,
                format!(
                    "unrecovered error {} at step '{}': {}",
                    error.error_code(),
                    error.step_name(),
                    error.error_message()
                ),
            );
        }
    }

    fn check_manifest(
        &self,
        trace: &ExecutionTrace,
        manifest: &HardManifest,
        findings: &mut Findings,
    ) {
        if manifest.trace_id != trace.trace_id() {
            findings.diverge(
                DivergenceKind::ManifestMismatch,
                None,
                format!(
                    "manifest binds trace {} but trace is {}",
                    manifest.trace_id,
                    trace.trace_id()
                ),
            );
        }
        if manifest.case_id != trace.case_id() {
            findings.diverge(
                DivergenceKind::ManifestMismatch,
                None,
                format!(
                    "manifest case {} differs from trace case {}",
                    manifest.case_id,
                    trace.case_id()
                ),
            );
        }
        if !manifest.verify_integrity(trace) {
            findings.diverge(
                DivergenceKind::IntegrityMismatch,
                None,
                format!(
                    "integrity hash {} does not reproduce under the {} scheme",
                    manifest.integrity_hash, manifest.integrity_scheme
                ),
            );
        }
    }
}

impl Default for Replayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Replay with a default replayer
pub fn replay(trace: &ExecutionTrace, manifest: Option<&HardManifest>) -> ReplayResult {
    Replayer::new().replay(trace, manifest)
}

/// Merge decisions, errors and start/end markers into one timeline
///
/// Informational only: entries are sorted by timestamp and ties keep the
/// order start, decisions, errors, end. A completion marker can precede
/// errors recorded after `mark_completed`.
pub fn reconstruct_flow(trace: &ExecutionTrace) -> Vec<FlowEntry> {
    let mut flow = Vec::with_capacity(trace.decisions().len() + trace.errors().len() + 2);

    flow.push(FlowEntry {
        timestamp: trace.execution_timestamp(),
        event: FlowEvent::Start,
        step_name: None,
        detail: format!("execution started for case {}", trace.case_id()),
        evidence_ids: vec![],
    });

    for decision in trace.decisions() {
        flow.push(FlowEntry {
            timestamp: decision.timestamp(),
            event: FlowEvent::Decision {
                kind: decision.decision_kind(),
            },
            step_name: Some(decision.step_name().to_string()),
            detail: decision.description().to_string(),
            evidence_ids: decision.evidence_ids().to_vec(),
        });
    }

    for error in trace.errors() {
        flow.push(FlowEntry {
            timestamp: error.timestamp(),
            event: FlowEvent::Error {
                code: error.error_code().to_string(),
                recovered: error.recovered(),
            },
            step_name: Some(error.step_name().to_string()),
            detail: error.error_message().to_string(),
            evidence_ids: vec![],
        });
    }

    if let Some(completed) = trace.completed_at() {
        flow.push(FlowEntry {
            timestamp: completed,
            event: FlowEvent::Completed,
            step_name: None,
            detail: "execution completed".to_string(),
            evidence_ids: vec![],
        });
    }

    // Stable sort: entries with equal timestamps keep push order, the
    // completion marker goes after everything at its instant
    flow.sort_by_key(|entry| (entry.timestamp, entry.event.tie_rank()));

    if trace.completed_at().is_none() {
        let last = flow
            .last()
            .map(|e| e.timestamp)
            .unwrap_or_else(|| trace.execution_timestamp());
        flow.push(FlowEntry {
            timestamp: last,
            event: FlowEvent::Aborted,
            step_name: None,
            detail: "execution aborted before completion".to_string(),
            evidence_ids: vec![],
        });
    }

    flow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ExecutionMode, InputSummary, TraceDecision, TraceError, TraceParts};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    fn decision(step: &str, secs: i64, evidence: &[&str]) -> TraceDecision {
        TraceDecision::builder(step, DecisionKind::EvidenceCheck, "checked cited evidence")
            .evidence_ids(evidence.iter().copied())
            .at(at(secs))
            .build()
            .unwrap()
    }

    fn parts() -> TraceParts {
        TraceParts {
            case_id: "C1".to_string(),
            execution_timestamp: t0(),
            input_summary: InputSummary::default(),
            chunk_ids: ["chunk_1".to_string()].into_iter().collect(),
            document_ids: BTreeSet::new(),
            legal_report_hash: Some(crate::hash::sha256_hex(b"report")),
            decisions: vec![decision("ingest", 1, &[]), decision("check", 2, &["chunk_1"])],
            errors: vec![],
            execution_mode: ExecutionMode::Strict,
            system_version: "1.0.0".to_string(),
            trace_schema_version: TRACE_SCHEMA_VERSION.to_string(),
            completed_at: Some(at(3)),
        }
    }

    fn trace(parts: TraceParts) -> ExecutionTrace {
        ExecutionTrace::new(parts).unwrap()
    }

    /// Rebuild a trace through JSON to simulate storage-level corruption
    fn corrupt(trace: &ExecutionTrace, edit: impl FnOnce(&mut serde_json::Value)) -> ExecutionTrace {
        let mut value = serde_json::to_value(trace).unwrap();
        edit(&mut value);
        serde_json::from_value(value).unwrap()
    }

    fn replayer() -> Replayer {
        Replayer::new()
    }

    #[test]
    fn test_valid_trace() {
        let result = replayer().replay_at(&trace(parts()), None, at(60));
        assert!(result.is_valid, "{:?}", result.divergences);
        assert!(result.divergences.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_orphan_evidence() {
        let mut p = parts();
        p.decisions.push(decision("cite", 2, &["chunk_9", "chunk_9"]));
        let result = replayer().replay_at(&trace(p), None, at(60));

        assert!(!result.is_valid);
        let orphans = result.divergences_of(DivergenceKind::OrphanEvidence);
        assert_eq!(orphans.len(), 1);
        assert!(orphans[0].message.contains("chunk_9"));
        assert_eq!(orphans[0].decision_index, Some(2));
    }

    #[test]
    fn test_chunks_without_report_is_warning() {
        let mut p = parts();
        p.legal_report_hash = None;
        let result = replayer().replay_at(&trace(p), None, at(60));

        assert!(result.is_valid);
        assert_eq!(result.warnings_of(WarningKind::PossiblyIncompleteRun).len(), 1);
    }

    #[test]
    fn test_duplicate_step_name_is_warning() {
        let mut p = parts();
        p.decisions.push(decision("check", 3, &["chunk_1"]));
        let result = replayer().replay_at(&trace(p), None, at(60));

        assert!(result.is_valid);
        let warnings = result.warnings_of(WarningKind::DuplicateStepName);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("'check'"));
    }

    #[test]
    fn test_future_execution_timestamp() {
        let result = replayer().replay_at(&trace(parts()), None, t0() - Duration::hours(1));
        assert_eq!(
            result.divergences_of(DivergenceKind::FutureExecutionTimestamp).len(),
            1
        );
    }

    #[test]
    fn test_future_tolerance() {
        let r = replayer().with_future_tolerance(Duration::seconds(30));
        let result = r.replay_at(&trace(parts()), None, t0() - Duration::seconds(10));
        assert!(result.divergences_of(DivergenceKind::FutureExecutionTimestamp).is_empty());
    }

    #[test]
    fn test_corrupted_ordering_detected() {
        let original = trace(parts());
        let tampered = corrupt(&original, |v| {
            v["decisions"][1]["timestamp"] = serde_json::json!("2024-03-01T09:59:00Z");
        });

        let result = replayer().replay_at(&tampered, None, at(60));
        let unordered = result.divergences_of(DivergenceKind::UnorderedDecisions);
        assert_eq!(unordered.len(), 1);
        assert_eq!(unordered[0].decision_index, Some(1));
    }

    #[test]
    fn test_completed_before_last_decision() {
        let mut p = parts();
        p.completed_at = Some(at(1));
        let result = replayer().replay_at(&trace(p), None, at(60));

        assert_eq!(
            result.divergences_of(DivergenceKind::CompletedBeforeLastDecision).len(),
            1
        );
        assert!(result.divergences_of(DivergenceKind::CompletedBeforeStart).is_empty());
    }

    #[test]
    fn test_completed_before_start() {
        let mut p = parts();
        p.completed_at = Some(t0() - Duration::seconds(1));
        let result = replayer().replay_at(&trace(p), None, at(60));
        assert_eq!(result.divergences_of(DivergenceKind::CompletedBeforeStart).len(), 1);
    }

    #[test]
    fn test_aborted_run_is_warning_with_marker() {
        let mut p = parts();
        p.completed_at = None;
        let result = replayer().replay_at(&trace(p), None, at(60));

        assert!(result.is_valid);
        assert_eq!(result.warnings_of(WarningKind::RunAborted).len(), 1);
        let last = result.reconstructed_flow.last().unwrap();
        assert_eq!(last.event, FlowEvent::Aborted);
        assert_eq!(last.timestamp, at(2));
    }

    #[test]
    fn test_corrupted_description_and_step() {
        let tampered = corrupt(&trace(parts()), |v| {
            v["decisions"][0]["description"] = serde_json::json!("short");
            v["decisions"][1]["step_name"] = serde_json::json!("");
        });

        let result = replayer().replay_at(&tampered, None, at(60));
        assert_eq!(result.divergences_of(DivergenceKind::InvalidDescription).len(), 1);
        assert_eq!(result.divergences_of(DivergenceKind::EmptyStepName).len(), 1);
    }

    #[test]
    fn test_empty_decisions_and_trace_id_tamper() {
        let tampered = corrupt(&trace(parts()), |v| {
            v["decisions"] = serde_json::json!([]);
            v["trace_id"] = serde_json::json!("not-derived");
        });

        let result = replayer().replay_at(&tampered, None, at(60));
        assert_eq!(result.divergences_of(DivergenceKind::EmptyDecisionLog).len(), 1);
        assert_eq!(result.divergences_of(DivergenceKind::TraceIdMismatch).len(), 1);
    }

    #[test]
    fn test_missing_case_id() {
        let tampered = corrupt(&trace(parts()), |v| {
            v["case_id"] = serde_json::json!("");
        });
        let result = replayer().replay_at(&tampered, None, at(60));
        assert_eq!(result.divergences_of(DivergenceKind::MissingIdentifier).len(), 1);
    }

    #[test]
    fn test_schema_version_mismatch_is_warning() {
        let mut p = parts();
        p.trace_schema_version = "0.9.0".to_string();
        let result = replayer().replay_at(&trace(p), None, at(60));
        assert!(result.is_valid);
        assert_eq!(result.warnings_of(WarningKind::SchemaVersionMismatch).len(), 1);
    }

    #[test]
    fn test_unrecovered_error_is_warning() {
        let mut p = parts();
        p.errors = vec![
            TraceError::new("E_OCR", "page unreadable", "ingest", at(1), true),
            TraceError::new("E_LLM", "generation failed", "report", at(2), false),
        ];
        let result = replayer().replay_at(&trace(p), None, at(60));
        assert!(result.is_valid);
        assert_eq!(result.warnings_of(WarningKind::UnrecoveredError).len(), 1);
    }

    #[test]
    fn test_flow_is_chronological() {
        let mut p = parts();
        p.errors = vec![TraceError::new("E_OCR", "page unreadable", "ingest", at(1), true)];
        let result = replayer().replay_at(&trace(p), None, at(60));

        let events: Vec<&FlowEvent> = result.reconstructed_flow.iter().map(|e| &e.event).collect();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], &FlowEvent::Start);
        assert!(matches!(events[1], FlowEvent::Decision { .. }));
        assert!(matches!(events[2], FlowEvent::Error { .. }));
        assert!(matches!(events[3], FlowEvent::Decision { .. }));
        assert_eq!(events[4], &FlowEvent::Completed);

        let times: Vec<_> = result.reconstructed_flow.iter().map(|e| e.timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_flow_places_late_error_after_completion() {
        let mut p = parts();
        p.errors = vec![TraceError::new("E_AUDIT_LOG", "log sink closed", "cleanup", at(4), true)];
        let result = replayer().replay_at(&trace(p), None, at(60));
        assert!(result.is_valid);

        let flow = &result.reconstructed_flow;
        assert_eq!(flow.len(), 5);
        assert_eq!(flow[3].event, FlowEvent::Completed);
        assert_eq!(flow[3].timestamp, at(3));
        assert!(matches!(flow[4].event, FlowEvent::Error { .. }));
        assert_eq!(flow[4].timestamp, at(4));
        assert!(flow.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_flow_completion_ties_go_last() {
        let mut p = parts();
        p.errors = vec![TraceError::new("E_LATE", "write retried once", "report", at(3), true)];
        let result = replayer().replay_at(&trace(p), None, at(60));

        let last = result.reconstructed_flow.last().unwrap();
        assert_eq!(last.event, FlowEvent::Completed);
        assert_eq!(last.timestamp, at(3));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let t = trace(parts());
        let r = replayer();
        assert_eq!(r.replay_at(&t, None, at(60)), r.replay_at(&t, None, at(60)));
    }

    #[test]
    fn test_summary_and_display() {
        let mut p = parts();
        p.decisions.push(decision("cite", 2, &["chunk_9"]));
        let result = replayer().replay_at(&trace(p), None, at(60));

        assert!(result.summary().contains("INVALID"));
        let rendered = result.divergences[0].to_string();
        assert!(rendered.starts_with("[orphan_evidence] decision 2"));
    }

    #[test]
    fn test_flow_entry_serialization() {
        let result = replayer().replay_at(&trace(parts()), None, at(60));
        let json = serde_json::to_value(&result.reconstructed_flow[1]).unwrap();
        assert_eq!(json["type"], "decision");
        assert_eq!(json["kind"], "evidence_check");
        assert_eq!(json["step_name"], "ingest");
    }
}
