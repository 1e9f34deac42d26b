//! Trace Builder
//!
//! The builder is the only place where trace state accumulates. One run owns
//! one builder and feeds it sequentially; it is passed down the pipeline by
//! `&mut` and consumed by [`TraceBuilder::build`]. There is no shared or
//! global builder, so concurrent runs never touch each other's state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::hash::sha256_hex;
use crate::timing::{Clock, SystemClock};

use super::entry::{DecisionKind, Metadata, TraceDecision, TraceError};
use super::execution::{ExecutionMode, ExecutionTrace, InputSummary, TraceParts};
use super::{DEFAULT_CHUNK_PREFIX, TRACE_SCHEMA_VERSION};

/// A generated report whose evidence can be folded into a trace
///
/// The report is hashed through its `Serialize` impl (canonical JSON), and
/// `evidence_ids` names every evidentiary fragment it cites.
pub trait EvidenceReport: Serialize {
    /// Identifiers of the evidence the report cites
    fn evidence_ids(&self) -> Vec<String>;
}

/// Accumulates one execution and hands off an immutable trace
#[derive(Debug)]
pub struct TraceBuilder {
    case_id: String,
    execution_timestamp: DateTime<Utc>,
    execution_mode: ExecutionMode,
    system_version: String,
    chunk_prefix: String,
    clock: Arc<dyn Clock>,
    input_summary: InputSummary,
    decisions: Vec<TraceDecision>,
    errors: Vec<TraceError>,
    chunk_ids: BTreeSet<String>,
    document_ids: BTreeSet<String>,
    legal_report_hash: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl TraceBuilder {
    /// Start a run for `case_id` on the system clock with default settings
    pub fn new(case_id: impl Into<String>) -> Self {
        Self::with_clock(case_id, Arc::new(SystemClock::new()))
    }

    /// Start a run reading time from `clock`
    ///
    /// The execution timestamp is taken from the clock here, once.
    pub fn with_clock(case_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let execution_timestamp = clock.now();
        Self {
            case_id: case_id.into(),
            execution_timestamp,
            execution_mode: ExecutionMode::default(),
            system_version: crate::SYSTEM_VERSION.to_string(),
            chunk_prefix: DEFAULT_CHUNK_PREFIX.to_string(),
            clock,
            input_summary: InputSummary::default(),
            decisions: Vec::new(),
            errors: Vec::new(),
            chunk_ids: BTreeSet::new(),
            document_ids: BTreeSet::new(),
            legal_report_hash: None,
            completed_at: None,
        }
    }

    /// Start a run configured from `config`
    pub fn from_config(
        case_id: impl Into<String>,
        config: &AuditConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_clock(case_id, clock)
            .with_mode(config.execution_mode)
            .with_system_version(config.system_version.clone())
            .with_chunk_prefix(config.chunk_prefix.clone())
    }

    /// Set the execution mode recorded in the trace
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Set the system version recorded in the trace
    pub fn with_system_version(mut self, version: impl Into<String>) -> Self {
        self.system_version = version.into();
        self
    }

    /// Set the prefix that marks an evidence id as a chunk id
    pub fn with_chunk_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.chunk_prefix = prefix.into();
        self
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn execution_timestamp(&self) -> DateTime<Utc> {
        self.execution_timestamp
    }

    /// Number of decisions recorded so far
    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }

    /// Number of errors recorded so far
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Trace id this run will carry
    pub fn trace_id(&self) -> String {
        ExecutionTrace::derive_trace_id(&self.case_id, self.execution_timestamp)
    }

    /// Record a decision stamped with the current time
    ///
    /// Evidence ids starting with the chunk prefix are also added to the
    /// run's chunk set, so callers don't have to report them twice.
    pub fn record_decision<I, S>(
        &mut self,
        step_name: &str,
        decision_kind: DecisionKind,
        description: &str,
        evidence_ids: I,
        validation_applied: Option<&str>,
        metadata: Metadata,
    ) -> Result<&TraceDecision>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let evidence_ids: Vec<String> = evidence_ids.into_iter().map(Into::into).collect();

        let mut builder = TraceDecision::builder(step_name, decision_kind, description)
            .evidence_ids(evidence_ids.iter().cloned())
            .metadata(metadata)
            .at(self.clock.now());
        if let Some(rule) = validation_applied {
            builder = builder.validation(rule);
        }
        let decision = builder.build().inspect_err(|e| {
            tracing::error!(case_id = %self.case_id, step = step_name, error = %e, "rejected decision");
        })?;

        for id in evidence_ids {
            if id.starts_with(&self.chunk_prefix) {
                self.chunk_ids.insert(id);
            }
        }

        tracing::debug!(
            case_id = %self.case_id,
            step = step_name,
            kind = %decision_kind,
            evidence = decision.evidence_ids().len(),
            "recorded decision"
        );

        self.decisions.push(decision);
        self.decisions
            .last()
            .ok_or_else(|| AuditError::InternalError {
                reason: "decision vanished after push".to_string(),
            })
    }

    /// Shorthand for a decision with no evidence, label or metadata
    pub fn decide(
        &mut self,
        step_name: &str,
        decision_kind: DecisionKind,
        description: &str,
    ) -> Result<&TraceDecision> {
        self.record_decision(
            step_name,
            decision_kind,
            description,
            Vec::<String>::new(),
            None,
            Metadata::new(),
        )
    }

    /// Record an error stamped with the current time
    ///
    /// Never aborts building; the error becomes part of the record.
    pub fn record_error(
        &mut self,
        error_code: &str,
        error_message: &str,
        step_name: &str,
        recovered: bool,
    ) -> &TraceError {
        tracing::debug!(
            case_id = %self.case_id,
            step = step_name,
            code = error_code,
            recovered,
            "recorded error"
        );
        let error = TraceError::new(error_code, error_message, step_name, self.clock.now(), recovered);
        self.errors.push(error);
        &self.errors[self.errors.len() - 1]
    }

    /// Store a digest of the request, never the request itself
    pub fn set_input_summary(&mut self, raw_text: &str, filters: &BTreeMap<String, String>) {
        self.input_summary = InputSummary::from_raw(raw_text, filters);
    }

    /// Merge chunk ids into the run's chunk set
    pub fn register_chunks_used<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunk_ids.extend(ids.into_iter().map(Into::into));
    }

    /// Merge document ids into the run's document set
    pub fn register_documents_consulted<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_ids.extend(ids.into_iter().map(Into::into));
    }

    /// Hash the generated report and fold its cited evidence into the chunk set
    pub fn register_legal_report<R: EvidenceReport>(&mut self, report: &R) -> Result<&str> {
        let value = serde_json::to_value(report)?;
        let digest = sha256_hex(crate::hash::canonical_json(&value).as_bytes());
        self.register_chunks_used(report.evidence_ids());

        tracing::debug!(case_id = %self.case_id, report_hash = %digest, "registered legal report");

        Ok(self.legal_report_hash.insert(digest).as_str())
    }

    /// Stamp the completion time
    ///
    /// A trace built without this call records an aborted run.
    pub fn mark_completed(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        self.completed_at = Some(now);
        now
    }

    /// Freeze the run into an immutable trace
    ///
    /// Every trace invariant is enforced here. A failure is fatal for the
    /// run: its audit record cannot be trusted.
    pub fn build(self) -> Result<ExecutionTrace> {
        let case_id = self.case_id.clone();
        let parts = TraceParts {
            case_id: self.case_id,
            execution_timestamp: self.execution_timestamp,
            input_summary: self.input_summary,
            chunk_ids: self.chunk_ids,
            document_ids: self.document_ids,
            legal_report_hash: self.legal_report_hash,
            decisions: self.decisions,
            errors: self.errors,
            execution_mode: self.execution_mode,
            system_version: self.system_version,
            trace_schema_version: TRACE_SCHEMA_VERSION.to_string(),
            completed_at: self.completed_at,
        };

        match ExecutionTrace::new(parts) {
            Ok(trace) => {
                tracing::info!(
                    trace_id = %trace.trace_id(),
                    case_id = %trace.case_id(),
                    decisions = trace.decisions().len(),
                    errors = trace.errors().len(),
                    completed = trace.is_completed(),
                    "built execution trace"
                );
                Ok(trace)
            }
            Err(e) => {
                tracing::error!(case_id = %case_id, error = %e, "trace build failed; run must be treated as failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::MockClock;
    use chrono::{Duration, TimeZone};
    use serde::Serialize;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn ticking() -> Arc<MockClock> {
        Arc::new(MockClock::ticking(t0(), Duration::milliseconds(100)))
    }

    #[derive(Serialize)]
    struct Report {
        title: String,
        citations: Vec<String>,
    }

    impl EvidenceReport for Report {
        fn evidence_ids(&self) -> Vec<String> {
            self.citations.clone()
        }
    }

    #[test]
    fn test_build_minimal_trace() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        builder
            .decide("ingest", DecisionKind::Validation, "validated 3 documents")
            .unwrap();
        builder.mark_completed();

        let trace = builder.build().unwrap();
        assert_eq!(trace.case_id(), "C1");
        assert_eq!(trace.execution_timestamp(), t0());
        assert_eq!(trace.decisions().len(), 1);
        assert!(trace.is_completed());
        assert_eq!(trace.trace_schema_version(), TRACE_SCHEMA_VERSION);
    }

    #[test]
    fn test_build_without_decisions_fails() {
        let builder = TraceBuilder::with_clock("C1", ticking());
        assert!(matches!(builder.build(), Err(AuditError::EmptyDecisionLog)));
    }

    #[test]
    fn test_chunk_prefixed_evidence_is_folded() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        builder
            .record_decision(
                "retrieve",
                DecisionKind::ChunkSelected,
                "selected relevant chunks",
                ["chunk:2", "doc_7", "chunk:1", "chunk_3"],
                None,
                Metadata::new(),
            )
            .unwrap();

        let trace = builder.build().unwrap();
        let chunks: Vec<_> = trace.chunk_ids().iter().cloned().collect();
        assert_eq!(chunks, vec!["chunk:1", "chunk:2"]);
        // Evidence order on the decision is preserved
        assert_eq!(
            trace.decisions()[0].evidence_ids(),
            &["chunk:2", "doc_7", "chunk:1", "chunk_3"]
        );
    }

    #[test]
    fn test_custom_chunk_prefix() {
        let mut builder = TraceBuilder::with_clock("C1", ticking()).with_chunk_prefix("frag:");
        builder
            .record_decision(
                "retrieve",
                DecisionKind::ChunkSelected,
                "selected relevant fragments",
                ["frag:1", "chunk_1"],
                None,
                Metadata::new(),
            )
            .unwrap();

        let trace = builder.build().unwrap();
        assert!(trace.chunk_ids().contains("frag:1"));
        assert!(!trace.chunk_ids().contains("chunk_1"));
    }

    #[test]
    fn test_invalid_decision_is_not_recorded() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        assert!(builder
            .decide("ingest", DecisionKind::Validation, "short")
            .is_err());
        assert_eq!(builder.decision_count(), 0);
    }

    #[test]
    fn test_registration_is_idempotent_and_sorted() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        builder.register_chunks_used(["chunk_b", "chunk_a"]);
        builder.register_chunks_used(["chunk_a"]);
        builder.register_documents_consulted(vec!["doc_2".to_string(), "doc_1".to_string()]);
        builder.register_documents_consulted(["doc_2"]);
        builder
            .decide("ingest", DecisionKind::Validation, "validated 2 documents")
            .unwrap();

        let trace = builder.build().unwrap();
        assert_eq!(
            trace.chunk_ids().iter().collect::<Vec<_>>(),
            vec!["chunk_a", "chunk_b"]
        );
        assert_eq!(
            trace.document_ids().iter().collect::<Vec<_>>(),
            vec!["doc_1", "doc_2"]
        );
    }

    #[test]
    fn test_register_legal_report() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        let report = Report {
            title: "Lease dispute".to_string(),
            citations: vec!["chunk_4".to_string(), "chunk_5".to_string()],
        };
        let digest = builder.register_legal_report(&report).unwrap().to_string();
        builder
            .decide("report", DecisionKind::ReportGenerated, "generated the case report")
            .unwrap();

        let trace = builder.build().unwrap();
        assert_eq!(trace.legal_report_hash(), Some(digest.as_str()));
        assert!(crate::hash::is_sha256_hex(&digest));
        assert!(trace.chunk_ids().contains("chunk_4"));
        assert!(trace.chunk_ids().contains("chunk_5"));
    }

    #[test]
    fn test_errors_do_not_abort_building() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        builder
            .decide("ingest", DecisionKind::Validation, "validated 1 document")
            .unwrap();
        builder.record_error("E_OCR", "page 4 unreadable", "ingest", true);
        builder.record_error("E_LLM", "generation failed", "report", false);

        let trace = builder.build().unwrap();
        assert_eq!(trace.errors().len(), 2);
        assert!(!trace.errors()[1].recovered());
        assert!(!trace.is_completed());
    }

    #[test]
    fn test_input_summary_hashes_raw_text() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        let mut filters = BTreeMap::new();
        filters.insert("year".to_string(), "2023".to_string());
        builder.set_input_summary("Confidential client statement", &filters);
        builder
            .decide("ingest", DecisionKind::Validation, "validated 1 document")
            .unwrap();

        let trace = builder.build().unwrap();
        let json = serde_json::to_string(&trace).unwrap();
        assert!(!json.contains("Confidential"));
        assert!(trace.input_summary().matches("Confidential client statement"));
        assert_eq!(trace.input_summary().filters, "year=2023");
    }

    #[test]
    fn test_trace_id_matches_preview() {
        let mut builder = TraceBuilder::with_clock("C1", ticking());
        let preview = builder.trace_id();
        builder
            .decide("ingest", DecisionKind::Validation, "validated 1 document")
            .unwrap();
        assert_eq!(builder.build().unwrap().trace_id(), preview);
    }

    #[test]
    fn test_from_config() {
        let config = AuditConfig::builder()
            .system_version("9.9.9")
            .execution_mode(ExecutionMode::Permissive)
            .build();
        let mut builder = TraceBuilder::from_config("C1", &config, ticking());
        builder
            .decide("ingest", DecisionKind::Validation, "validated 1 document")
            .unwrap();

        let trace = builder.build().unwrap();
        assert_eq!(trace.system_version(), "9.9.9");
        assert_eq!(trace.execution_mode(), ExecutionMode::Permissive);
    }
}
