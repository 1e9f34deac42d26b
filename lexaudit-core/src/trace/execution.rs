//! The execution trace aggregate
//!
//! `ExecutionTrace::new` is the single validating constructor. Deserialized
//! traces bypass it on purpose: they describe what storage handed back, which
//! is exactly what the [`Replayer`](super::Replayer) needs to inspect.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::hash::{canonical_json, sha256_hex, FieldHasher};

use super::entry::{metadata_json, TraceDecision, TraceError};

/// How the surrounding pipeline treats failures
///
/// Stored for audit; the core never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Strict,
    Permissive,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Strict => "strict",
            ExecutionMode::Permissive => "permissive",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ExecutionMode::Strict),
            "permissive" => Ok(ExecutionMode::Permissive),
            _ => Err(format!("Unknown execution mode: {}", s)),
        }
    }
}

/// Hashed description of the original request
///
/// The raw request text never enters a trace. Only its digest and length are
/// kept, so two traces can be compared for "same input" without re-exposing it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputSummary {
    /// SHA-256 of the raw request text
    pub query_hash: String,
    /// Length of the raw request text, in characters
    pub query_length: usize,
    /// Stringified description of the filters applied to the request
    pub filters: String,
}

impl InputSummary {
    /// Summarize a raw request
    pub fn from_raw(raw_text: &str, filters: &BTreeMap<String, String>) -> Self {
        let filters = filters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        Self {
            query_hash: sha256_hex(raw_text.as_bytes()),
            query_length: raw_text.chars().count(),
            filters,
        }
    }

    /// True if `raw_text` is the request this summary was taken from
    pub fn matches(&self, raw_text: &str) -> bool {
        self.query_hash == sha256_hex(raw_text.as_bytes())
    }
}

/// Everything needed to construct an [`ExecutionTrace`]
///
/// A plain, mutable staging struct. The trace derived from it is immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceParts {
    pub case_id: String,
    pub execution_timestamp: DateTime<Utc>,
    pub input_summary: InputSummary,
    pub chunk_ids: BTreeSet<String>,
    pub document_ids: BTreeSet<String>,
    pub legal_report_hash: Option<String>,
    pub decisions: Vec<TraceDecision>,
    pub errors: Vec<TraceError>,
    pub execution_mode: ExecutionMode,
    pub system_version: String,
    pub trace_schema_version: String,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Immutable record of every decision and error in one execution
///
/// There are no setters. Any change means building a new trace from
/// [`TraceParts`] (see [`ExecutionTrace::to_parts`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    trace_id: String,
    case_id: String,
    execution_timestamp: DateTime<Utc>,
    #[serde(default)]
    input_summary: InputSummary,
    #[serde(default)]
    chunk_ids: BTreeSet<String>,
    #[serde(default)]
    document_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    legal_report_hash: Option<String>,
    decisions: Vec<TraceDecision>,
    #[serde(default)]
    errors: Vec<TraceError>,
    execution_mode: ExecutionMode,
    system_version: String,
    trace_schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl ExecutionTrace {
    /// Validate `parts` and construct the trace
    ///
    /// Fails with `EmptyDecisionLog` if there are no decisions and with
    /// `UnorderedDecisions` (naming the first offending pair) if decision
    /// timestamps are not ascending. Equal timestamps are accepted.
    pub fn new(parts: TraceParts) -> Result<Self> {
        if parts.decisions.is_empty() {
            return Err(AuditError::EmptyDecisionLog);
        }

        if let Some(index) = first_unordered(&parts.decisions) {
            return Err(AuditError::UnorderedDecisions {
                index,
                previous: parts.decisions[index - 1].timestamp(),
                current: parts.decisions[index].timestamp(),
            });
        }

        Ok(Self {
            trace_id: Self::derive_trace_id(&parts.case_id, parts.execution_timestamp),
            case_id: parts.case_id,
            execution_timestamp: parts.execution_timestamp,
            input_summary: parts.input_summary,
            chunk_ids: parts.chunk_ids,
            document_ids: parts.document_ids,
            legal_report_hash: parts.legal_report_hash,
            decisions: parts.decisions,
            errors: parts.errors,
            execution_mode: parts.execution_mode,
            system_version: parts.system_version,
            trace_schema_version: parts.trace_schema_version,
            completed_at: parts.completed_at,
        })
    }

    /// Deterministic trace id from the run's identity
    ///
    /// Depends only on `case_id` and `execution_timestamp`, never on content.
    pub fn derive_trace_id(case_id: &str, execution_timestamp: DateTime<Utc>) -> String {
        let mut hasher = FieldHasher::new();
        hasher
            .field(case_id)
            .field(format_timestamp(execution_timestamp));
        hasher.finish()
    }

    /// Copy the trace back into mutable parts
    ///
    /// The only route to a modified trace; `ExecutionTrace::new` re-derives
    /// the id and re-validates.
    pub fn to_parts(&self) -> TraceParts {
        TraceParts {
            case_id: self.case_id.clone(),
            execution_timestamp: self.execution_timestamp,
            input_summary: self.input_summary.clone(),
            chunk_ids: self.chunk_ids.clone(),
            document_ids: self.document_ids.clone(),
            legal_report_hash: self.legal_report_hash.clone(),
            decisions: self.decisions.clone(),
            errors: self.errors.clone(),
            execution_mode: self.execution_mode,
            system_version: self.system_version.clone(),
            trace_schema_version: self.trace_schema_version.clone(),
            completed_at: self.completed_at,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn execution_timestamp(&self) -> DateTime<Utc> {
        self.execution_timestamp
    }

    pub fn input_summary(&self) -> &InputSummary {
        &self.input_summary
    }

    pub fn chunk_ids(&self) -> &BTreeSet<String> {
        &self.chunk_ids
    }

    pub fn document_ids(&self) -> &BTreeSet<String> {
        &self.document_ids
    }

    pub fn legal_report_hash(&self) -> Option<&str> {
        self.legal_report_hash.as_deref()
    }

    pub fn decisions(&self) -> &[TraceDecision] {
        &self.decisions
    }

    pub fn errors(&self) -> &[TraceError] {
        &self.errors
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn system_version(&self) -> &str {
        &self.system_version
    }

    pub fn trace_schema_version(&self) -> &str {
        &self.trace_schema_version
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// A trace without `completed_at` belongs to an aborted run
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Timestamp of the last decision
    pub fn last_decision_at(&self) -> Option<DateTime<Utc>> {
        self.decisions.last().map(|d| d.timestamp())
    }

    /// Full-content integrity digest (SHA-256, 64 hex chars)
    ///
    /// Covers every field of the trace, including each decision's
    /// description, evidence, validation label and metadata, and every error.
    pub fn compute_hash(&self) -> String {
        let mut h = FieldHasher::new();

        h.field("full_content/1")
            .field(&self.trace_id)
            .field(&self.case_id)
            .field(format_timestamp(self.execution_timestamp))
            .field(&self.input_summary.query_hash)
            .field(self.input_summary.query_length.to_string())
            .field(&self.input_summary.filters);

        h.field(self.chunk_ids.len().to_string());
        for id in &self.chunk_ids {
            h.field(id);
        }
        h.field(self.document_ids.len().to_string());
        for id in &self.document_ids {
            h.field(id);
        }
        h.optional_field(self.legal_report_hash.as_deref());

        h.field(self.decisions.len().to_string());
        for d in &self.decisions {
            h.field(d.step_name())
                .field(d.decision_kind().as_str())
                .field(d.description())
                .field(d.evidence_ids().len().to_string());
            for id in d.evidence_ids() {
                h.field(id);
            }
            h.optional_field(d.validation_applied())
                .field(format_timestamp(d.timestamp()))
                .field(canonical_json(&metadata_json(d.metadata())));
        }

        h.field(self.errors.len().to_string());
        for e in &self.errors {
            h.field(e.error_code())
                .field(e.error_message())
                .field(e.step_name())
                .field(format_timestamp(e.timestamp()))
                .field(if e.recovered() { "1" } else { "0" });
        }

        h.field(self.execution_mode.as_str())
            .field(&self.system_version)
            .field(&self.trace_schema_version)
            .optional_field(self.completed_at.map(format_timestamp));

        h.finish()
    }

    /// Legacy summary digest
    ///
    /// Covers identifiers, counts and version strings only. A change to a
    /// decision's description or metadata does not change it. Kept so that
    /// manifests certified under the summary scheme still verify.
    pub fn compute_summary_hash(&self) -> String {
        let mut h = FieldHasher::new();

        h.field("summary/1")
            .field(&self.trace_id)
            .field(&self.case_id)
            .field(format_timestamp(self.execution_timestamp))
            .field(self.decisions.len().to_string())
            .field(self.errors.len().to_string());
        h.field(self.chunk_ids.len().to_string());
        for id in &self.chunk_ids {
            h.field(id);
        }
        h.optional_field(self.legal_report_hash.as_deref())
            .field(&self.system_version)
            .field(&self.trace_schema_version);

        h.finish()
    }
}

/// Index of the first decision whose timestamp precedes its predecessor's
pub(crate) fn first_unordered(decisions: &[TraceDecision]) -> Option<usize> {
    decisions
        .windows(2)
        .position(|pair| pair[1].timestamp() < pair[0].timestamp())
        .map(|i| i + 1)
}

/// RFC 3339 with nanosecond precision, so ordering survives a round trip
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
