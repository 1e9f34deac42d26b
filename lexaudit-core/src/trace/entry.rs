//! Trace entries: audited decisions and surfaced errors
//!
//! Both entry types are values. Fields are private and there are no setters;
//! the only way to obtain a different entry is to construct a new one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuditError, Result};

use super::MIN_DESCRIPTION_LENGTH;

/// Kind of an audited decision
///
/// Closed set: adding a kind is a schema change and bumps
/// [`TRACE_SCHEMA_VERSION`](super::TRACE_SCHEMA_VERSION).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Validation,
    EvidenceCheck,
    GateApplied,
    ChunkSelected,
    ReportGenerated,
    ErrorHandled,
}

impl DecisionKind {
    /// All kinds, in declaration order
    pub const ALL: [DecisionKind; 6] = [
        DecisionKind::Validation,
        DecisionKind::EvidenceCheck,
        DecisionKind::GateApplied,
        DecisionKind::ChunkSelected,
        DecisionKind::ReportGenerated,
        DecisionKind::ErrorHandled,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Validation => "validation",
            DecisionKind::EvidenceCheck => "evidence_check",
            DecisionKind::GateApplied => "gate_applied",
            DecisionKind::ChunkSelected => "chunk_selected",
            DecisionKind::ReportGenerated => "report_generated",
            DecisionKind::ErrorHandled => "error_handled",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DecisionKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown decision kind: {}", s))
    }
}

/// Step-specific metadata value
///
/// Deliberately narrower than `serde_json::Value`: primitives and lists of
/// primitives only, so the trace stays type-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    /// Convert to a JSON value (used for canonical hashing)
    pub fn to_json(&self) -> Value {
        match self {
            MetadataValue::Null => Value::Null,
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Integer(i) => Value::from(*i),
            MetadataValue::Float(f) => Value::from(*f),
            MetadataValue::Text(s) => Value::String(s.clone()),
            MetadataValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        MetadataValue::Integer(i64::from(v))
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Integer(i64::from(v))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(v: Vec<T>) -> Self {
        MetadataValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Opaque, key-sorted metadata map
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Canonical JSON object for a metadata map
pub(crate) fn metadata_json(metadata: &Metadata) -> Value {
    Value::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Returns the reason a description is unacceptable, if any
pub(crate) fn description_problem(description: &str) -> Option<String> {
    let len = description.trim().chars().count();
    if len < MIN_DESCRIPTION_LENGTH {
        Some(format!(
            "description must be at least {} characters, got {}",
            MIN_DESCRIPTION_LENGTH, len
        ))
    } else {
        None
    }
}

/// One audited step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDecision {
    step_name: String,
    decision_kind: DecisionKind,
    description: String,
    #[serde(default)]
    evidence_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validation_applied: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: Metadata,
}

impl TraceDecision {
    /// Construct a decision with no evidence, validation label or metadata
    pub fn new(
        step_name: impl Into<String>,
        decision_kind: DecisionKind,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        Self::builder(step_name, decision_kind, description)
            .at(timestamp)
            .build()
    }

    /// Start building a decision
    pub fn builder(
        step_name: impl Into<String>,
        decision_kind: DecisionKind,
        description: impl Into<String>,
    ) -> DecisionBuilder {
        DecisionBuilder {
            step_name: step_name.into(),
            decision_kind,
            description: description.into(),
            evidence_ids: Vec::new(),
            validation_applied: None,
            timestamp: None,
            metadata: Metadata::new(),
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn decision_kind(&self) -> DecisionKind {
        self.decision_kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evidence identifiers, in the order the step reported them
    pub fn evidence_ids(&self) -> &[String] {
        &self.evidence_ids
    }

    pub fn validation_applied(&self) -> Option<&str> {
        self.validation_applied.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Builder for [`TraceDecision`]
///
/// Validation happens in [`DecisionBuilder::build`]; a decision that fails
/// validation never exists.
#[derive(Debug, Clone)]
pub struct DecisionBuilder {
    step_name: String,
    decision_kind: DecisionKind,
    description: String,
    evidence_ids: Vec<String>,
    validation_applied: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    metadata: Metadata,
}

impl DecisionBuilder {
    /// Set the evidence identifiers this decision relied on
    pub fn evidence_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evidence_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Label the validation rule that fired
    pub fn validation(mut self, rule: impl Into<String>) -> Self {
        self.validation_applied = Some(rule.into());
        self
    }

    /// Replace the metadata map
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add one metadata entry
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the decision timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validate and construct the decision
    pub fn build(self) -> Result<TraceDecision> {
        if self.step_name.trim().is_empty() {
            return Err(AuditError::InvalidDecision {
                step_name: self.step_name,
                reason: "step_name must not be empty".to_string(),
            });
        }

        if let Some(reason) = description_problem(&self.description) {
            return Err(AuditError::InvalidDecision {
                step_name: self.step_name,
                reason,
            });
        }

        let timestamp = self.timestamp.ok_or_else(|| AuditError::InvalidDecision {
            step_name: self.step_name.clone(),
            reason: "timestamp is required".to_string(),
        })?;

        Ok(TraceDecision {
            step_name: self.step_name,
            decision_kind: self.decision_kind,
            description: self.description,
            evidence_ids: self.evidence_ids,
            validation_applied: self.validation_applied,
            timestamp,
            metadata: self.metadata,
        })
    }
}

/// A fault surfaced during the run
///
/// Errors do not invalidate a trace by themselves; `recovered` records
/// whether the pipeline carried on past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceError {
    error_code: String,
    error_message: String,
    step_name: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    recovered: bool,
}

impl TraceError {
    pub fn new(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        step_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        recovered: bool,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            error_message: error_message.into(),
            step_name: step_name.into(),
            timestamp,
            recovered,
        }
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn recovered(&self) -> bool {
        self.recovered
    }
}
