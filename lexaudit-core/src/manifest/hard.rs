//! Hard manifest types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trace::{ExecutionTrace, TRACE_SCHEMA_VERSION};

/// Digest function a manifest was certified under
///
/// Manifests that predate the field were certified over the summary digest,
/// so that is what deserialization falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityScheme {
    /// Identifiers, counts and version strings only
    #[default]
    Summary,
    /// Every field of the trace
    FullContent,
}

impl IntegrityScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityScheme::Summary => "summary",
            IntegrityScheme::FullContent => "full_content",
        }
    }

    /// Compute the trace digest under this scheme
    pub fn digest(&self, trace: &ExecutionTrace) -> String {
        match self {
            IntegrityScheme::Summary => trace.compute_summary_hash(),
            IntegrityScheme::FullContent => trace.compute_hash(),
        }
    }
}

impl std::fmt::Display for IntegrityScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IntegrityScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(IntegrityScheme::Summary),
            "full_content" | "full-content" => Ok(IntegrityScheme::FullContent),
            _ => Err(format!("Unknown integrity scheme: {}", s)),
        }
    }
}

/// Versions of the four interdependent schemas an audit depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersions {
    /// Evidence-chunk schema
    pub evidence_chunk: String,
    /// Retrieval schema
    pub retrieval: String,
    /// Generated legal output schema
    pub legal_output: String,
    /// Trace schema
    pub trace: String,
}

impl Default for SchemaVersions {
    fn default() -> Self {
        Self {
            evidence_chunk: "1.0.0".to_string(),
            retrieval: "1.0.0".to_string(),
            legal_output: "1.0.0".to_string(),
            trace: TRACE_SCHEMA_VERSION.to_string(),
        }
    }
}

/// What the surrounding system guarantees it will never do
///
/// Policy constants. They are asserted into every manifest and are not
/// computed from the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub never_operates_without_sources: bool,
    pub never_generates_without_evidence: bool,
    pub never_asserts_legal_validity: bool,
    pub never_skips_human_review: bool,
}

impl ExecutionLimits {
    /// The system-wide conservative declaration
    pub const CONSERVATIVE: ExecutionLimits = ExecutionLimits {
        never_operates_without_sources: true,
        never_generates_without_evidence: true,
        never_asserts_legal_validity: true,
        never_skips_human_review: true,
    };

    /// True when every limit is declared
    pub fn is_conservative(&self) -> bool {
        *self == Self::CONSERVATIVE
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::CONSERVATIVE
    }
}

/// Cost and call counters for the run (informational)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinOpsSnapshot {
    pub total_cost_usd: f64,
    pub llm_calls: u64,
    pub retrieval_calls: u64,
    pub total_tokens: u64,
}

/// Certificate binding an integrity hash and declared limits to one trace
///
/// Fields are read-only once the manifest exists. One manifest binds exactly
/// one trace; enforcing "at most one manifest per trace" is the storage
/// layer's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardManifest {
    pub(crate) manifest_version: String,
    pub(crate) trace_id: String,
    pub(crate) case_id: String,
    pub(crate) schema_versions: SchemaVersions,
    pub(crate) integrity_hash: String,
    #[serde(default)]
    pub(crate) integrity_scheme: IntegrityScheme,
    pub(crate) execution_limits: ExecutionLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) finops_snapshot: Option<FinOpsSnapshot>,
    pub(crate) signed_at: DateTime<Utc>,
    pub(crate) system_version: String,
}

impl HardManifest {
    pub fn manifest_version(&self) -> &str {
        &self.manifest_version
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn schema_versions(&self) -> &SchemaVersions {
        &self.schema_versions
    }

    /// 64-character hex digest of the bound trace
    pub fn integrity_hash(&self) -> &str {
        &self.integrity_hash
    }

    pub fn integrity_scheme(&self) -> IntegrityScheme {
        self.integrity_scheme
    }

    pub fn execution_limits(&self) -> &ExecutionLimits {
        &self.execution_limits
    }

    pub fn finops_snapshot(&self) -> Option<&FinOpsSnapshot> {
        self.finops_snapshot.as_ref()
    }

    pub fn signed_at(&self) -> DateTime<Utc> {
        self.signed_at
    }

    pub fn system_version(&self) -> &str {
        &self.system_version
    }

    /// Recompute the trace digest and compare with the certified hash
    pub fn verify_integrity(&self, trace: &ExecutionTrace) -> bool {
        self.integrity_scheme.digest(trace) == self.integrity_hash
    }
}
