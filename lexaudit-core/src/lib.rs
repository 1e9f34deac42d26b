//! # LexAudit Core - execution traces for legal case review
//!
//! LexAudit records what an automated legal-analysis pipeline did, in a form
//! that can be certified and later audited without re-running the pipeline:
//!
//! - **Trace**: an append-only, temporally ordered, immutable record of every
//!   decision and error in one run, built by a [`TraceBuilder`]
//! - **Replay**: logic-free coherence checks over a finished trace
//!   (structure, timing, evidence references, decision validity)
//! - **Manifest**: a [`HardManifest`] binding an integrity hash and declared
//!   execution limits to exactly one trace
//!
//! ## Core Principle
//!
//! > A run whose audit record cannot be built has failed.
//!
//! Invariant violations surface at construction. Replay exists to catch
//! corruption introduced after a valid trace was built.
//!
//! ## Example
//!
//! ```rust
//! use lexaudit_core::{
//!     create_manifest, replay, verify_manifest, DecisionKind, Metadata, SchemaVersions,
//!     TraceBuilder,
//! };
//!
//! let mut builder = TraceBuilder::new("C1");
//! builder.set_input_summary("tenant disputes deposit deduction", &Default::default());
//! builder.register_chunks_used(["chunk_1"]);
//! builder
//!     .record_decision(
//!         "evidence_check",
//!         DecisionKind::EvidenceCheck,
//!         "claim supported by lease clause 4",
//!         ["chunk_1"],
//!         Some("citation_required"),
//!         Metadata::new(),
//!     )
//!     .unwrap();
//! builder.mark_completed();
//! let trace = builder.build().unwrap();
//!
//! let result = replay(&trace, None);
//! assert!(result.is_valid);
//!
//! let manifest = create_manifest(&trace, "1.0.0", SchemaVersions::default(), None);
//! assert!(verify_manifest(&manifest, &trace));
//! ```

pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod storage;
pub mod timing;
pub mod trace;

// Re-export main types
pub use config::AuditConfig;
pub use error::{AuditError, ErrorCategory, ErrorDetail, ErrorResponse, Result};
pub use manifest::{
    check_binding, create_manifest, verify_manifest, Certifier, ExecutionLimits, FinOpsSnapshot,
    HardManifest, IntegrityScheme, SchemaVersions,
};
pub use storage::{AuditReport, CertificationService, FileStorage, InMemoryStorage, TraceStore};
pub use timing::{Clock, MockClock, SystemClock};
pub use trace::{
    diff, reconstruct_flow, replay, DecisionKind, Divergence, DivergenceKind, EvidenceReport,
    ExecutionMode, ExecutionTrace, FlowEntry, FlowEvent, InputSummary, Metadata, MetadataValue,
    ReplayResult, ReplayWarning, Replayer, TraceBuilder, TraceDecision, TraceDiff, TraceError,
    TraceParts, WarningKind,
};

/// Version of this library, stamped on traces by default
pub const SYSTEM_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use manifest::MANIFEST_VERSION;
pub use trace::TRACE_SCHEMA_VERSION;
