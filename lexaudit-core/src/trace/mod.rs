//! Execution traces: model, builder, replay
//!
//! A trace is the append-only, temporally ordered record of every decision and
//! error made during one run of the case-review pipeline.
//!
//! ## Key Properties
//!
//! - **Ordered**: decisions are sorted by timestamp, enforced at construction
//! - **Immutable**: no field can change once the trace exists
//! - **Identity-derived id**: `trace_id` is a digest of case id and start time
//! - **Replayable**: any process can check a stored trace for coherence
//!
//! ## Lifecycle
//!
//! ```text
//! Live run (one owner)          Finished                   Any time later
//! ────────────────────          ────────                   ──────────────
//! TraceBuilder ──── build() ──► ExecutionTrace ──────────► Replayer::replay()
//!   record_decision()              │ (read-only,             │
//!   record_error()                 │  shareable)             └─ ReplayResult
//!   register_*()                   └─► create_manifest() ──► HardManifest
//!   mark_completed()
//! ```

mod builder;
mod diff;
mod entry;
mod execution;
mod replay;

pub use builder::{EvidenceReport, TraceBuilder};
pub use diff::{diff, StepSummary, TraceDiff};
pub use entry::{
    DecisionBuilder, DecisionKind, Metadata, MetadataValue, TraceDecision, TraceError,
};
pub use execution::{ExecutionMode, ExecutionTrace, InputSummary, TraceParts};
pub use replay::{
    reconstruct_flow, replay, Divergence, DivergenceKind, FlowEntry, FlowEvent, ReplayResult,
    ReplayWarning, Replayer, WarningKind, DEFAULT_FUTURE_TOLERANCE_SECS,
};

/// Version of the trace schema written by this library
pub const TRACE_SCHEMA_VERSION: &str = "1.0.0";

/// Minimum number of characters in a decision description
pub const MIN_DESCRIPTION_LENGTH: usize = 10;

/// Evidence ids in this namespace are chunk ids
///
/// Only namespaced ids (`chunk:<id>`) are folded into the chunk set
/// automatically. Bare ids such as `chunk_9` must be registered explicitly.
///
/// ```rust
/// use lexaudit_core::{replay, DecisionKind, Metadata, TraceBuilder};
///
/// let mut builder = TraceBuilder::new("C1");
/// builder.register_chunks_used(["chunk_2"]);
/// builder
///     .record_decision(
///         "cite",
///         DecisionKind::EvidenceCheck,
///         "conclusion cites two retrieved chunks",
///         ["chunk:1", "chunk_2"],
///         None,
///         Metadata::new(),
///     )
///     .unwrap();
/// builder.mark_completed();
/// let trace = builder.build().unwrap();
///
/// // `chunk:1` was folded in by the builder, `chunk_2` was registered by hand
/// assert!(trace.chunk_ids().contains("chunk:1"));
/// assert!(trace.chunk_ids().contains("chunk_2"));
/// assert!(replay(&trace, None).divergences.is_empty());
/// ```
pub const DEFAULT_CHUNK_PREFIX: &str = "chunk:";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    use crate::timing::MockClock;

    #[test]
    fn test_trace_serialization() {
        let clock = Arc::new(MockClock::ticking(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            Duration::milliseconds(1),
        ));
        let mut builder = TraceBuilder::with_clock("case-123", clock);
        builder
            .decide("ingest", DecisionKind::Validation, "validated 3 documents")
            .unwrap();
        builder.mark_completed();
        let trace = builder.build().unwrap();

        let json = serde_json::to_string(&trace).unwrap();
        let parsed: ExecutionTrace = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.case_id(), "case-123");
        assert_eq!(parsed.decisions()[0].decision_kind(), DecisionKind::Validation);
        assert!(replay(&parsed, None).is_valid);
    }

    #[test]
    fn test_builder_then_replay_is_valid() {
        let clock = Arc::new(MockClock::ticking(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            Duration::milliseconds(1),
        ));
        let mut builder = TraceBuilder::with_clock("case-123", clock.clone());
        builder.register_chunks_used(["chunk_1"]);
        builder
            .record_decision(
                "check",
                DecisionKind::EvidenceCheck,
                "evidence verified against source",
                ["chunk_1"],
                Some("citation_present"),
                Metadata::new(),
            )
            .unwrap();
        builder.mark_completed();
        let trace = builder.build().unwrap();

        let result = Replayer::new().with_clock(clock).replay(&trace, None);
        assert!(result.is_valid);
        assert_eq!(result.warnings_of(WarningKind::PossiblyIncompleteRun).len(), 1);
    }
}
