//! Hard manifests: certificates over finished traces
//!
//! A manifest records the trace's integrity hash, the schema versions the
//! audit depends on and the system's declared execution limits. Any later
//! verifier can recompute the digest and confirm the binding.
//!
//! ```rust
//! use lexaudit_core::manifest::{create_manifest, verify_manifest, SchemaVersions};
//! use lexaudit_core::trace::{DecisionKind, TraceBuilder};
//!
//! let mut builder = TraceBuilder::new("C1");
//! builder.decide("ingest", DecisionKind::Validation, "validated 3 documents").unwrap();
//! builder.mark_completed();
//! let trace = builder.build().unwrap();
//!
//! let manifest = create_manifest(&trace, "1.0.0", SchemaVersions::default(), None);
//! assert!(verify_manifest(&manifest, &trace));
//! ```

mod certifier;
mod hard;

pub use certifier::{check_binding, create_manifest, verify_manifest, Certifier};
pub use hard::{ExecutionLimits, FinOpsSnapshot, HardManifest, IntegrityScheme, SchemaVersions};

/// Version of the manifest format written by this library
pub const MANIFEST_VERSION: &str = "1.0.0";
