//! LexAudit CLI - replay, certify and verify stored execution traces
//!
//! Usage:
//!     lexaudit replay trace.json
//!     lexaudit replay trace.json --manifest manifest.json --json
//!     lexaudit certify trace.json --out manifest.json
//!     lexaudit verify trace.json manifest.json
//!     lexaudit hash trace.json --scheme summary
//!
//! Logs go to stderr (`RUST_LOG`, default `lexaudit=info`); stdout carries
//! only results.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use lexaudit_core::{
    check_binding, AuditConfig, AuditError, Certifier, ExecutionTrace, FlowEvent, HardManifest,
    IntegrityScheme, ReplayResult, Replayer,
};
use serde::de::DeserializeOwned;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lexaudit")]
#[command(about = "Audit execution traces of the case-review pipeline")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a trace for coherence and print its reconstructed flow
    Replay {
        /// Path to the trace JSON file
        trace: PathBuf,

        /// Also check the binding to this manifest
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Output the replay result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a manifest for a completed trace
    Certify {
        /// Path to the trace JSON file
        trace: PathBuf,

        /// Write the manifest here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Digest scheme to certify under
        #[arg(long, value_enum, default_value_t = SchemeArg::FullContent)]
        scheme: SchemeArg,
    },
    /// Check that a manifest binds a trace (exit code 0 or 1)
    Verify {
        trace: PathBuf,
        manifest: PathBuf,
    },
    /// Print the integrity digest of a trace
    Hash {
        trace: PathBuf,

        #[arg(long, value_enum, default_value_t = SchemeArg::FullContent)]
        scheme: SchemeArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemeArg {
    Summary,
    FullContent,
}

impl From<SchemeArg> for IntegrityScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Summary => IntegrityScheme::Summary,
            SchemeArg::FullContent => IntegrityScheme::FullContent,
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing (to stderr so stdout stays machine-readable)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lexaudit=info,lexaudit_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether the checked artifact passed
fn run(command: Command) -> Result<bool, AuditError> {
    let config = AuditConfig::from_env()?;

    match command {
        Command::Replay {
            trace,
            manifest,
            json,
        } => {
            let trace: ExecutionTrace = load(&trace)?;
            let manifest = manifest
                .as_deref()
                .map(load::<HardManifest>)
                .transpose()?;

            let result = Replayer::from_config(&config).replay(&trace, manifest.as_ref());
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_replay(&result);
            }
            Ok(result.is_valid)
        }

        Command::Certify { trace, out, scheme } => {
            let trace: ExecutionTrace = load(&trace)?;
            if !trace.is_completed() {
                return Err(AuditError::TraceNotCompleted {
                    trace_id: trace.trace_id().to_string(),
                });
            }

            let manifest = Certifier::new().with_scheme(scheme.into()).create_manifest(
                &trace,
                config.system_version.clone(),
                config.schema_versions.clone(),
                None,
            );
            let json = serde_json::to_string_pretty(&manifest)?;

            match out {
                Some(path) => {
                    if path.exists() {
                        return Err(AuditError::ManifestAlreadyExists {
                            trace_id: trace.trace_id().to_string(),
                        });
                    }
                    std::fs::write(&path, json)?;
                    eprintln!("Manifest written to {}", path.display());
                }
                None => println!("{}", json),
            }
            Ok(true)
        }

        Command::Verify { trace, manifest } => {
            let trace: ExecutionTrace = load(&trace)?;
            let manifest: HardManifest = load(&manifest)?;

            match check_binding(&manifest, &trace) {
                Ok(()) => {
                    println!("OK: manifest binds trace {}", trace.trace_id());
                    Ok(true)
                }
                Err(AuditError::ManifestBindingMismatch { reason, .. }) => {
                    println!("MISMATCH: {}", reason);
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        }

        Command::Hash { trace, scheme } => {
            let trace: ExecutionTrace = load(&trace)?;
            println!("{}", IntegrityScheme::from(scheme).digest(&trace));
            Ok(true)
        }
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T, AuditError> {
    let content = std::fs::read_to_string(path).map_err(|e| AuditError::IoError {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn print_replay(result: &ReplayResult) {
    println!("{}", result.summary());
    println!();

    println!("## Flow");
    for entry in &result.reconstructed_flow {
        let label = match &entry.event {
            FlowEvent::Start => "START".to_string(),
            FlowEvent::Decision { kind } => kind.to_string(),
            FlowEvent::Error { code, recovered } => {
                format!("ERROR {}{}", code, if *recovered { " (recovered)" } else { "" })
            }
            FlowEvent::Completed => "COMPLETED".to_string(),
            FlowEvent::Aborted => "ABORTED".to_string(),
        };
        let step = entry.step_name.as_deref().unwrap_or("-");
        println!(
            "  {}  {:<20} {:<18} {}",
            entry.timestamp.to_rfc3339(),
            label,
            step,
            entry.detail
        );
        if !entry.evidence_ids.is_empty() {
            println!("      evidence: {}", entry.evidence_ids.join(", "));
        }
    }

    if !result.divergences.is_empty() {
        println!();
        println!("## Divergences");
        for divergence in &result.divergences {
            println!("  - {}", divergence);
        }
    }

    if !result.warnings.is_empty() {
        println!();
        println!("## Warnings");
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }
}
