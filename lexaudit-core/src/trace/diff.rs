//! Step-level comparison of two runs
//!
//! Step names are expected to be stable across equivalent runs, so two traces
//! for the same case and input should walk the same `(step_name, kind)`
//! sequence. The diff finds where they part ways.

use serde::{Deserialize, Serialize};

use super::entry::{DecisionKind, TraceDecision};
use super::execution::ExecutionTrace;

/// One decision, reduced to what the diff compares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub index: usize,
    pub step_name: String,
    pub decision_kind: DecisionKind,
}

impl StepSummary {
    fn of(index: usize, decision: &TraceDecision) -> Self {
        Self {
            index,
            step_name: decision.step_name().to_string(),
            decision_kind: decision.decision_kind(),
        }
    }

    fn same_step(a: &TraceDecision, b: &TraceDecision) -> bool {
        a.step_name() == b.step_name() && a.decision_kind() == b.decision_kind()
    }
}

/// Difference between the decision sequences of two traces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceDiff {
    /// Whether both runs took the same steps in the same order
    pub identical: bool,
    pub first_count: usize,
    pub second_count: usize,
    pub common_prefix_length: usize,
    /// Index of the first differing step, if any
    pub divergence_point: Option<usize>,
    /// Steps of the first run from the divergence point on
    pub only_in_first: Vec<StepSummary>,
    /// Steps of the second run from the divergence point on
    pub only_in_second: Vec<StepSummary>,
}

/// Compare the step sequences of two traces
pub fn diff(first: &ExecutionTrace, second: &ExecutionTrace) -> TraceDiff {
    let a = first.decisions();
    let b = second.decisions();

    let common_prefix_length = a
        .iter()
        .zip(b.iter())
        .take_while(|(x, y)| StepSummary::same_step(x, y))
        .count();

    let divergence_point = if common_prefix_length == a.len() && common_prefix_length == b.len() {
        None
    } else {
        Some(common_prefix_length)
    };

    let tail = |decisions: &[TraceDecision]| -> Vec<StepSummary> {
        decisions
            .iter()
            .enumerate()
            .skip(common_prefix_length)
            .map(|(i, d)| StepSummary::of(i, d))
            .collect()
    };

    TraceDiff {
        identical: divergence_point.is_none(),
        first_count: a.len(),
        second_count: b.len(),
        common_prefix_length,
        divergence_point,
        only_in_first: tail(a),
        only_in_second: tail(b),
    }
}
