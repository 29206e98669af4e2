//! Token-bounded batch planning over the analysable snapshots.

use replayscan_core::{FlowType, SessionManifest, Snapshot};
use std::collections::HashMap;
use tracing::debug;

use crate::manifest::estimate_tokens;

/// A slice of same-flow snapshots sent to the analysis service in one call.
#[derive(Debug, Clone)]
pub struct AnalysisBatch<'a> {
    pub batch_id: String,
    /// 1-based position across all batches of the run.
    pub index: usize,
    pub total: usize,
    pub flow_type: FlowType,
    pub snapshots: Vec<&'a Snapshot>,
    pub token_estimate: usize,
}

impl AnalysisBatch<'_> {
    pub fn steps(&self) -> Vec<u32> {
        self.snapshots.iter().map(|s| s.step_number).collect()
    }

    pub fn first_step(&self) -> Option<&Snapshot> {
        self.snapshots.first().copied()
    }
}

/// Greedy sequential packing: items are appended to the current chunk until
/// the next one would push it over `budget`. An item larger than the budget
/// on its own becomes a single-item chunk. Order is preserved.
pub fn split_by_budget<T, F>(items: Vec<T>, estimate: F, budget: usize) -> Vec<(Vec<T>, usize)>
where
    F: Fn(&T) -> usize,
{
    let mut chunks = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let tokens = estimate(&item);
        if !current.is_empty() && current_tokens + tokens > budget {
            chunks.push((std::mem::take(&mut current), current_tokens));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push(item);
    }
    if !current.is_empty() {
        chunks.push((current, current_tokens));
    }
    chunks
}

/// Group the non-excluded snapshots by flow type (main app first, then the
/// rest alphabetically) and split each group into batches of at most
/// `budget` estimated tokens.
pub fn plan_batches<'a>(
    snapshots: &'a [Snapshot],
    manifest: &SessionManifest,
    budget: usize,
) -> Vec<AnalysisBatch<'a>> {
    let mut groups: HashMap<FlowType, Vec<(&'a Snapshot, usize)>> = HashMap::new();
    for snapshot in snapshots {
        let (flow, tokens, excluded) = match manifest.step(snapshot.step_number) {
            Some(step) => (step.flow_type, step.token_estimate, step.excluded),
            None => (FlowType::MainApp, estimate_tokens(snapshot), false),
        };
        if excluded {
            debug!(step = snapshot.step_number, flow = %flow, "Step excluded from analysis");
            continue;
        }
        groups.entry(flow).or_default().push((snapshot, tokens));
    }

    let mut ordered: Vec<(FlowType, Vec<(&'a Snapshot, usize)>)> = groups.into_iter().collect();
    ordered.sort_by_key(|(flow, _)| (*flow != FlowType::MainApp, flow.as_str()));

    let mut planned: Vec<(FlowType, Vec<&'a Snapshot>, usize)> = Vec::new();
    for (flow, members) in ordered {
        for (chunk, tokens) in split_by_budget(members, |(_, t)| *t, budget) {
            planned.push((flow, chunk.into_iter().map(|(s, _)| s).collect(), tokens));
        }
    }

    let total = planned.len();
    planned
        .into_iter()
        .enumerate()
        .map(|(i, (flow_type, snapshots, token_estimate))| AnalysisBatch {
            batch_id: format!("batch_{:03}_{}", i + 1, flow_type),
            index: i + 1,
            total,
            flow_type,
            snapshots,
            token_estimate,
        })
        .collect()
}
