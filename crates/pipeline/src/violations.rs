//! Session-wide deduplication of scanner violations.

use replayscan_core::{ExplanationSource, Impact, RawViolation, Snapshot, Violation};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::prompts::{self, ViolationExplanation, VIOLATION_SYSTEM};
use crate::service::AnalysisService;

/// Rule id plus every node's target path.
pub fn violation_key(v: &RawViolation) -> String {
    let targets = v
        .nodes
        .iter()
        .map(|n| n.target.join(" "))
        .collect::<Vec<_>>()
        .join("|");
    format!("{}::{}", v.id, targets)
}

/// Merge identical violations across snapshots, keeping first-seen order.
pub fn dedupe(snapshots: &[Snapshot]) -> Vec<Violation> {
    let mut out: Vec<Violation> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for snapshot in snapshots {
        let step = snapshot.step_number;
        for raw in &snapshot.violations {
            let key = violation_key(raw);
            if let Some(&i) = index.get(&key) {
                let steps = &mut out[i].step_occurrences;
                if steps.last() != Some(&step) {
                    steps.push(step);
                }
                continue;
            }
            index.insert(key.clone(), out.len());
            out.push(Violation {
                key,
                rule_id: raw.id.clone(),
                impact: raw.impact,
                description: raw.description.clone(),
                help: raw.help.clone(),
                help_url: raw.help_url.clone(),
                nodes: raw.nodes.clone(),
                first_step: step,
                step_occurrences: vec![step],
                explanation: None,
                recommendation: None,
                explanation_source: None,
            });
        }
    }
    out
}

/// Canned explanation and fix keyed off the rule id.
pub fn fallback_explanation(rule_id: &str) -> (&'static str, &'static str) {
    let id = rule_id.to_ascii_lowercase();
    if id.contains("heading") {
        (
            "Headings are missing, empty or skip levels, so screen reader users cannot navigate the page structure.",
            "Use one h1 per page and nest h2-h6 in order without skipping levels.",
        )
    } else if id.contains("contrast") {
        (
            "Text does not have enough contrast with its background to be read by users with low vision.",
            "Raise the contrast ratio to at least 4.5:1 for body text and 3:1 for large text.",
        )
    } else if id.contains("alt") {
        (
            "Images have no text alternative, so their meaning is lost to screen reader users.",
            "Add a descriptive alt attribute, or alt=\"\" when the image is purely decorative.",
        )
    } else if id.contains("label") {
        (
            "Form controls have no accessible label, so assistive technology cannot say what they are for.",
            "Associate a visible <label> with each control or provide aria-label / aria-labelledby.",
        )
    } else if id.contains("aria") {
        (
            "ARIA attributes are invalid or used on elements that do not support them, which confuses assistive technology.",
            "Use only valid ARIA roles, states and properties, and prefer native HTML semantics.",
        )
    } else if id.contains("landmark") || id.contains("region") {
        (
            "Content sits outside landmark regions, making it hard to jump between page areas.",
            "Wrap content in header, nav, main and footer landmarks and keep every element inside one.",
        )
    } else if id.contains("focus") {
        (
            "Keyboard focus is missing, invisible or lands in an unexpected order.",
            "Keep a visible focus indicator and make the tab order follow the visual order.",
        )
    } else {
        (
            "This element fails an automated accessibility check and may block some users.",
            "Review the rule documentation linked in this finding and correct the markup.",
        )
    }
}

fn apply_fallback(v: &mut Violation) {
    let (explanation, recommendation) = fallback_explanation(&v.rule_id);
    v.explanation = Some(explanation.to_string());
    v.recommendation = Some(recommendation.to_string());
    v.explanation_source = Some(ExplanationSource::Fallback);
}

/// Deduplicate, explain and sort by severity (unknown impact last).
pub async fn consolidate(snapshots: &[Snapshot], service: Option<&AnalysisService>) -> Vec<Violation> {
    let mut violations = dedupe(snapshots);

    let mut generated: HashMap<String, ViolationExplanation> = HashMap::new();
    if let (Some(service), false) = (service, violations.is_empty()) {
        let prompt = prompts::violation_prompt(&violations);
        match service
            .complete_json::<Vec<ViolationExplanation>>("violation explanations", VIOLATION_SYSTEM, &prompt)
            .await
        {
            Ok(items) => generated.extend(items.into_iter().map(|e| (e.key.clone(), e))),
            Err(failure) => warn!(reason = failure.reason(), "Using fallback violation explanations"),
        }
    }

    for v in &mut violations {
        let explained = generated
            .remove(&v.key)
            .and_then(|e| {
                e.explanation
                    .filter(|s| !s.trim().is_empty())
                    .map(|explanation| (explanation, e.recommendation))
            });
        match explained {
            Some((explanation, recommendation)) => {
                v.explanation = Some(explanation);
                v.recommendation = recommendation
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| Some(fallback_explanation(&v.rule_id).1.to_string()));
                v.explanation_source = Some(ExplanationSource::Generated);
            }
            None => apply_fallback(v),
        }
    }

    violations.sort_by_key(|v| Impact::rank(v.impact));
    info!(
        distinct = violations.len(),
        generated = violations
            .iter()
            .filter(|v| v.explanation_source == Some(ExplanationSource::Generated))
            .count(),
        "Violations consolidated"
    );
    violations
}
