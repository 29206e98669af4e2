//! Request text for the analysis service and validation of its replies.

use replayscan_core::{
    safe_truncate, ComponentIssue, FlowType, Impact, SessionManifest, Snapshot, Violation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::AnalysisBatch;
use crate::progressive::ProgressiveContext;

pub const BATCH_SYSTEM: &str = "You are an accessibility auditor reviewing recorded user sessions. \
Identify UI components with WCAG problems from the captured HTML and automated scan results. \
Reply with a single JSON object and nothing else.";

pub const CONSOLIDATION_SYSTEM: &str = "You are an accessibility auditor. Merge per-batch audit \
summaries of one user session into one coherent narrative. Reply with a single JSON object.";

pub const VIOLATION_SYSTEM: &str = "You explain automated accessibility scan findings to web \
developers in plain language and give a concrete fix. Reply with a JSON array only.";

pub const STATIC_SECTION_SYSTEM: &str = "You are an accessibility auditor reviewing a page region \
that repeats across many pages of a site. Reply with a single JSON object.";

const BATCH_RESPONSE_SHAPE: &str = r#"{"components": [{"componentName": "", "issue": "", "explanation": "", "htmlBefore": "", "htmlAfter": "", "impact": "critical|serious|moderate|minor", "rule": "", "selector": "", "step": 1, "url": ""}], "summary": "", "score": 0, "criticalIssues": [""], "flowState": ""}"#;

/// Names the service uses when it could not identify a component.
const PLACEHOLDER_NAMES: &[&str] = &["unknown", "n/a", "na", "none", "component"];

/// Validated outcome of one batch call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_index: usize,
    pub flow_type: FlowType,
    pub steps: Vec<u32>,
    pub components: Vec<ComponentIssue>,
    pub summary: String,
    pub score: Option<f64>,
    pub critical_issues: Vec<String>,
    pub flow_state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawComponent {
    #[serde(alias = "component", alias = "name")]
    pub component_name: Option<String>,
    #[serde(alias = "problem")]
    pub issue: Option<String>,
    pub explanation: Option<String>,
    pub html_before: Option<String>,
    #[serde(alias = "fix")]
    pub html_after: Option<String>,
    #[serde(alias = "severity")]
    pub impact: Option<String>,
    pub rule: Option<String>,
    pub selector: Option<String>,
    pub step: Option<Value>,
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAnalysis {
    pub components: Vec<RawComponent>,
    pub summary: Option<String>,
    pub score: Option<Value>,
    pub critical_issues: Vec<String>,
    pub flow_state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawNarrative {
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViolationExplanation {
    pub key: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Numbers and numeric strings ("82", "82/100") are accepted.
fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split('/').next().and_then(|n| n.trim().parse().ok()),
        _ => None,
    }
}

/// A 1-based whole step number; anything else yields `None`.
fn step_number(value: &Value) -> Option<u32> {
    number_of(value)
        .filter(|n| n.fract() == 0.0 && *n >= 1.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32)
}

/// Accept a component only when it names a real component and an issue.
/// Impact falls back to moderate; step and URL to the given defaults.
pub fn validate_component(raw: RawComponent, default_step: Option<u32>, default_url: &str) -> Option<ComponentIssue> {
    let name = non_empty(raw.component_name)?;
    if PLACEHOLDER_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
        return None;
    }
    let issue = non_empty(raw.issue)?;
    let impact = raw
        .impact
        .as_deref()
        .and_then(Impact::parse)
        .unwrap_or(Impact::Moderate);
    let step = raw
        .step
        .as_ref()
        .and_then(step_number)
        .or(default_step);

    Some(ComponentIssue {
        component_name: name,
        issue,
        explanation: non_empty(raw.explanation).unwrap_or_default(),
        html_before: raw.html_before.unwrap_or_default(),
        html_after: raw.html_after.unwrap_or_default(),
        impact: Some(impact),
        rule: non_empty(raw.rule).unwrap_or_default(),
        selector: non_empty(raw.selector).unwrap_or_default(),
        step,
        url: non_empty(raw.url).unwrap_or_else(|| default_url.to_string()),
    })
}

pub fn parse_batch_result(raw: RawAnalysis, batch: &AnalysisBatch<'_>) -> BatchResult {
    let first = batch.first_step();
    let default_step = first.map(|s| s.step_number);
    let default_url = first.map(|s| s.url()).unwrap_or("");
    BatchResult {
        batch_index: batch.index,
        flow_type: batch.flow_type,
        steps: batch.steps(),
        components: raw
            .components
            .into_iter()
            .filter_map(|c| validate_component(c, default_step, default_url))
            .collect(),
        summary: non_empty(raw.summary).unwrap_or_default(),
        score: raw.score.as_ref().and_then(number_of),
        critical_issues: raw
            .critical_issues
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect(),
        flow_state: non_empty(raw.flow_state),
    }
}

fn violation_digest(snapshot: &Snapshot) -> String {
    if snapshot.violations.is_empty() {
        return "  (no automated violations)\n".to_string();
    }
    snapshot
        .violations
        .iter()
        .map(|v| {
            format!(
                "  - {} ({}): {} [{} node(s): {}]\n",
                v.id,
                v.impact.map(|i| i.as_str()).unwrap_or("unknown"),
                v.help,
                v.nodes.len(),
                v.nodes
                    .iter()
                    .take(3)
                    .map(|n| n.target.join(" "))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
        .collect()
}

/// Request for one batch. Each snapshot's HTML is cut to `html_chars`.
pub fn batch_prompt(
    batch: &AnalysisBatch<'_>,
    manifest: &SessionManifest,
    progressive: &ProgressiveContext,
    html_chars: usize,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "## Session\nid: {}\ntarget: {}\ncaptured steps: {}\nanalysed steps: {}\n\n",
        manifest.session_id,
        manifest.target_url,
        manifest.llm_optimization.total_steps,
        manifest.llm_optimization.total_steps - manifest.llm_optimization.excluded_steps,
    ));
    out.push_str(&format!(
        "## Batch {}/{}\nflow: {}\nsteps: {:?}\nestimated tokens: {}\n\n",
        batch.index,
        batch.total,
        batch.flow_type,
        batch.steps(),
        batch.token_estimate
    ));
    out.push_str("## Progressive context\n");
    out.push_str(&progressive.render());
    out.push_str("\n\n## Step details\n");
    for snapshot in &batch.snapshots {
        if let Some(step) = manifest.step(snapshot.step_number) {
            out.push_str(&format!(
                "- step {} ({}, parent {:?}): {}; aria: {}\n",
                step.step_number,
                step.action_category,
                step.parent_step,
                step.dom_change_summary,
                if step.aria_changes.is_empty() {
                    "none".to_string()
                } else {
                    step.aria_changes.join("; ")
                }
            ));
        }
    }
    for snapshot in &batch.snapshots {
        out.push_str(&format!(
            "\n## Snapshot step {}\nurl: {}\naction: {}\nchange: {}\nviolations:\n{}html:\n{}\n",
            snapshot.step_number,
            snapshot.url(),
            snapshot.action.label(),
            snapshot.change.description,
            violation_digest(snapshot),
            safe_truncate(&snapshot.html, html_chars)
        ));
    }
    out.push_str("\nRespond with JSON of this shape:\n");
    out.push_str(BATCH_RESPONSE_SHAPE);
    out
}

pub fn consolidation_prompt(results: &[BatchResult], score: Option<f64>) -> String {
    let mut out = String::from("Per-batch summaries, in replay order:\n");
    for r in results {
        out.push_str(&format!(
            "- batch {} ({}, steps {:?}): {}\n",
            r.batch_index, r.flow_type, r.steps, r.summary
        ));
    }
    if let Some(score) = score {
        out.push_str(&format!("\nAverage score: {:.1}\n", score));
    }
    out.push_str("\nRespond with {\"summary\": \"<one narrative covering the whole session>\"}.");
    out
}

pub fn violation_prompt(violations: &[Violation]) -> String {
    let mut out = String::from("Explain each finding. Keep the key exactly as given.\n");
    for v in violations {
        out.push_str(&format!(
            "- key: {}\n  rule: {}\n  impact: {}\n  description: {}\n  help: {}\n  steps: {:?}\n",
            v.key,
            v.rule_id,
            v.impact.map(|i| i.as_str()).unwrap_or("unknown"),
            v.description,
            v.help,
            v.step_occurrences
        ));
    }
    out.push_str(
        "\nRespond with [{\"key\": \"\", \"explanation\": \"\", \"recommendation\": \"\"}].",
    );
    out
}

pub fn static_section_prompt(selector: &str, html: &str, steps: &[u32], html_chars: usize) -> String {
    format!(
        "Region `{}` appears unchanged on steps {:?}.\nhtml:\n{}\n\nRespond with JSON of this shape:\n{}",
        selector,
        steps,
        safe_truncate(html, html_chars),
        BATCH_RESPONSE_SHAPE
    )
}
