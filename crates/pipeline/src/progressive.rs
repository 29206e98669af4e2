//! Findings carried forward from earlier batches into later requests.

use replayscan_core::{safe_truncate, safe_truncate_front, FlowType};
use serde::Serialize;

use crate::prompts::BatchResult;

const MAX_CRITICAL_ISSUES: usize = 20;
const MAX_FINDING_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFinding {
    pub batch_index: usize,
    pub flow_type: FlowType,
    pub key_findings: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveContext {
    pub critical_issues: Vec<String>,
    pub findings: Vec<BatchFinding>,
    pub flow_state: Option<String>,
    /// Running summary; only the newest `summary_cap` bytes are kept.
    pub summary: String,
    #[serde(skip)]
    summary_cap: usize,
}

impl ProgressiveContext {
    pub fn new(summary_cap: usize) -> Self {
        Self {
            critical_issues: Vec::new(),
            findings: Vec::new(),
            flow_state: None,
            summary: String::new(),
            summary_cap,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Fold one successful batch into the context.
    pub fn absorb(&mut self, result: &BatchResult, total_batches: usize) {
        for issue in &result.critical_issues {
            let issue = issue.trim();
            if issue.is_empty() || self.critical_issues.len() >= MAX_CRITICAL_ISSUES {
                continue;
            }
            if !self.critical_issues.iter().any(|known| known.eq_ignore_ascii_case(issue)) {
                self.critical_issues.push(issue.to_string());
            }
        }

        self.findings.push(BatchFinding {
            batch_index: result.batch_index,
            flow_type: result.flow_type,
            key_findings: safe_truncate(result.summary.trim(), MAX_FINDING_CHARS).to_string(),
        });

        if let Some(state) = result.flow_state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            self.flow_state = Some(state.to_string());
        }

        if !self.summary.is_empty() {
            self.summary.push('\n');
        }
        self.summary.push_str(&format!(
            "Batch {}/{} ({}): {}",
            result.batch_index,
            total_batches,
            result.flow_type,
            result.summary.trim()
        ));
        if self.summary.len() > self.summary_cap {
            self.summary = safe_truncate_front(&self.summary, self.summary_cap).to_string();
        }
    }

    /// Plain-text block for the next batch request.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "No earlier batches.".to_string();
        }
        let mut out = String::new();
        if !self.critical_issues.is_empty() {
            out.push_str("Critical issues so far:\n");
            for issue in &self.critical_issues {
                out.push_str(&format!("- {}\n", issue));
            }
        }
        out.push_str("Earlier batch findings:\n");
        for finding in &self.findings {
            out.push_str(&format!(
                "- batch {} ({}): {}\n",
                finding.batch_index, finding.flow_type, finding.key_findings
            ));
        }
        if let Some(state) = &self.flow_state {
            out.push_str(&format!("Flow state: {}\n", state));
        }
        out.push_str("Running summary:\n");
        out.push_str(&self.summary);
        out
    }
}
