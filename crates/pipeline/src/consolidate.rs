//! Cross-batch merge of analysis results.

use replayscan_core::{ComponentIssue, Error, Impact, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::prompts::{self, BatchResult, RawNarrative, CONSOLIDATION_SYSTEM};
use crate::service::AnalysisService;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub components: Vec<ComponentIssue>,
    pub summary: String,
    pub score: Option<f64>,
    pub critical_issues: Vec<String>,
    pub batches_total: usize,
    pub batches_succeeded: usize,
    pub failed_batches: Vec<usize>,
    /// False when the merged narrative could not be produced and the batch
    /// summaries were concatenated instead.
    pub consolidated: bool,
    pub batch_results: Vec<BatchResult>,
}

fn issue_key(c: &ComponentIssue) -> (String, String) {
    (
        c.component_name.trim().to_lowercase(),
        c.issue.trim().to_lowercase(),
    )
}

fn longer(current: &mut String, candidate: String) {
    if candidate.len() > current.len() {
        *current = candidate;
    }
}

/// Deduplicate by (component, issue). On collision the longer explanation
/// and fix win, the more severe impact wins and empty fields are filled.
pub fn merge_components(components: impl IntoIterator<Item = ComponentIssue>) -> Vec<ComponentIssue> {
    let mut merged: Vec<ComponentIssue> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for c in components {
        let key = issue_key(&c);
        let Some(&i) = index.get(&key) else {
            index.insert(key, merged.len());
            merged.push(c);
            continue;
        };
        let kept = &mut merged[i];
        longer(&mut kept.explanation, c.explanation);
        longer(&mut kept.html_after, c.html_after);
        if kept.html_before.is_empty() {
            kept.html_before = c.html_before;
        }
        if Impact::rank(c.impact) < Impact::rank(kept.impact) {
            kept.impact = c.impact;
        }
        if kept.rule.is_empty() {
            kept.rule = c.rule;
        }
        if kept.selector.is_empty() {
            kept.selector = c.selector;
        }
    }
    merged
}

fn average(scores: &[f64]) -> Option<f64> {
    (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64)
}

fn minimum(scores: &[f64]) -> Option<f64> {
    scores.iter().copied().reduce(f64::min)
}

fn concatenated(results: &[BatchResult]) -> String {
    results
        .iter()
        .map(|r| format!("Batch {} ({}): {}", r.batch_index, r.flow_type, r.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merge successful batch results (plus any static-section components) into
/// one result. Fails only when there is no batch result at all.
pub async fn consolidate_results(
    service: &AnalysisService,
    results: Vec<BatchResult>,
    extra: Vec<ComponentIssue>,
    batches_total: usize,
    failed_batches: Vec<usize>,
) -> Result<AnalysisResult> {
    if results.is_empty() {
        return Err(Error::Analysis(format!(
            "all {} analysis batches failed",
            batches_total
        )));
    }

    let components = merge_components(
        results
            .iter()
            .flat_map(|r| r.components.iter().cloned())
            .chain(extra),
    );

    let mut critical_issues: Vec<String> = Vec::new();
    for issue in results.iter().flat_map(|r| r.critical_issues.iter()) {
        if !critical_issues.iter().any(|known| known.eq_ignore_ascii_case(issue)) {
            critical_issues.push(issue.clone());
        }
    }

    let scores: Vec<f64> = results.iter().filter_map(|r| r.score).collect();

    let narrative = if results.len() == 1 {
        Some(results[0].summary.clone())
    } else {
        let prompt = prompts::consolidation_prompt(&results, average(&scores));
        match service
            .complete_json::<RawNarrative>("consolidation", CONSOLIDATION_SYSTEM, &prompt)
            .await
        {
            Ok(reply) => reply.summary.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            Err(_) => None,
        }
    };

    let (summary, score, consolidated) = match narrative {
        Some(summary) => (summary, average(&scores), true),
        None => {
            warn!(batches = results.len(), "Consolidation failed, concatenating batch summaries");
            (concatenated(&results), minimum(&scores), false)
        }
    };

    info!(
        batches_total,
        batches_succeeded = results.len(),
        components = components.len(),
        consolidated,
        "Analysis consolidated"
    );

    Ok(AnalysisResult {
        components,
        summary,
        score,
        critical_issues,
        batches_total,
        batches_succeeded: results.len(),
        failed_batches,
        consolidated,
        batch_results: results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProvider;
    use replayscan_core::FlowType;
    use std::sync::Arc;
    use std::time::Duration;

    fn issue(name: &str, text: &str, explanation: &str, impact: Impact) -> ComponentIssue {
        ComponentIssue {
            component_name: name.to_string(),
            issue: text.to_string(),
            explanation: explanation.to_string(),
            impact: Some(impact),
            ..Default::default()
        }
    }

    fn result(index: usize, summary: &str, score: f64, components: Vec<ComponentIssue>) -> BatchResult {
        BatchResult {
            batch_index: index,
            flow_type: FlowType::MainApp,
            steps: vec![index as u32],
            components,
            summary: summary.to_string(),
            score: Some(score),
            critical_issues: vec!["Missing labels".to_string()],
            flow_state: None,
        }
    }

    fn service(reply: &'static str, fail: bool) -> AnalysisService {
        AnalysisService::new(
            Arc::new(FakeProvider::new(move |_, _| {
                if fail {
                    Err(Error::Provider("down".into()))
                } else {
                    Ok(reply.to_string())
                }
            })),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_merge_prefers_complete_and_severe() {
        let mut b = issue(" search BOX ", "Missing label ", "Screen readers announce nothing for this input", Impact::Moderate);
        b.html_after = "<label for=q>Search</label><input id=q>".to_string();
        let merged = merge_components(vec![
            issue("Search box", "missing label", "short", Impact::Serious),
            b,
            issue("Footer", "Low contrast", "", Impact::Minor),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].component_name, "Search box");
        assert_eq!(merged[0].explanation, "Screen readers announce nothing for this input");
        assert_eq!(merged[0].impact, Some(Impact::Serious));
        assert!(merged[0].html_after.contains("<label"));
    }

    #[tokio::test]
    async fn test_consolidate_averages_scores() {
        let results = vec![
            result(1, "Header ok", 80.0, vec![issue("Nav", "No skip link", "", Impact::Serious)]),
            result(3, "Checkout issues", 60.0, vec![issue("Nav", "no skip link", "", Impact::Serious)]),
        ];
        let out = consolidate_results(&service(r#"{"summary": "Whole session"}"#, false), results, vec![], 3, vec![2])
            .await
            .unwrap();

        assert!(out.consolidated);
        assert_eq!(out.summary, "Whole session");
        assert_eq!(out.score, Some(70.0));
        assert_eq!(out.components.len(), 1);
        assert_eq!(out.critical_issues, vec!["Missing labels"]);
        assert_eq!((out.batches_total, out.batches_succeeded), (3, 2));
        assert_eq!(out.failed_batches, vec![2]);
    }

    #[tokio::test]
    async fn test_consolidation_failure_falls_back() {
        let results = vec![result(1, "A", 80.0, vec![]), result(2, "B", 55.0, vec![])];
        let out = consolidate_results(&service("", true), results, vec![], 2, vec![])
            .await
            .unwrap();

        assert!(!out.consolidated);
        assert_eq!(out.score, Some(55.0));
        assert_eq!(out.summary, "Batch 1 (main_app): A\nBatch 2 (main_app): B");
    }

    #[tokio::test]
    async fn test_no_results_is_error() {
        let err = consolidate_results(&service("", false), vec![], vec![], 2, vec![1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Analysis(_)));
    }
}
