//! Repeated page chrome (header, navigation, footer) analysed once per
//! distinct content hash instead of once per snapshot.

use futures::future::join_all;
use replayscan_core::{ComponentIssue, Snapshot};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::prompts::{self, RawAnalysis, STATIC_SECTION_SYSTEM};
use crate::service::AnalysisService;

pub const SECTION_SELECTORS: &str =
    "header, nav, footer, aside, [role=banner], [role=navigation], [role=contentinfo]";

#[derive(Debug, Clone, PartialEq)]
pub struct StaticSection {
    pub hash: String,
    /// Tag name, plus the role when one is set.
    pub label: String,
    pub html: String,
    pub url: String,
    pub steps: Vec<u32>,
}

fn content_hash(html: &str) -> String {
    let normalized = html.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

/// Sample every `sample_every`-th snapshot and collect its structural
/// sections, merged by content hash in first-seen order and capped at
/// `max_sections`.
pub fn collect_sections(snapshots: &[&Snapshot], sample_every: usize, max_sections: usize) -> Vec<StaticSection> {
    let Ok(selector) = Selector::parse(SECTION_SELECTORS) else {
        return Vec::new();
    };
    let mut sections: Vec<StaticSection> = Vec::new();
    let mut by_hash: HashMap<String, usize> = HashMap::new();

    for snapshot in snapshots.iter().step_by(sample_every.max(1)) {
        let document = Html::parse_document(&snapshot.html);
        for element in document.select(&selector) {
            let html = element.html();
            let hash = content_hash(&html);
            if let Some(&i) = by_hash.get(&hash) {
                let steps = &mut sections[i].steps;
                if steps.last() != Some(&snapshot.step_number) {
                    steps.push(snapshot.step_number);
                }
                continue;
            }
            if sections.len() >= max_sections {
                continue;
            }
            let tag = element.value().name();
            let label = match element.value().attr("role") {
                Some(role) => format!("{}[role={}]", tag, role),
                None => tag.to_string(),
            };
            by_hash.insert(hash.clone(), sections.len());
            sections.push(StaticSection {
                hash,
                label,
                html,
                url: snapshot.url().to_string(),
                steps: vec![snapshot.step_number],
            });
        }
    }
    debug!(sections = sections.len(), "Collected static sections");
    sections
}

/// Analyse each section with one concurrent call apiece. Failed calls are
/// skipped; the rest contribute their components.
pub async fn analyze_sections(
    service: &AnalysisService,
    sections: &[StaticSection],
    html_chars: usize,
) -> Vec<ComponentIssue> {
    let calls = sections.iter().map(|section| async move {
        let prompt = prompts::static_section_prompt(&section.label, &section.html, &section.steps, html_chars);
        let operation = format!("static section {}", &section.hash[..12]);
        let outcome = service
            .complete_json::<RawAnalysis>(&operation, STATIC_SECTION_SYSTEM, &prompt)
            .await;
        (section, outcome)
    });

    let mut components = Vec::new();
    let mut failed = 0usize;
    for (section, outcome) in join_all(calls).await {
        match outcome {
            Ok(raw) => components.extend(raw.components.into_iter().filter_map(|c| {
                prompts::validate_component(c, section.steps.first().copied(), &section.url)
            })),
            Err(_) => failed += 1,
        }
    }
    info!(
        sections = sections.len(),
        failed,
        components = components.len(),
        "Static section analysis finished"
    );
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{snapshot, FakeProvider};
    use replayscan_core::Error;
    use std::sync::Arc;
    use std::time::Duration;

    const HEADER: &str = "<header><nav><a href=\"/\">Home</a></nav></header>";

    fn page(step: u32, main: &str) -> Snapshot {
        snapshot(
            step,
            "https://shop.example/",
            &format!("<html><body>{}<main>{}</main><footer>(c) Shop</footer></body></html>", HEADER, main),
            vec![],
        )
    }

    #[test]
    fn test_hash_ignores_whitespace() {
        assert_eq!(content_hash("<nav>\n  <a>x</a></nav>"), content_hash("<nav> <a>x</a></nav>"));
        assert_ne!(content_hash("<nav>a</nav>"), content_hash("<nav>b</nav>"));
    }

    #[test]
    fn test_collect_merges_repeated_sections() {
        let snaps: Vec<Snapshot> = (1..=4).map(|i| page(i, &format!("page {}", i))).collect();
        let refs: Vec<&Snapshot> = snaps.iter().collect();

        let sections = collect_sections(&refs, 2, 20);
        let labels: Vec<&str> = sections.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["header", "nav", "footer"]);
        // Steps 1 and 3 are the sampled ones.
        assert!(sections.iter().all(|s| s.steps == vec![1, 3]));
    }

    #[test]
    fn test_collect_respects_cap() {
        let snaps = vec![page(1, "x")];
        let refs: Vec<&Snapshot> = snaps.iter().collect();
        assert_eq!(collect_sections(&refs, 1, 2).len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_tolerates_individual_failures() {
        let provider = Arc::new(FakeProvider::new(|_, prompt| {
            if prompt.contains("Region `footer`") {
                Err(Error::Provider("boom".into()))
            } else {
                Ok(r#"{"components": [{"componentName": "Site navigation", "issue": "No skip link"}]}"#.to_string())
            }
        }));
        let service = AnalysisService::new(provider.clone(), Duration::from_secs(1));
        let snaps = vec![page(1, "x")];
        let refs: Vec<&Snapshot> = snaps.iter().collect();
        let sections = collect_sections(&refs, 1, 20);

        let components = analyze_sections(&service, &sections, 2000).await;
        assert_eq!(provider.call_count(), 3);
        assert_eq!(components.len(), 2);
        assert!(components.iter().all(|c| c.step == Some(1)));
    }
}
