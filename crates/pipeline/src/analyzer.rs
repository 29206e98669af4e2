//! Hierarchical batch analysis: group, split, analyse sequentially with a
//! progressive summary, then consolidate.

use replayscan_core::config::AnalysisConfig;
use replayscan_core::{ComponentIssue, Result, SessionManifest, Snapshot};
use tracing::{info, warn};

use crate::batch::{plan_batches, AnalysisBatch};
use crate::consolidate::consolidate_results;
use crate::progress::{Phase, Progress};
use crate::progressive::ProgressiveContext;
use crate::prompts::{self, BatchResult, RawAnalysis, BATCH_SYSTEM};
use crate::service::AnalysisService;
use crate::static_sections::{analyze_sections, collect_sections};

pub use crate::consolidate::AnalysisResult;

/// Floor for the per-snapshot HTML excerpt so tiny budgets still send markup.
const MIN_HTML_CHARS: usize = 2000;

pub struct HierarchicalAnalyzer {
    service: AnalysisService,
    config: AnalysisConfig,
    progress: Progress,
}

impl HierarchicalAnalyzer {
    pub fn new(service: AnalysisService, config: AnalysisConfig) -> Self {
        Self {
            service,
            config,
            progress: Progress::none(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn service(&self) -> &AnalysisService {
        &self.service
    }

    /// Analyse every non-excluded snapshot. A session with nothing to
    /// analyse yields an empty result; a session whose batches all failed
    /// yields `Error::Analysis`.
    pub async fn analyze(&self, snapshots: &[Snapshot], manifest: &SessionManifest) -> Result<AnalysisResult> {
        let batches = plan_batches(snapshots, manifest, self.config.batch_token_budget);
        if batches.is_empty() {
            info!(session_id = %manifest.session_id, "No snapshots to analyse");
            return Ok(AnalysisResult::default());
        }
        info!(
            session_id = %manifest.session_id,
            batches = batches.len(),
            budget = self.config.batch_token_budget,
            "Starting batch analysis"
        );

        let (outcome, static_components) =
            tokio::join!(self.run_batches(&batches, manifest), self.static_components(&batches));
        let (results, failed) = outcome;

        consolidate_results(&self.service, results, static_components, batches.len(), failed).await
    }

    /// Batches run strictly in order; each sees the findings of the ones
    /// before it. Failed batches are recorded and skipped.
    async fn run_batches(
        &self,
        batches: &[AnalysisBatch<'_>],
        manifest: &SessionManifest,
    ) -> (Vec<BatchResult>, Vec<usize>) {
        let mut progressive = ProgressiveContext::new(self.config.summary_char_cap);
        let mut results = Vec::new();
        let mut failed = Vec::new();

        for batch in batches {
            self.progress.emit(
                Phase::Analyzing,
                batch.index,
                batch.total,
                format!("Analyzing batch {}/{} ({})", batch.index, batch.total, batch.flow_type),
            );
            let html_chars = (self.config.batch_token_budget * 4 / batch.snapshots.len().max(1)).max(MIN_HTML_CHARS);
            let prompt = prompts::batch_prompt(batch, manifest, &progressive, html_chars);
            let operation = format!("analysis batch {}/{}", batch.index, batch.total);

            match self
                .service
                .complete_json::<RawAnalysis>(&operation, BATCH_SYSTEM, &prompt)
                .await
            {
                Ok(raw) => {
                    let result = prompts::parse_batch_result(raw, batch);
                    info!(
                        batch = batch.index,
                        total = batch.total,
                        flow = %batch.flow_type,
                        components = result.components.len(),
                        "Batch analysed"
                    );
                    progressive.absorb(&result, batch.total);
                    results.push(result);
                }
                Err(failure) => {
                    warn!(
                        batch = batch.index,
                        total = batch.total,
                        reason = failure.reason(),
                        "Skipping failed batch"
                    );
                    failed.push(batch.index);
                }
            }
        }
        (results, failed)
    }

    async fn static_components(&self, batches: &[AnalysisBatch<'_>]) -> Vec<ComponentIssue> {
        let cfg = &self.config.static_sections;
        if !cfg.enabled {
            return Vec::new();
        }
        let mut included: Vec<&Snapshot> = batches.iter().flat_map(|b| b.snapshots.iter().copied()).collect();
        included.sort_by_key(|s| s.step_number);
        // Parsed documents are not Send; collection finishes before any await.
        let sections = collect_sections(&included, cfg.sample_every, cfg.max_sections);
        if sections.is_empty() {
            return Vec::new();
        }
        analyze_sections(&self.service, &sections, MIN_HTML_CHARS * 2).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;
    use crate::prompts::{CONSOLIDATION_SYSTEM, STATIC_SECTION_SYSTEM};
    use crate::test_support::{snapshot, FakeProvider};
    use replayscan_core::config::RulesConfig;
    use replayscan_core::Error;
    use std::sync::Arc;
    use std::time::Duration;

    fn batch_number(prompt: &str) -> u32 {
        prompt
            .split("## Batch ")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    fn session(n: u32) -> (Vec<Snapshot>, SessionManifest) {
        let snapshots: Vec<Snapshot> = (1..=n)
            .map(|i| {
                snapshot(
                    i,
                    &format!("https://shop.example/page/{}", i),
                    &format!("<header><nav>Site</nav></header><main>{}</main>", "x".repeat(200)),
                    vec![],
                )
            })
            .collect();
        let manifest = ManifestBuilder::new(&RulesConfig::default(), "https://shop.example/")
            .unwrap()
            .build("s1", &snapshots);
        (snapshots, manifest)
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            // Every snapshot exceeds this on its own, so each gets a batch.
            batch_token_budget: 1,
            ..Default::default()
        }
    }

    fn batch_reply(n: u32) -> String {
        format!(
            r#"{{"components": [{{"componentName": "Widget {n}", "issue": "Problem {n}"}}], "summary": "Batch {n} findings", "score": 70, "criticalIssues": ["Issue {n}"]}}"#,
            n = n
        )
    }

    #[tokio::test]
    async fn test_failed_middle_batch_is_skipped() {
        let provider = Arc::new(FakeProvider::new(|system, prompt| {
            if system == CONSOLIDATION_SYSTEM {
                return Ok(r#"{"summary": "Merged narrative"}"#.to_string());
            }
            match batch_number(prompt) {
                2 => Err(Error::RateLimited("quota".into())),
                n => Ok(batch_reply(n)),
            }
        }));
        let (snapshots, manifest) = session(3);
        let analyzer = HierarchicalAnalyzer::new(
            AnalysisService::new(provider.clone(), Duration::from_secs(1)),
            config(),
        );

        let result = analyzer.analyze(&snapshots, &manifest).await.unwrap();

        let names: Vec<&str> = result.components.iter().map(|c| c.component_name.as_str()).collect();
        assert_eq!(names, vec!["Widget 1", "Widget 3"]);
        assert_eq!(result.failed_batches, vec![2]);
        assert_eq!((result.batches_total, result.batches_succeeded), (3, 2));
        assert_eq!(result.summary, "Merged narrative");
        assert!(result.consolidated);

        // Batch 3 saw what batch 1 found.
        let prompts = provider.prompts();
        let third = prompts.iter().find(|p| batch_number(p) == 3).unwrap();
        assert!(third.contains("Batch 1 findings"));
        assert!(third.contains("Issue 1"));
    }

    #[tokio::test]
    async fn test_all_batches_failing_is_error() {
        let provider = Arc::new(FakeProvider::new(|_, _| Err(Error::Provider("down".into()))));
        let (snapshots, manifest) = session(2);
        let analyzer = HierarchicalAnalyzer::new(AnalysisService::new(provider, Duration::from_secs(1)), config());
        let err = analyzer.analyze(&snapshots, &manifest).await.unwrap_err();
        assert!(matches!(err, Error::Analysis(_)));
    }

    #[tokio::test]
    async fn test_nothing_to_analyse_is_empty() {
        let provider = Arc::new(FakeProvider::new(|_, _| Ok("{}".to_string())));
        let (snapshots, manifest) = session(0);
        let analyzer = HierarchicalAnalyzer::new(
            AnalysisService::new(provider.clone(), Duration::from_secs(1)),
            config(),
        );
        let result = analyzer.analyze(&snapshots, &manifest).await.unwrap();
        assert_eq!(result, AnalysisResult::default());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_static_sections_analysed_once() {
        let provider = Arc::new(FakeProvider::new(|system, _| {
            if system == STATIC_SECTION_SYSTEM {
                Ok(r#"{"components": [{"componentName": "Site header", "issue": "No banner landmark"}]}"#.to_string())
            } else {
                Ok(r#"{"components": [], "summary": "ok", "score": 90}"#.to_string())
            }
        }));
        let (snapshots, manifest) = session(1);
        let mut cfg = AnalysisConfig::default();
        cfg.static_sections.enabled = true;
        cfg.static_sections.sample_every = 1;
        let analyzer = HierarchicalAnalyzer::new(AnalysisService::new(provider.clone(), Duration::from_secs(1)), cfg);

        let result = analyzer.analyze(&snapshots, &manifest).await.unwrap();
        // One batch call plus one per distinct section (header, nav).
        assert_eq!(provider.call_count(), 3);
        assert_eq!(result.components.len(), 1);
        assert_eq!(result.components[0].component_name, "Site header");
        assert_eq!(result.score, Some(90.0));
    }
}
