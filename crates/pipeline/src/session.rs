//! The `run_session` entry point.

use replayscan_browser::{AccessibilityScanner, BrowserPage};
use replayscan_core::{
    Action, ActionKind, ComponentIssue, Config, Error, Result, SessionManifest, Snapshot, Violation,
};
use replayscan_providers::Provider;
use replayscan_storage::{new_session_id, SessionStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::analyzer::{AnalysisResult, HierarchicalAnalyzer};
use crate::capture::CaptureEngine;
use crate::manifest::ManifestBuilder;
use crate::progress::{Phase, Progress};
use crate::replay::ReplayEngine;
use crate::service::AnalysisService;
use crate::violations;

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Defaults to the URL of the first navigate action.
    pub target_url: Option<String>,
    /// Defaults to a fresh timestamped id.
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub success: bool,
    pub session_id: String,
    pub snapshots: Vec<Snapshot>,
    pub manifest: Option<SessionManifest>,
    pub analysis: Option<AnalysisResult>,
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionResult {
    fn failed(session_id: String, error: &Error) -> Self {
        Self {
            success: false,
            session_id,
            snapshots: Vec::new(),
            manifest: None,
            analysis: None,
            violations: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Everything one session needs: a page to drive, a scanner, storage and an
/// optional text-analysis provider.
pub struct Pipeline {
    config: Config,
    store: SessionStore,
    page: Arc<dyn BrowserPage>,
    scanner: Arc<dyn AccessibilityScanner>,
    provider: Option<Arc<dyn Provider>>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: SessionStore,
        page: Arc<dyn BrowserPage>,
        scanner: Arc<dyn AccessibilityScanner>,
    ) -> Self {
        Self {
            config,
            store,
            page,
            scanner,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replay, capture, build the manifest, analyse and report. Always
    /// resolves; fatal failures come back as `success: false`.
    pub async fn run_session(&self, actions: &[Action], options: SessionOptions, progress: Progress) -> SessionResult {
        let session_id = options.session_id.clone().unwrap_or_else(new_session_id);
        match self.execute(&session_id, actions, &options, &progress).await {
            Ok(result) => result,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Session failed");
                SessionResult::failed(session_id, &e)
            }
        }
    }

    async fn execute(
        &self,
        session_id: &str,
        actions: &[Action],
        options: &SessionOptions,
        progress: &Progress,
    ) -> Result<SessionResult> {
        let target_url = options
            .target_url
            .clone()
            .or_else(|| first_navigation(actions))
            .unwrap_or_default();
        info!(session_id, target = %target_url, actions = actions.len(), "Starting session");

        let builder = ManifestBuilder::new(&self.config.rules, &target_url)?;
        self.store.create_session(session_id).await?;

        let capture = CaptureEngine::new(
            self.page.clone(),
            self.scanner.clone(),
            self.store.clone(),
            self.config.capture.clone(),
            session_id,
        )
        .with_progress(progress.clone())
        .with_fallback_url(&target_url);
        let mut replay = ReplayEngine::new(self.page.clone(), capture, self.config.replay.clone())
            .with_progress(progress.clone());
        let mut snapshots = replay.run(actions).await?;

        let manifest = builder.build(session_id, &snapshots);
        let manifest_path = self.store.save_manifest(&manifest).await?;
        info!(session_id, path = %manifest_path.display(), "Manifest written");

        let service = self.provider.clone().map(|provider| {
            AnalysisService::new(provider, Duration::from_secs(self.config.analysis.call_timeout_secs))
        });

        let mut analysis_error = None;
        let analysis = match &service {
            None => {
                info!(session_id, "No analysis provider configured, skipping analysis");
                None
            }
            Some(service) => {
                let analyzer = HierarchicalAnalyzer::new(service.clone(), self.config.analysis.clone())
                    .with_progress(progress.clone());
                match analyzer.analyze(&snapshots, &manifest).await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(session_id, error = %e, "Analysis produced no results");
                        analysis_error = Some(e.to_string());
                        None
                    }
                }
            }
        };
        if let Some(analysis) = &analysis {
            attach_components(&mut snapshots, &analysis.components);
        }

        progress.emit(
            Phase::Reporting,
            snapshots.len(),
            snapshots.len(),
            "Consolidating violations",
        );
        let explainer = service.as_ref().filter(|_| self.config.analysis.explain_violations);
        let violations = violations::consolidate(&snapshots, explainer).await;

        let result = SessionResult {
            success: analysis_error.is_none(),
            session_id: session_id.to_string(),
            snapshots,
            manifest: Some(manifest),
            analysis,
            violations,
            error: analysis_error,
        };
        if let Err(e) = self.store.save_report(session_id, &result).await {
            warn!(session_id, error = %e, "Failed to write report");
        }
        info!(
            session_id,
            success = result.success,
            snapshots = result.snapshots.len(),
            violations = result.violations.len(),
            "Session finished"
        );
        Ok(result)
    }
}

fn first_navigation(actions: &[Action]) -> Option<String> {
    actions
        .iter()
        .find(|a| a.kind == ActionKind::Navigate)
        .and_then(|a| a.url.clone())
}

/// Record on each snapshot the names of components attributed to its step.
fn attach_components(snapshots: &mut [Snapshot], components: &[ComponentIssue]) {
    for snapshot in snapshots.iter_mut() {
        for c in components.iter().filter(|c| c.step == Some(snapshot.step_number)) {
            if !snapshot.components.contains(&c.component_name) {
                snapshot.components.push(c.component_name.clone());
            }
        }
    }
}
