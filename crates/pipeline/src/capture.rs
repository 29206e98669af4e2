//! State capture for one replay step with per-artifact retry and fallback.

use chrono::Utc;
use replayscan_browser::{AccessibilityScanner, BrowserPage};
use replayscan_core::config::CaptureConfig;
use replayscan_core::{Action, ChangeRecord, ScanContext, ScanResults, Snapshot};
use replayscan_storage::SessionStore;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::deadline;
use crate::progress::{Phase, Progress};

pub const READY_SCRIPT: &str = "document.readyState === 'complete' && !!document.body && document.body.childElementCount > 0";

pub const CONTEXT_SCRIPT: &str = "(() => {\
    const a = document.activeElement; \
    let active = null; \
    if (a && a !== document.body && a !== document.documentElement) { \
        active = a.tagName.toLowerCase() + (a.id ? '#' + a.id : '') + (a.getAttribute('name') ? '[name=\"' + a.getAttribute('name') + '\"]' : ''); \
    } \
    return {url: location.href, title: document.title || '', elementCount: document.getElementsByTagName('*').length, activeElement: active}; \
})()";

/// Substituted when the page never yields usable markup.
pub const PLACEHOLDER_HTML: &str = "<!DOCTYPE html><html><head><title>Capture unavailable</title></head><body><main><p>Page content could not be captured for this step.</p></main></body></html>";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContext {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    element_count: usize,
    #[serde(default)]
    active_element: Option<String>,
}

pub struct CaptureEngine {
    page: Arc<dyn BrowserPage>,
    scanner: Arc<dyn AccessibilityScanner>,
    store: SessionStore,
    config: CaptureConfig,
    session_id: String,
    progress: Progress,
    /// Last URL read successfully; stands in when context capture fails.
    last_url: String,
    total: usize,
}

impl CaptureEngine {
    pub fn new(
        page: Arc<dyn BrowserPage>,
        scanner: Arc<dyn AccessibilityScanner>,
        store: SessionStore,
        config: CaptureConfig,
        session_id: &str,
    ) -> Self {
        Self {
            page,
            scanner,
            store,
            config,
            session_id: session_id.to_string(),
            progress: Progress::none(),
            last_url: String::new(),
            total: 0,
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_fallback_url(mut self, url: &str) -> Self {
        self.last_url = url.to_string();
        self
    }

    /// Total used in progress events.
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    /// Capture the current page state. Never fails: each artifact degrades to
    /// a fallback value after its retries are exhausted.
    pub async fn capture(&mut self, step_number: u32, action: &Action, change: ChangeRecord) -> Snapshot {
        self.wait_until_ready(step_number).await;
        let html = self.capture_html(step_number).await;
        let context = self.capture_context(step_number).await;

        self.progress.emit(
            Phase::Scanning,
            step_number as usize,
            self.total,
            format!("Scanning step {}", step_number),
        );
        let results = self.run_scan(step_number, &context).await;

        let mut files = match self
            .store
            .write_step_artifacts(&self.session_id, step_number, &html, &context, &results)
            .await
        {
            Ok(files) => files,
            Err(e) => {
                warn!(step = step_number, error = %e, "Failed to persist step artifacts");
                self.store.step_files(&self.session_id, step_number)
            }
        };
        files.screenshot = self.capture_screenshot(step_number).await;

        info!(
            step = step_number,
            action = %action.label(),
            url = %context.url,
            violations = results.violations.len(),
            change = change.category.as_str(),
            "Captured snapshot"
        );

        Snapshot {
            step_number,
            action_kind: action.kind,
            action: action.clone(),
            timestamp: Utc::now(),
            html,
            context,
            violations: results.violations,
            change,
            files,
            components: Vec::new(),
        }
    }

    fn backoff(&self, base_ms: u64, attempt: u32) -> Duration {
        Duration::from_millis(base_ms.saturating_mul(attempt as u64))
    }

    async fn wait_until_ready(&self, step: u32) {
        let attempts = self.config.readiness_retries.max(1);
        for attempt in 1..=attempts {
            match self.page.evaluate(READY_SCRIPT).await {
                Ok(v) if v.as_bool() == Some(true) => return,
                Ok(_) => debug!(step, attempt, "Document not ready yet"),
                Err(e) => debug!(step, attempt, error = %e, "Readiness check failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.backoff(self.config.readiness_backoff_ms, attempt)).await;
            }
        }
        warn!(step, attempts, "Document never reported ready, capturing anyway");
    }

    async fn capture_html(&self, step: u32) -> String {
        let attempts = self.config.html_retries.max(1);
        for attempt in 1..=attempts {
            match self.page.content().await {
                Ok(html) if is_substantial(&html, self.config.min_html_length) => return html,
                Ok(html) => debug!(step, attempt, len = html.len(), "HTML too short or missing body"),
                Err(e) => debug!(step, attempt, error = %e, "Reading HTML failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.backoff(self.config.retry_backoff_ms, attempt)).await;
            }
        }
        warn!(step, attempts, "HTML capture exhausted retries, using placeholder");
        PLACEHOLDER_HTML.to_string()
    }

    async fn capture_context(&mut self, step: u32) -> ScanContext {
        let attempts = self.config.context_retries.max(1);
        for attempt in 1..=attempts {
            match self.page.evaluate(CONTEXT_SCRIPT).await {
                Ok(value) => match serde_json::from_value::<RawContext>(value) {
                    Ok(raw) if is_real_url(&raw.url) && raw.element_count > 0 => {
                        self.last_url = raw.url.clone();
                        return ScanContext {
                            title: raw.title,
                            url: raw.url,
                            element_count: raw.element_count,
                            include: self.config.include.clone(),
                            exclude: self.config.exclude.clone(),
                            active_element: raw.active_element,
                            capture_failed: false,
                        };
                    }
                    Ok(raw) => debug!(step, attempt, url = %raw.url, "Context not usable yet"),
                    Err(e) => debug!(step, attempt, error = %e, "Context had unexpected shape"),
                },
                Err(e) => debug!(step, attempt, error = %e, "Reading context failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.backoff(self.config.retry_backoff_ms, attempt)).await;
            }
        }
        warn!(step, attempts, fallback_url = %self.last_url, "Context capture failed, using fallback");
        ScanContext {
            title: String::new(),
            url: self.last_url.clone(),
            element_count: 0,
            include: self.config.include.clone(),
            exclude: self.config.exclude.clone(),
            active_element: None,
            capture_failed: true,
        }
    }

    async fn run_scan(&self, step: u32, context: &ScanContext) -> ScanResults {
        let limit = Duration::from_millis(self.config.scan_timeout_ms);
        match deadline::within(
            "accessibility scan",
            limit,
            self.scanner.analyze(self.page.as_ref(), context),
        )
        .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(step, error = %e, "Accessibility scan failed, recording zero violations");
                ScanResults::default()
            }
        }
    }

    async fn capture_screenshot(&self, step: u32) -> Option<std::path::PathBuf> {
        if !self.config.screenshots {
            return None;
        }
        let path = self.store.screenshot_path(&self.session_id, step);
        match self.page.screenshot(&path).await {
            Ok(_) => Some(path),
            Err(e) => {
                warn!(step, error = %e, "Screenshot failed");
                None
            }
        }
    }
}

fn is_substantial(html: &str, min_len: usize) -> bool {
    html.len() >= min_len && html.to_ascii_lowercase().contains("<body")
}

fn is_real_url(url: &str) -> bool {
    let url = url.trim();
    !url.is_empty() && url != "about:blank" && !url.eq_ignore_ascii_case("unknown")
}
