//! In-memory stand-ins for the browser, scanner and text-analysis service.

use async_trait::async_trait;
use chrono::Utc;
use replayscan_browser::{AccessibilityScanner, BrowserPage, LoadState};
use replayscan_core::{
    Action, ChangeRecord, ChatMessage, Error, Impact, LLMResponse, Paths, RawViolation, Result,
    ScanContext, ScanResults, Snapshot, SnapshotFiles, ViolationNode,
};
use replayscan_providers::Provider;
use replayscan_storage::SessionStore;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::capture::{CONTEXT_SCRIPT, READY_SCRIPT};
use crate::change::PAGE_STATE_SCRIPT;

pub fn test_store() -> (tempfile::TempDir, SessionStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(Paths::with_base(dir.path().to_path_buf()));
    (dir, store)
}

/// Elements in an HTML string: `<` followed by a tag name.
pub fn count_elements(html: &str) -> usize {
    html.as_bytes()
        .windows(2)
        .filter(|w| w[0] == b'<' && w[1].is_ascii_alphabetic())
        .count()
}

#[derive(Debug, Clone)]
pub enum ClickEffect {
    Navigate(String),
    AppendBody(String),
    /// The browser goes away; every later call fails with `BrowserClosed`.
    Crash,
}

#[derive(Clone)]
struct Doc {
    title: String,
    body: String,
}

#[derive(Default)]
struct PageInner {
    url: String,
    docs: HashMap<String, Doc>,
    field_values: Vec<(String, String)>,
    closed: bool,
    calls: Vec<String>,
}

impl PageInner {
    fn doc(&self) -> Doc {
        self.docs.get(&self.url).cloned().unwrap_or(Doc {
            title: String::new(),
            body: String::new(),
        })
    }

    /// Body with form values rendered as comments so they change the markup
    /// without changing the element count.
    fn body(&self) -> String {
        let mut body = self.doc().body;
        for (sel, value) in &self.field_values {
            body.push_str(&format!("<!-- {}={} -->", sel, value));
        }
        body
    }

    fn html(&self) -> String {
        format!(
            "<!DOCTYPE html><html lang=\"en\"><head><title>{}</title></head><body>{}</body></html>",
            self.doc().title,
            self.body()
        )
    }
}

pub struct FakePage {
    inner: Mutex<PageInner>,
    clicks: HashMap<String, ClickEffect>,
    missing: HashSet<String>,
    /// Selectors whose click stalls this long before taking effect.
    slow: HashMap<String, Duration>,
    /// Scripts the fake does not recognise stall this long.
    script_stall: Option<Duration>,
    /// Network idle is never reached; the wait uses up its timeout.
    never_idle: bool,
    /// Readiness, HTML and context reads left to answer with junk.
    junk_ready: AtomicUsize,
    junk_html: AtomicUsize,
    junk_context: AtomicUsize,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PageInner {
                url: "about:blank".to_string(),
                ..Default::default()
            }),
            clicks: HashMap::new(),
            missing: HashSet::new(),
            slow: HashMap::new(),
            script_stall: None,
            never_idle: false,
            junk_ready: AtomicUsize::new(0),
            junk_html: AtomicUsize::new(0),
            junk_context: AtomicUsize::new(0),
        }
    }

    pub fn with_page(self, url: &str, title: &str, body: &str) -> Self {
        self.inner.lock().unwrap().docs.insert(
            url.to_string(),
            Doc {
                title: title.to_string(),
                body: body.to_string(),
            },
        );
        self
    }

    pub fn on_click(mut self, selector: &str, effect: ClickEffect) -> Self {
        self.clicks.insert(selector.to_string(), effect);
        self
    }

    pub fn with_missing(mut self, selector: &str) -> Self {
        self.missing.insert(selector.to_string());
        self
    }

    pub fn with_slow_click(mut self, selector: &str, delay: Duration) -> Self {
        self.slow.insert(selector.to_string(), delay);
        self
    }

    pub fn with_script_stall(mut self, delay: Duration) -> Self {
        self.script_stall = Some(delay);
        self
    }

    pub fn never_idle(mut self) -> Self {
        self.never_idle = true;
        self
    }

    /// The next `n` readiness, HTML and context reads each return unusable
    /// values (not ready, a bare `<html>`, `about:blank` with no elements).
    pub fn with_junk_reads(self, n: usize) -> Self {
        for counter in [&self.junk_ready, &self.junk_html, &self.junk_context] {
            counter.store(n, Ordering::SeqCst);
        }
        self
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|c| *c == call).count()
    }

    /// Take one junk read from `counter` when any are left.
    fn junk(&self, counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn current_url(&self) -> String {
        self.inner.lock().unwrap().url.clone()
    }

    fn enter(&self, call: String) -> Result<std::sync::MutexGuard<'_, PageInner>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(Error::BrowserClosed("fake browser closed".to_string()));
        }
        inner.calls.push(call);
        Ok(inner)
    }

    fn check_selector(&self, selector: &str) -> Result<()> {
        if self.missing.contains(selector) {
            Err(Error::ElementNotFound(selector.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut inner = self.enter(format!("navigate {}", url))?;
        inner.url = url.to_string();
        inner.field_values.clear();
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
        if let Some(delay) = self.slow.get(selector) {
            tokio::time::sleep(*delay).await;
        }
        let mut inner = self.enter(format!("click {}", selector))?;
        self.check_selector(selector)?;
        match self.clicks.get(selector) {
            Some(ClickEffect::Navigate(url)) => {
                inner.url = url.clone();
                inner.field_values.clear();
            }
            Some(ClickEffect::AppendBody(extra)) => {
                let url = inner.url.clone();
                let doc = inner.docs.entry(url).or_insert(Doc {
                    title: String::new(),
                    body: String::new(),
                });
                doc.body.push_str(extra);
            }
            Some(ClickEffect::Crash) => {
                inner.closed = true;
                return Err(Error::BrowserClosed("target crashed".to_string()));
            }
            None => {}
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<()> {
        let mut inner = self.enter(format!("fill {}={}", selector, value))?;
        self.check_selector(selector)?;
        inner.field_values.retain(|(s, _)| s != selector);
        inner.field_values.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn select(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        self.fill(selector, value, timeout).await
    }

    async fn hover(&self, selector: &str, _timeout: Duration) -> Result<()> {
        let _inner = self.enter(format!("hover {}", selector))?;
        self.check_selector(selector)
    }

    async fn press(&self, key: &str) -> Result<()> {
        let _inner = self.enter(format!("press {}", key))?;
        Ok(())
    }

    async fn scroll(&self) -> Result<()> {
        let _inner = self.enter("scroll".to_string())?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let known = [PAGE_STATE_SCRIPT, READY_SCRIPT, CONTEXT_SCRIPT].contains(&script);
        if let (false, Some(delay)) = (known, self.script_stall) {
            drop(self.enter("evaluate".to_string())?);
            tokio::time::sleep(delay).await;
            return Ok(json!(true));
        }
        if script == READY_SCRIPT && self.junk(&self.junk_ready) {
            let _inner = self.enter("ready".to_string())?;
            return Ok(json!(false));
        }

        let inner = self.enter("evaluate".to_string())?;
        let html = inner.html();
        if script == PAGE_STATE_SCRIPT {
            Ok(json!({
                "url": inner.url,
                "title": inner.doc().title,
                "elementCount": count_elements(&html),
                "body": inner.body(),
            }))
        } else if script == READY_SCRIPT {
            Ok(json!(true))
        } else if script == CONTEXT_SCRIPT && self.junk(&self.junk_context) {
            Ok(json!({"url": "about:blank", "title": "", "elementCount": 0, "activeElement": null}))
        } else if script == CONTEXT_SCRIPT {
            Ok(json!({
                "url": inner.url,
                "title": inner.doc().title,
                "elementCount": count_elements(&html),
                "activeElement": null,
            }))
        } else {
            Ok(json!(true))
        }
    }

    async fn content(&self) -> Result<String> {
        let inner = self.enter("content".to_string())?;
        if self.junk(&self.junk_html) {
            return Ok("<html></html>".to_string());
        }
        Ok(inner.html())
    }

    async fn screenshot(&self, path: &Path) -> Result<Vec<u8>> {
        let _inner = self.enter("screenshot".to_string())?;
        let bytes = b"\x89PNG fake".to_vec();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        Ok(bytes)
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> Result<()> {
        let _inner = self.enter(format!("wait {}", selector))?;
        self.check_selector(selector)
    }

    async fn wait_for_load_state(&self, _state: LoadState, timeout: Duration) -> Result<()> {
        drop(self.enter("load-state".to_string())?);
        if self.never_idle {
            tokio::time::sleep(timeout).await;
            return Err(Error::timeout("network idle", timeout));
        }
        Ok(())
    }
}

/// Scanner returning canned violations per URL.
#[derive(Default)]
pub struct FakeScanner {
    violations: HashMap<String, Vec<RawViolation>>,
    failing: HashSet<String>,
}

impl FakeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_violations(mut self, url: &str, violations: Vec<RawViolation>) -> Self {
        self.violations.insert(url.to_string(), violations);
        self
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }
}

#[async_trait]
impl AccessibilityScanner for FakeScanner {
    async fn analyze(&self, _page: &dyn BrowserPage, context: &ScanContext) -> Result<ScanResults> {
        if self.failing.contains(&context.url) {
            return Err(Error::Scan("axe crashed".to_string()));
        }
        Ok(ScanResults {
            violations: self.violations.get(&context.url).cloned().unwrap_or_default(),
            ..Default::default()
        })
    }
}

type Responder = Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

/// Provider answering from a closure over `(system prompt, user prompt)`.
pub struct FakeProvider {
    respond: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        self.prompts.lock().unwrap().push(user.to_string());
        let content = (self.respond)(system, user)?;
        Ok(LLMResponse {
            content: Some(content),
            finish_reason: "stop".to_string(),
            usage: Value::Null,
        })
    }
}

pub fn raw_violation(id: &str, impact: Option<Impact>, target: &[&str]) -> RawViolation {
    RawViolation {
        id: id.to_string(),
        impact,
        description: format!("{} description", id),
        help: format!("Fix {}", id),
        help_url: format!("https://dequeuniversity.com/rules/axe/4.10/{}", id),
        tags: vec!["wcag2a".to_string()],
        nodes: vec![ViolationNode {
            target: target.iter().map(|s| s.to_string()).collect(),
            html: "<div></div>".to_string(),
            failure_summary: None,
        }],
    }
}

pub fn snapshot(step: u32, url: &str, html: &str, violations: Vec<RawViolation>) -> Snapshot {
    Snapshot {
        step_number: step,
        action_kind: replayscan_core::ActionKind::Click,
        action: Action::click("#x"),
        timestamp: Utc::now(),
        html: html.to_string(),
        context: ScanContext {
            title: "Page".to_string(),
            url: url.to_string(),
            element_count: count_elements(html),
            ..Default::default()
        },
        violations,
        change: ChangeRecord::initial_load(),
        files: SnapshotFiles::default(),
        components: Vec::new(),
    }
}
