//! The page-automation capability driven by the replay pipeline.

use async_trait::async_trait;
use base64::Engine;
use replayscan_core::{Error, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cdp::{key_code_for, CdpClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    NetworkIdle,
}

/// Browser operations the pipeline needs. Every call may time out or report
/// `ElementNotFound`; callers decide which failures are tolerable.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;
    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;
    async fn select(&self, selector: &str, value: &str, timeout: Duration) -> Result<()>;
    async fn hover(&self, selector: &str, timeout: Duration) -> Result<()>;
    async fn press(&self, key: &str) -> Result<()>;
    async fn scroll(&self) -> Result<()>;
    async fn evaluate(&self, script: &str) -> Result<Value>;
    async fn content(&self) -> Result<String>;
    async fn screenshot(&self, path: &Path) -> Result<Vec<u8>>;
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the resource-entry count must hold still to count as network idle.
const NETWORK_QUIET: Duration = Duration::from_millis(500);

/// `BrowserPage` over a CDP page-target connection.
pub struct CdpPage {
    cdp: Arc<CdpClient>,
}

impl CdpPage {
    pub fn new(cdp: Arc<CdpClient>) -> Self {
        Self { cdp }
    }

    /// Run `body` with `el` bound to the first match for `selector`.
    async fn with_element(&self, selector: &str, timeout: Duration, body: &str) -> Result<Value> {
        self.wait_for_selector(selector, timeout).await?;
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return '__missing__'; {body} }})()",
            sel = js_string(selector),
            body = body,
        );
        let value = self.cdp.evaluate(&script).await?;
        if value.as_str() == Some("__missing__") {
            return Err(Error::ElementNotFound(selector.to_string()));
        }
        Ok(value)
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        self.cdp.navigate(url).await?;
        self.wait_for_load_state(LoadState::Load, timeout).await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.with_element(
            selector,
            timeout,
            "el.scrollIntoView({block: 'center'}); el.click(); return true;",
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        let body = format!(
            "el.focus(); \
             const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype; \
             const setter = Object.getOwnPropertyDescriptor(proto, 'value'); \
             if (setter && setter.set && (el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement)) {{ setter.set.call(el, {v}); }} \
             else if (el.isContentEditable) {{ el.textContent = {v}; }} else {{ el.value = {v}; }} \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return true;",
            v = js_string(value)
        );
        self.with_element(selector, timeout, &body).await?;
        Ok(())
    }

    async fn select(&self, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        let body = format!(
            "const opt = Array.from(el.options || []).find(o => o.value === {v} || o.text.trim() === {v}); \
             if (!opt) return '__no_option__'; \
             el.value = opt.value; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return true;",
            v = js_string(value)
        );
        let result = self.with_element(selector, timeout, &body).await?;
        if result.as_str() == Some("__no_option__") {
            return Err(Error::ElementNotFound(format!("{} option {}", selector, value)));
        }
        Ok(())
    }

    async fn hover(&self, selector: &str, timeout: Duration) -> Result<()> {
        let rect = self
            .with_element(
                selector,
                timeout,
                "el.scrollIntoView({block: 'center'}); const r = el.getBoundingClientRect(); \
                 return {x: r.left + r.width / 2, y: r.top + r.height / 2};",
            )
            .await?;
        let x = rect.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let y = rect.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
        self.cdp.dispatch_mouse_event("mouseMoved", x, y).await
    }

    async fn press(&self, key: &str) -> Result<()> {
        let code = key_code_for(key);
        self.cdp.dispatch_key_event("keyDown", key, &code).await?;
        self.cdp.dispatch_key_event("keyUp", key, &code).await
    }

    async fn scroll(&self) -> Result<()> {
        self.cdp
            .evaluate("window.scrollBy(0, window.innerHeight); true")
            .await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.cdp.evaluate(script).await
    }

    async fn content(&self) -> Result<String> {
        let value = self
            .cdp
            .evaluate("document.documentElement ? document.documentElement.outerHTML : ''")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&self, path: &Path) -> Result<Vec<u8>> {
        let data = self.cdp.screenshot(true).await?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| Error::Browser(format!("Invalid screenshot data: {}", e)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        Ok(bytes)
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        let start = Instant::now();
        loop {
            if self.cdp.evaluate(&script).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Error::ElementNotFound(selector.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            let ready = self.cdp.evaluate("document.readyState").await?;
            if ready.as_str() == Some("complete") {
                break;
            }
            if start.elapsed() >= timeout {
                return Err(Error::timeout("wait_for_load", timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        if state == LoadState::Load {
            return Ok(());
        }

        // Network idle: resource timing entries stop growing for NETWORK_QUIET.
        let mut last_count = -1i64;
        let mut quiet_since = Instant::now();
        loop {
            let count = self
                .cdp
                .evaluate("performance.getEntriesByType('resource').length")
                .await?
                .as_i64()
                .unwrap_or(0);
            if count != last_count {
                last_count = count;
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= NETWORK_QUIET {
                debug!(resources = count, "network idle");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Error::timeout("wait_for_network_idle", timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Quote `s` as a JavaScript string literal.
pub fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
