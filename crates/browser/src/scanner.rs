//! Accessibility scanning through axe-core running inside the page.

use async_trait::async_trait;
use replayscan_core::config::CaptureConfig;
use replayscan_core::{Error, RawViolation, Result, ScanContext, ScanResults, ViolationNode};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::page::{js_string, BrowserPage};

/// Runs an opaque rule engine against the page's current state.
#[async_trait]
pub trait AccessibilityScanner: Send + Sync {
    async fn analyze(&self, page: &dyn BrowserPage, context: &ScanContext) -> Result<ScanResults>;
}

#[derive(Debug, Clone)]
enum AxeSource {
    File(PathBuf),
    Url(String),
}

pub struct AxeScanner {
    source: AxeSource,
    /// Local axe-core source, read on first use.
    script: OnceCell<String>,
}

impl AxeScanner {
    pub fn from_config(config: &CaptureConfig) -> Self {
        let source = match &config.axe_script_path {
            Some(path) => AxeSource::File(path.clone()),
            None => AxeSource::Url(config.axe_script_url.clone()),
        };
        Self {
            source,
            script: OnceCell::new(),
        }
    }

    async fn injection_script(&self) -> Result<String> {
        match &self.source {
            AxeSource::File(path) => {
                let body = self
                    .script
                    .get_or_try_init(|| async {
                        tokio::fs::read_to_string(path).await.map_err(|e| {
                            Error::Scan(format!("cannot read axe script {}: {}", path.display(), e))
                        })
                    })
                    .await?;
                Ok(format!("{}\n;typeof window.axe !== 'undefined'", body))
            }
            AxeSource::Url(url) => Ok(script_tag_loader(url)),
        }
    }

    /// Inject axe unless the current document already has it.
    async fn ensure_injected(&self, page: &dyn BrowserPage) -> Result<()> {
        let present = page.evaluate("typeof window.axe !== 'undefined'").await?;
        if present.as_bool() == Some(true) {
            return Ok(());
        }
        debug!("injecting axe-core");
        let loaded = page.evaluate(&self.injection_script().await?).await?;
        if loaded.as_bool() != Some(true) {
            return Err(Error::Scan("axe-core did not load".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessibilityScanner for AxeScanner {
    async fn analyze(&self, page: &dyn BrowserPage, context: &ScanContext) -> Result<ScanResults> {
        self.ensure_injected(page).await?;
        let raw = page.evaluate(&run_script(context)).await?;
        parse_results(&raw)
    }
}

fn script_tag_loader(url: &str) -> String {
    format!(
        "new Promise((resolve) => {{ \
           const s = document.createElement('script'); \
           s.src = {url}; \
           s.onload = () => resolve(typeof window.axe !== 'undefined'); \
           s.onerror = () => resolve(false); \
           (document.head || document.documentElement).appendChild(s); \
         }})",
        url = js_string(url)
    )
}

/// `axe.run` over the context's include/exclude lists. The whole document is
/// scanned when `include` is empty.
fn run_script(context: &ScanContext) -> String {
    let target = if context.include.is_empty() && context.exclude.is_empty() {
        "document".to_string()
    } else {
        let mut ctx = json!({});
        if !context.include.is_empty() {
            ctx["include"] = json!(context.include.iter().map(|s| vec![s]).collect::<Vec<_>>());
        }
        if !context.exclude.is_empty() {
            ctx["exclude"] = json!(context.exclude.iter().map(|s| vec![s]).collect::<Vec<_>>());
        }
        ctx.to_string()
    };
    format!(
        "axe.run({}, {{resultTypes: ['violations']}}).then(r => ({{\
           violations: r.violations, passes: r.passes.map(p => ({{id: p.id}})), \
           incomplete: r.incomplete.map(i => ({{id: i.id, impact: i.impact}}))}}))",
        target
    )
}

/// Map axe's result object into `ScanResults`, tolerating missing fields.
pub fn parse_results(raw: &Value) -> Result<ScanResults> {
    if !raw.is_object() {
        return Err(Error::Scan(format!("unexpected axe result: {}", raw)));
    }
    let violations = raw
        .get("violations")
        .and_then(|v| v.as_array())
        .map(|list| list.iter().filter_map(parse_violation).collect())
        .unwrap_or_default();
    let list = |key: &str| {
        raw.get(key)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };
    Ok(ScanResults {
        violations,
        passes: list("passes"),
        incomplete: list("incomplete"),
    })
}

fn parse_violation(v: &Value) -> Option<RawViolation> {
    let text = |key: &str| v.get(key).and_then(|x| x.as_str()).unwrap_or("").to_string();
    let nodes = v
        .get("nodes")
        .and_then(|n| n.as_array())
        .map(|nodes| {
            nodes
                .iter()
                .map(|n| ViolationNode {
                    target: flatten_target(n.get("target")),
                    html: n.get("html").and_then(|x| x.as_str()).unwrap_or("").to_string(),
                    failure_summary: n
                        .get("failureSummary")
                        .and_then(|x| x.as_str())
                        .map(|s| s.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(RawViolation {
        id: v.get("id")?.as_str()?.to_string(),
        impact: v
            .get("impact")
            .and_then(|x| x.as_str())
            .and_then(replayscan_core::Impact::parse),
        description: text("description"),
        help: text("help"),
        help_url: text("helpUrl"),
        tags: v
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|t| t.iter().filter_map(|s| s.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        nodes,
    })
}

/// axe targets are selector strings, or nested arrays for shadow-DOM paths.
fn flatten_target(target: Option<&Value>) -> Vec<String> {
    match target {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                Value::Array(parts) => parts
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(" >>> "),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replayscan_core::Impact;

    #[test]
    fn test_run_script_scopes_context() {
        let ctx = ScanContext {
            include: vec!["main".to_string()],
            exclude: vec![".ads".to_string()],
            ..Default::default()
        };
        let script = run_script(&ctx);
        assert!(script.contains(r#""include":[["main"]]"#));
        assert!(script.contains(r#""exclude":[[".ads"]]"#));
        assert!(run_script(&ScanContext::default()).starts_with("axe.run(document"));
    }

    #[test]
    fn test_parse_results() {
        let raw = json!({
            "violations": [{
                "id": "image-alt",
                "impact": "critical",
                "description": "Images must have alternate text",
                "help": "Provide alt text",
                "helpUrl": "https://dequeuniversity.com/rules/axe/4.10/image-alt",
                "tags": ["wcag2a"],
                "nodes": [
                    {"target": ["img.hero"], "html": "<img class=\"hero\">", "failureSummary": "Fix any"},
                    {"target": [["my-card", "img"]], "html": "<img>"}
                ]
            }, {"impact": "minor"}],
            "passes": [{"id": "document-title"}],
            "incomplete": []
        });
        let results = parse_results(&raw).unwrap();
        assert_eq!(results.violations.len(), 1);
        let v = &results.violations[0];
        assert_eq!(v.impact, Some(Impact::Critical));
        assert_eq!(v.nodes[0].target, vec!["img.hero"]);
        assert_eq!(v.nodes[1].target, vec!["my-card >>> img"]);
        assert_eq!(v.nodes[0].failure_summary.as_deref(), Some("Fix any"));
        assert_eq!(results.passes.len(), 1);
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(parse_results(&Value::Null).is_err());
    }

    #[test]
    fn test_script_tag_loader_quotes_url() {
        let s = script_tag_loader("https://cdn.example/axe.min.js");
        assert!(s.contains(r#"s.src = "https://cdn.example/axe.min.js""#));
    }
}
