use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of a recorded user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    Select,
    Scroll,
    Hover,
    Key,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Select => "select",
            ActionKind::Scroll => "scroll",
            ActionKind::Hover => "hover",
            ActionKind::Key => "key",
        }
    }

    pub fn is_form_input(&self) -> bool {
        matches!(self, ActionKind::Fill | ActionKind::Select)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded replay step. Supplied as input and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub position: usize,
}

impl Action {
    pub fn navigate(url: &str) -> Self {
        Self {
            kind: ActionKind::Navigate,
            selector: None,
            value: None,
            url: Some(url.to_string()),
            position: 0,
        }
    }

    pub fn click(selector: &str) -> Self {
        Self {
            kind: ActionKind::Click,
            selector: Some(selector.to_string()),
            value: None,
            url: None,
            position: 0,
        }
    }

    pub fn fill(selector: &str, value: &str) -> Self {
        Self {
            kind: ActionKind::Fill,
            selector: Some(selector.to_string()),
            value: Some(value.to_string()),
            url: None,
            position: 0,
        }
    }

    pub fn select(selector: &str, value: &str) -> Self {
        Self {
            kind: ActionKind::Select,
            ..Self::fill(selector, value)
        }
    }

    pub fn hover(selector: &str) -> Self {
        Self {
            kind: ActionKind::Hover,
            ..Self::click(selector)
        }
    }

    pub fn key(key: &str) -> Self {
        Self {
            kind: ActionKind::Key,
            selector: None,
            value: Some(key.to_string()),
            url: None,
            position: 0,
        }
    }

    pub fn scroll() -> Self {
        Self {
            kind: ActionKind::Scroll,
            selector: None,
            value: None,
            url: None,
            position: 0,
        }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    /// Short human label used in logs and prompts.
    pub fn label(&self) -> String {
        match (self.kind, &self.selector, &self.url) {
            (ActionKind::Navigate, _, Some(url)) => format!("navigate {}", url),
            (ActionKind::Key, _, _) => format!("key {}", self.value.as_deref().unwrap_or("")),
            (kind, Some(sel), _) => format!("{} {}", kind, sel),
            (kind, None, _) => kind.to_string(),
        }
    }
}

/// Ephemeral comparison state read from the page after each action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub element_count: usize,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    Navigation,
    Content,
    Interaction,
    Layout,
    None,
}

impl ChangeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::Navigation => "navigation",
            ChangeCategory::Content => "content",
            ChangeCategory::Interaction => "interaction",
            ChangeCategory::Layout => "layout",
            ChangeCategory::None => "none",
        }
    }
}

/// Classification of how the page changed across one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub category: ChangeCategory,
    pub significant: bool,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub url_changed: bool,
    pub title_changed: bool,
    pub description: String,
}

impl ChangeRecord {
    pub fn initial_load() -> Self {
        Self {
            category: ChangeCategory::Navigation,
            significant: true,
            added: 0,
            removed: 0,
            modified: 0,
            url_changed: true,
            title_changed: true,
            description: "Initial page load".to_string(),
        }
    }
}

/// Context object handed to the accessibility scanner and persisted per step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanContext {
    pub title: String,
    pub url: String,
    pub element_count: usize,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_element: Option<String>,
    #[serde(default)]
    pub capture_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Critical,
    Serious,
    Moderate,
    Minor,
}

impl Impact {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(Impact::Critical),
            "serious" | "high" => Some(Impact::Serious),
            "moderate" | "medium" => Some(Impact::Moderate),
            "minor" | "low" => Some(Impact::Minor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Critical => "critical",
            Impact::Serious => "serious",
            Impact::Moderate => "moderate",
            Impact::Minor => "minor",
        }
    }

    /// Sort rank where lower is more severe and unknown sorts last.
    pub fn rank(impact: Option<Impact>) -> u8 {
        match impact {
            Some(Impact::Critical) => 0,
            Some(Impact::Serious) => 1,
            Some(Impact::Moderate) => 2,
            Some(Impact::Minor) => 3,
            None => 4,
        }
    }
}

/// One element affected by a scanner rule failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationNode {
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(default)]
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
}

/// A scanner rule failure as reported for a single snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawViolation {
    pub id: String,
    #[serde(default)]
    pub impact: Option<Impact>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub help_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<ViolationNode>,
}

/// Scanner output for one page state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    #[serde(default)]
    pub violations: Vec<RawViolation>,
    #[serde(default)]
    pub passes: Vec<serde_json::Value>,
    #[serde(default)]
    pub incomplete: Vec<serde_json::Value>,
}

/// Handles to the artifacts persisted for one captured step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFiles {
    pub html: PathBuf,
    pub context: PathBuf,
    pub results: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

/// Durable captured state for one replay step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub step_number: u32,
    pub action_kind: ActionKind,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
    pub html: String,
    pub context: ScanContext,
    pub violations: Vec<RawViolation>,
    pub change: ChangeRecord,
    pub files: SnapshotFiles,
    /// Component names attributed to this step after analysis.
    #[serde(default)]
    pub components: Vec<String>,
}

impl Snapshot {
    pub fn url(&self) -> &str {
        &self.context.url
    }
}

/// One accessibility finding produced by the text-analysis service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentIssue {
    #[serde(default)]
    pub component_name: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub html_before: String,
    #[serde(default)]
    pub html_after: String,
    #[serde(default)]
    pub impact: Option<Impact>,
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationSource {
    Generated,
    Fallback,
}

/// A scanner finding deduplicated across all snapshots of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub key: String,
    pub rule_id: String,
    pub impact: Option<Impact>,
    pub description: String,
    pub help: String,
    pub help_url: String,
    pub nodes: Vec<ViolationNode>,
    pub first_step: u32,
    pub step_occurrences: Vec<u32>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub explanation_source: Option<ExplanationSource>,
}

/// A chat message in the OpenAI-compatible shape used by every provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub finish_reason: String,
    pub usage: serde_json::Value,
}

impl Default for LLMResponse {
    fn default() -> Self {
        Self {
            content: None,
            finish_reason: String::new(),
            usage: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_deserializes_recorded_shape() {
        let raw = r##"{"type":"fill","selector":"#email","value":"a@b.c","position":3}"##;
        let action: Action = serde_json::from_str(raw).unwrap();
        assert_eq!(action.kind, ActionKind::Fill);
        assert_eq!(action.selector.as_deref(), Some("#email"));
        assert_eq!(action.position, 3);
        assert!(action.url.is_none());
    }

    #[test]
    fn test_impact_rank_orders_unknown_last() {
        assert!(Impact::rank(Some(Impact::Critical)) < Impact::rank(Some(Impact::Serious)));
        assert!(Impact::rank(Some(Impact::Minor)) < Impact::rank(None));
        assert_eq!(Impact::parse("HIGH"), Some(Impact::Serious));
        assert_eq!(Impact::parse("whatever"), None);
    }

    #[test]
    fn test_raw_violation_accepts_axe_fields() {
        let raw = r#"{
            "id": "image-alt",
            "impact": null,
            "help": "Images must have alternate text",
            "helpUrl": "https://dequeuniversity.com/rules/axe/4.10/image-alt",
            "nodes": [{"target": ["img.logo"], "html": "<img class=\"logo\">", "failureSummary": "Fix any"}]
        }"#;
        let v: RawViolation = serde_json::from_str(raw).unwrap();
        assert_eq!(v.impact, None);
        assert_eq!(v.nodes[0].target, vec!["img.logo".to_string()]);
        assert!(v.help_url.contains("image-alt"));
    }

    #[test]
    fn test_action_label() {
        assert_eq!(Action::navigate("https://x.test").label(), "navigate https://x.test");
        assert_eq!(Action::click("#go").label(), "click #go");
        assert_eq!(Action::key("Enter").label(), "key Enter");
    }
}
