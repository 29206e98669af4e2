//! Session manifest data model persisted as `manifest.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActionKind, ChangeCategory};

/// Coarse classification of a step's URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    MainApp,
    AuthFlow,
    ErrorFlow,
    ExternalRedirect,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::MainApp => "main_app",
            FlowType::AuthFlow => "auth_flow",
            FlowType::ErrorFlow => "error_flow",
            FlowType::ExternalRedirect => "external_redirect",
        }
    }

    /// Steps of this flow are left out of downstream analysis.
    pub fn is_excluded(&self) -> bool {
        matches!(self, FlowType::AuthFlow | FlowType::ErrorFlow)
    }

    pub fn exclusion_reason(&self) -> Option<&'static str> {
        match self {
            FlowType::AuthFlow => Some("authentication flow"),
            FlowType::ErrorFlow => Some("error page"),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityContextSummary {
    #[serde(default)]
    pub focused_element: Option<String>,
    #[serde(default)]
    pub modal_open: bool,
    #[serde(default)]
    pub live_regions: usize,
}

/// Manifest-level enrichment of one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDetail {
    pub step_number: u32,
    #[serde(default)]
    pub parent_step: Option<u32>,
    pub action_kind: ActionKind,
    pub action_category: String,
    pub flow_type: FlowType,
    pub url: String,
    pub token_estimate: usize,
    pub change_category: ChangeCategory,
    pub significant_change: bool,
    pub dom_change_summary: String,
    #[serde(default)]
    pub aria_changes: Vec<String>,
    pub accessibility_context: AccessibilityContextSummary,
    pub violation_count: usize,
    pub excluded: bool,
    #[serde(default)]
    pub exclusion_reason: Option<String>,
}

impl StepDetail {
    pub fn has_accessibility_event(&self) -> bool {
        !self.aria_changes.is_empty() || self.accessibility_context.modal_open
    }
}

/// A contiguous run of steps sharing one flow type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroup {
    pub group_id: usize,
    pub flow_type: FlowType,
    pub steps: Vec<u32>,
    pub start_step: u32,
    pub end_step: u32,
    pub token_estimate: usize,
    pub relevant: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatistics {
    pub main_app: usize,
    pub auth_flow: usize,
    pub error_flow: usize,
    pub external_redirect: usize,
    pub significant_dom_changes: usize,
    pub accessibility_event_steps: usize,
}

impl FlowStatistics {
    pub fn record(&mut self, flow: FlowType) {
        match flow {
            FlowType::MainApp => self.main_app += 1,
            FlowType::AuthFlow => self.auth_flow += 1,
            FlowType::ErrorFlow => self.error_flow += 1,
            FlowType::ExternalRedirect => self.external_redirect += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmOptimization {
    pub total_steps: usize,
    pub excluded_steps: usize,
    pub excluded_auth_steps: usize,
    pub excluded_error_steps: usize,
    pub total_tokens: usize,
    pub included_tokens: usize,
}

/// Session-level aggregate written once to `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionManifest {
    pub session_id: String,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<StepDetail>,
    pub action_groups: Vec<ActionGroup>,
    pub flow_statistics: FlowStatistics,
    pub llm_optimization: LlmOptimization,
}

impl SessionManifest {
    pub fn step(&self, step_number: u32) -> Option<&StepDetail> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_type_serializes_snake_case() {
        let json = serde_json::to_string(&FlowType::ExternalRedirect).unwrap();
        assert_eq!(json, "\"external_redirect\"");
        let back: FlowType = serde_json::from_str("\"auth_flow\"").unwrap();
        assert_eq!(back, FlowType::AuthFlow);
    }

    #[test]
    fn test_exclusion() {
        assert!(FlowType::AuthFlow.is_excluded());
        assert!(FlowType::ErrorFlow.is_excluded());
        assert!(!FlowType::MainApp.is_excluded());
        assert!(!FlowType::ExternalRedirect.is_excluded());
        assert_eq!(FlowType::MainApp.exclusion_reason(), None);
    }
}
