//! Per-step enrichment of replay snapshots into a [`SessionManifest`].

use chrono::Utc;
use regex::Regex;
use replayscan_core::config::RulesConfig;
use replayscan_core::{
    AccessibilityContextSummary, ActionGroup, ActionKind, ChangeCategory, Error, FlowStatistics,
    FlowType, LlmOptimization, Result, SessionManifest, Snapshot, StepDetail,
};
use tracing::info;

use crate::rules::{AriaMatcher, FlowClassifier};

/// Rough token count: one token per four bytes of HTML, scan context and
/// violations as serialized JSON.
pub fn estimate_tokens(snapshot: &Snapshot) -> usize {
    let context = serde_json::to_string(&snapshot.context).map(|s| s.len()).unwrap_or(0);
    let violations = serde_json::to_string(&snapshot.violations).map(|s| s.len()).unwrap_or(0);
    (snapshot.html.len() + context + violations).div_ceil(4)
}

pub fn action_category(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Navigate => "navigation",
        ActionKind::Click | ActionKind::Hover => "interaction",
        ActionKind::Fill | ActionKind::Select => "form_input",
        ActionKind::Key => "keyboard",
        ActionKind::Scroll => "scroll",
    }
}

pub struct ManifestBuilder {
    target_url: String,
    classifier: FlowClassifier,
    aria: AriaMatcher,
    modal: Regex,
    live_region: Regex,
    autofocus: Regex,
}

impl ManifestBuilder {
    pub fn new(rules: &RulesConfig, target_url: &str) -> Result<Self> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(|e| Error::Config(e.to_string()));
        Ok(Self {
            target_url: target_url.to_string(),
            classifier: FlowClassifier::new(&rules.flow_rules, target_url)?,
            aria: AriaMatcher::new(&rules.aria_patterns)?,
            modal: compile(r#"(?i)role="(dialog|alertdialog)"|aria-modal="true"|<dialog[^>]*\sopen"#)?,
            live_region: compile(r#"(?i)aria-live="(polite|assertive)"|role="(alert|status|log)""#)?,
            autofocus: compile(r#"(?i)<([a-z][a-z0-9-]*)([^>]*\sid="([^"]+)")?[^>]*\sautofocus[\s>=/]"#)?,
        })
    }

    pub fn build(&self, session_id: &str, snapshots: &[Snapshot]) -> SessionManifest {
        let mut steps = Vec::with_capacity(snapshots.len());
        let mut last_navigation: Option<u32> = None;
        let mut previous: Option<&Snapshot> = None;

        for snapshot in snapshots {
            let step_number = snapshot.step_number;
            let is_navigation = snapshot.change.category == ChangeCategory::Navigation;
            let parent_step = if is_navigation {
                previous.map(|p| p.step_number)
            } else {
                last_navigation
            };
            if is_navigation {
                last_navigation = Some(step_number);
            }

            let flow_type = self.classifier.classify(snapshot.url());
            steps.push(StepDetail {
                step_number,
                parent_step,
                action_kind: snapshot.action_kind,
                action_category: action_category(snapshot.action_kind).to_string(),
                flow_type,
                url: snapshot.url().to_string(),
                token_estimate: estimate_tokens(snapshot),
                change_category: snapshot.change.category,
                significant_change: snapshot.change.significant,
                dom_change_summary: snapshot.change.description.clone(),
                aria_changes: self.aria.diff(previous.map(|p| p.html.as_str()), &snapshot.html),
                accessibility_context: self.accessibility_context(snapshot),
                violation_count: snapshot.violations.len(),
                excluded: flow_type.is_excluded(),
                exclusion_reason: flow_type.exclusion_reason().map(str::to_string),
            });
            previous = Some(snapshot);
        }

        let action_groups = group_steps(&steps);
        let mut flow_statistics = FlowStatistics::default();
        let mut llm_optimization = LlmOptimization {
            total_steps: steps.len(),
            ..Default::default()
        };
        for step in &steps {
            flow_statistics.record(step.flow_type);
            if step.significant_change {
                flow_statistics.significant_dom_changes += 1;
            }
            if step.has_accessibility_event() {
                flow_statistics.accessibility_event_steps += 1;
            }
            llm_optimization.total_tokens += step.token_estimate;
            if step.excluded {
                llm_optimization.excluded_steps += 1;
                match step.flow_type {
                    FlowType::AuthFlow => llm_optimization.excluded_auth_steps += 1,
                    FlowType::ErrorFlow => llm_optimization.excluded_error_steps += 1,
                    _ => {}
                }
            } else {
                llm_optimization.included_tokens += step.token_estimate;
            }
        }

        info!(
            session_id,
            steps = steps.len(),
            groups = action_groups.len(),
            excluded = llm_optimization.excluded_steps,
            "Built session manifest"
        );

        SessionManifest {
            session_id: session_id.to_string(),
            target_url: self.target_url.clone(),
            created_at: Utc::now(),
            steps,
            action_groups,
            flow_statistics,
            llm_optimization,
        }
    }

    fn accessibility_context(&self, snapshot: &Snapshot) -> AccessibilityContextSummary {
        let focused_element = snapshot.context.active_element.clone().or_else(|| {
            self.autofocus.captures(&snapshot.html).map(|c| {
                let tag = c.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
                match c.get(3) {
                    Some(id) => format!("{}#{}", tag, id.as_str()),
                    None => format!("{}[autofocus]", tag),
                }
            })
        });
        AccessibilityContextSummary {
            focused_element,
            modal_open: self.modal.is_match(&snapshot.html),
            live_regions: self.live_region.find_iter(&snapshot.html).count(),
        }
    }
}

/// Run-length encode steps by flow type.
fn group_steps(steps: &[StepDetail]) -> Vec<ActionGroup> {
    let mut groups: Vec<ActionGroup> = Vec::new();
    for step in steps {
        if let Some(group) = groups.last_mut().filter(|g| g.flow_type == step.flow_type) {
            group.steps.push(step.step_number);
            group.end_step = step.step_number;
            group.token_estimate += step.token_estimate;
            continue;
        }
        groups.push(ActionGroup {
            group_id: groups.len(),
            flow_type: step.flow_type,
            steps: vec![step.step_number],
            start_step: step.step_number,
            end_step: step.step_number,
            token_estimate: step.token_estimate,
            relevant: step.flow_type == FlowType::MainApp,
        });
    }
    groups
}
