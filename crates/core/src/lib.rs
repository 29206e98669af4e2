pub mod config;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use manifest::{
    AccessibilityContextSummary, ActionGroup, FlowStatistics, FlowType, LlmOptimization,
    SessionManifest, StepDetail,
};
pub use paths::Paths;
pub use types::{
    Action, ActionKind, ChangeCategory, ChangeRecord, ChatMessage, ComponentIssue,
    ExplanationSource, Impact, LLMResponse, PageState, RawViolation, ScanContext, ScanResults,
    Snapshot, SnapshotFiles, Violation, ViolationNode,
};

/// Truncate `s` to at most `max_bytes`, backing off to a char boundary.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Keep the last `max_bytes` of `s`, advancing to a char boundary.
pub fn safe_truncate_front(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
