//! DOM change classification between successive page observations.

use replayscan_browser::BrowserPage;
use replayscan_core::{Action, ChangeCategory, ChangeRecord, PageState, Result};

/// Returns `{url, title, elementCount, body}` for the current document.
pub const PAGE_STATE_SCRIPT: &str = "(() => ({\
    url: location.href, \
    title: document.title || '', \
    elementCount: document.getElementsByTagName('*').length, \
    body: document.body ? document.body.innerHTML : ''\
}))()";

/// Element-count delta above which a change counts as a content change.
const CONTENT_THRESHOLD: usize = 10;
/// Element growth above which an interaction change is significant.
const INTERACTION_THRESHOLD: i64 = 2;

pub async fn read_page_state(page: &dyn BrowserPage) -> Result<PageState> {
    let value = page.evaluate(PAGE_STATE_SCRIPT).await?;
    Ok(serde_json::from_value(value)?)
}

/// Classify `current` against the previous observation.
///
/// The returned state is the new "previous" and must be passed back on the
/// next call; `None` marks the first observation of a session.
pub fn detect_change(
    previous: Option<PageState>,
    current: PageState,
    action: &Action,
) -> (ChangeRecord, PageState) {
    let Some(prev) = previous else {
        return (ChangeRecord::initial_load(), current);
    };

    let delta = current.element_count as i64 - prev.element_count as i64;
    let added = delta.max(0) as usize;
    let removed = (-delta).max(0) as usize;
    let url_changed = current.url != prev.url;
    let title_changed = current.title != prev.title;

    let record = |category, significant, modified, description: String| ChangeRecord {
        category,
        significant,
        added,
        removed,
        modified,
        url_changed,
        title_changed,
        description,
    };

    let change = if url_changed {
        record(
            ChangeCategory::Navigation,
            true,
            0,
            format!("Navigated from {} to {}", prev.url, current.url),
        )
    } else if current.body == prev.body {
        record(
            ChangeCategory::None,
            false,
            0,
            format!("No DOM change after {}", action.label()),
        )
    } else if delta.unsigned_abs() as usize > CONTENT_THRESHOLD || title_changed {
        let mut description = format!("Content changed after {}: +{} -{} elements", action.label(), added, removed);
        if title_changed {
            description.push_str(&format!(", title now \"{}\"", current.title));
        }
        record(ChangeCategory::Content, true, 1, description)
    } else if delta != 0 {
        record(
            ChangeCategory::Interaction,
            delta > INTERACTION_THRESHOLD,
            1,
            format!("Interaction after {}: +{} -{} elements", action.label(), added, removed),
        )
    } else {
        record(
            ChangeCategory::Layout,
            false,
            1,
            format!("Attribute or text change after {}", action.label()),
        )
    };

    (change, current)
}
