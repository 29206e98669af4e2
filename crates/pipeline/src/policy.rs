use replayscan_core::{Action, ActionKind, ChangeCategory, ChangeRecord};

/// Decide whether the state after `actions[index]` is worth a snapshot.
///
/// Navigations and significant changes always capture. An insignificant
/// `fill` captures only when the immediately following action is not another
/// `fill` on the same selector, so a run of keystrokes yields one snapshot of
/// the settled field. The first action captures unless it is such a debounced
/// fill.
pub fn should_capture(action: &Action, change: &ChangeRecord, index: usize, actions: &[Action]) -> bool {
    if change.category == ChangeCategory::Navigation || change.significant {
        return true;
    }
    if action.kind == ActionKind::Fill {
        return !refilled_next(action, index, actions);
    }
    index == 0
}

fn refilled_next(action: &Action, index: usize, actions: &[Action]) -> bool {
    actions
        .get(index + 1)
        .map(|next| next.kind == ActionKind::Fill && next.selector == action.selector)
        .unwrap_or(false)
}
