//! Ordered replay of recorded actions against one page.
//!
//! Each action runs Execute, Settle, Stabilize, Detect, Decide and, when the
//! snapshot policy agrees, Capture. Interaction failures are logged and the
//! session continues; only a fatal browser error aborts the run.

use replayscan_browser::{BrowserPage, LoadState};
use replayscan_core::config::ReplayConfig;
use replayscan_core::{Action, ActionKind, Error, PageState, Result, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureEngine;
use crate::change::{detect_change, read_page_state};
use crate::deadline;
use crate::policy::should_capture;
use crate::progress::{Phase, Progress};

/// Headroom over the page-level timeout before the outer deadline fires.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

fn stabilize_script(quiet_ms: u64, max_ms: u64) -> String {
    format!(
        "new Promise(resolve => {{\
            let timer = setTimeout(done, {quiet}); \
            const limit = setTimeout(done, {max}); \
            const observer = new MutationObserver(() => {{ clearTimeout(timer); timer = setTimeout(done, {quiet}); }}); \
            function done() {{ observer.disconnect(); clearTimeout(timer); clearTimeout(limit); resolve(true); }} \
            observer.observe(document.documentElement, {{subtree: true, childList: true, attributes: true, characterData: true}}); \
        }})",
        quiet = quiet_ms,
        max = max_ms
    )
}

pub struct ReplayEngine {
    page: Arc<dyn BrowserPage>,
    capture: CaptureEngine,
    config: ReplayConfig,
    progress: Progress,
}

impl ReplayEngine {
    pub fn new(page: Arc<dyn BrowserPage>, capture: CaptureEngine, config: ReplayConfig) -> Self {
        Self {
            page,
            capture,
            config,
            progress: Progress::none(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Replay `actions` in order and return the snapshots taken, numbered
    /// from 1. Fails only when the browser handle becomes unusable.
    pub async fn run(&mut self, actions: &[Action]) -> Result<Vec<Snapshot>> {
        let total = actions.len();
        self.capture.set_total(total);
        let mut previous: Option<PageState> = None;
        let mut snapshots: Vec<Snapshot> = Vec::new();

        info!(actions = total, "Starting replay");

        for (index, action) in actions.iter().enumerate() {
            let position = index + 1;
            self.progress
                .emit(Phase::Replaying, position, total, action.label());

            if let Err(e) = self.execute(action).await {
                if e.is_fatal() {
                    error!(step = position, action = %action.label(), error = %e, "Browser lost during replay");
                    return Err(e);
                }
                warn!(step = position, action = %action.label(), error = %e, "Action failed, continuing");
            }

            self.settle(action).await?;
            self.stabilize().await?;

            let current = match read_page_state(self.page.as_ref()).await {
                Ok(state) => state,
                Err(e) if e.is_fatal() => {
                    error!(step = position, error = %e, "Browser lost while reading page state");
                    return Err(e);
                }
                Err(e) => {
                    warn!(step = position, error = %e, "Reading page state failed, reusing previous state");
                    previous.clone().unwrap_or_default()
                }
            };

            let (change, state) = detect_change(previous.take(), current, action);
            previous = Some(state);
            debug!(
                step = position,
                category = change.category.as_str(),
                significant = change.significant,
                "Detected change"
            );

            if !should_capture(action, &change, index, actions) {
                debug!(step = position, action = %action.label(), "Snapshot skipped");
                continue;
            }

            let step_number = snapshots.len() as u32 + 1;
            self.progress.emit(
                Phase::Capturing,
                position,
                total,
                format!("Capturing step {}", step_number),
            );
            let snapshot = self.capture.capture(step_number, action, change).await;
            snapshots.push(snapshot);
        }

        info!(actions = total, snapshots = snapshots.len(), "Replay completed");
        Ok(snapshots)
    }

    async fn execute(&self, action: &Action) -> Result<()> {
        let timeout = Duration::from_millis(self.config.action_timeout_ms);
        let page = self.page.as_ref();
        let fut = async move {
            match action.kind {
                ActionKind::Navigate => {
                    let url = action
                        .url
                        .as_deref()
                        .ok_or_else(|| Error::Validation("navigate action without url".to_string()))?;
                    page.navigate(url, timeout).await
                }
                ActionKind::Click => page.click(selector_of(action)?, timeout).await,
                ActionKind::Fill => {
                    page.fill(selector_of(action)?, action.value.as_deref().unwrap_or(""), timeout)
                        .await
                }
                ActionKind::Select => {
                    page.select(selector_of(action)?, action.value.as_deref().unwrap_or(""), timeout)
                        .await
                }
                ActionKind::Hover => page.hover(selector_of(action)?, timeout).await,
                ActionKind::Key => {
                    let key = action
                        .value
                        .as_deref()
                        .ok_or_else(|| Error::Validation("key action without key".to_string()))?;
                    page.press(key).await
                }
                ActionKind::Scroll => page.scroll().await,
            }
        };
        deadline::within(action.kind.as_str(), timeout + DEADLINE_SLACK, fut).await
    }

    async fn settle(&self, action: &Action) -> Result<()> {
        let delay_ms = match action.kind {
            ActionKind::Navigate => self.config.navigation_delay_ms,
            ActionKind::Click => self.config.click_delay_ms,
            ActionKind::Fill | ActionKind::Select => self.config.input_delay_ms,
            _ => self.config.default_delay_ms,
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let idle = Duration::from_millis(self.config.network_idle_timeout_ms);
        match self.page.wait_for_load_state(LoadState::NetworkIdle, idle).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(error = %e, "Network never went idle");
                Ok(())
            }
        }
    }

    async fn stabilize(&self) -> Result<()> {
        if !self.config.stabilize {
            return Ok(());
        }
        let script = stabilize_script(self.config.stabilize_quiet_ms, self.config.stabilize_max_ms);
        let limit = Duration::from_millis(self.config.stabilize_max_ms) + DEADLINE_SLACK;
        match deadline::within("dom stabilization", limit, self.page.evaluate(&script)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "DOM did not stabilize");
                Ok(())
            }
        }
    }
}

fn selector_of(action: &Action) -> Result<&str> {
    action
        .selector
        .as_deref()
        .ok_or_else(|| Error::Validation(format!("{} action without selector", action.kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_store, ClickEffect, FakePage, FakeScanner};
    use replayscan_core::config::CaptureConfig;
    use replayscan_core::ChangeCategory;
    use replayscan_storage::SessionStore;

    const HOME: &str = "https://shop.example/";
    const CART: &str = "https://shop.example/cart";

    fn shop() -> FakePage {
        let list: String = (0..12).map(|i| format!("<li>Item {}</li>", i)).collect();
        FakePage::new()
            .with_page(
                HOME,
                "Shop",
                "<main><h1>Shop</h1><button id=\"more\">More</button><input id=\"q\"></main>",
            )
            .with_page(CART, "Cart", "<main><h1>Cart</h1></main>")
            .on_click("#more", ClickEffect::AppendBody(format!("<ul>{}</ul>", list)))
            .on_click("#go", ClickEffect::Navigate(CART.to_string()))
            .on_click("#boom", ClickEffect::Crash)
            .with_missing("#missing")
    }

    fn engine(page: Arc<FakePage>, store: SessionStore) -> ReplayEngine {
        engine_with(page, store, ReplayConfig::immediate())
    }

    fn engine_with(page: Arc<FakePage>, store: SessionStore, config: ReplayConfig) -> ReplayEngine {
        let capture = CaptureEngine::new(
            page.clone(),
            Arc::new(FakeScanner::new()),
            store,
            CaptureConfig::immediate(),
            "s1",
        );
        ReplayEngine::new(page, capture, config)
    }

    #[tokio::test]
    async fn test_replay_captures_meaningful_steps() {
        let (_dir, store) = test_store();
        let page = Arc::new(shop());
        let actions = vec![
            Action::navigate(HOME).at(0),
            Action::click("#more").at(1),
            Action::fill("#q", "a").at(2),
            Action::fill("#q", "ab").at(3),
            Action::click("#missing").at(4),
            Action::click("#go").at(5),
        ];

        let snapshots = engine(page.clone(), store).run(&actions).await.unwrap();

        let steps: Vec<u32> = snapshots.iter().map(|s| s.step_number).collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
        assert_eq!(snapshots[0].change.category, ChangeCategory::Navigation);
        assert_eq!(snapshots[1].change.category, ChangeCategory::Content);
        assert_eq!(snapshots[2].action.value.as_deref(), Some("ab"));
        assert_eq!(snapshots[3].context.url, CART);
        assert!(page.calls().iter().any(|c| c == "click #missing"));
    }

    #[tokio::test]
    async fn test_invalid_action_is_skipped() {
        let (_dir, store) = test_store();
        let page = Arc::new(shop());
        let mut bad = Action::navigate(HOME);
        bad.url = None;
        let actions = vec![Action::navigate(HOME), bad, Action::click("#go")];

        let snapshots = engine(page, store).run(&actions).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].context.url, CART);
    }

    #[tokio::test]
    async fn test_browser_loss_aborts() {
        let (_dir, store) = test_store();
        let page = Arc::new(shop());
        let actions = vec![Action::navigate(HOME), Action::click("#boom"), Action::click("#go")];

        let err = engine(page, store).run(&actions).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_zero_actions_complete() {
        let (_dir, store) = test_store();
        let snapshots = engine(Arc::new(shop()), store).run(&[]).await.unwrap();
        assert!(snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_progress_phases() {
        let (_dir, store) = test_store();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut engine = engine(Arc::new(shop()), store).with_progress(Progress::new(tx));
        engine.run(&[Action::navigate(HOME)]).await.unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.phase, Phase::Replaying);
        assert_eq!((first.step, first.total), (1, 1));
        assert_eq!(rx.try_recv().unwrap().phase, Phase::Capturing);
    }

    #[test]
    fn test_stabilize_script_embeds_timings() {
        let script = stabilize_script(250, 4000);
        assert!(script.contains("setTimeout(done, 250)"));
        assert!(script.contains("setTimeout(done, 4000)"));
    }

    #[tokio::test]
    async fn test_network_idle_timeout_is_not_fatal() {
        let (_dir, store) = test_store();
        let page = Arc::new(shop().never_idle());
        let actions = vec![Action::navigate(HOME), Action::click("#go")];

        let snapshots = engine(page.clone(), store).run(&actions).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].context.url, CART);
        assert_eq!(page.call_count("load-state"), 2);
    }

    #[tokio::test]
    async fn test_stabilize_timeout_is_not_fatal() {
        let (_dir, store) = test_store();
        let page = Arc::new(shop().with_script_stall(Duration::from_secs(30)));
        let config = ReplayConfig {
            stabilize: true,
            stabilize_quiet_ms: 10,
            stabilize_max_ms: 20,
            ..ReplayConfig::immediate()
        };
        let started = std::time::Instant::now();

        let snapshots = engine_with(page, store, config)
            .run(&[Action::navigate(HOME)])
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].context.url, HOME);
        // Bounded by the stabilization deadline, not the stalled script.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timed_out_action_is_swallowed() {
        let (_dir, store) = test_store();
        let page = Arc::new(shop().with_slow_click("#more", Duration::from_secs(30)));
        let config = ReplayConfig {
            action_timeout_ms: 50,
            ..ReplayConfig::immediate()
        };
        let actions = vec![Action::navigate(HOME), Action::click("#more"), Action::click("#go")];

        let snapshots = engine_with(page.clone(), store, config).run(&actions).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].context.url, CART);
        // Cancelled before it reached the page.
        assert_eq!(page.call_count("click #more"), 0);
        assert_eq!(page.call_count("click #go"), 1);
    }
}
