use replayscan_browser::{launch_browser, AccessibilityScanner, AxeScanner, BrowserPage, CdpPage};
use replayscan_core::{Action, Config, Paths};
use replayscan_pipeline::{Pipeline, Progress, ProgressEvent, SessionOptions, SessionResult};
use replayscan_providers::create_provider;
use replayscan_storage::SessionStore;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct RunArgs {
    pub actions: PathBuf,
    pub url: Option<String>,
    pub config: Option<PathBuf>,
    pub session: Option<String>,
    pub headed: bool,
    pub screenshots: bool,
    pub static_sections: bool,
    pub no_analysis: bool,
    pub output: Option<PathBuf>,
}

/// A recording is either a bare action list or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum Recording {
    List(Vec<Action>),
    Wrapped { actions: Vec<Action> },
}

/// Read a recording and renumber positions by list order.
pub fn load_actions(path: &Path) -> anyhow::Result<Vec<Action>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let recording: Recording = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid action recording {}: {}", path.display(), e))?;
    let mut actions = match recording {
        Recording::List(actions) | Recording::Wrapped { actions } => actions,
    };
    for (i, action) in actions.iter_mut().enumerate() {
        action.position = i;
    }
    Ok(actions)
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if args.headed {
        config.browser.headed = true;
    }
    if args.screenshots {
        config.capture.screenshots = true;
    }
    if args.static_sections {
        config.analysis.static_sections.enabled = true;
    }
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&paths)?,
    };
    apply_overrides(&mut config, &args);

    let actions = load_actions(&args.actions)?;
    if actions.is_empty() {
        warn!(file = %args.actions.display(), "Recording has no actions");
    }
    paths.ensure_dirs()?;

    let provider = if args.no_analysis {
        None
    } else {
        match create_provider(&config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!(error = %e, "Text analysis disabled");
                None
            }
        }
    };

    let mut browser = launch_browser(&config.browser, &paths).await?;
    let page: Arc<dyn BrowserPage> = Arc::new(CdpPage::new(browser.cdp.clone()));
    let scanner: Arc<dyn AccessibilityScanner> = Arc::new(AxeScanner::from_config(&config.capture));

    let mut pipeline = Pipeline::new(config, SessionStore::new(paths.clone()), page, scanner);
    if let Some(provider) = provider {
        pipeline = pipeline.with_provider(Arc::from(provider));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx));

    let options = SessionOptions {
        target_url: args.url.clone(),
        session_id: args.session.clone(),
    };
    let result = pipeline.run_session(&actions, options, Progress::new(tx)).await;

    // The sender went away with run_session, so the printer drains and exits.
    let _ = printer.await;
    browser.close().await;

    print_summary(&result, &paths);

    if let Some(output) = &args.output {
        std::fs::write(output, serde_json::to_string_pretty(&result)?)?;
        info!(path = %output.display(), "Session result written");
    }

    if !result.success {
        anyhow::bail!(
            "Session {} failed: {}",
            result.session_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        if event.total > 0 {
            eprintln!("[{:<10}] {}/{} {}", event.phase.as_str(), event.step, event.total, event.message);
        } else {
            eprintln!("[{:<10}] {}", event.phase.as_str(), event.message);
        }
    }
}

fn print_summary(result: &SessionResult, paths: &Paths) {
    println!();
    println!("Session:    {}", result.session_id);
    println!(
        "Status:     {}",
        if result.success { "✓ completed" } else { "✗ failed" }
    );
    if let Some(error) = &result.error {
        println!("Error:      {}", error);
    }
    println!("Snapshots:  {}", result.snapshots.len());
    println!("Artifacts:  {}", paths.session_dir(&result.session_id).display());

    if let Some(manifest) = &result.manifest {
        let stats = &manifest.flow_statistics;
        let opt = &manifest.llm_optimization;
        println!(
            "Flows:      main_app={} auth={} error={} external={}",
            stats.main_app, stats.auth_flow, stats.error_flow, stats.external_redirect
        );
        println!(
            "Tokens:     {} of {} sent ({} steps excluded)",
            opt.included_tokens, opt.total_tokens, opt.excluded_steps
        );
    }

    if let Some(analysis) = &result.analysis {
        println!();
        match analysis.score {
            Some(score) => println!("Score:      {:.0}/100", score),
            None => println!("Score:      n/a"),
        }
        println!(
            "Batches:    {}/{} analysed",
            analysis.batches_succeeded, analysis.batches_total
        );
        if !analysis.summary.is_empty() {
            println!("Summary:    {}", analysis.summary);
        }
        for issue in &analysis.critical_issues {
            println!("  ! {}", issue);
        }
        println!("Components: {}", analysis.components.len());
    }

    println!();
    println!("Violations: {}", result.violations.len());
    for v in &result.violations {
        let impact = v.impact.map(|i| i.as_str()).unwrap_or("unknown");
        println!(
            "  [{:<8}] {} (first at step {}, {} occurrence(s))",
            impact,
            v.rule_id,
            v.first_step,
            v.step_occurrences.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replayscan_core::ActionKind;

    fn args(actions: PathBuf) -> RunArgs {
        RunArgs {
            actions,
            url: None,
            config: None,
            session: None,
            headed: true,
            screenshots: true,
            static_sections: false,
            no_analysis: false,
            output: None,
        }
    }

    #[test]
    fn test_load_bare_and_wrapped_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.json");
        std::fs::write(
            &bare,
            r##"[{"type": "navigate", "url": "https://shop.example/"}, {"type": "click", "selector": "#buy", "position": 7}]"##,
        )
        .unwrap();
        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(
            &wrapped,
            r##"{"name": "checkout", "actions": [{"type": "fill", "selector": "#q", "value": "shoes"}]}"##,
        )
        .unwrap();

        let actions = load_actions(&bare).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].kind, ActionKind::Click);
        assert_eq!(actions[1].position, 1);

        let actions = load_actions(&wrapped).unwrap();
        assert_eq!(actions[0].value.as_deref(), Some("shoes"));
    }

    #[test]
    fn test_invalid_recording_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"[{"type": "teleport"}]"#).unwrap();
        assert!(load_actions(&path).is_err());
        assert!(load_actions(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        apply_overrides(&mut config, &args(PathBuf::from("a.json")));
        assert!(config.browser.headed);
        assert!(config.capture.screenshots);
        assert!(!config.analysis.static_sections.enabled);
    }
}
