use replayscan_browser::launcher::find_browser_binary;
use replayscan_browser::BrowserEngine;
use replayscan_core::{Config, Paths};
use replayscan_providers::create_provider;
use std::path::PathBuf;

pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config_path = config_path.unwrap_or_else(|| paths.config_file());

    println!("replayscan status");
    println!("=================");
    println!();

    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (using defaults)" }
    );
    let config = if config_exists {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    let sessions_dir = paths.sessions_dir();
    let sessions = std::fs::read_dir(&sessions_dir)
        .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count())
        .unwrap_or(0);
    println!("Sessions:  {} ({} stored)", sessions_dir.display(), sessions);

    let engine = BrowserEngine::parse(&config.browser.engine);
    match find_browser_binary(engine) {
        Some(path) => println!("Browser:   {} ✓ {}", engine.name(), path),
        None => println!("Browser:   {} ✗ (not found)", engine.name()),
    }

    println!("Model:     {}", config.analysis.model);
    match create_provider(&config) {
        Ok(_) => println!(
            "Provider:  ✓ {}",
            config.analysis.provider.as_deref().unwrap_or("inferred")
        ),
        Err(e) => println!("Provider:  ✗ {}", e),
    }
    println!(
        "Analysis:  budget {} tokens/batch, static sections {}",
        config.analysis.batch_token_budget,
        if config.analysis.static_sections.enabled { "on" } else { "off" }
    );
    Ok(())
}
