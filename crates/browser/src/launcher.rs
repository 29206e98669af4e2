//! Browser process launch and page-target discovery.

use super::cdp::CdpClient;
use replayscan_core::config::BrowserConfig;
use replayscan_core::{Error, Paths, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BrowserEngine {
    Chrome,
    Edge,
}

impl BrowserEngine {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "edge" | "msedge" => Self::Edge,
            _ => Self::Chrome,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
        }
    }
}

/// A launched browser with a CDP connection to its first page target.
pub struct BrowserSession {
    pub engine: BrowserEngine,
    pub debug_port: u16,
    pub user_data_dir: PathBuf,
    pub cdp: Arc<CdpClient>,
    process: Child,
}

impl BrowserSession {
    pub async fn close(&mut self) {
        if let Err(e) = self.cdp.close_browser().await {
            debug!(error = %e, "Browser.close failed (may already be closed)");
        }
        let _ = self.process.kill().await;
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let _ = self.process.start_kill();
    }
}

pub async fn launch_browser(config: &BrowserConfig, paths: &Paths) -> Result<BrowserSession> {
    let engine = BrowserEngine::parse(&config.engine);
    let browser_path = find_browser_binary(engine)
        .ok_or_else(|| Error::Browser(format!("{} not found. Please install it.", engine.name())))?;

    let user_data_dir = match &config.profile_path {
        Some(profile) => profile.clone(),
        None => paths
            .browser_profiles_dir()
            .join(format!("replay-{}", std::process::id())),
    };
    std::fs::create_dir_all(&user_data_dir)?;

    let debug_port = find_free_port().await?;
    let args = build_browser_args(debug_port, &user_data_dir, config);

    info!(
        port = debug_port,
        headed = config.headed,
        browser = engine.name(),
        "Launching browser"
    );

    let process = Command::new(&browser_path)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Browser(format!("Failed to launch {}: {}", engine.name(), e)))?;

    wait_for_cdp_ready(debug_port, Duration::from_secs(15)).await?;
    let page_ws_url = get_page_ws_url(debug_port).await?;
    let cdp = CdpClient::connect(&page_ws_url).await?;

    for domain in ["Page", "Runtime", "DOM", "Network"] {
        cdp.enable_domain(domain).await?;
    }
    cdp.set_viewport(config.window_width, config.window_height)
        .await
        .ok();

    info!(ws_url = %page_ws_url, "CDP connection established (page target)");

    Ok(BrowserSession {
        engine,
        debug_port,
        user_data_dir,
        cdp: Arc::new(cdp),
        process,
    })
}

fn build_browser_args(debug_port: u16, user_data_dir: &Path, config: &BrowserConfig) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--password-store=basic".to_string(),
    ];
    if !config.headed {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--window-size={},{}",
        config.window_width, config.window_height
    ));
    args.push("about:blank".to_string());
    args
}

pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates: Vec<&str> = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                ]
            } else if cfg!(target_os = "linux") {
                vec![
                    "google-chrome",
                    "google-chrome-stable",
                    "chromium",
                    "chromium-browser",
                    "/usr/bin/google-chrome",
                    "/usr/bin/chromium",
                ]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable"]
            } else {
                vec![r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe"]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the DevTools endpoint answers.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> Result<String> {
    let start = std::time::Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::timeout(format!("cdp ready on port {}", port), timeout));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// The first "page" target's WebSocket URL from `/json/list`.
async fn get_page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };
        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(Error::Browser("No page target found after retries".to_string()))
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}
