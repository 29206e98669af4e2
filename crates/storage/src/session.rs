use replayscan_core::{
    Error, Paths, Result, ScanContext, ScanResults, SessionManifest, SnapshotFiles,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HTML_FILE: &str = "page.html";
pub const CONTEXT_FILE: &str = "context.json";
pub const RESULTS_FILE: &str = "results.json";
pub const SCREENSHOT_FILE: &str = "screenshot.png";
pub const REPORT_FILE: &str = "report.json";

/// On-disk layout for replay sessions:
///
/// ```text
/// sessions/<id>/manifest.json
/// sessions/<id>/report.json
/// sessions/<id>/step_NNN/{page.html, context.json, results.json, screenshot.png}
/// ```
#[derive(Debug, Clone)]
pub struct SessionStore {
    paths: Paths,
}

/// `session_<utc timestamp>_<8 hex>`; sortable by creation time.
pub fn new_session_id() -> String {
    let now = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", now, &suffix[..8])
}

impl SessionStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.paths.session_dir(session_id)
    }

    pub async fn create_session(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(session_id, dir = %dir.display(), "Session directory ready");
        Ok(dir)
    }

    /// Persist the HTML, scan context and scan results of one captured step.
    pub async fn write_step_artifacts(
        &self,
        session_id: &str,
        step_number: u32,
        html: &str,
        context: &ScanContext,
        results: &ScanResults,
    ) -> Result<SnapshotFiles> {
        let files = self.step_files(session_id, step_number);
        tokio::fs::create_dir_all(self.paths.step_dir(session_id, step_number)).await?;
        tokio::fs::write(&files.html, html).await?;
        write_json(&files.context, context).await?;
        write_json(&files.results, results).await?;
        Ok(files)
    }

    /// Artifact paths for a step, whether or not they have been written yet.
    pub fn step_files(&self, session_id: &str, step_number: u32) -> SnapshotFiles {
        let dir = self.paths.step_dir(session_id, step_number);
        SnapshotFiles {
            html: dir.join(HTML_FILE),
            context: dir.join(CONTEXT_FILE),
            results: dir.join(RESULTS_FILE),
            screenshot: None,
        }
    }

    pub fn screenshot_path(&self, session_id: &str, step_number: u32) -> PathBuf {
        self.paths
            .step_dir(session_id, step_number)
            .join(SCREENSHOT_FILE)
    }

    pub async fn save_manifest(&self, manifest: &SessionManifest) -> Result<PathBuf> {
        let path = self.paths.manifest_file(&manifest.session_id);
        write_json(&path, manifest).await?;
        debug!(session_id = %manifest.session_id, steps = manifest.steps.len(), "Manifest saved");
        Ok(path)
    }

    pub async fn load_manifest(&self, session_id: &str) -> Result<SessionManifest> {
        let path = self.paths.manifest_file(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("manifest for session {}", session_id)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the final session report next to the manifest.
    pub async fn save_report<T: Serialize + Sync>(&self, session_id: &str, report: &T) -> Result<PathBuf> {
        let path = self.session_dir(session_id).join(REPORT_FILE);
        write_json(&path, report).await?;
        Ok(path)
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| Error::Storage(format!("failed to write {}: {}", path.display(), e)))
}
