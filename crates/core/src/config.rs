use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::manifest::FlowType;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// `Some("")` forces a direct connection even when a global proxy is set.
    #[serde(default)]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default)]
    pub headed: bool,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub profile_path: Option<PathBuf>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
}

fn default_engine() -> String {
    "chrome".to_string()
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headed: false,
            engine: default_engine(),
            profile_path: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayConfig {
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_navigation_delay_ms")]
    pub navigation_delay_ms: u64,
    #[serde(default = "default_click_delay_ms")]
    pub click_delay_ms: u64,
    #[serde(default = "default_input_delay_ms")]
    pub input_delay_ms: u64,
    #[serde(default = "default_default_delay_ms")]
    pub default_delay_ms: u64,
    #[serde(default = "default_network_idle_timeout_ms")]
    pub network_idle_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub stabilize: bool,
    #[serde(default = "default_stabilize_quiet_ms")]
    pub stabilize_quiet_ms: u64,
    #[serde(default = "default_stabilize_max_ms")]
    pub stabilize_max_ms: u64,
}

fn default_action_timeout_ms() -> u64 {
    10_000
}

fn default_navigation_delay_ms() -> u64 {
    2000
}

fn default_click_delay_ms() -> u64 {
    1000
}

fn default_input_delay_ms() -> u64 {
    500
}

fn default_default_delay_ms() -> u64 {
    300
}

fn default_network_idle_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_stabilize_quiet_ms() -> u64 {
    300
}

fn default_stabilize_max_ms() -> u64 {
    3000
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            navigation_delay_ms: default_navigation_delay_ms(),
            click_delay_ms: default_click_delay_ms(),
            input_delay_ms: default_input_delay_ms(),
            default_delay_ms: default_default_delay_ms(),
            network_idle_timeout_ms: default_network_idle_timeout_ms(),
            stabilize: true,
            stabilize_quiet_ms: default_stabilize_quiet_ms(),
            stabilize_max_ms: default_stabilize_max_ms(),
        }
    }
}

impl ReplayConfig {
    /// Zero delays and short waits, for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            action_timeout_ms: 1000,
            navigation_delay_ms: 0,
            click_delay_ms: 0,
            input_delay_ms: 0,
            default_delay_ms: 0,
            network_idle_timeout_ms: 100,
            stabilize: false,
            stabilize_quiet_ms: 0,
            stabilize_max_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_readiness_retries")]
    pub readiness_retries: u32,
    #[serde(default = "default_readiness_backoff_ms")]
    pub readiness_backoff_ms: u64,
    #[serde(default = "default_html_retries")]
    pub html_retries: u32,
    #[serde(default = "default_min_html_length")]
    pub min_html_length: usize,
    #[serde(default = "default_context_retries")]
    pub context_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default)]
    pub screenshots: bool,
    #[serde(default)]
    pub axe_script_path: Option<PathBuf>,
    #[serde(default = "default_axe_script_url")]
    pub axe_script_url: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_readiness_retries() -> u32 {
    5
}

fn default_readiness_backoff_ms() -> u64 {
    250
}

fn default_html_retries() -> u32 {
    3
}

fn default_min_html_length() -> usize {
    100
}

fn default_context_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    300
}

fn default_scan_timeout_ms() -> u64 {
    30_000
}

fn default_axe_script_url() -> String {
    "https://cdnjs.cloudflare.com/ajax/libs/axe-core/4.10.2/axe.min.js".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            readiness_retries: default_readiness_retries(),
            readiness_backoff_ms: default_readiness_backoff_ms(),
            html_retries: default_html_retries(),
            min_html_length: default_min_html_length(),
            context_retries: default_context_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
            screenshots: false,
            axe_script_path: None,
            axe_script_url: default_axe_script_url(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl CaptureConfig {
    /// Single attempt, no backoff.
    pub fn immediate() -> Self {
        Self {
            readiness_retries: 1,
            readiness_backoff_ms: 0,
            html_retries: 1,
            min_html_length: 50,
            context_retries: 1,
            retry_backoff_ms: 0,
            scan_timeout_ms: 1000,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticSectionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sample_every")]
    pub sample_every: usize,
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
}

fn default_sample_every() -> usize {
    5
}

fn default_max_sections() -> usize {
    20
}

impl Default for StaticSectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_every: default_sample_every(),
            max_sections: default_max_sections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Explicit provider name; inferred from `model` when absent.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_batch_token_budget")]
    pub batch_token_budget: usize,
    #[serde(default = "default_summary_char_cap")]
    pub summary_char_cap: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub static_sections: StaticSectionConfig,
    #[serde(default = "default_true")]
    pub explain_violations: bool,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_batch_token_budget() -> usize {
    8000
}

fn default_summary_char_cap() -> usize {
    4000
}

fn default_call_timeout_secs() -> u64 {
    120
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            batch_token_budget: default_batch_token_budget(),
            summary_char_cap: default_summary_char_cap(),
            call_timeout_secs: default_call_timeout_secs(),
            static_sections: StaticSectionConfig::default(),
            explain_violations: true,
        }
    }
}

/// Ordered URL pattern → flow type rule. `{target_host}` is replaced with
/// the escaped host of the session's target URL before compiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRule {
    pub pattern: String,
    pub flow_type: FlowType,
}

/// Named ARIA/DOM attribute pattern diffed between consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AriaPattern {
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesConfig {
    #[serde(default = "default_flow_rules")]
    pub flow_rules: Vec<FlowRule>,
    #[serde(default = "default_aria_patterns")]
    pub aria_patterns: Vec<AriaPattern>,
}

fn flow_rule(pattern: &str, flow_type: FlowType) -> FlowRule {
    FlowRule {
        pattern: pattern.to_string(),
        flow_type,
    }
}

pub fn default_flow_rules() -> Vec<FlowRule> {
    vec![
        flow_rule(
            r"(?i)(accounts\.google\.com|login\.microsoftonline\.com|github\.com/login|auth0\.com|okta\.com)",
            FlowType::AuthFlow,
        ),
        flow_rule(
            r"(?i)/(login|logout|signin|sign-in|signup|sign-up|register|auth|oauth2?|sso|session/new)(/|\?|#|$)",
            FlowType::AuthFlow,
        ),
        flow_rule(
            r"(?i)(/(404|500|error|errors|not-found|notfound|oops)(/|\?|#|\.html|$)|chrome-error://)",
            FlowType::ErrorFlow,
        ),
        flow_rule(r"(?i)^https?://([^/]*\.)?{target_host}(:\d+)?(/|\?|#|$)", FlowType::MainApp),
        flow_rule(r"^(about:blank|file://|https?://(localhost|127\.0\.0\.1))", FlowType::MainApp),
    ]
}

fn aria_pattern(name: &str, pattern: &str) -> AriaPattern {
    AriaPattern {
        name: name.to_string(),
        pattern: pattern.to_string(),
    }
}

pub fn default_aria_patterns() -> Vec<AriaPattern> {
    vec![
        aria_pattern("aria-expanded", r#"aria-expanded="(true|false)""#),
        aria_pattern("aria-hidden", r#"aria-hidden="(true|false)""#),
        aria_pattern("aria-selected", r#"aria-selected="(true|false)""#),
        aria_pattern("aria-checked", r#"aria-checked="(true|false|mixed)""#),
        aria_pattern("aria-pressed", r#"aria-pressed="(true|false|mixed)""#),
        aria_pattern("aria-invalid", r#"aria-invalid="(true|false|grammar|spelling)""#),
        aria_pattern("aria-busy", r#"aria-busy="(true|false)""#),
        aria_pattern("aria-live", r#"aria-live="(polite|assertive|off)""#),
        aria_pattern("aria-modal", r#"aria-modal="(true|false)""#),
        aria_pattern("role", r#"role="(dialog|alertdialog|alert|status|tooltip|menu|listbox)""#),
    ]
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            flow_rules: default_flow_rules(),
            aria_patterns: default_aria_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}
