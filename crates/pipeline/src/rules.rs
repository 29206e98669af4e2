//! Data-driven URL flow classification and ARIA attribute diffing.

use regex::Regex;
use replayscan_core::config::{AriaPattern, FlowRule};
use replayscan_core::{Error, FlowType, Result};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

const TARGET_HOST: &str = "{target_host}";

static HOST_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Host part of an absolute URL, lowercased.
pub fn extract_host(url: &str) -> Option<String> {
    // Scheme, optional userinfo, then the host up to port/path/query.
    let re = HOST_RE
        .get_or_init(|| Regex::new(r"(?i)^[a-z][a-z0-9+.-]*://(?:[^@/]*@)?([^/:?#]+)").ok())
        .as_ref()?;
    re.captures(url.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Ordered first-match-wins URL classifier. URLs matching no rule are
/// treated as external redirects.
#[derive(Debug, Clone)]
pub struct FlowClassifier {
    rules: Vec<(Regex, FlowType)>,
}

impl FlowClassifier {
    /// Compile `rules` for a session targeting `target_url`. Rules using the
    /// `{target_host}` placeholder are skipped when the target has no host.
    pub fn new(rules: &[FlowRule], target_url: &str) -> Result<Self> {
        let host = extract_host(target_url);
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let pattern = if rule.pattern.contains(TARGET_HOST) {
                match &host {
                    Some(h) => rule.pattern.replace(TARGET_HOST, &regex::escape(h)),
                    None => {
                        debug!(pattern = %rule.pattern, "No target host, skipping flow rule");
                        continue;
                    }
                }
            } else {
                rule.pattern.clone()
            };
            let re = Regex::new(&pattern)
                .map_err(|e| Error::Config(format!("invalid flow rule '{}': {}", rule.pattern, e)))?;
            compiled.push((re, rule.flow_type));
        }
        Ok(Self { rules: compiled })
    }

    pub fn classify(&self, url: &str) -> FlowType {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(url))
            .map(|(_, flow)| *flow)
            .unwrap_or(FlowType::ExternalRedirect)
    }
}

/// Counts named attribute patterns in a document and reports which ones
/// changed between two documents.
#[derive(Debug, Clone)]
pub struct AriaMatcher {
    patterns: Vec<(String, Regex)>,
}

impl AriaMatcher {
    pub fn new(patterns: &[AriaPattern]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|re| (p.name.clone(), re))
                    .map_err(|e| Error::Config(format!("invalid aria pattern '{}': {}", p.name, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Occurrences per captured value; the whole match stands in when the
    /// pattern has no capture group.
    fn tally(re: &Regex, html: &str) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for caps in re.captures_iter(html) {
            let value = caps
                .get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            *counts.entry(value).or_insert(0) += 1;
        }
        counts
    }

    fn render(counts: &BTreeMap<String, usize>) -> String {
        if counts.is_empty() {
            return "none".to_string();
        }
        counts
            .iter()
            .map(|(v, n)| format!("{}={}", v, n))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One line per pattern whose tally differs, e.g.
    /// `aria-expanded: false=1 -> true=1`. With no previous document every
    /// present pattern is reported against `none`.
    pub fn diff(&self, before: Option<&str>, after: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter_map(|(name, re)| {
                let old = before.map(|html| Self::tally(re, html)).unwrap_or_default();
                let new = Self::tally(re, after);
                (old != new).then(|| format!("{}: {} -> {}", name, Self::render(&old), Self::render(&new)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replayscan_core::config::{default_aria_patterns, default_flow_rules};

    fn classifier() -> FlowClassifier {
        FlowClassifier::new(&default_flow_rules(), "https://shop.example.com/").unwrap()
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://user:pw@Shop.Example.com:8443/a?b").as_deref(), Some("shop.example.com"));
        assert_eq!(extract_host("about:blank"), None);
        assert_eq!(extract_host("not a url"), None);
    }

    #[test]
    fn test_host_pattern_compiled_once() {
        assert_eq!(extract_host("https://a.test/x").as_deref(), Some("a.test"));
        let first = HOST_RE.get().and_then(|r| r.as_ref()).map(|r| r as *const Regex);
        assert!(first.is_some());
        assert_eq!(extract_host("http://b.test").as_deref(), Some("b.test"));
        let second = HOST_RE.get().and_then(|r| r.as_ref()).map(|r| r as *const Regex);
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_flow_rules() {
        let c = classifier();
        assert_eq!(c.classify("https://shop.example.com/products"), FlowType::MainApp);
        assert_eq!(c.classify("https://cdn.shop.example.com/"), FlowType::MainApp);
        assert_eq!(c.classify("https://shop.example.com/login?next=/"), FlowType::AuthFlow);
        assert_eq!(c.classify("https://accounts.google.com/o/oauth2"), FlowType::AuthFlow);
        assert_eq!(c.classify("https://shop.example.com/404"), FlowType::ErrorFlow);
        assert_eq!(c.classify("https://payments.other.net/checkout"), FlowType::ExternalRedirect);
        assert_eq!(c.classify("http://localhost:3000/"), FlowType::MainApp);
    }

    #[test]
    fn test_target_host_is_escaped() {
        let c = classifier();
        // The dot in the host must not match arbitrary characters.
        assert_eq!(c.classify("https://shopXexample.com/"), FlowType::ExternalRedirect);
    }

    #[test]
    fn test_first_rule_wins_and_hostless_target() {
        let rules = vec![
            FlowRule {
                pattern: "{target_host}".to_string(),
                flow_type: FlowType::MainApp,
            },
            FlowRule {
                pattern: "/oops".to_string(),
                flow_type: FlowType::ErrorFlow,
            },
            FlowRule {
                pattern: "oops".to_string(),
                flow_type: FlowType::AuthFlow,
            },
        ];
        let c = FlowClassifier::new(&rules, "about:blank").unwrap();
        assert_eq!(c.classify("https://a.test/oops"), FlowType::ErrorFlow);
    }

    #[test]
    fn test_invalid_rule_is_config_error() {
        let rules = vec![FlowRule {
            pattern: "(".to_string(),
            flow_type: FlowType::MainApp,
        }];
        assert!(matches!(FlowClassifier::new(&rules, "https://a.test/"), Err(Error::Config(_))));
    }

    #[test]
    fn test_aria_diff() {
        let m = AriaMatcher::new(&default_aria_patterns()).unwrap();
        let before = r#"<button aria-expanded="false">Menu</button>"#;
        let after = r#"<button aria-expanded="true">Menu</button><div role="dialog" aria-modal="true"></div>"#;

        let changes = m.diff(Some(before), after);
        assert!(changes.contains(&"aria-expanded: false=1 -> true=1".to_string()));
        assert!(changes.contains(&"role: none -> dialog=1".to_string()));
        assert!(changes.contains(&"aria-modal: none -> true=1".to_string()));
        assert!(m.diff(Some(after), after).is_empty());
    }

    #[test]
    fn test_aria_diff_first_snapshot() {
        let m = AriaMatcher::new(&default_aria_patterns()).unwrap();
        let changes = m.diff(None, r#"<div aria-live="polite"></div>"#);
        assert_eq!(changes, vec!["aria-live: none -> polite=1".to_string()]);
    }
}
