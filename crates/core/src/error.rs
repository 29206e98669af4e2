use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Browser connection lost: {0}")]
    BrowserClosed(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {operation} exceeded {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Only a lost browser handle aborts a session; everything else is recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::BrowserClosed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_carries_operation() {
        let err = Error::timeout("scan", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timeout: scan exceeded 1500ms");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_only_browser_closed_is_fatal() {
        assert!(Error::BrowserClosed("socket".into()).is_fatal());
        assert!(!Error::ElementNotFound("#a".into()).is_fatal());
        assert!(!Error::Browser("boom".into()).is_fatal());
    }
}
