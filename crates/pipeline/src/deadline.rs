use replayscan_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Await `fut` for at most `limit`. Losing the race yields
/// `Error::Timeout` naming `operation`; the future is dropped.
pub async fn within<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}
