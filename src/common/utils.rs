//! Utility functions for the master

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Maximum length of a namespace path
const MAX_PATH_LEN: usize = 4096;

/// Convert a monotonic deadline into a wall-clock timestamp for the wire
pub fn instant_to_utc(deadline: Instant) -> DateTime<Utc> {
    let now = Instant::now();
    let wall = Utc::now();
    if deadline >= now {
        wall + chrono::Duration::from_std(deadline - now).unwrap_or(chrono::Duration::zero())
    } else {
        wall - chrono::Duration::from_std(now - deadline).unwrap_or(chrono::Duration::zero())
    }
}

/// Split an absolute path into its components.
///
/// `/` yields no components. Empty components (`//`), `.` and `..` are rejected.
pub fn split_path(path: &str) -> crate::Result<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(crate::Error::InvalidRequest(format!(
            "path must be absolute: {}",
            path
        )));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(crate::Error::InvalidRequest("path too long".into()));
    }
    if path == "/" {
        return Ok(Vec::new());
    }

    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let mut parts = Vec::new();
    for part in trimmed[1..].split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(crate::Error::InvalidRequest(format!("invalid path: {}", path)));
        }
        if part.chars().any(|c| c.is_control()) {
            return Err(crate::Error::InvalidRequest(
                "path contains invalid characters".into(),
            ));
        }
        parts.push(part);
    }
    Ok(parts)
}

/// Retry with exponential backoff, giving each attempt `attempt_timeout`.
///
/// A timed out attempt counts as a downstream failure of `node`.
pub async fn retry_with_backoff<F, Fut, T>(
    node: &str,
    mut f: F,
    max_attempts: usize,
    attempt_timeout: Duration,
    initial_delay: Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;
    let max_attempts = max_attempts.max(1);

    for attempt in 0..max_attempts {
        let res = match tokio::time::timeout(attempt_timeout, f()).await {
            Ok(res) => res,
            Err(_) => Err(crate::Error::downstream(
                node,
                format!("timed out after {:?}", attempt_timeout),
            )),
        };
        match res {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                tracing::warn!(
                    "Retry attempt {} against {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    node,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}
