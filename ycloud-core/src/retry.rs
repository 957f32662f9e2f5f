//! Bounded retry helpers
//!
//! Used where the platform is known to answer spuriously for a short while,
//! e.g. S3 reporting `AccessDenied` for a bucket created a moment ago.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// Retry `f` while it fails with one of `codes` and `budget` has not elapsed
///
/// Codes are matched against the service code first and the API code name
/// second, so both `NoSuchBucket` and `NotFound` work. The last error is
/// returned when the budget runs out or `cancel` fires.
pub async fn retry_on_codes<T, F, Fut>(
    codes: &[&str],
    budget: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let deadline = Instant::now() + budget;

    loop {
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let retryable = codes.iter().any(|code| {
            err.has_service_code(code) || (err.service_code.is_none() && err.code.as_str() == *code)
        });
        if !retryable || Instant::now() + interval > deadline {
            return Err(err);
        }

        debug!("retrying after {}", err);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(err),
            _ = sleep(interval) => {}
        }
    }
}

/// Run `f` up to `attempts` times, sleeping `interval` between failures
pub async fn retry_attempts<T, E, F, Fut>(
    label: &str,
    attempts: u32,
    interval: Duration,
    mut f: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {}", label, attempt, attempts, err);
                attempt += 1;
                sleep(interval).await;
            }
            Err(err) => return Err(err),
        }
    }
}
