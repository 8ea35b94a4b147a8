//! Bounded linear retry for network calls.
//!
//! A failed call is repeated immediately, with no backoff, until it
//! succeeds or the retry budget is spent; the last error is returned.

use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// Default number of retries after the first failed call.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Run `call` until it succeeds, at most `max_retries + 1` times.
///
/// # Errors
///
/// Returns the error of the final attempt once the budget is exhausted.
pub async fn with_retries<T, E, F, Fut>(
    operation: &str,
    max_retries: u32,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                warn!(
                    operation,
                    attempt,
                    max_retries,
                    error = %e,
                    "Call failed, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}
