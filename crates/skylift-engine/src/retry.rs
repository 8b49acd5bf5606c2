//! Bounded exponential-backoff retry for remote calls.

use std::future::Future;

use tracing::{error, warn};

use crate::config::RetryPolicy;
use crate::error::{EngineError, EngineResult};

/// Run `operation` with bounded exponential-backoff retry.
///
/// The operation is attempted up to `policy.attempts()` times. Fatal errors
/// (see [`EngineError::is_fatal`]) are surfaced immediately without further
/// attempts; authorization denials and "already exists" conflicts land here,
/// since retrying those only reproduces the same answer. The delay before
/// retry *n* is `base * 2^(n-1)`; there is no sleep after the final attempt.
///
/// On exhaustion, returns a composite error carrying the operation label,
/// the attempt count and the last underlying error message.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let attempts = policy.attempts();
    let mut last_error: Option<EngineError> = None;

    for attempt in 1..=attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                if attempt < attempts {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        operation = %label,
                        attempt,
                        max_attempts = attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    let last = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no error recorded".to_owned());

    error!(
        operation = %label,
        attempts,
        last_error = %last,
        "operation failed after exhausting all attempts"
    );

    Err(EngineError::RetriesExhausted {
        operation: label.to_owned(),
        attempts,
        last_error: last,
    })
}
