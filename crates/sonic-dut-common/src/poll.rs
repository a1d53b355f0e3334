//! Bounded convergence polling.
//!
//! A predicate is evaluated immediately and then once per interval until it
//! reports convergence or the timeout elapses. The sleep between attempts is
//! the only suspension point. Errors returned by the predicate propagate at
//! once; a caller that wants to retry through transient failures must turn
//! them into "not converged yet" inside the predicate.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of one bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergencePollResult {
    /// True if the predicate converged before the timeout.
    pub converged: bool,
    /// Wall-clock time spent polling.
    pub elapsed: Duration,
    /// Number of predicate evaluations.
    pub attempts: u32,
    /// Identifiers still mismatched at the last evaluation.
    pub last_mismatch: BTreeSet<String>,
}

/// Polls `check` until it reports an empty mismatch set.
///
/// `check` returns the identifiers that have not yet reached the target
/// state; an empty set means converged.
pub async fn poll_convergence<F, Fut, E>(
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<ConvergencePollResult, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<BTreeSet<String>, E>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut elapsed = Duration::ZERO;
    let mut last_mismatch = BTreeSet::new();

    while elapsed < timeout {
        attempts += 1;
        last_mismatch = check().await?;
        if last_mismatch.is_empty() {
            let elapsed = start.elapsed();
            debug!(attempts, ?elapsed, "Converged");
            return Ok(ConvergencePollResult {
                converged: true,
                elapsed,
                attempts,
                last_mismatch,
            });
        }
        debug!(attempts, remaining = last_mismatch.len(), "Not converged yet");
        tokio::time::sleep(interval).await;
        elapsed = start.elapsed();
    }

    warn!(
        attempts,
        ?timeout,
        mismatched = ?last_mismatch,
        "Poll timed out before convergence"
    );
    Ok(ConvergencePollResult {
        converged: false,
        elapsed,
        attempts,
        last_mismatch,
    })
}

/// Polls a boolean predicate; returns `Ok(true)` on the first true result
/// and `Ok(false)` once `timeout` is exhausted.
pub async fn wait_until<F, Fut, E>(
    timeout: Duration,
    interval: Duration,
    mut predicate: F,
) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let result = poll_convergence(timeout, interval, || {
        let fut = predicate();
        async move {
            let mut pending = BTreeSet::new();
            if !fut.await? {
                pending.insert("predicate".to_string());
            }
            Ok::<_, E>(pending)
        }
    })
    .await?;
    Ok(result.converged)
}
