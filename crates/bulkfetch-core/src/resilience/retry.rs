//! Retry loop: run an async operation until success or the policy says stop.

use std::future::Future;

use super::classify::classify;
use super::error::FetchError;
use super::pause::PauseGate;
use super::policy::{RetryDecision, RetryPolicy};

/// Rate-limit signals get exactly one pool-pause-then-retry pass; a service
/// that throttles again on the very next attempt fails the call.
const RATE_LIMIT_PASSES: u32 = 1;

/// Runs `op` until it succeeds or the retry policy gives up.
///
/// Backoff sleeps are true suspensions. A rate-limit error does not back off
/// per call: it pauses the shared gate so the whole pool stops starting work,
/// waits the cooldown out, then retries this call once. New attempts never
/// start while the gate is paused, even when this call was not the one that
/// tripped it.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    gate: &PauseGate,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    let mut rate_limit_passes = 0u32;
    loop {
        gate.wait_until_clear().await;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(delay) => {
                        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after backoff");
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::PauseAndRetry(hint) => {
                        if rate_limit_passes >= RATE_LIMIT_PASSES {
                            return Err(e);
                        }
                        rate_limit_passes += 1;
                        gate.pause_for(hint);
                    }
                }
                attempt += 1;
            }
        }
    }
}
