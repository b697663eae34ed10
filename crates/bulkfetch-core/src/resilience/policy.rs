//! Exponential backoff policy with jitter.

use std::time::Duration;

use rand::Rng;

use super::classify::ErrorKind;

/// Decision returned by the retry policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given (already jittered) delay.
    RetryAfter(Duration),
    /// Pause the whole pool (rate limit), then retry this call once the gate
    /// clears. The optional duration is the service's Retry-After hint.
    PauseAndRetry(Option<Duration>),
}

/// Exponential backoff with a multiplier, a cap, and uniform jitter.
///
/// Attempts are 0-indexed: attempt k may retry while `k + 1 < max_retries`,
/// so `max_retries` bounds the total number of attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts allowed (including the first).
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay for attempt `k`: `min(base * multiplier^k, max)`.
    pub fn pre_jitter_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(16) as i32);
        let raw = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    /// Actual sleep: drawn uniformly from [0.5x, 1.0x] of the pre-jitter
    /// delay, so retrying workers spread out instead of thundering together.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let full = self.pre_jitter_delay(attempt).as_secs_f64();
        let scaled = rand::thread_rng().gen_range(0.5..=1.0) * full;
        Duration::from_secs_f64(scaled)
    }

    /// Decide what to do after attempt `attempt` (0-indexed) failed with `kind`.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt + 1 >= self.max_retries {
            return RetryDecision::NoRetry;
        }
        match kind {
            ErrorKind::Fatal | ErrorKind::NotFound => RetryDecision::NoRetry,
            ErrorKind::RateLimited(hint) => RetryDecision::PauseAndRetry(hint),
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Http5xx(_) => {
                RetryDecision::RetryAfter(self.jittered_delay(attempt))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn pre_jitter_follows_formula() {
        let p = policy();
        assert_eq!(p.pre_jitter_delay(0), Duration::from_millis(500));
        assert_eq!(p.pre_jitter_delay(1), Duration::from_millis(1000));
        assert_eq!(p.pre_jitter_delay(2), Duration::from_millis(2000));
        assert_eq!(p.pre_jitter_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn pre_jitter_caps_at_max_delay() {
        let p = policy();
        // 0.5 * 2^10 = 512s, well past the 30s cap.
        assert_eq!(p.pre_jitter_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let p = policy();
        for attempt in 0..4 {
            let full = p.pre_jitter_delay(attempt);
            for _ in 0..50 {
                let d = p.jittered_delay(attempt);
                assert!(d <= full, "jittered {:?} above {:?}", d, full);
                assert!(
                    d.as_secs_f64() >= full.as_secs_f64() * 0.5 - 1e-9,
                    "jittered {:?} below half of {:?}",
                    d,
                    full
                );
            }
        }
    }

    #[test]
    fn not_found_never_retried() {
        let p = policy();
        assert_eq!(p.decide(0, ErrorKind::NotFound), RetryDecision::NoRetry);
    }

    #[test]
    fn rate_limit_pauses_instead_of_backing_off() {
        let p = policy();
        let hint = Some(Duration::from_secs(12));
        assert_eq!(
            p.decide(0, ErrorKind::RateLimited(hint)),
            RetryDecision::PauseAndRetry(hint)
        );
    }

    #[test]
    fn respects_max_retries() {
        let p = policy();
        assert!(matches!(
            p.decide(3, ErrorKind::Timeout),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(4, ErrorKind::Timeout), RetryDecision::NoRetry);
    }
}
