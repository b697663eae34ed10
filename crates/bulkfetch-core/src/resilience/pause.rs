//! Pool-wide rate-limit pause gate.
//!
//! When any call receives an explicit throttling signal, the whole pool stops
//! starting new work until the service-provided cooldown (or the configured
//! default) has elapsed. In-flight operations are left to finish naturally.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Shared pause gate. Cheap to check; waiting is a true async suspension.
#[derive(Debug)]
pub struct PauseGate {
    default_cooldown: Duration,
    resume_at: Mutex<Option<Instant>>,
}

impl PauseGate {
    pub fn new(default_cooldown: Duration) -> Self {
        Self {
            default_cooldown,
            resume_at: Mutex::new(None),
        }
    }

    /// Pause the pool for `hint`, or the default cooldown when the service
    /// sent no Retry-After. An existing later deadline is kept.
    pub fn pause_for(&self, hint: Option<Duration>) {
        let cooldown = hint.unwrap_or(self.default_cooldown);
        let until = Instant::now() + cooldown;
        let mut resume_at = self.resume_at.lock().unwrap();
        let extended = match *resume_at {
            Some(existing) => existing.max(until),
            None => until,
        };
        tracing::warn!(cooldown_secs = cooldown.as_secs_f64(), "rate limited: pausing pool");
        *resume_at = Some(extended);
    }

    /// True while the cooldown deadline lies in the future.
    pub fn is_paused(&self) -> bool {
        self.deadline().is_some()
    }

    /// Suspend until the gate is clear. Returns immediately when not paused.
    pub async fn wait_until_clear(&self) {
        // Re-check after each sleep: another throttle may have extended the deadline.
        while let Some(deadline) = self.deadline() {
            tokio::time::sleep_until(deadline).await;
        }
    }

    fn deadline(&self) -> Option<Instant> {
        let mut resume_at = self.resume_at.lock().unwrap();
        match *resume_at {
            Some(deadline) if deadline > Instant::now() => Some(deadline),
            Some(_) => {
                *resume_at = None;
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clear_gate_does_not_wait() {
        let gate = PauseGate::new(Duration::from_secs(30));
        assert!(!gate.is_paused());
        let start = std::time::Instant::now();
        gate.wait_until_clear().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn pause_uses_hint_and_clears_after_deadline() {
        let gate = PauseGate::new(Duration::from_secs(30));
        gate.pause_for(Some(Duration::from_millis(50)));
        assert!(gate.is_paused());
        gate.wait_until_clear().await;
        assert!(!gate.is_paused());
    }

    #[tokio::test]
    async fn later_deadline_wins() {
        let gate = PauseGate::new(Duration::from_secs(30));
        gate.pause_for(Some(Duration::from_millis(80)));
        gate.pause_for(Some(Duration::from_millis(10)));
        let start = std::time::Instant::now();
        gate.wait_until_clear().await;
        assert!(start.elapsed() >= Duration::from_millis(70));
    }
}
