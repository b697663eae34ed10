//! Per-operation circuit breakers.
//!
//! One breaker per operation key ("locate", "fetch"), each with its own mutex
//! domain so unrelated operations never contend. The registry is an explicit
//! object owned by the engine and passed by reference; there is no ambient
//! global state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::error::FetchError;

/// Breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are rejected without touching the network until the cooldown
    /// elapses.
    Open,
    /// A limited number of probe calls are allowed through.
    HalfOpen,
}

/// Tuning knobs for every breaker in a registry.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Consecutive failures in Closed that trip the circuit.
    pub threshold: u32,
    /// How long Open rejects calls before allowing probes.
    pub cooldown: Duration,
    /// Consecutive probe successes in HalfOpen that close the circuit.
    pub half_open_success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for one operation key. Long-lived and shared across many
/// task executions; all mutation happens under its own mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                probes_in_flight: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Gate a call. `Err(CircuitOpen)` means the call must not touch the
    /// network. On `Ok(())` the caller is obliged to report the outcome via
    /// `record_success` or `record_failure`.
    pub fn preflight(&self) -> Result<(), FetchError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.settings.cooldown {
                    tracing::info!(breaker = %self.name, "cooldown elapsed, allowing probes");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.probes_in_flight = 1;
                    Ok(())
                } else {
                    Err(self.rejection())
                }
            }
            CircuitState::HalfOpen => {
                // Probe budget: at most as many concurrent probes as successes
                // still needed to close.
                let budget = self
                    .settings
                    .half_open_success_threshold
                    .saturating_sub(inner.half_open_successes);
                if inner.probes_in_flight < budget.max(1) {
                    inner.probes_in_flight += 1;
                    Ok(())
                } else {
                    Err(self.rejection())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.settings.half_open_success_threshold {
                    tracing::info!(breaker = %self.name, "circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.probes_in_flight = 0;
                    inner.opened_at = None;
                }
            }
            // A success racing the open transition; the cooldown clock stands.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit open"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens and restarts the cooldown clock.
                tracing::warn!(breaker = %self.name, "probe failed, circuit reopened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                inner.probes_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn rejection(&self) -> FetchError {
        FetchError::CircuitOpen {
            operation: self.name.clone(),
        }
    }
}

/// Explicit registry of breakers, one per operation key. Lives as long as the
/// engine so breaker state spans runs (including resubmission passes).
#[derive(Debug)]
pub struct BreakerRegistry {
    settings: BreakerSettings,
    entries: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for an operation key, created on first use.
    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        if let Some(found) = self.entries.read().unwrap().get(operation) {
            return Arc::clone(found);
        }
        let mut entries = self.entries.write().unwrap();
        Arc::clone(
            entries
                .entry(operation.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(operation, self.settings))),
        )
    }
}

/// Runs `op` guarded by `breaker`: preflight first (an open circuit rejects
/// without any network attempt), then report the terminal outcome. The entire
/// retried operation counts as one call against the breaker.
pub async fn with_breaker<T, F, Fut>(breaker: &CircuitBreaker, op: F) -> Result<T, FetchError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    breaker.preflight()?;
    match op().await {
        Ok(v) => {
            breaker.record_success();
            Ok(v)
        }
        Err(e) => {
            breaker.record_failure();
            Err(e)
        }
    }
}
