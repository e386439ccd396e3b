//! Circuit breaker with rolling-window failure accounting.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls execute normally.
    Closed,
    /// Calls are short-circuited straight to their fallback.
    Open,
    /// The sleep window has passed; one trial call is let through.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Time window outcomes are counted over.
    pub rolling_window: Duration,
    /// Minimum number of calls in the window before the circuit may open.
    pub request_volume_threshold: u32,
    /// Failure percentage at or above which the circuit opens.
    pub error_threshold_percentage: u8,
    /// Time to wait after opening before letting a trial call through.
    pub sleep_window: Duration,
    /// Reject every call regardless of health.
    pub force_open: bool,
    /// Allow every call regardless of health. Outcomes are still counted.
    pub force_closed: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            rolling_window: Duration::from_secs(10),
            request_volume_threshold: 20,
            error_threshold_percentage: 50,
            sleep_window: Duration::from_secs(5),
            force_open: false,
            force_closed: false,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the rolling window.
    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    /// Set the request volume threshold.
    pub fn with_request_volume_threshold(mut self, threshold: u32) -> Self {
        self.request_volume_threshold = threshold;
        self
    }

    /// Set the error threshold percentage.
    pub fn with_error_threshold_percentage(mut self, percentage: u8) -> Self {
        self.error_threshold_percentage = percentage.min(100);
        self
    }

    /// Set the sleep window.
    pub fn with_sleep_window(mut self, window: Duration) -> Self {
        self.sleep_window = window;
        self
    }

    /// Force the circuit open.
    pub fn with_force_open(mut self, force_open: bool) -> Self {
        self.force_open = force_open;
        self
    }

    /// Force the circuit closed.
    pub fn with_force_closed(mut self, force_closed: bool) -> Self {
        self.force_closed = force_closed;
        self
    }
}

#[derive(Debug)]
struct Health {
    state: CircuitState,
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
}

impl Health {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(&(at, _)) = self.outcomes.front() {
            if now.duration_since(at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn counts(&self) -> (u32, u32) {
        let total = self.outcomes.len() as u32;
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count() as u32;
        (total, failures)
    }
}

/// Circuit breaker implementation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    health: Mutex<Health>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            health: Mutex::new(Health {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                trial_started: None,
            }),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        if self.config.force_open {
            return CircuitState::Open;
        }
        if self.config.force_closed {
            return CircuitState::Closed;
        }
        let health = self.health.lock();
        match health.state {
            CircuitState::Open if self.sleep_elapsed(&health) => CircuitState::HalfOpen,
            state => state,
        }
    }

    fn sleep_elapsed(&self, health: &Health) -> bool {
        health
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.config.sleep_window)
    }

    /// Check if a call is allowed.
    ///
    /// A half-open circuit admits one trial at a time. A trial that has not
    /// reported back within the sleep window is presumed lost and another one
    /// is admitted.
    pub fn allow_request(&self) -> bool {
        if self.config.force_open {
            return false;
        }
        if self.config.force_closed {
            return true;
        }

        let mut health = self.health.lock();
        match health.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.sleep_elapsed(&health) {
                    debug!(command_key = %self.name, "Circuit breaker transitioning to half-open");
                    health.state = CircuitState::HalfOpen;
                    health.trial_started = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match health.trial_started {
                Some(started) if started.elapsed() < self.config.sleep_window => false,
                stale => {
                    if stale.is_some() {
                        debug!(command_key = %self.name, "Trial call never reported back, admitting another");
                    }
                    health.trial_started = Some(Instant::now());
                    true
                }
            },
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut health = self.health.lock();
        match health.state {
            CircuitState::HalfOpen => {
                info!(command_key = %self.name, "Circuit breaker closing");
                health.state = CircuitState::Closed;
                health.outcomes.clear();
                health.opened_at = None;
                health.trial_started = None;
            }
            CircuitState::Closed => {
                let now = Instant::now();
                health.outcomes.push_back((now, true));
                health.prune(self.config.rolling_window, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut health = self.health.lock();
        match health.state {
            CircuitState::HalfOpen => {
                warn!(command_key = %self.name, "Trial call failed, circuit breaker reopening");
                health.state = CircuitState::Open;
                health.opened_at = Some(now);
                health.trial_started = None;
            }
            CircuitState::Closed => {
                health.outcomes.push_back((now, false));
                health.prune(self.config.rolling_window, now);

                let (total, failures) = health.counts();
                let percentage = failures * 100 / total.max(1);
                if !self.config.force_closed
                    && total >= self.config.request_volume_threshold
                    && percentage >= u32::from(self.config.error_threshold_percentage)
                {
                    warn!(
                        command_key = %self.name,
                        total,
                        failures,
                        error_percentage = percentage,
                        "Circuit breaker opening"
                    );
                    health.state = CircuitState::Open;
                    health.opened_at = Some(now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record an outcome that does not affect health, such as a bad request.
    ///
    /// A half-open trial that ends this way frees the trial slot without
    /// closing the circuit.
    pub fn record_ignored(&self) {
        let mut health = self.health.lock();
        if health.state == CircuitState::HalfOpen {
            health.trial_started = None;
        }
    }

    /// The failure percentage over the current window.
    pub fn error_percentage(&self) -> u32 {
        let mut health = self.health.lock();
        health.prune(self.config.rolling_window, Instant::now());
        let (total, failures) = health.counts();
        failures * 100 / total.max(1)
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut health = self.health.lock();
        health.state = CircuitState::Closed;
        health.outcomes.clear();
        health.opened_at = None;
        health.trial_started = None;
    }
}
