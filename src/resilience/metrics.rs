//! Per-command counters and the process-wide command registry.

use super::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

/// Event counters for one command key.
#[derive(Debug, Default)]
pub struct CommandMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    timeout: AtomicU64,
    short_circuited: AtomicU64,
    rejected: AtomicU64,
    bad_request: AtomicU64,
    fallback_success: AtomicU64,
    fallback_failure: AtomicU64,
}

/// A point-in-time copy of [`CommandMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Calls that completed normally.
    pub success: u64,
    /// Calls that failed and counted against the circuit.
    pub failure: u64,
    /// Calls that exceeded their timeout.
    pub timeout: u64,
    /// Calls skipped because the circuit was open.
    pub short_circuited: u64,
    /// Calls refused because the isolation group was saturated.
    pub rejected: u64,
    /// Failures exempted from circuit accounting.
    pub bad_request: u64,
    /// Fallbacks that produced a value.
    pub fallback_success: u64,
    /// Fallbacks that failed.
    pub fallback_failure: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Event {
    Success,
    Failure,
    Timeout,
    ShortCircuited,
    Rejected,
    BadRequest,
    FallbackSuccess,
    FallbackFailure,
}

impl CommandMetrics {
    pub(crate) fn mark(&self, event: Event) {
        let counter = match event {
            Event::Success => &self.success,
            Event::Failure => &self.failure,
            Event::Timeout => &self.timeout,
            Event::ShortCircuited => &self.short_circuited,
            Event::Rejected => &self.rejected,
            Event::BadRequest => &self.bad_request,
            Event::FallbackSuccess => &self.fallback_success,
            Event::FallbackFailure => &self.fallback_failure,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            bad_request: self.bad_request.load(Ordering::Relaxed),
            fallback_success: self.fallback_success.load(Ordering::Relaxed),
            fallback_failure: self.fallback_failure.load(Ordering::Relaxed),
        }
    }
}

/// Shared state for one command key.
#[derive(Debug)]
pub struct CommandState {
    key: String,
    breaker: CircuitBreaker,
    metrics: CommandMetrics,
}

impl CommandState {
    /// The command key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The current circuit state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// The event counters.
    pub fn metrics(&self) -> &CommandMetrics {
        &self.metrics
    }
}

/// Circuit breakers, metrics and isolation groups, keyed by name.
///
/// State is created on first use and then shared by every client that uses
/// the same key; the configuration of the first registration wins.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Mutex<HashMap<String, Arc<CommandState>>>,
    groups: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<CommandRegistry> {
        static GLOBAL: OnceLock<Arc<CommandRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(CommandRegistry::new())).clone()
    }

    /// Returns the state for `key`, creating it with `config` if needed.
    pub fn command(&self, key: &str, config: &CircuitBreakerConfig) -> Arc<CommandState> {
        self.commands
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CommandState {
                    key: key.to_string(),
                    breaker: CircuitBreaker::new(key, config.clone()),
                    metrics: CommandMetrics::default(),
                })
            })
            .clone()
    }

    /// Returns the state for `key` if it exists.
    pub fn get(&self, key: &str) -> Option<Arc<CommandState>> {
        self.commands.lock().get(key).cloned()
    }

    /// Returns the permit pool for an isolation group, creating it if needed.
    pub fn group(&self, key: &str, max_concurrent: usize) -> Arc<Semaphore> {
        self.groups
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(group = %key, max_concurrent, "Isolation group initialized");
                Arc::new(Semaphore::new(max_concurrent))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registration_wins() {
        let registry = CommandRegistry::new();
        let first = registry.command("Frobs.get", &CircuitBreakerConfig::default().with_force_open(true));
        let second = registry.command("Frobs.get", &CircuitBreakerConfig::default());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.breaker().config().force_open);
        assert!(Arc::ptr_eq(&registry.group("Frobs", 2), &registry.group("Frobs", 5)));
    }

    #[test]
    fn test_snapshot() {
        let metrics = CommandMetrics::default();
        metrics.mark(Event::Success);
        metrics.mark(Event::Success);
        metrics.mark(Event::BadRequest);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.success, 2);
        assert_eq!(snapshot.bad_request, 1);
        assert_eq!(snapshot.failure, 0);
    }
}
