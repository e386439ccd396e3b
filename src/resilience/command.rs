//! Executing one call as a command: short-circuit, isolation, timeout,
//! outcome classification and fallback.

use super::breaker::CircuitBreaker;
use super::metrics::{CommandState, Event};
use super::CommandDescriptor;
use crate::client::Reply;
use crate::error::CallFailure;
use crate::{Error, Result};
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Why a command did not produce a value of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// The call itself failed.
    CommandException,
    /// The call did not finish within its timeout.
    Timeout,
    /// The circuit was open.
    ShortCircuit,
    /// The isolation group had no free permit.
    Rejected,
}

impl FailureType {
    fn describe(self) -> &'static str {
        match self {
            FailureType::CommandException => "failed",
            FailureType::Timeout => "timed-out",
            FailureType::ShortCircuit => "short-circuited",
            FailureType::Rejected => "could not be queued for execution",
        }
    }
}

/// A command failure that could not be recovered by a fallback.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    command_key: String,
    failure_type: FailureType,
    message: String,
    #[source]
    cause: Option<Box<Error>>,
    fallback_error: Option<Box<Error>>,
}

impl CommandError {
    fn new(command_key: &str, failure_type: FailureType, fallback_failed: bool) -> Self {
        let outcome = if fallback_failed {
            "failed retrieving fallback"
        } else {
            "fallback disabled"
        };
        Self {
            command_key: command_key.to_string(),
            failure_type,
            message: format!("{} {} and {}.", command_key, failure_type.describe(), outcome),
            cause: None,
            fallback_error: None,
        }
    }

    /// The command key.
    pub fn command_key(&self) -> &str {
        &self.command_key
    }

    /// What went wrong with the call.
    pub fn failure_type(&self) -> FailureType {
        self.failure_type
    }

    /// The human-readable summary.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The call's own error, if it got far enough to produce one.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// The fallback's error, if a fallback ran and failed.
    pub fn fallback_error(&self) -> Option<&Error> {
        self.fallback_error.as_deref()
    }
}

/// A value to use when a command fails, times out, is short-circuited or is rejected.
///
/// # Examples
///
/// ```
/// use restgen::resilience::Fallback;
/// use restgen::Reply;
///
/// let fixed = Fallback::value(String::from("unknown frob"));
///
/// let computed = Fallback::new(|| async {
///     Ok(Reply::entity(String::from("cached frob")))
/// });
/// # let _ = (fixed, computed);
/// ```
#[derive(Clone)]
pub struct Fallback(Arc<dyn Fn() -> BoxFuture<'static, Result<Reply>> + Send + Sync>);

impl Fallback {
    /// Wraps an async fallback.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        Fallback(Arc::new(move || Box::pin(f())))
    }

    /// A fallback that always returns a clone of `value` as the entity.
    pub fn value<T>(value: T) -> Self
    where
        T: Any + Clone + Send + Sync,
    {
        Fallback::new(move || {
            let value = value.clone();
            async move { Ok(Reply::entity(value)) }
        })
    }

    fn call(&self) -> BoxFuture<'static, Result<Reply>> {
        (self.0)()
    }
}

impl std::fmt::Debug for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Fallback")
    }
}

/// Runs `work` as the command described by `command`.
///
/// The work is spawned so a timeout abandons it without interrupting the
/// transport mid-request; the isolation permit is held until it finishes.
pub(crate) async fn execute<W>(
    command: &CommandDescriptor,
    state: &CommandState,
    group: &Arc<Semaphore>,
    work: W,
) -> Result<Reply>
where
    W: Future<Output = std::result::Result<Reply, CallFailure>> + Send + 'static,
{
    let key = state.key();

    if !state.breaker().allow_request() {
        state.metrics().mark(Event::ShortCircuited);
        tracing::warn!(command_key = %key, "Circuit open, short-circuiting call");
        return recover(command, state, FailureType::ShortCircuit, None).await;
    }
    let mut outcome = PendingOutcome::new(state.breaker());

    let permit = match group.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            outcome.settle();
            state.metrics().mark(Event::Rejected);
            state.breaker().record_failure();
            tracing::warn!(
                command_key = %key,
                group = %command.group_key,
                "Isolation group saturated, rejecting call"
            );
            return recover(command, state, FailureType::Rejected, None).await;
        }
    };

    let handle = tokio::spawn(async move {
        let _permit = permit;
        work.await
    });

    let result = tokio::time::timeout(command.timeout, handle).await;
    outcome.settle();

    match result {
        Err(_) => {
            state.metrics().mark(Event::Timeout);
            state.breaker().record_failure();
            tracing::warn!(
                command_key = %key,
                timeout_ms = command.timeout.as_millis() as u64,
                "Call timed out"
            );
            recover(command, state, FailureType::Timeout, None).await
        }
        Ok(Err(join_error)) => {
            if join_error.is_panic() {
                std::panic::resume_unwind(join_error.into_panic());
            }
            state.metrics().mark(Event::Failure);
            state.breaker().record_failure();
            let cause = Error::Transport(Box::new(join_error));
            recover(command, state, FailureType::CommandException, Some(cause)).await
        }
        Ok(Ok(Ok(reply))) => {
            state.metrics().mark(Event::Success);
            state.breaker().record_success();
            Ok(reply)
        }
        Ok(Ok(Err(CallFailure { error, failed_status }))) => {
            if error.is_local() || command.bad_request.is_bad_request(failed_status, &error) {
                state.metrics().mark(Event::BadRequest);
                state.breaker().record_ignored();
                tracing::debug!(
                    command_key = %key,
                    status = failed_status.map(|s| s.as_u16()),
                    error = %error,
                    "Bad request, not counted against the circuit"
                );
                return Err(error);
            }
            state.metrics().mark(Event::Failure);
            state.breaker().record_failure();
            recover(command, state, FailureType::CommandException, Some(error)).await
        }
    }
}

/// Frees a half-open trial slot when a call is abandoned before its outcome
/// is recorded, e.g. because the caller dropped the future.
struct PendingOutcome<'a> {
    breaker: &'a CircuitBreaker,
    pending: bool,
}

impl<'a> PendingOutcome<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self { breaker, pending: true }
    }

    fn settle(&mut self) {
        self.pending = false;
    }
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if self.pending {
            tracing::debug!("Call abandoned before completion, releasing circuit trial");
            self.breaker.record_ignored();
        }
    }
}

async fn recover(
    command: &CommandDescriptor,
    state: &CommandState,
    failure_type: FailureType,
    cause: Option<Error>,
) -> Result<Reply> {
    let Some(fallback) = &command.fallback else {
        return match cause {
            Some(error) => Err(error),
            None => Err(CommandError::new(state.key(), failure_type, false).into()),
        };
    };

    match fallback.call().await {
        Ok(reply) => {
            state.metrics().mark(Event::FallbackSuccess);
            tracing::debug!(command_key = %state.key(), failure = ?failure_type, "Served fallback");
            Ok(reply)
        }
        Err(fallback_error) => {
            state.metrics().mark(Event::FallbackFailure);
            tracing::warn!(
                command_key = %state.key(),
                failure = ?failure_type,
                error = %fallback_error,
                "Fallback failed"
            );
            let mut error = CommandError::new(state.key(), failure_type, true);
            error.cause = cause.map(Box::new);
            error.fallback_error = Some(Box::new(fallback_error));
            Err(error.into())
        }
    }
}
