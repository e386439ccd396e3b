//! Error status criteria.
//!
//! Decides which response statuses count as failures. A failure is raised as
//! [`Error::ResponseFailure`](crate::Error::ResponseFailure) and routed through
//! the error interceptors; anything else is treated as a successful response.

use http::StatusCode;

/// Decides whether a response status is a failure.
///
/// Implemented for any `Fn(StatusCode) -> bool`, so closures work directly.
///
/// # Examples
///
/// ```
/// use restgen::{DefaultErrorStatus, StatusCriteria};
/// use http::StatusCode;
///
/// assert!(DefaultErrorStatus.is_failure(StatusCode::NOT_FOUND));
/// assert!(!DefaultErrorStatus.is_failure(StatusCode::NOT_MODIFIED));
///
/// // Treat only server errors as failures.
/// let server_errors = |status: StatusCode| status.is_server_error();
/// assert!(!server_errors.is_failure(StatusCode::NOT_FOUND));
/// ```
pub trait StatusCriteria: Send + Sync {
    /// Returns `true` if `status` is a failure.
    fn is_failure(&self, status: StatusCode) -> bool;
}

/// Treats every status from 400 through 599 as a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorStatus;

impl StatusCriteria for DefaultErrorStatus {
    fn is_failure(&self, status: StatusCode) -> bool {
        (400..=599).contains(&status.as_u16())
    }
}

/// Treats exactly the listed statuses as failures.
#[derive(Debug, Clone, Default)]
pub struct StatusIn {
    statuses: Vec<StatusCode>,
}

impl StatusIn {
    /// Creates criteria matching the given statuses.
    pub fn new(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }
}

impl StatusCriteria for StatusIn {
    fn is_failure(&self, status: StatusCode) -> bool {
        self.statuses.contains(&status)
    }
}

impl<F> StatusCriteria for F
where
    F: Fn(StatusCode) -> bool + Send + Sync,
{
    fn is_failure(&self, status: StatusCode) -> bool {
        self(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_range() {
        for code in 200..=399 {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!DefaultErrorStatus.is_failure(status), "{} is not a failure", code);
        }
        for code in 400..=599 {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(DefaultErrorStatus.is_failure(status), "{} is a failure", code);
        }
    }

    #[test]
    fn test_status_in() {
        let criteria = StatusIn::new([StatusCode::CONFLICT]);
        assert!(criteria.is_failure(StatusCode::CONFLICT));
        assert!(!criteria.is_failure(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
