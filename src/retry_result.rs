//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// The reason an attempt did not produce a usable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// The operation-wide signal fired, either before the attempt started,
    /// while it was running, or during the backoff that followed it.
    Cancelled,
    /// The attempt did not settle within the per-attempt deadline.
    DeadlineExceeded { deadline: Duration },
    /// The work returned a value that the policy rejects.
    InvalidResult,
    /// The work, or the retry predicate, returned an error.
    Propagated(E),
}

impl<E> Failure<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Failure::Cancelled)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Failure::DeadlineExceeded { .. })
    }

    pub fn is_invalid_result(&self) -> bool {
        matches!(self, Failure::InvalidResult)
    }

    /// The underlying error, if this failure carries one.
    pub fn error(&self) -> Option<&E> {
        match self {
            Failure::Propagated(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<E> {
        match self {
            Failure::Propagated(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Cancelled => write!(f, "Operation cancelled"),
            Failure::DeadlineExceeded { deadline } => {
                write!(f, "Attempt exceeded its deadline of {:?}", deadline)
            }
            Failure::InvalidResult => write!(f, "Attempt returned an invalid result"),
            Failure::Propagated(e) => write!(f, "{}", e),
        }
    }
}

impl<E> StdError for Failure<E>
where
    E: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Failure::Propagated(e) => Some(e),
            _ => None,
        }
    }
}

/// The terminal value of a retry session. It is produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult<T, E> {
    Succeeded {
        value: T,
        /// Attempts started, including the successful one.
        attempts_used: u32,
        /// Sum of the backoff waits that ran to completion.
        total_delay: Duration,
    },
    Failed {
        /// Every failure recorded during the session, in order. Never empty.
        failures: Vec<Failure<E>>,
        attempts_used: u32,
        total_delay: Duration,
    },
}

impl<T, E> SessionResult<T, E> {
    pub fn attempts_used(&self) -> u32 {
        match self {
            SessionResult::Succeeded { attempts_used, .. } => *attempts_used,
            SessionResult::Failed { attempts_used, .. } => *attempts_used,
        }
    }

    pub fn total_delay(&self) -> Duration {
        match self {
            SessionResult::Succeeded { total_delay, .. } => *total_delay,
            SessionResult::Failed { total_delay, .. } => *total_delay,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionResult::Succeeded { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            SessionResult::Succeeded { value, .. } => Some(value),
            SessionResult::Failed { .. } => None,
        }
    }

    /// The recorded failures. Empty when the session succeeded.
    pub fn failures(&self) -> &[Failure<E>] {
        match self {
            SessionResult::Succeeded { .. } => &[],
            SessionResult::Failed { failures, .. } => failures,
        }
    }

    pub fn into_result(self) -> Result<T, RetryError<E>> {
        match self {
            SessionResult::Succeeded { value, .. } => Ok(value),
            SessionResult::Failed {
                failures,
                attempts_used,
                total_delay,
            } => Err(RetryError {
                failures,
                attempts_used,
                total_delay,
            }),
        }
    }
}

/// A failed session, as an error value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    /// Every failure recorded during the session, in order.
    pub failures: Vec<Failure<E>>,
    /// The total number of attempts that were started.
    pub attempts_used: u32,
    /// The duration spent waiting between attempts.
    pub total_delay: Duration,
}

impl<E> RetryError<E> {
    /// The failure that ended the session.
    pub fn last(&self) -> Option<&Failure<E>> {
        self.failures.last()
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Retry session failed after {} attempt(s) and {:?} of backoff",
            self.attempts_used, self.total_delay
        )?;
        if let Some(last) = self.last() {
            write!(f, ": {}", last)?;
        }
        Ok(())
    }
}

impl<E> StdError for RetryError<E>
where
    E: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failures.last().map(|f| f as &(dyn StdError + 'static))
    }
}

/// Exposes an HTTP-like status code for the default retry classification.
///
/// Errors that report a status in `500..600` are retried by the default
/// predicate, anything else that the work returns is terminal.
pub trait StatusCode {
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl StatusCode for std::io::Error {}
impl StatusCode for String {}
impl StatusCode for &'static str {}
impl StatusCode for Box<dyn StdError + Send + Sync> {}

/// Values that count as "nothing came back" when a policy retries on falsy results.
pub trait Falsy {
    fn is_falsy(&self) -> bool;
}

impl<T> Falsy for Option<T> {
    fn is_falsy(&self) -> bool {
        self.is_none()
    }
}

impl Falsy for bool {
    fn is_falsy(&self) -> bool {
        !*self
    }
}

impl Falsy for String {
    fn is_falsy(&self) -> bool {
        self.is_empty()
    }
}

impl Falsy for &str {
    fn is_falsy(&self) -> bool {
        self.is_empty()
    }
}

impl Falsy for f32 {
    fn is_falsy(&self) -> bool {
        *self == 0.0 || self.is_nan()
    }
}

impl Falsy for f64 {
    fn is_falsy(&self) -> bool {
        *self == 0.0 || self.is_nan()
    }
}

macro_rules! falsy_integer {
    ($($t:ty),*) => {
        $(
            impl Falsy for $t {
                fn is_falsy(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

falsy_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::UpstreamError;

    #[test]
    fn test_session_accessors() {
        let ok: SessionResult<u32, UpstreamError> = SessionResult::Succeeded {
            value: 7,
            attempts_used: 2,
            total_delay: Duration::from_millis(500),
        };
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&7));
        assert!(ok.failures().is_empty());
        assert_eq!(ok.attempts_used(), 2);
        assert_eq!(ok.into_result(), Ok(7));

        let failed: SessionResult<u32, UpstreamError> = SessionResult::Failed {
            failures: vec![
                Failure::DeadlineExceeded {
                    deadline: Duration::from_millis(10),
                },
                Failure::Propagated(UpstreamError::Status { status: 404 }),
            ],
            attempts_used: 2,
            total_delay: Duration::from_millis(500),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.value(), None);
        assert_eq!(failed.failures().len(), 2);

        let err = failed.into_result().unwrap_err();
        assert_eq!(
            err.last(),
            Some(&Failure::Propagated(UpstreamError::Status { status: 404 }))
        );
        assert_eq!(
            err.to_string(),
            "Retry session failed after 2 attempt(s) and 500ms of backoff: Upstream returned status 404"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_failure_source_only_for_propagated() {
        let cancelled: Failure<UpstreamError> = Failure::Cancelled;
        assert!(cancelled.source().is_none());
        assert!(cancelled.is_cancelled());

        let propagated = Failure::Propagated(UpstreamError::Status { status: 503 });
        assert!(propagated.source().is_some());
        assert_eq!(propagated.error(), Some(&UpstreamError::Status { status: 503 }));
        assert_eq!(propagated.into_error(), Some(UpstreamError::Status { status: 503 }));
        assert_eq!(cancelled.into_error(), None);
    }

    #[test]
    fn test_falsy_values() {
        assert!(None::<u8>.is_falsy());
        assert!(!Some(0u8).is_falsy());
        assert!(String::new().is_falsy());
        assert!(!"x".is_falsy());
        assert!(0i64.is_falsy());
        assert!(f64::NAN.is_falsy());
        assert!(false.is_falsy());
        assert!(!true.is_falsy());
    }
}
