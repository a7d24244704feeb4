//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

use crate::cancellation::{CancellationController, CancellationSignal};
use crate::retry_policy::RetryPolicy;
use crate::retry_result::Failure;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Bounds the lifetime of one attempt's signal: it is cancelled when the scope
/// ends, however the attempt ended.
struct AttemptScope {
    controller: CancellationController,
}

impl AttemptScope {
    fn new() -> AttemptScope {
        AttemptScope {
            controller: CancellationController::new(),
        }
    }

    fn signal(&self) -> CancellationSignal {
        self.controller.signal()
    }

    fn cancel(&self) {
        self.controller.cancel();
    }
}

impl Drop for AttemptScope {
    fn drop(&mut self) {
        self.controller.cancel();
    }
}

/// Completes when `signal` is cancelled, never when there is none.
pub(crate) async fn outer_cancelled(signal: Option<&CancellationSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => futures::future::pending().await,
    }
}

async fn expire(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => {
            sleep(timeout).await;
            timeout
        }
        None => futures::future::pending().await,
    }
}

/// Runs a single attempt of `work`.
///
/// The work races against the per-attempt deadline and the operation-wide signal.
/// The work receives a fresh signal that is cancelled by either of those, and in
/// any case once this function returns.
pub async fn run_attempt<W, F, T, E>(
    work: &mut W,
    attempt: u32,
    policy: &RetryPolicy<T, E>,
) -> Result<T, Failure<E>>
where
    W: FnMut(u32, CancellationSignal) -> F,
    F: Future<Output = Result<T, E>>,
{
    let scope = AttemptScope::new();
    let operation = work(attempt, scope.signal());

    let outcome = tokio::select! {
        biased;
        _ = outer_cancelled(policy.cancellation_signal()) => {
            scope.cancel();
            debug!("attempt {} cancelled by the operation signal", attempt);
            Err(Failure::Cancelled)
        }
        result = operation => match result {
            Err(error) => Err(Failure::Propagated(error)),
            Ok(value) if policy.is_invalid(&value) => {
                debug!("attempt {} returned an invalid result", attempt);
                Err(Failure::InvalidResult)
            }
            Ok(value) => Ok(value),
        },
        deadline = expire(policy.config().attempt_timeout()) => {
            scope.cancel();
            debug!("attempt {} exceeded its deadline of {:?}", attempt, deadline);
            Err(Failure::DeadlineExceeded { deadline })
        }
    };
    drop(scope);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{assert_elapsed, UpstreamError};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy<Option<u32>, UpstreamError> {
        RetryPolicy::default()
    }

    #[tokio::test]
    async fn test_success_closes_attempt_signal() {
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let mut work = move |attempt: u32, signal: CancellationSignal| {
            *captured.lock() = Some(signal.clone());
            async move {
                assert!(!signal.is_cancelled());
                Ok::<_, UpstreamError>(Some(attempt))
            }
        };

        let res = run_attempt(&mut work, 4, &policy()).await;
        assert_eq!(res, Ok(Some(4)));

        let signal = seen.lock().take().unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_error_is_propagated() {
        let mut work = |_: u32, _: CancellationSignal| async {
            Err::<Option<u32>, _>(UpstreamError::Status { status: 503 })
        };
        let res = run_attempt(&mut work, 1, &policy()).await;
        assert_eq!(
            res,
            Err(Failure::Propagated(UpstreamError::Status { status: 503 }))
        );
    }

    #[tokio::test]
    async fn test_invalid_result() {
        let policy = policy().retry_on_falsy(true);
        let mut work = |_: u32, _: CancellationSignal| async { Ok::<_, UpstreamError>(None) };
        assert_eq!(run_attempt(&mut work, 1, &policy).await, Err(Failure::InvalidResult));

        let mut work = |_: u32, _: CancellationSignal| async { Ok::<_, UpstreamError>(Some(0)) };
        assert_eq!(run_attempt(&mut work, 1, &policy).await, Ok(Some(0)));
    }

    #[tokio::test]
    async fn test_error_checked_before_invalid_result() {
        let policy = policy().invalid_if(|_| true);
        let mut work = |_: u32, _: CancellationSignal| async {
            Err::<Option<u32>, _>(UpstreamError::Status { status: 500 })
        };
        assert_eq!(
            run_attempt(&mut work, 1, &policy).await,
            Err(Failure::Propagated(UpstreamError::Status { status: 500 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_pending_work() {
        let policy = policy().attempt_timeout(Duration::from_millis(1000));
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let mut work = move |_: u32, signal: CancellationSignal| {
            *captured.lock() = Some(signal);
            futures::future::pending::<Result<Option<u32>, UpstreamError>>()
        };

        let start = Instant::now();
        let res = run_attempt(&mut work, 1, &policy).await;
        assert_eq!(
            res,
            Err(Failure::DeadlineExceeded {
                deadline: Duration::from_millis(1000)
            })
        );
        assert_elapsed(start, Duration::from_millis(1000));
        assert!(seen.lock().as_ref().unwrap().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_cancellation_wins_and_propagates() {
        let controller = CancellationController::new();
        let outer = controller.signal();
        let policy = policy().cancellation(outer.clone());

        let mut work = |_: u32, signal: CancellationSignal| async move {
            signal.cancelled().await;
            Ok::<_, UpstreamError>(Some(1))
        };
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.cancel();
        };

        let start = Instant::now();
        let (res, _) = tokio::join!(run_attempt(&mut work, 1, &policy), cancel);
        assert_eq!(res, Err(Failure::Cancelled));
        assert_elapsed(start, Duration::from_millis(20));
        assert_eq!(outer.listener_count(), 0);
    }
}
