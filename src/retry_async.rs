//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

use crate::attempt::{outer_cancelled, run_attempt};
use crate::backoff::Backoff;
use crate::cancellation::CancellationSignal;
use crate::delay::wait;
use crate::retry_policy::RetryPolicy;
use crate::retry_result::{Failure, SessionResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, info_span};
use tracing_futures::Instrument;

/// Retry the given operation asynchronously until it succeeds, the policy gives up,
/// or the policy's cancellation signal fires.
///
/// `operation` is called with the 1-indexed attempt number and a signal scoped to
/// that attempt. The session never fails past this function: every failure that
/// occurred is recorded, in order, in the returned [`SessionResult`].
///
/// It can be used as follows:
/// let retry_policy = RetryPolicy::default().base_delay(Duration::from_millis(100));
/// let result = retry_async(retry_policy, |attempt, _signal| async move {
///     match attempt {
///         1 => Err(UpstreamError::Status { status: 503 }),
///         _ => Ok(attempt),
///     }
/// }).await;
pub async fn retry_async<O, F, T, E>(policy: RetryPolicy<T, E>, operation: O) -> SessionResult<T, E>
where
    O: FnMut(u32, CancellationSignal) -> F,
    F: Future<Output = Result<T, E>>,
{
    let span = info_span!("retry_session", max_attempts = policy.config().max_attempts());
    run_session(policy, operation).instrument(span).await
}

async fn run_session<O, F, T, E>(policy: RetryPolicy<T, E>, mut operation: O) -> SessionResult<T, E>
where
    O: FnMut(u32, CancellationSignal) -> F,
    F: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.config().max_attempts().max(1);
    let mut schedule: Backoff = Backoff::from_config(policy.config());
    let mut failures: Vec<Failure<E>> = Vec::new();
    let mut total_delay = Duration::default();

    for index in 0..max_attempts {
        let attempt = index + 1;
        if policy.is_cancelled() {
            debug!("cancelled before attempt {}", attempt);
            failures.push(Failure::Cancelled);
            return failed(failures, index, total_delay);
        }

        debug!("starting attempt {} of {}", attempt, max_attempts);
        let failure = match run_attempt(&mut operation, attempt, &policy).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("succeeded on attempt {} after {:?} of backoff", attempt, total_delay);
                }
                return SessionResult::Succeeded {
                    value,
                    attempts_used: attempt,
                    total_delay,
                };
            }
            Err(failure) => failure,
        };
        let cancelled = failure.is_cancelled() || policy.is_cancelled();
        failures.push(failure);
        if cancelled {
            debug!("session cancelled during attempt {}", attempt);
            return failed(failures, attempt, total_delay);
        }
        if attempt == max_attempts {
            break;
        }
        let last = failures.len() - 1;

        let decision = tokio::select! {
            biased;
            _ = outer_cancelled(policy.cancellation_signal()) => None,
            decision = policy.should_retry(&failures[last], attempt) => Some(decision),
        };
        match decision {
            None => {
                debug!("session cancelled while deciding on attempt {}", attempt);
                failures.push(Failure::Cancelled);
                return failed(failures, attempt, total_delay);
            }
            Some(Ok(true)) => {}
            Some(Ok(false)) => {
                debug!("attempt {} failed with a terminal failure", attempt);
                return failed(failures, attempt, total_delay);
            }
            Some(Err(error)) => {
                debug!("retry predicate failed after attempt {}", attempt);
                failures.push(Failure::Propagated(error));
                return failed(failures, attempt, total_delay);
            }
        }

        let delay = schedule.next().unwrap_or_else(|| policy.config().max_delay());
        debug!("attempt {} failed, retrying in {:?}", attempt, delay);
        policy.notify_attempt_failed(attempt, &failures[last], delay);

        if wait(delay, policy.cancellation_signal()).await.is_err() {
            failures.push(Failure::Cancelled);
            return failed(failures, attempt, total_delay);
        }
        total_delay += delay;
    }
    failed(failures, max_attempts, total_delay)
}

fn failed<T, E>(failures: Vec<Failure<E>>, attempts_used: u32, total_delay: Duration) -> SessionResult<T, E> {
    info!(
        "retry session failed after {} attempt(s) with {} recorded failure(s)",
        attempts_used,
        failures.len()
    );
    SessionResult::Failed {
        failures,
        attempts_used,
        total_delay,
    }
}
