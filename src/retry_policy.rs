//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

use crate::backoff::Jitter;
use crate::cancellation::CancellationSignal;
use crate::config::RetryConfig;
use crate::retry_result::{Failure, Falsy, StatusCode};
use futures::future::{self, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Decides whether a failed attempt is retried. May suspend, and may fail.
pub type RetryPredicate<E> =
    Arc<dyn Fn(&Failure<E>, u32) -> BoxFuture<'static, Result<bool, E>> + Send + Sync>;

/// Decides whether a value returned by the work is unusable.
pub type InvalidResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Observes a failed attempt that is about to be retried after the given delay.
pub type AttemptFailedHook<E> = Arc<dyn Fn(u32, &Failure<E>, Duration) + Send + Sync>;

/// The default classification: deadlines, invalid results and 5xx-like errors are
/// retried, everything else is terminal.
pub fn is_retryable<E: StatusCode>(failure: &Failure<E>) -> bool {
    match failure {
        Failure::Cancelled => false,
        Failure::DeadlineExceeded { .. } => true,
        Failure::InvalidResult => true,
        Failure::Propagated(e) => matches!(e.status_code(), Some(status) if (500..600).contains(&status)),
    }
}

/// Everything a retry session needs to know. Read-only once the session starts.
pub struct RetryPolicy<T, E> {
    config: RetryConfig,
    retry_if: RetryPredicate<E>,
    invalid_if: Option<InvalidResultPredicate<T>>,
    cancellation: Option<CancellationSignal>,
    on_attempt_failed: Option<AttemptFailedHook<E>>,
}

impl<T, E> Default for RetryPolicy<T, E>
where
    E: StatusCode + Send + 'static,
{
    fn default() -> Self {
        RetryPolicy::from_config(RetryConfig::default())
    }
}

impl<T, E> RetryPolicy<T, E> {
    /// A policy with the default retry classification.
    pub fn from_config(config: RetryConfig) -> RetryPolicy<T, E>
    where
        E: StatusCode + Send + 'static,
    {
        RetryPolicy::with_retry_if(config, default_retry_if::<E>)
    }

    /// A policy for error types without a status code, classified by `predicate`.
    pub fn with_retry_if<P>(config: RetryConfig, predicate: P) -> RetryPolicy<T, E>
    where
        P: Fn(&Failure<E>, u32) -> bool + Send + Sync + 'static,
        E: Send + 'static,
    {
        RetryPolicy {
            config,
            retry_if: sync_predicate(predicate),
            invalid_if: None,
            cancellation: None,
            on_attempt_failed: None,
        }
    }

    /// Replaces every plain setting with those of `config`.
    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// No more than this many attempts are started. Zero is treated as one.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.config.base_delay = base_delay;
        self
    }

    /// No backoff will be longer than this.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.config.max_delay = max_delay;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Bounds each attempt, independently of the whole session.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = Some(timeout);
        self
    }

    /// Makes the jitter of every session run with this policy reproducible.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.config.jitter_seed = Some(seed);
        self
    }

    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Failure<E>, u32) -> bool + Send + Sync + 'static,
        E: Send + 'static,
    {
        self.retry_if = sync_predicate(predicate);
        self
    }

    /// Like [`retry_if`](Self::retry_if), for predicates that need to await something.
    /// An error returned by the predicate ends the session.
    pub fn retry_if_async<P, Fut>(mut self, predicate: P) -> Self
    where
        P: Fn(&Failure<E>, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: 'static,
    {
        self.retry_if = async_predicate(predicate);
        self
    }

    /// Treats values for which `predicate` holds as failed attempts.
    pub fn invalid_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.invalid_if = Some(Arc::new(predicate));
        self
    }

    /// `true` treats falsy values (`None`, zero, empty strings, ...) as failed attempts.
    /// `false` accepts every value.
    pub fn retry_on_falsy(mut self, enabled: bool) -> Self
    where
        T: Falsy + 'static,
    {
        self.invalid_if = if enabled {
            Some(Arc::new(falsy::<T>))
        } else {
            None
        };
        self
    }

    /// Cancels the whole session, including the attempt in flight and any backoff.
    pub fn cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = Some(signal);
        self
    }

    /// Called when an attempt failed and is going to be retried. Never called on
    /// success or on the failure that ends the session. Panics are caught and logged.
    pub fn on_attempt_failed<P>(mut self, hook: P) -> Self
    where
        P: Fn(u32, &Failure<E>, Duration) + Send + Sync + 'static,
    {
        self.on_attempt_failed = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn cancellation_signal(&self) -> Option<&CancellationSignal> {
        self.cancellation.as_ref()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().map_or(false, CancellationSignal::is_cancelled)
    }

    pub(crate) fn is_invalid(&self, value: &T) -> bool {
        self.invalid_if.as_ref().map_or(false, |predicate| predicate(value))
    }

    pub(crate) fn should_retry(&self, failure: &Failure<E>, attempt: u32) -> BoxFuture<'static, Result<bool, E>> {
        (self.retry_if)(failure, attempt)
    }

    pub(crate) fn notify_attempt_failed(&self, attempt: u32, failure: &Failure<E>, delay: Duration) {
        if let Some(hook) = &self.on_attempt_failed {
            if catch_unwind(AssertUnwindSafe(|| hook(attempt, failure, delay))).is_err() {
                warn!("attempt failure hook panicked on attempt {}, ignoring", attempt);
            }
        }
    }
}

fn default_retry_if<E: StatusCode>(failure: &Failure<E>, _attempt: u32) -> bool {
    is_retryable(failure)
}

fn falsy<T: Falsy>(value: &T) -> bool {
    value.is_falsy()
}

fn sync_predicate<P, E>(predicate: P) -> RetryPredicate<E>
where
    P: Fn(&Failure<E>, u32) -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    Arc::new(move |failure: &Failure<E>, attempt: u32| future::ready(Ok(predicate(failure, attempt))).boxed())
}

fn async_predicate<P, Fut, E>(predicate: P) -> RetryPredicate<E>
where
    P: Fn(&Failure<E>, u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    E: 'static,
{
    Arc::new(move |failure: &Failure<E>, attempt: u32| predicate(failure, attempt).boxed())
}

impl<T, E> Clone for RetryPolicy<T, E> {
    fn clone(&self) -> Self {
        RetryPolicy {
            config: self.config,
            retry_if: self.retry_if.clone(),
            invalid_if: self.invalid_if.clone(),
            cancellation: self.cancellation.clone(),
            on_attempt_failed: self.on_attempt_failed.clone(),
        }
    }
}

impl<T, E> fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("invalid_if", &self.invalid_if.is_some())
            .field("cancellation", &self.cancellation)
            .field("on_attempt_failed", &self.on_attempt_failed.is_some())
            .finish()
    }
}
