//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

//! Retry sessions for asynchronous operations.
//!
//! A session invokes a unit of work until it succeeds, bounded by a [`RetryPolicy`]:
//! at most `max_attempts` invocations, exponential backoff with optional jitter
//! between them, an optional deadline per attempt, and an optional operation-wide
//! [`CancellationSignal`]. Each attempt also gets its own signal, so the work can
//! abandon a single in-flight call without ending the session.
//!
//! ```
//! use retry_session::{retry_async, RetryPolicy, StatusCode};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct HttpError(u16);
//!
//! impl StatusCode for HttpError {
//!     fn status_code(&self) -> Option<u16> {
//!         Some(self.0)
//!     }
//! }
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let policy = RetryPolicy::default()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(1));
//! let result = runtime.block_on(retry_async(policy, |attempt, _signal| async move {
//!     if attempt < 3 {
//!         Err(HttpError(503))
//!     } else {
//!         Ok(attempt)
//!     }
//! }));
//!
//! assert!(result.is_success());
//! assert_eq!(result.attempts_used(), 3);
//! assert_eq!(result.into_result().unwrap(), 3);
//! ```
//! A 5xx-like error is retried by the default policy; any other error ends the
//! session at once. Either way the caller receives every failure that occurred,
//! not only the last one.
//!

#![deny(
    clippy::all,
    clippy::cargo,
    clippy::else_if_without_else,
    clippy::empty_line_after_outer_attr,
    clippy::multiple_inherent_impl,
    clippy::mut_mut,
    clippy::path_buf_push_overwrite
)]
#![warn(
    clippy::cargo_common_metadata,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::similar_names
)]
#![allow(clippy::multiple_crate_versions)]

pub mod attempt;
pub mod backoff;
pub mod cancellation;
pub mod config;
pub mod delay;
pub mod retry_async;
pub mod retry_policy;
pub mod retry_result;

pub use crate::backoff::{compute_delay, Backoff, Jitter};
pub use crate::cancellation::{CancellationController, CancellationSignal, ListenerHandle};
pub use crate::config::{ConfigError, RetryConfig, RetryConfigBuilder};
pub use crate::delay::{wait, WaitError};
pub use crate::retry_async::retry_async;
pub use crate::retry_policy::{is_retryable, RetryPolicy};
pub use crate::retry_result::{Failure, Falsy, RetryError, SessionResult, StatusCode};
