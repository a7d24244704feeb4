//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

use crate::cancellation::CancellationSignal;
use snafu::Snafu;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum WaitError {
    #[snafu(display("Wait of {:?} was cancelled", duration))]
    Cancelled { duration: Duration },
}

/// Sleeps for `duration` unless `signal` is cancelled first.
///
/// An already-cancelled signal fails without starting a timer. Both the timer and
/// the cancellation listener are released on every exit path, including the
/// returned future being dropped.
pub async fn wait(duration: Duration, signal: Option<&CancellationSignal>) -> Result<(), WaitError> {
    let signal = match signal {
        Some(signal) => signal,
        None => {
            sleep(duration).await;
            return Ok(());
        }
    };
    if signal.is_cancelled() {
        return Err(WaitError::Cancelled { duration });
    }

    tokio::select! {
        biased;
        _ = signal.cancelled() => {
            debug!("backoff of {:?} interrupted by cancellation", duration);
            Err(WaitError::Cancelled { duration })
        }
        _ = sleep(duration) => Ok(()),
    }
}
