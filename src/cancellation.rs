//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

//! One-way, broadcast cancellation.
//!
//! A [`CancellationController`] owns the right to cancel, and hands out
//! [`CancellationSignal`]s that can be observed from anywhere. Cancellation moves
//! the signal from "active" to "cancelled" exactly once; every listener registered
//! before that moment is invoked exactly once.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

type Callback = Box<dyn FnOnce() + Send>;

struct Listeners {
    cancelled: bool,
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

struct Inner {
    listeners: Mutex<Listeners>,
}

/// Identifies a registered listener so that it can be removed before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// The observable side of a cancellation controller.
#[derive(Clone)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

impl CancellationSignal {
    fn new() -> CancellationSignal {
        CancellationSignal {
            inner: Arc::new(Inner {
                listeners: Mutex::new(Listeners {
                    cancelled: false,
                    next_id: 0,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.listeners.lock().cancelled
    }

    /// Registers a one-shot callback for the moment of cancellation.
    ///
    /// If the signal is already cancelled the callback runs immediately on the
    /// calling thread and `None` is returned.
    pub fn on_cancel<F>(&self, callback: F) -> Option<ListenerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        if listeners.cancelled {
            drop(listeners);
            callback();
            return None;
        }
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.callbacks.push((id, Box::new(callback)));
        Some(ListenerHandle(id))
    }

    /// Removes a listener that has not fired yet. Returns whether it was still registered.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.inner.listeners.lock();
        match listeners.callbacks.iter().position(|(id, _)| *id == handle.0) {
            Some(index) => {
                listeners.callbacks.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// The number of listeners waiting for cancellation.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().callbacks.len()
    }

    /// Completes once the signal is cancelled.
    ///
    /// Dropping the returned future before it completes deregisters its listener.
    pub async fn cancelled(&self) {
        let (tx, rx) = oneshot::channel::<()>();
        let handle = match self.on_cancel(move || {
            let _ = tx.send(());
        }) {
            Some(handle) => handle,
            None => return,
        };
        let _guard = ListenerGuard { signal: self, handle };
        // The sender is only dropped after it has fired.
        let _ = rx.await;
    }

    fn cancel(&self) -> bool {
        let callbacks = {
            let mut listeners = self.inner.listeners.lock();
            if listeners.cancelled {
                return false;
            }
            listeners.cancelled = true;
            std::mem::take(&mut listeners.callbacks)
        };
        for (_, callback) in callbacks {
            callback();
        }
        true
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.inner.listeners.lock();
        f.debug_struct("CancellationSignal")
            .field("cancelled", &listeners.cancelled)
            .field("listeners", &listeners.callbacks.len())
            .finish()
    }
}

struct ListenerGuard<'a> {
    signal: &'a CancellationSignal,
    handle: ListenerHandle,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.signal.remove(self.handle);
    }
}

/// Owns a cancellation signal and the right to cancel it.
#[derive(Debug)]
pub struct CancellationController {
    signal: CancellationSignal,
}

impl Default for CancellationController {
    fn default() -> Self {
        CancellationController::new()
    }
}

impl CancellationController {
    pub fn new() -> CancellationController {
        CancellationController {
            signal: CancellationSignal::new(),
        }
    }

    /// A signal observing this controller.
    pub fn signal(&self) -> CancellationSignal {
        self.signal.clone()
    }

    /// Cancels the signal. Listeners run on the calling thread, outside of any lock.
    /// Returns `false` if the signal was already cancelled.
    pub fn cancel(&self) -> bool {
        self.signal.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}
