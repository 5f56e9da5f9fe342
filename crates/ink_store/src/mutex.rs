//! Process-local named mutex.
//!
//! A critical section is identified by an arbitrary string key; at most
//! one holder per key runs at a time within the process. Waiters queue on
//! the underlying `tokio::sync::Mutex` (FIFO-ish; no cross-process
//! guarantee).
//!
//! Cancellation semantics: a token that is already cancelled prevents the
//! body from ever running; a token that fires while waiting abandons the
//! acquisition; a token that fires while the body runs lets the body
//! finish (it owns its own cancellation awareness) but the overall call
//! reports `Cancelled` instead of the body's result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

#[derive(Default)]
pub struct NamedMutex {
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NamedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run `body` while holding the mutex identified by `key`.
    ///
    /// The lock is released unconditionally once `body` settles.
    pub async fn run<T, F, Fut>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let lock = self.lock_for(key);
        let guard = tokio::select! {
            guard = lock.lock() => guard,
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
        };

        let result = body().await;
        drop(guard);

        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        result
    }

    /// Run `body` only if the mutex is immediately available.
    ///
    /// Returns `Ok(None)` without invoking `body` when the key is busy.
    pub async fn try_run<T, F, Fut>(&self, key: &str, body: F) -> Result<Option<T>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let lock = self.lock_for(key);
        let guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };

        let result = body().await;
        drop(guard);
        result.map(Some)
    }
}
