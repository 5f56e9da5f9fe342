//! In-process backend.
//!
//! Runs the synchronous [`Session`] on the blocking thread pool. The
//! cancel race only abandons *waiting* for a statement; a statement that
//! already reached SQLite still runs to completion, so a cancelled write
//! may have been applied. Callers that care wrap the work in a
//! transaction.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::session::Session;
use crate::value::{Row, SqlValue};

use super::{OpenParams, StorageBackend};

#[derive(Default)]
pub struct NativeBackend {
    session: Arc<parking_lot::Mutex<Session>>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run_blocking<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, StoreError> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let session = self.session.clone();
        let task = tokio::task::spawn_blocking(move || f(&session.lock()));
        tokio::select! {
            joined = task => joined
                .map_err(|e| StoreError::Transport(format!("blocking task failed: {e}")))?,
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
        }
    }
}

#[async_trait]
impl StorageBackend for NativeBackend {
    async fn open(&self, params: OpenParams, cancel: &CancellationToken) -> Result<(), StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.lock().open(&params))
            .await
            .map_err(|e| StoreError::Transport(format!("blocking task failed: {e}")))?
    }

    async fn close(&self, _cancel: &CancellationToken) -> Result<(), StoreError> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.lock().close())
            .await
            .map_err(|e| StoreError::Transport(format!("blocking task failed: {e}")))?
    }

    async fn exec(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let sql = sql.to_string();
        self.run_blocking(cancel, move |session| session.exec(&sql, &args))
            .await
    }

    async fn query(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        let sql = sql.to_string();
        self.run_blocking(cancel, move |session| session.query(&sql, &args))
            .await
    }

    async fn query_one(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, StoreError> {
        let sql = sql.to_string();
        self.run_blocking(cancel, move |session| session.query_one(&sql, &args))
            .await
    }
}
