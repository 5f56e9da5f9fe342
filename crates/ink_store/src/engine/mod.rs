//! Storage engine façade.
//!
//! [`Database`] is the one live storage handle of a process. It is backed
//! by a [`StorageBackend`] chosen at construction time — never negotiated
//! at runtime — and gates every operation behind the first successful
//! `open`. Top-level transactions are serialized per handle through a
//! [`NamedMutex`]; code already inside a transaction gets a
//! [`Transaction`] executor and reuses it, so nested repository calls
//! join the ambient transaction instead of deadlocking on the mutex.

mod hosted;
mod native;

pub use hosted::{spawn_hosted_engine, EngineHost, HostedBackend};
pub use native::NativeBackend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StoreError;
use crate::mutex::NamedMutex;
use crate::value::{Row, SqlValue};
use crate::BoxFuture;

/// Parameters for opening the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenParams {
    /// Path of the database file.
    pub file: String,
    /// Hex-encoded 32-byte key material (see `ink_crypto::keys`).
    pub enc_key: String,
    #[serde(default)]
    pub enable_tracing: bool,
}

/// Capability contract implemented identically by both backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn open(&self, params: OpenParams, cancel: &CancellationToken) -> Result<(), StoreError>;
    async fn close(&self, cancel: &CancellationToken) -> Result<(), StoreError>;
    async fn exec(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;
    async fn query(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError>;
    async fn query_one(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, StoreError>;
}

/// Statement executor, implemented by [`Database`] (ambient handle) and
/// [`Transaction`] (transaction-scoped handle). Repositories accept
/// `&dyn DbExec` so they participate in whichever the caller holds.
#[async_trait]
pub trait DbExec: Send + Sync {
    async fn exec(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;
    async fn query(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError>;
    async fn query_one(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, StoreError>;
}

/// The process-wide storage handle.
pub struct Database {
    backend: Arc<dyn StorageBackend>,
    instance_id: String,
    tx_mutex: NamedMutex,
    ready: watch::Sender<bool>,
    opening: AtomicBool,
}

impl Database {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            backend,
            instance_id: Uuid::new_v4().to_string(),
            tx_mutex: NamedMutex::new(),
            ready,
            opening: AtomicBool::new(false),
        }
    }

    /// Open the database. All other operations queue until this
    /// completes.
    ///
    /// # Panics
    /// Calling `open` while the handle is already open (or opening) is a
    /// programming error and panics. Reopening after [`Database::close`]
    /// is allowed; the encryption-scheme migration relies on it.
    pub async fn open(
        &self,
        params: OpenParams,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        if self.opening.swap(true, Ordering::SeqCst) {
            panic!("Database::open called on an already-open handle");
        }
        match self.backend.open(params, cancel).await {
            Ok(()) => {
                self.ready.send_replace(true);
                Ok(())
            }
            Err(err) => {
                self.opening.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    pub async fn close(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.ready.send_replace(false);
        let result = self.backend.close(cancel).await;
        self.opening.store(false, Ordering::SeqCst);
        result
    }

    async fn await_ready(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        if *self.ready.borrow() {
            return Ok(());
        }
        let mut rx = self.ready.subscribe();
        tokio::select! {
            res = rx.wait_for(|ready| *ready) => res
                .map(|_| ())
                .map_err(|_| StoreError::Transport("database handle dropped".to_string())),
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
        }
    }

    /// Run `f` inside one deferred transaction.
    ///
    /// Top-level transactions are serialized per handle; `f` receives a
    /// [`Transaction`] to thread into repositories. Commit on `Ok`,
    /// rollback on `Err`; a failing commit surfaces as
    /// `StoreError::Transaction` and the transaction counts as aborted.
    pub async fn in_transaction<'a, T, F>(
        &'a self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, StoreError>
    where
        T: Send + 'a,
        F: FnOnce(Transaction<'a>) -> BoxFuture<'a, Result<T, StoreError>> + Send + 'a,
    {
        self.await_ready(cancel).await?;

        let key = format!("db-tx/{}", self.instance_id);
        self.tx_mutex
            .run(&key, cancel, || async move {
                // Commit/rollback must not be abandoned halfway; they run
                // with a token that never fires.
                let no_cancel = CancellationToken::new();

                self.backend.exec("BEGIN", Vec::new(), &no_cancel).await?;

                let tx = Transaction { db: self };
                match f(tx).await {
                    Ok(value) => {
                        match self.backend.exec("COMMIT", Vec::new(), &no_cancel).await {
                            Ok(_) => Ok(value),
                            Err(err) => Err(StoreError::Transaction {
                                source: Box::new(err),
                            }),
                        }
                    }
                    Err(err) => {
                        if let Err(rollback_err) =
                            self.backend.exec("ROLLBACK", Vec::new(), &no_cancel).await
                        {
                            tracing::warn!(error = %rollback_err, "rollback failed");
                        }
                        Err(err)
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl DbExec for Database {
    async fn exec(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.await_ready(cancel).await?;
        self.backend.exec(sql, args, cancel).await
    }

    async fn query(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        self.await_ready(cancel).await?;
        self.backend.query(sql, args, cancel).await
    }

    async fn query_one(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, StoreError> {
        self.await_ready(cancel).await?;
        self.backend.query_one(sql, args, cancel).await
    }
}

/// Transaction-scoped executor handed to [`Database::in_transaction`]
/// bodies.
#[derive(Clone, Copy)]
pub struct Transaction<'a> {
    db: &'a Database,
}

impl<'a> Transaction<'a> {
    /// A call already inside a transaction reuses it instead of
    /// re-acquiring the transaction mutex (self-deadlock prevention).
    pub async fn in_transaction<T, F>(
        &self,
        _cancel: &CancellationToken,
        f: F,
    ) -> Result<T, StoreError>
    where
        T: Send + 'a,
        F: FnOnce(Transaction<'a>) -> BoxFuture<'a, Result<T, StoreError>> + Send + 'a,
    {
        f(*self).await
    }
}

#[async_trait]
impl DbExec for Transaction<'_> {
    async fn exec(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        self.db.backend.exec(sql, args, cancel).await
    }

    async fn query(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        self.db.backend.query(sql, args, cancel).await
    }

    async fn query_one(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, StoreError> {
        self.db.backend.query_one(sql, args, cancel).await
    }
}
