//! ink_store — the storage substrate of Inkbase
//!
//! Every domain mutation is written to a local SQLCipher database together
//! with a changelog record describing it, inside one transaction. A sync
//! process later pushes unsynced records to the remote and folds pulled
//! records back in; the substrate here only guarantees durability,
//! ordering and pagination of those records.
//!
//! # Architecture
//! - [`engine::Database`] is the single storage handle per process. It is
//!   backed by either [`engine::NativeBackend`] (direct connection) or
//!   [`engine::HostedBackend`] (the engine session lives on a dedicated
//!   worker thread, reached via the [`bridge`] message protocol). Both
//!   satisfy the same [`engine::StorageBackend`] contract.
//! - Transactions are serialized per handle via a [`mutex::NamedMutex`];
//!   repositories take a `&dyn DbExec` so nested calls join the ambient
//!   transaction instead of opening their own.
//! - [`kv::EncryptedKvStore`] envelope-encrypts every value before it
//!   reaches the injected byte backend; tokens and sync cursors live there.
//! - [`migrate`] applies schema migrations exactly once at startup and
//!   hosts the (higher-risk) encryption-scheme migration.
//!
//! Cancellation is cooperative: every suspending operation takes a
//! `tokio_util::sync::CancellationToken` and races it against the
//! underlying call. Cancelling never undoes a side effect that already
//! applied; it only changes what the caller observes.

pub mod bridge;
pub mod changelog;
pub mod engine;
pub mod error;
pub mod kv;
pub mod migrate;
pub mod mutex;
pub mod session;
pub mod token;
pub mod value;

pub use changelog::{ChangeRecord, ChangelogRepo, Cursor, NewChange, Page, TargetType};
pub use engine::{
    spawn_hosted_engine, Database, DbExec, HostedBackend, NativeBackend, OpenParams,
    StorageBackend, Transaction,
};
pub use error::{ErrorKind, StoreError, WireError};
pub use kv::{EncryptedKvStore, KvBackend, MemoryKvBackend};
pub use mutex::NamedMutex;
pub use token::{AccessTokenController, AccessTokenState, AuthApiClient, Credentials};
pub use value::{Row, SqlValue};

/// Boxed future used by the transaction closures.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
