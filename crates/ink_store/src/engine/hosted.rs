//! Hosted backend.
//!
//! The [`Session`] lives in a separate context (a dedicated worker thread
//! here; any isolation boundary with the same envelope format works) and
//! is driven over the RPC bridge. [`EngineHost`] is the hosted side;
//! [`HostedBackend`] is the client-side [`StorageBackend`] that forwards
//! every operation as a bridge call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bridge::{serve, transport_pair, BridgeClient, BridgeHandler};
use crate::error::StoreError;
use crate::session::Session;
use crate::value::{Row, SqlValue};

use super::{OpenParams, StorageBackend};

#[derive(Debug, Serialize, Deserialize)]
struct StatementParams {
    sql: String,
    #[serde(default)]
    args: Vec<SqlValue>,
}

/// Hosted side of the engine: owns the session, answers bridge requests.
#[derive(Default)]
pub struct EngineHost {
    session: parking_lot::Mutex<Session>,
}

impl EngineHost {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BridgeHandler for EngineHost {
    async fn handle(&self, op: &str, params: Value) -> Result<Value, StoreError> {
        match op {
            "open" => {
                let params: OpenParams = serde_json::from_value(params)?;
                self.session.lock().open(&params)?;
                Ok(Value::Null)
            }
            "close" => {
                self.session.lock().close()?;
                Ok(Value::Null)
            }
            "exec" => {
                let p: StatementParams = serde_json::from_value(params)?;
                let n = self.session.lock().exec(&p.sql, &p.args)?;
                Ok(serde_json::to_value(n)?)
            }
            "query" => {
                let p: StatementParams = serde_json::from_value(params)?;
                let rows = self.session.lock().query(&p.sql, &p.args)?;
                Ok(serde_json::to_value(rows)?)
            }
            "query_one" => {
                let p: StatementParams = serde_json::from_value(params)?;
                let row = self.session.lock().query_one(&p.sql, &p.args)?;
                Ok(serde_json::to_value(row)?)
            }
            other => Err(StoreError::Validation(format!(
                "unknown request type {other}"
            ))),
        }
    }
}

/// Spawn the engine host on its own worker thread and return a backend
/// connected to it. Must be called from within a tokio runtime (the
/// bridge client spawns its reply reader there).
pub fn spawn_hosted_engine() -> Result<HostedBackend, StoreError> {
    let (client_side, host_side) = transport_pair();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    std::thread::Builder::new()
        .name("ink-sqlite-worker".to_string())
        .spawn(move || {
            runtime.block_on(serve(
                Arc::new(EngineHost::new()),
                host_side.requests,
                host_side.replies,
            ));
        })?;

    Ok(HostedBackend::new(client_side.into_client()))
}

/// Client-side backend speaking to an [`EngineHost`] over the bridge.
pub struct HostedBackend {
    client: BridgeClient,
}

impl HostedBackend {
    pub fn new(client: BridgeClient) -> Self {
        Self { client }
    }

    async fn statement(
        &self,
        op: &str,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Value, StoreError> {
        let params = serde_json::to_value(StatementParams {
            sql: sql.to_string(),
            args,
        })?;
        self.client.call(op, params, cancel).await
    }
}

#[async_trait]
impl StorageBackend for HostedBackend {
    async fn open(&self, params: OpenParams, cancel: &CancellationToken) -> Result<(), StoreError> {
        let params = serde_json::to_value(params)?;
        self.client.call("open", params, cancel).await?;
        Ok(())
    }

    async fn close(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        self.client.call("close", Value::Null, cancel).await?;
        Ok(())
    }

    async fn exec(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let data = self.statement("exec", sql, args, cancel).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn query(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        let data = self.statement("query", sql, args, cancel).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn query_one(
        &self,
        sql: &str,
        args: Vec<SqlValue>,
        cancel: &CancellationToken,
    ) -> Result<Option<Row>, StoreError> {
        let data = self.statement("query_one", sql, args, cancel).await?;
        Ok(serde_json::from_value(data)?)
    }
}
