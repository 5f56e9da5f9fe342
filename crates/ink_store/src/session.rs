//! The actual SQLCipher session.
//!
//! Synchronous and single-connection; backends decide where it lives (on
//! a dedicated worker thread behind the bridge, or called directly via
//! `spawn_blocking`). All statements flow through [`Session::exec`],
//! [`Session::query`] and [`Session::query_one`] with transport-safe
//! [`SqlValue`] arguments.

use rusqlite::Connection;

use crate::engine::OpenParams;
use crate::error::StoreError;
use crate::value::{Row, SqlValue};

#[derive(Default)]
pub struct Session {
    conn: Option<Connection>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Open (or create) the database file and unlock it.
    ///
    /// The key pragma is applied in raw-hex form first (`x'…'`, bypassing
    /// SQLCipher's KDF because the key is already Argon2id-derived). If
    /// the database cannot be read that way, the connection is reopened
    /// and the key material is applied as a passphrase instead, which
    /// covers files created by the legacy encryption scheme. SQLCipher
    /// only consumes the key pragma at first page access, so the retry
    /// needs a fresh connection.
    pub fn open(&mut self, params: &OpenParams) -> Result<(), StoreError> {
        let mut conn = Connection::open(&params.file)?;

        conn.execute_batch(&format!("PRAGMA key = \"x'{}'\";", params.enc_key))?;

        if read_user_version(&conn).is_err() {
            drop(conn);
            conn = Connection::open(&params.file)?;
            conn.execute_batch(&format!("PRAGMA key = '{}';", params.enc_key))?;
            read_user_version(&conn)?;
        }

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if params.enable_tracing {
            tracing::debug!(file = %params.file, "opened database with cipher tracing");
            conn.execute_batch(
                "PRAGMA cipher_log_level = DEBUG;\n\
                 PRAGMA cipher_log = stdout;",
            )?;
        } else {
            tracing::debug!(file = %params.file, "opened database");
        }

        self.conn = Some(conn);
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("closing database");
            conn.close().map_err(|(_, err)| StoreError::Database(err))?;
        }
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::Validation("database is not open".to_string()))
    }

    /// Execute a statement, returning the number of affected rows.
    ///
    /// Without arguments the SQL may contain multiple statements (used by
    /// migration scripts and transaction control).
    pub fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        if args.is_empty() {
            conn.execute_batch(sql)?;
            Ok(conn.changes())
        } else {
            let n = conn.execute(sql, rusqlite::params_from_iter(to_sqlite_args(args)))?;
            Ok(n as u64)
        }
    }

    pub fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(to_sqlite_args(args)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(i)?;
                columns.push((name.clone(), SqlValue::from(value)));
            }
            out.push(Row::from_columns(columns));
        }
        Ok(out)
    }

    pub fn query_one(&self, sql: &str, args: &[SqlValue]) -> Result<Option<Row>, StoreError> {
        let mut rows = self.query(sql, args)?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }
}

fn to_sqlite_args(args: &[SqlValue]) -> Vec<rusqlite::types::Value> {
    args.iter()
        .map(|arg| rusqlite::types::Value::from(arg.clone()))
        .collect()
}

fn read_user_version(conn: &Connection) -> Result<i64, StoreError> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}
