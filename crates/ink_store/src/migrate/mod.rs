//! Schema migrations.
//!
//! Migrations are embedded SQL scripts, identified by zero-padded version
//! names so lexicographic order is application order. Each pending
//! migration runs inside its own transaction together with its bookkeeping
//! row; a failure rolls back that migration and leaves every earlier one
//! applied.

pub mod rekey;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::engine::{Database, DbExec};
use crate::error::StoreError;
use crate::value::SqlValue;

/// Value of `PRAGMA user_version` once the current schema generation is
/// in place. Files with version 0 predate the key-derivation change and
/// go through [`rekey`] first.
pub const SCHEMA_GENERATION: i64 = 1;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_changelog",
        sql: include_str!("sql/0001_changelog.sql"),
    },
    Migration {
        version: "0002_changelog_target_index",
        sql: include_str!("sql/0002_changelog_target_index.sql"),
    },
];

/// Bring the open database up to the latest schema. Safe to call on every
/// startup; already-applied migrations are skipped.
pub async fn migrate(db: &Database, cancel: &CancellationToken) -> Result<(), StoreError> {
    db.exec(
        "CREATE TABLE IF NOT EXISTS migrations (\n\
         \x20   id INTEGER PRIMARY KEY AUTOINCREMENT,\n\
         \x20   version TEXT NOT NULL UNIQUE,\n\
         \x20   applied_at TEXT NOT NULL\n\
         )",
        Vec::new(),
        cancel,
    )
    .await?;

    let last_applied = db
        .query_one(
            "SELECT version FROM migrations ORDER BY version DESC LIMIT 1",
            Vec::new(),
            cancel,
        )
        .await?
        .map(|row| row.text("version").map(str::to_string))
        .transpose()?;

    for migration in MIGRATIONS {
        if let Some(last) = &last_applied {
            if migration.version <= last.as_str() {
                continue;
            }
        }

        tracing::info!(version = migration.version, "applying migration");
        db.in_transaction(cancel, |tx| {
            Box::pin(async move {
                tx.exec(migration.sql, Vec::new(), cancel).await?;
                tx.exec(
                    "INSERT INTO migrations (version, applied_at) VALUES (?1, ?2)",
                    vec![
                        SqlValue::from(migration.version),
                        SqlValue::from_datetime(Utc::now()),
                    ],
                    cancel,
                )
                .await?;
                Ok(())
            })
        })
        .await
        .map_err(|err| StoreError::Migration {
            version: migration.version.to_string(),
            source: Box::new(err),
        })?;
    }

    db.exec(
        &format!("PRAGMA user_version = {SCHEMA_GENERATION}"),
        Vec::new(),
        cancel,
    )
    .await?;

    Ok(())
}
