//! Changelog repository.
//!
//! Every domain mutation leaves one append-only record here, written in
//! the same transaction as the mutation itself. The sync process reads
//! unsynced records in `(timestamp, id)` order, pushes them, and stamps
//! them synced; records pulled from the remote are appended unapplied and
//! stamped applied once folded into the domain tables. Pagination is
//! keyset-based so records inserted mid-sync never shift a page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::DbExec;
use crate::error::StoreError;
use crate::value::{Row, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Memo,
    Attachment,
    Setting,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Memo => "memo",
            TargetType::Attachment => "attachment",
            TargetType::Setting => "setting",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "memo" => Ok(TargetType::Memo),
            "attachment" => Ok(TargetType::Attachment),
            "setting" => Ok(TargetType::Setting),
            other => Err(StoreError::Validation(format!(
                "unknown target type: {other}"
            ))),
        }
    }
}

/// A persisted changelog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Local rowid; never leaves this device.
    pub id: i64,
    /// Stable identity across devices.
    pub public_id: String,
    /// Device/client that produced the change.
    pub source: String,
    pub revision: i64,
    pub target_type: TargetType,
    pub target_id: String,
    /// JSON payload of the change; `None` for deletions.
    pub value: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub is_applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.integer("id")?,
            public_id: row.text("public_id")?.to_string(),
            source: row.text("source")?.to_string(),
            revision: row.integer("revision")?,
            target_type: TargetType::parse(row.text("target_type")?)?,
            target_id: row.text("target_id")?.to_string(),
            value: row.opt_text("value")?.map(str::to_string),
            timestamp: row.datetime("timestamp")?,
            is_synced: row.boolean("is_synced")?,
            synced_at: row.opt_datetime("synced_at")?,
            is_applied: row.boolean("is_applied")?,
            applied_at: row.opt_datetime("applied_at")?,
        })
    }
}

/// A record to append. Locally produced changes use [`NewChange::local`];
/// records pulled from the remote arrive with their identity and
/// timestamp already fixed.
#[derive(Debug, Clone)]
pub struct NewChange {
    pub public_id: String,
    pub source: String,
    pub revision: i64,
    pub target_type: TargetType,
    pub target_id: String,
    pub value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewChange {
    pub fn local(
        source: impl Into<String>,
        revision: i64,
        target_type: TargetType,
        target_id: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self {
            public_id: Uuid::new_v4().to_string(),
            source: source.into(),
            revision,
            target_type,
            target_id: target_id.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Keyset cursor over `(timestamp, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub id: i64,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<ChangeRecord>,
    /// Present only when the page is full; a short page is the last one.
    pub next: Option<Cursor>,
}

const COLUMNS: &str = "id, public_id, source, revision, target_type, target_id, \
                       value, timestamp, is_synced, synced_at, is_applied, applied_at";

pub struct ChangelogRepo;

impl ChangelogRepo {
    pub async fn append(
        db: &dyn DbExec,
        change: &NewChange,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        db.exec(
            "INSERT INTO changelog \
             (public_id, source, revision, target_type, target_id, value, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            vec![
                SqlValue::from(change.public_id.clone()),
                SqlValue::from(change.source.clone()),
                SqlValue::from(change.revision),
                SqlValue::from(change.target_type.as_str()),
                SqlValue::from(change.target_id.clone()),
                SqlValue::from(change.value.clone()),
                SqlValue::from_datetime(change.timestamp),
            ],
            cancel,
        )
        .await?;
        Ok(())
    }

    pub async fn list_unsynced(
        db: &dyn DbExec,
        cursor: Option<&Cursor>,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Page, StoreError> {
        Self::list_pending(db, "is_synced", cursor, page_size, cancel).await
    }

    pub async fn list_unapplied(
        db: &dyn DbExec,
        cursor: Option<&Cursor>,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Page, StoreError> {
        Self::list_pending(db, "is_applied", cursor, page_size, cancel).await
    }

    async fn list_pending(
        db: &dyn DbExec,
        flag_column: &str,
        cursor: Option<&Cursor>,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Page, StoreError> {
        if page_size == 0 {
            return Err(StoreError::Validation(
                "page size must be positive".to_string(),
            ));
        }

        // Keyset predicate: strictly after the cursor position, with id as
        // the tie-breaker for equal timestamps.
        let sql = format!(
            "SELECT {COLUMNS} FROM changelog \
             WHERE {flag_column} = 0 \
               AND (?1 IS NULL OR timestamp > ?1 OR (timestamp = ?1 AND id > ?2)) \
             ORDER BY timestamp ASC, id ASC \
             LIMIT ?3"
        );
        let rows = db
            .query(
                &sql,
                vec![
                    SqlValue::from_opt_datetime(cursor.map(|c| c.timestamp)),
                    SqlValue::from(cursor.map(|c| c.id)),
                    SqlValue::from(page_size),
                ],
                cancel,
            )
            .await?;

        let records = rows
            .iter()
            .map(ChangeRecord::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let next = if records.len() == page_size as usize {
            records.last().map(|last| Cursor {
                timestamp: last.timestamp,
                id: last.id,
            })
        } else {
            None
        };

        Ok(Page { records, next })
    }

    pub async fn mark_synced(
        db: &dyn DbExec,
        public_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        Self::mark(db, "is_synced", "synced_at", public_ids, cancel).await
    }

    pub async fn mark_applied(
        db: &dyn DbExec,
        public_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        Self::mark(db, "is_applied", "applied_at", public_ids, cancel).await
    }

    async fn mark(
        db: &dyn DbExec,
        flag_column: &str,
        stamp_column: &str,
        public_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        if public_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = (0..public_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        // The flag guard makes re-marking a no-op, preserving the original
        // stamp.
        let sql = format!(
            "UPDATE changelog SET {flag_column} = 1, {stamp_column} = ?1 \
             WHERE public_id IN ({placeholders}) AND {flag_column} = 0"
        );

        let mut args = Vec::with_capacity(public_ids.len() + 1);
        args.push(SqlValue::from_datetime(Utc::now()));
        args.extend(public_ids.iter().map(|id| SqlValue::from(id.clone())));

        db.exec(&sql, args, cancel).await
    }

    /// All records touching one target id, oldest first, regardless of
    /// target type.
    pub async fn list_for_target(
        db: &dyn DbExec,
        target_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM changelog \
             WHERE target_id = ?1 \
             ORDER BY timestamp ASC, id ASC"
        );
        let rows = db
            .query(&sql, vec![SqlValue::from(target_id)], cancel)
            .await?;
        rows.iter().map(ChangeRecord::from_row).collect()
    }

    pub async fn delete(
        db: &dyn DbExec,
        public_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let n = db
            .exec(
                "DELETE FROM changelog WHERE public_id = ?1",
                vec![SqlValue::from(public_id)],
                cancel,
            )
            .await?;
        if n == 0 {
            return Err(StoreError::NotFound(format!(
                "changelog record {public_id}"
            )));
        }
        Ok(())
    }
}
