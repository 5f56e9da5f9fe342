//! Encryption-scheme migration.
//!
//! Legacy database files are keyed through SQLCipher's own passphrase KDF.
//! Current files use a pre-derived raw key (see `ink_crypto::kdf`) and
//! carry `PRAGMA user_version >= 1` as the marker. This module moves a
//! legacy file to the new scheme by exporting it into a sibling file keyed
//! with the new key, then swapping the files on disk.
//!
//! The swap is not crash-atomic: between writing the `.bak` copy and
//! overwriting the original there is a window where a crash leaves the
//! original half-replaced. The `.bak` file is the recovery path.

use std::fs;

use tokio_util::sync::CancellationToken;

use crate::engine::{Database, DbExec, OpenParams};
use crate::error::StoreError;

use super::SCHEMA_GENERATION;

#[derive(Debug, Clone)]
pub struct RekeyParams {
    /// Path of the database file.
    pub file: String,
    /// Key material the file is currently readable with.
    pub current_key: String,
    /// Hex-encoded derived key to re-encrypt under.
    pub new_key: String,
    pub enable_tracing: bool,
}

/// Open `db` and, if the file still uses the legacy scheme, re-encrypt it
/// under `new_key`. Returns `true` when a rekey was performed. Either way
/// the database ends up open: under `new_key` after a rekey, under
/// `current_key` when the file was already migrated.
pub async fn run(
    db: &Database,
    params: &RekeyParams,
    cancel: &CancellationToken,
) -> Result<bool, StoreError> {
    db.open(
        OpenParams {
            file: params.file.clone(),
            enc_key: params.current_key.clone(),
            enable_tracing: params.enable_tracing,
        },
        cancel,
    )
    .await?;

    let marker = db
        .query_one("PRAGMA user_version", Vec::new(), cancel)
        .await?
        .map(|row| row.integer("user_version"))
        .transpose()?
        .unwrap_or(0);
    if marker >= SCHEMA_GENERATION {
        tracing::debug!(file = %params.file, "encryption scheme already current");
        return Ok(false);
    }

    tracing::info!(file = %params.file, "migrating database to derived-key scheme");

    let export_file = format!("{}.rekey", params.file);
    // A stale export from an interrupted earlier run must not be appended
    // into.
    if fs::metadata(&export_file).is_ok() {
        fs::remove_file(&export_file)?;
    }

    db.exec(
        &format!("ATTACH DATABASE '{export_file}' AS rekeyed KEY \"x'{}'\";", params.new_key),
        Vec::new(),
        cancel,
    )
    .await?;
    db.query("SELECT sqlcipher_export('rekeyed')", Vec::new(), cancel)
        .await?;
    db.exec(
        &format!("PRAGMA rekeyed.user_version = {SCHEMA_GENERATION};"),
        Vec::new(),
        cancel,
    )
    .await?;
    db.exec("DETACH DATABASE rekeyed;", Vec::new(), cancel)
        .await?;

    db.close(cancel).await?;

    fs::copy(&params.file, format!("{}.bak", params.file))?;
    fs::copy(&export_file, &params.file)?;
    fs::remove_file(&export_file)?;

    db.open(
        OpenParams {
            file: params.file.clone(),
            enc_key: params.new_key.clone(),
            enable_tracing: params.enable_tracing,
        },
        cancel,
    )
    .await?;

    Ok(true)
}
