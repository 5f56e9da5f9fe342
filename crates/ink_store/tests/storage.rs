//! End-to-end tests over a real SQLCipher file: migrations, transactions,
//! changelog pagination, backend equivalence and the key-scheme rekey.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ink_store::migrate::{self, rekey, SCHEMA_GENERATION};
use ink_store::{
    ChangelogRepo, Database, DbExec, NativeBackend, NewChange, OpenParams, SqlValue, StoreError,
    TargetType,
};

fn hex_key(byte: &str) -> String {
    byte.repeat(32)
}

fn db_path(dir: &tempfile::TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
}

async fn open_migrated(dir: &tempfile::TempDir) -> Database {
    let cancel = CancellationToken::new();
    let db = Database::new(Arc::new(NativeBackend::new()));
    db.open(
        OpenParams {
            file: db_path(dir, "store.db"),
            enc_key: hex_key("ab"),
            enable_tracing: false,
        },
        &cancel,
    )
    .await
    .unwrap();
    migrate::migrate(&db, &cancel).await.unwrap();
    db
}

async fn count_changelog(db: &dyn DbExec, cancel: &CancellationToken) -> i64 {
    db.query_one("SELECT COUNT(*) AS n FROM changelog", Vec::new(), cancel)
        .await
        .unwrap()
        .unwrap()
        .integer("n")
        .unwrap()
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let db = open_migrated(&dir).await;

    // A second run must not reapply anything.
    migrate::migrate(&db, &cancel).await.unwrap();

    let applied = db
        .query_one("SELECT COUNT(*) AS n FROM migrations", Vec::new(), &cancel)
        .await
        .unwrap()
        .unwrap()
        .integer("n")
        .unwrap();
    assert_eq!(applied, 2);

    let version = db
        .query_one("PRAGMA user_version", Vec::new(), &cancel)
        .await
        .unwrap()
        .unwrap()
        .integer("user_version")
        .unwrap();
    assert_eq!(version, SCHEMA_GENERATION);

    // The schema is actually usable.
    ChangelogRepo::append(
        &db,
        &NewChange::local("device-a", 1, TargetType::Memo, "m1", Some("{}".into())),
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(count_changelog(&db, &cancel).await, 1);
}

#[tokio::test]
async fn transaction_commits_on_ok_and_rolls_back_on_err() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let db = open_migrated(&dir).await;

    db.in_transaction(&cancel, |tx| {
        let cancel = cancel.clone();
        Box::pin(async move {
            ChangelogRepo::append(
                &tx,
                &NewChange::local("device-a", 1, TargetType::Memo, "m1", None),
                &cancel,
            )
            .await?;
            ChangelogRepo::append(
                &tx,
                &NewChange::local("device-a", 2, TargetType::Memo, "m1", None),
                &cancel,
            )
            .await?;
            Ok(())
        })
    })
    .await
    .unwrap();
    assert_eq!(count_changelog(&db, &cancel).await, 2);

    let err = db
        .in_transaction(&cancel, |tx| {
            let cancel = cancel.clone();
            Box::pin(async move {
                ChangelogRepo::append(
                    &tx,
                    &NewChange::local("device-a", 3, TargetType::Memo, "m2", None),
                    &cancel,
                )
                .await?;
                Err::<(), _>(StoreError::Validation("abort".to_string()))
            })
        })
        .await
        .unwrap_err();

    // The business error comes back unchanged and the write is gone.
    assert!(matches!(err, StoreError::Validation(msg) if msg == "abort"));
    assert_eq!(count_changelog(&db, &cancel).await, 2);
}

#[tokio::test]
async fn nested_transaction_joins_the_ambient_one() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let db = open_migrated(&dir).await;

    db.in_transaction(&cancel, |tx| {
        let cancel = cancel.clone();
        Box::pin(async move {
            ChangelogRepo::append(
                &tx,
                &NewChange::local("device-a", 1, TargetType::Setting, "s1", None),
                &cancel,
            )
            .await?;
            // Would deadlock on the transaction mutex if it opened its own.
            tx.in_transaction(&cancel, |inner| {
                let cancel = cancel.clone();
                Box::pin(async move {
                    ChangelogRepo::append(
                        &inner,
                        &NewChange::local("device-a", 2, TargetType::Setting, "s2", None),
                        &cancel,
                    )
                    .await
                })
            })
            .await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(count_changelog(&db, &cancel).await, 2);
}

#[tokio::test]
async fn pagination_is_stable_across_equal_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let db = open_migrated(&dir).await;

    // Five records sharing one timestamp; only the rowid breaks ties.
    let ts = "2025-06-01T10:00:00.000Z".parse().unwrap();
    for i in 0..5i64 {
        ChangelogRepo::append(
            &db,
            &NewChange {
                public_id: format!("rec-{i}"),
                source: "device-a".to_string(),
                revision: i,
                target_type: TargetType::Memo,
                target_id: format!("m{i}"),
                value: None,
                timestamp: ts,
            },
            &cancel,
        )
        .await
        .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = ChangelogRepo::list_unsynced(&db, cursor.as_ref(), 2, &cancel)
            .await
            .unwrap();
        seen.extend(page.records.iter().map(|r| r.public_id.clone()));
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    // No gaps, no duplicates, insertion order.
    assert_eq!(seen, vec!["rec-0", "rec-1", "rec-2", "rec-3", "rec-4"]);

    let err = ChangelogRepo::list_unsynced(&db, None, 0, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn marking_synced_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let db = open_migrated(&dir).await;

    let change = NewChange::local("device-a", 1, TargetType::Memo, "m1", None);
    let id = change.public_id.clone();
    ChangelogRepo::append(&db, &change, &cancel).await.unwrap();

    let n = ChangelogRepo::mark_synced(&db, std::slice::from_ref(&id), &cancel)
        .await
        .unwrap();
    assert_eq!(n, 1);

    let first = ChangelogRepo::list_for_target(&db, "m1", &cancel)
        .await
        .unwrap()
        .remove(0);
    assert!(first.is_synced);
    let original_stamp = first.synced_at.unwrap();

    // Re-marking touches nothing and keeps the original stamp.
    let n = ChangelogRepo::mark_synced(&db, std::slice::from_ref(&id), &cancel)
        .await
        .unwrap();
    assert_eq!(n, 0);
    let again = ChangelogRepo::list_for_target(&db, "m1", &cancel)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(again.synced_at.unwrap(), original_stamp);

    // Synced records leave the unsynced feed.
    let page = ChangelogRepo::list_unsynced(&db, None, 10, &cancel)
        .await
        .unwrap();
    assert!(page.records.is_empty());

    assert_eq!(
        ChangelogRepo::mark_synced(&db, &[], &cancel).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn list_for_target_is_keyed_by_id_alone() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let db = open_migrated(&dir).await;

    ChangelogRepo::append(
        &db,
        &NewChange::local("device-a", 1, TargetType::Memo, "t-1", None),
        &cancel,
    )
    .await
    .unwrap();
    ChangelogRepo::append(
        &db,
        &NewChange::local("device-a", 2, TargetType::Setting, "t-1", None),
        &cancel,
    )
    .await
    .unwrap();
    ChangelogRepo::append(
        &db,
        &NewChange::local("device-a", 1, TargetType::Attachment, "t-2", None),
        &cancel,
    )
    .await
    .unwrap();

    // Everything for the id, across target types; nothing else.
    let records = ChangelogRepo::list_for_target(&db, "t-1", &cancel)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.target_id == "t-1"));
    assert_eq!(records[0].target_type, TargetType::Memo);
    assert_eq!(records[1].target_type, TargetType::Setting);
}

#[tokio::test]
async fn delete_missing_record_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let db = open_migrated(&dir).await;

    let err = ChangelogRepo::delete(&db, "no-such-id", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let change = NewChange::local("device-a", 1, TargetType::Attachment, "a1", None);
    let id = change.public_id.clone();
    ChangelogRepo::append(&db, &change, &cancel).await.unwrap();
    ChangelogRepo::delete(&db, &id, &cancel).await.unwrap();
    assert_eq!(count_changelog(&db, &cancel).await, 0);
}

/// Both backends must be behaviorally indistinguishable for the same
/// statement script.
#[tokio::test]
async fn native_and_hosted_backends_agree() {
    async fn run_script(db: &Database, cancel: &CancellationToken) -> Vec<ink_store::Row> {
        db.exec(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, score REAL, data BLOB)",
            Vec::new(),
            cancel,
        )
        .await
        .unwrap();
        db.exec(
            "INSERT INTO items (label, score, data) VALUES (?1, ?2, ?3)",
            vec![
                SqlValue::from("first"),
                SqlValue::from(0.5),
                SqlValue::from(vec![1u8, 2, 3]),
            ],
            cancel,
        )
        .await
        .unwrap();
        db.exec(
            "INSERT INTO items (label, score, data) VALUES (?1, ?2, ?3)",
            vec![SqlValue::from("second"), SqlValue::Null, SqlValue::Null],
            cancel,
        )
        .await
        .unwrap();
        db.query("SELECT * FROM items ORDER BY id", Vec::new(), cancel)
            .await
            .unwrap()
    }

    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let native = Database::new(Arc::new(NativeBackend::new()));
    native
        .open(
            OpenParams {
                file: db_path(&dir, "native.db"),
                enc_key: hex_key("cd"),
                enable_tracing: false,
            },
            &cancel,
        )
        .await
        .unwrap();

    let hosted = Database::new(Arc::new(ink_store::spawn_hosted_engine().unwrap()));
    hosted
        .open(
            OpenParams {
                file: db_path(&dir, "hosted.db"),
                enc_key: hex_key("cd"),
                enable_tracing: false,
            },
            &cancel,
        )
        .await
        .unwrap();

    let native_rows = run_script(&native, &cancel).await;
    let hosted_rows = run_script(&hosted, &cancel).await;
    assert_eq!(native_rows, hosted_rows);
}

#[tokio::test]
async fn rekey_moves_a_legacy_file_to_the_derived_key_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let file = db_path(&dir, "legacy.db");
    let legacy_pass = "legacy-passphrase";
    let new_key = hex_key("ef");

    // A pre-migration file: passphrase-keyed, user_version 0.
    {
        let conn = rusqlite::Connection::open(&file).unwrap();
        conn.execute_batch(&format!("PRAGMA key = '{legacy_pass}';"))
            .unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (body TEXT);\n\
             INSERT INTO notes VALUES ('carried over');",
        )
        .unwrap();
    }

    let db = Database::new(Arc::new(NativeBackend::new()));
    let params = rekey::RekeyParams {
        file: file.clone(),
        current_key: legacy_pass.to_string(),
        new_key: new_key.clone(),
        enable_tracing: false,
    };
    assert!(rekey::run(&db, &params, &cancel).await.unwrap());

    // Contents survived and the marker is set.
    let body = db
        .query_one("SELECT body FROM notes", Vec::new(), &cancel)
        .await
        .unwrap()
        .unwrap()
        .text("body")
        .unwrap()
        .to_string();
    assert_eq!(body, "carried over");
    let version = db
        .query_one("PRAGMA user_version", Vec::new(), &cancel)
        .await
        .unwrap()
        .unwrap()
        .integer("user_version")
        .unwrap();
    assert_eq!(version, SCHEMA_GENERATION);
    migrate::migrate(&db, &cancel).await.unwrap();
    db.close(&cancel).await.unwrap();

    // A backup of the passphrase-keyed file stays behind.
    assert!(std::path::Path::new(&format!("{file}.bak")).exists());

    // The old passphrase no longer opens the file.
    let old = Database::new(Arc::new(NativeBackend::new()));
    assert!(old
        .open(
            OpenParams {
                file: file.clone(),
                enc_key: legacy_pass.to_string(),
                enable_tracing: false,
            },
            &cancel,
        )
        .await
        .is_err());

    // A second run under the new key is a no-op.
    let again = Database::new(Arc::new(NativeBackend::new()));
    let params = rekey::RekeyParams {
        file,
        current_key: new_key,
        new_key: hex_key("ef"),
        enable_tracing: false,
    };
    assert!(!rekey::run(&again, &params, &cancel).await.unwrap());
}

#[tokio::test]
async fn operations_queue_until_open_and_honor_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(Arc::new(NativeBackend::new())));

    // Issued before open: must queue, then run.
    let queued = {
        let db = db.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            db.query_one("SELECT 1 AS one", Vec::new(), &cancel).await
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!queued.is_finished());

    let cancel = CancellationToken::new();
    db.open(
        OpenParams {
            file: db_path(&dir, "gate.db"),
            enc_key: hex_key("aa"),
            enable_tracing: false,
        },
        &cancel,
    )
    .await
    .unwrap();

    let row = queued.await.unwrap().unwrap().unwrap();
    assert_eq!(row.integer("one").unwrap(), 1);

    // A cancelled token rejects without touching the database.
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        db.exec("SELECT 1", Vec::new(), &cancelled).await,
        Err(StoreError::Cancelled)
    ));
}
