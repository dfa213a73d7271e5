//! Table-access middleware against in-memory SQLite.
//!
//! This test suite covers:
//! - Table and view discovery
//! - Column selection, unknown-column warnings, and filters
//! - Result caching and invalidation after writes
//! - Chunked bulk insert, keyed bulk update, and per-chunk rollback
//! - Metadata and disposal

#![cfg(feature = "sqlite")]

use dbvault_core::middleware::SqliteBackend;
use dbvault_core::{
    AccessRequest, ConnectionMiddleware, DbVaultError, FilterValue, Frame, Result, RowCount,
    UpdateColumns, ValueKind, WritePolicy,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Opens `t(a INTEGER PRIMARY KEY, b TEXT)` holding (1, 'x') and (2, 'y').
async fn seeded(policy: WritePolicy) -> Result<ConnectionMiddleware> {
    let backend = SqliteBackend::connect(":memory:").await?;
    let pool = backend.pool().clone();

    sqlx::query("CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT)")
        .execute(&pool)
        .await?;
    sqlx::query("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE VIEW t_upper AS SELECT a, upper(b) AS b FROM t")
        .execute(&pool)
        .await?;

    ConnectionMiddleware::open_with_policy(Box::new(backend), false, None, policy).await
}

fn rows(frame: &Frame) -> Vec<Vec<Value>> {
    frame.rows().to_vec()
}

#[tokio::test]
async fn test_discovers_tables_and_views() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;

    assert_eq!(db.tables(), vec!["t", "t_upper"]);
    assert!(matches!(
        db.table("missing"),
        Err(DbVaultError::NoSuchTable { .. })
    ));

    let view = db.table("t_upper")?.all().await?;
    assert_eq!(rows(&view), vec![vec![json!(1), json!("X")], vec![json!(2), json!("Y")]]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_columns_are_dropped() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let table = db.table("t")?;

    let frame = table
        .call(&AccessRequest::new().columns(["a", "zzz"]))
        .await?;
    assert_eq!(frame.columns(), ["a"]);
    assert_eq!(rows(&frame), vec![vec![json!(1)], vec![json!(2)]]);
    assert_eq!(frame.warnings(), ["Columns [zzz] are not in table t"]);

    let err = table
        .call(&AccessRequest::new().columns(["zzz"]))
        .await
        .unwrap_err();
    assert!(matches!(err, DbVaultError::NoSuchColumn { .. }));
    assert_eq!(err.to_string(), "Columns [zzz] are not in table t");
    Ok(())
}

#[tokio::test]
async fn test_filters_and_row_limits() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let table = db.table("t")?;

    let equal = table.call(&AccessRequest::new().filter("a", 2)).await?;
    assert_eq!(rows(&equal), vec![vec![json!(2), json!("y")]]);

    let member = table
        .call(&AccessRequest::new().filter("b", vec!["x", "y", "w"]))
        .await?;
    assert_eq!(member.shape(), (2, 2));

    let none = table
        .call(&AccessRequest::new().filter("b", Vec::<String>::new()))
        .await?;
    assert!(none.is_empty());

    let null = table
        .call(&AccessRequest::new().filter("b", Value::Null))
        .await?;
    assert!(null.is_empty());

    let limited = table.call(&AccessRequest::new().rows(1)).await?;
    assert_eq!(limited.shape(), (1, 2));

    let bad_filter = table.call(&AccessRequest::new().filter("zzz", 1)).await;
    assert!(matches!(bad_filter, Err(DbVaultError::NoSuchColumn { .. })));
    Ok(())
}

#[tokio::test]
async fn test_identical_requests_share_one_frame() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let table = db.table("t")?;
    let request = AccessRequest::new().columns(["b"]).filter("a", vec![1, 2]);

    let first = table.call(&request).await?;
    let second = table.call(&request).await?;
    assert!(Arc::ptr_eq(&first, &second));

    let different = table.call(&AccessRequest::new().columns(["b"])).await?;
    assert!(!Arc::ptr_eq(&first, &different));
    Ok(())
}

#[tokio::test]
async fn test_bulk_update_by_key() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let before = db.table("t")?.all().await?;

    let input = Frame::new(
        vec!["a".to_string(), "b".to_string()],
        vec![vec![json!(1), json!("z")]],
    )?;
    let updated = db.update("t")?.call(&input, vec!["a"], vec!["b"]).await?;
    assert_eq!(updated, 1);

    let after = db.table("t")?.all().await?;
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(
        rows(&after),
        vec![vec![json!(1), json!("z")], vec![json!(2), json!("y")]]
    );
    Ok(())
}

#[tokio::test]
async fn test_bulk_update_with_column_mapping() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let input = Frame::new(
        vec!["id".to_string(), "label".to_string()],
        vec![vec![json!(2), json!("w")], vec![json!(99), json!("nobody")]],
    )?;

    let updated = db
        .update("t")?
        .call(
            &input,
            UpdateColumns::mapping([("a", "id")]),
            UpdateColumns::mapping([("b", "label")]),
        )
        .await?;
    assert_eq!(updated, 1);

    let row = db.table("t")?.call(&AccessRequest::new().filter("a", 2)).await?;
    assert_eq!(row.get(0, "b"), Some(&json!("w")));
    Ok(())
}

#[tokio::test]
async fn test_bulk_insert_in_chunks() -> Result<()> {
    let db = seeded(WritePolicy::default().with_chunk_size(2)).await?;
    let input = Frame::new(
        vec!["a".to_string(), "b".to_string()],
        (10..15).map(|i| vec![json!(i), json!(format!("n{}", i))]).collect(),
    )?;

    let inserted = db.insert("t")?.call(&input).await?;
    assert_eq!(inserted, 5);

    let descriptor = db.metadata("t")?.describe().await?;
    assert_eq!(descriptor.row_count, RowCount::Known(7));
    Ok(())
}

#[tokio::test]
async fn test_failed_chunk_rolls_back_and_reports_progress() -> Result<()> {
    let policy = WritePolicy::default()
        .with_chunk_size(2)
        .with_retry_delay(Duration::ZERO);
    let db = seeded(policy).await?;

    // The second chunk collides with the existing primary key 1.
    let input = Frame::new(
        vec!["a".to_string(), "b".to_string()],
        vec![
            vec![json!(10), json!("p")],
            vec![json!(11), json!("q")],
            vec![json!(12), json!("r")],
            vec![json!(1), json!("dup")],
        ],
    )?;

    let err = db.insert("t")?.call(&input).await.unwrap_err();
    match err {
        DbVaultError::Operational {
            rows_completed,
            last_successful,
            ..
        } => {
            assert_eq!(rows_completed, 2);
            assert_eq!(last_successful.as_deref(), Some(r#"{"a":11,"b":"q"}"#));
        }
        other => panic!("expected an operational error, got {other}"),
    }

    let present = db.table("t")?.call(&AccessRequest::new().columns(["a"])).await?;
    assert_eq!(
        rows(&present),
        vec![vec![json!(1)], vec![json!(2)], vec![json!(10)], vec![json!(11)]]
    );
    Ok(())
}

#[tokio::test]
async fn test_partial_insert_refreshes_cached_reads() -> Result<()> {
    let policy = WritePolicy::default()
        .with_chunk_size(2)
        .with_retry_delay(Duration::ZERO);
    let db = seeded(policy).await?;
    let table = db.table("t")?;
    let request = AccessRequest::new().columns(["a"]);

    let before = table.call(&request).await?;
    assert_eq!(before.shape(), (2, 1));

    let input = Frame::new(
        vec!["a".to_string()],
        vec![vec![json!(10)], vec![json!(11)], vec![json!(12)], vec![json!(1)]],
    )?;
    assert!(db.insert("t")?.call(&input).await.is_err());

    let after = table.call(&request).await?;
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(
        rows(&after),
        vec![vec![json!(1)], vec![json!(2)], vec![json!(10)], vec![json!(11)]]
    );
    Ok(())
}

#[tokio::test]
async fn test_equality_on_array_is_not_membership() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let table = db.table("t")?;

    let member = table.call(&AccessRequest::new().filter("a", vec![1, 2])).await?;
    let equal = table
        .call(&AccessRequest::new().filter("a", FilterValue::Eq(json!([1, 2]))))
        .await?;

    assert!(!Arc::ptr_eq(&member, &equal));
    assert_eq!(member.shape(), (2, 2));
    assert!(equal.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_metadata_describes_columns() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let descriptor = db.metadata("t")?.describe().await?;

    assert_eq!(descriptor.table_name, "t");
    assert_eq!(descriptor.column_names(), vec!["a", "b"]);
    assert_eq!(descriptor.primary_key(), vec!["a"]);
    assert_eq!(descriptor.columns[0].value_kind, ValueKind::Integer);
    assert_eq!(descriptor.columns[1].value_kind, ValueKind::Text);
    assert!(descriptor.columns[1].nullable);
    assert_eq!(descriptor.row_count, RowCount::Known(2));
    Ok(())
}

#[tokio::test]
async fn test_close_disposes_accessors() -> Result<()> {
    let db = seeded(WritePolicy::default()).await?;
    let stale = db.table("t")?.clone();
    stale.all().await?;

    db.close().await;

    assert!(matches!(stale.all().await, Err(DbVaultError::Disposed)));
    assert!(matches!(
        db.metadata("t")?.describe().await,
        Err(DbVaultError::Disposed)
    ));
    Ok(())
}

#[tokio::test]
async fn test_connect_only_exposes_raw_connection() -> Result<()> {
    let backend = SqliteBackend::connect(":memory:").await?;
    let db = ConnectionMiddleware::open(Box::new(backend), true, None).await?;

    assert!(db.tables().is_empty());
    let connection = db.connection()?;
    assert!(connection.list_tables(None).await?.is_empty());
    Ok(())
}
