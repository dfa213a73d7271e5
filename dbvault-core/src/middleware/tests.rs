use super::*;
use crate::models::{ColumnDescriptor, RowCount, ValueKind};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::time::Duration;
use tracing_test::traced_test;

/// Records what the middleware asks of a backend serving `t(a, b)`.
#[derive(Default)]
struct Recorder {
    chunks: Mutex<Vec<usize>>,
    failures: Mutex<VecDeque<DbVaultError>>,
    fetches: Mutex<usize>,
    closed: Mutex<bool>,
}

struct MockBackend {
    recorder: Arc<Recorder>,
    rows: Vec<Vec<Value>>,
    count_fails: bool,
}

impl MockBackend {
    fn new(recorder: &Arc<Recorder>) -> Self {
        Self {
            recorder: Arc::clone(recorder),
            rows: vec![vec![json!(1), json!("x")], vec![json!(2), json!("y")]],
            count_fails: false,
        }
    }
}

fn column(name: &str, declared: &str) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        declared_type: declared.to_string(),
        value_kind: ValueKind::from_declared_type(declared),
        primary_key: name == "a",
        nullable: name != "a",
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn default_schema(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn list_tables(&self, _schema: Option<&str>) -> Result<Vec<String>> {
        Ok(vec!["t".to_string()])
    }

    async fn list_views(&self, _schema: Option<&str>) -> Result<Vec<String>> {
        Ok(vec!["v".to_string()])
    }

    async fn describe_columns(
        &self,
        table: &str,
        _schema: Option<&str>,
    ) -> Result<Vec<ColumnDescriptor>> {
        match table {
            "t" | "v" => Ok(vec![column("a", "INTEGER"), column("b", "TEXT")]),
            other => Err(DbVaultError::NoSuchTable {
                table: other.to_string(),
            }),
        }
    }

    async fn fetch(&self, _statement: &Statement, columns: &[String]) -> Result<Vec<Vec<Value>>> {
        *self.recorder.fetches.lock().unwrap() += 1;
        Ok(self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| if c == "a" { row[0].clone() } else { row[1].clone() })
                    .collect()
            })
            .collect())
    }

    async fn execute_many(&self, _sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        self.recorder.chunks.lock().unwrap().push(rows.len());
        if let Some(error) = self.recorder.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(rows.len() as u64)
    }

    async fn count_rows(&self, _table: &str, _schema: Option<&str>) -> Result<u64> {
        if self.count_fails {
            return Err(DbVaultError::configuration("count refused"));
        }
        Ok(self.rows.len() as u64)
    }

    async fn close(&self) {
        *self.recorder.closed.lock().unwrap() = true;
    }
}

fn frame(count: i64) -> Frame {
    Frame::new(
        vec!["a".to_string(), "b".to_string()],
        (0..count).map(|i| vec![json!(i), json!(format!("row{}", i))]).collect(),
    )
    .unwrap()
}

fn quick_policy(chunk_size: usize) -> WritePolicy {
    WritePolicy::default()
        .with_chunk_size(chunk_size)
        .with_retry_delay(Duration::ZERO)
}

#[cfg(feature = "sqlx")]
fn transient() -> DbVaultError {
    DbVaultError::Database(sqlx::Error::PoolTimedOut)
}

#[tokio::test]
async fn test_open_discovers_tables_and_views() {
    let recorder = Arc::new(Recorder::default());
    let db = ConnectionMiddleware::open(Box::new(MockBackend::new(&recorder)), false, None)
        .await
        .unwrap();

    assert_eq!(db.tables(), vec!["t", "v"]);
    assert!(db.table("t").is_ok());
    assert!(db.metadata("v").is_ok());
    assert!(matches!(
        db.table("nope"),
        Err(DbVaultError::NoSuchTable { ref table }) if table == "nope"
    ));
}

#[tokio::test]
async fn test_connect_only_skips_discovery() {
    let recorder = Arc::new(Recorder::default());
    let db = ConnectionMiddleware::open(Box::new(MockBackend::new(&recorder)), true, Some("s"))
        .await
        .unwrap();

    assert!(db.is_connect_only());
    assert!(db.tables().is_empty());
    assert_eq!(db.schema(), Some("s"));
    assert!(db.connection().is_ok());
}

#[tokio::test]
async fn test_repeated_reads_hit_the_cache() {
    let recorder = Arc::new(Recorder::default());
    let db = ConnectionMiddleware::open(Box::new(MockBackend::new(&recorder)), false, None)
        .await
        .unwrap();
    let table = db.table("t").unwrap();

    let request = AccessRequest::new().columns(["b"]);
    let first = table.call(&request).await.unwrap();
    let second = table.call(&request).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*recorder.fetches.lock().unwrap(), 1);

    let other = table.call(&AccessRequest::new().rows(1)).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(*recorder.fetches.lock().unwrap(), 2);
}

#[traced_test]
#[tokio::test]
async fn test_unknown_columns_are_logged() {
    let recorder = Arc::new(Recorder::default());
    let db = ConnectionMiddleware::open(Box::new(MockBackend::new(&recorder)), false, None)
        .await
        .unwrap();

    let frame = db
        .table("t")
        .unwrap()
        .call(&AccessRequest::new().columns(["a", "zzz"]))
        .await
        .unwrap();

    assert_eq!(frame.columns(), ["a"]);
    assert!(logs_contain("Columns [zzz] are not in table t"));
}

#[tokio::test]
async fn test_writes_invalidate_cached_reads() {
    let recorder = Arc::new(Recorder::default());
    let db = ConnectionMiddleware::open(Box::new(MockBackend::new(&recorder)), false, None)
        .await
        .unwrap();

    let before = db.table("t").unwrap().all().await.unwrap();
    db.insert("t").unwrap().call(&frame(1)).await.unwrap();
    let after = db.table("t").unwrap().all().await.unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(*recorder.fetches.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_metadata_reports_unavailable_count() {
    let recorder = Arc::new(Recorder::default());
    let mut backend = MockBackend::new(&recorder);
    backend.count_fails = true;
    let db = ConnectionMiddleware::open(Box::new(backend), false, None)
        .await
        .unwrap();

    let descriptor = db.metadata("t").unwrap().describe().await.unwrap();
    assert_eq!(descriptor.column_names(), vec!["a", "b"]);
    assert_eq!(descriptor.primary_key(), vec!["a"]);
    assert_eq!(descriptor.row_count, RowCount::Unavailable);
    assert_eq!(descriptor.row_count.to_string(), "N/A");
}

#[tokio::test]
async fn test_close_disposes_every_accessor() {
    let recorder = Arc::new(Recorder::default());
    let db = ConnectionMiddleware::open(Box::new(MockBackend::new(&recorder)), false, None)
        .await
        .unwrap();
    let stale = db.table("t").unwrap().clone();
    let stale_insert = db.insert("t").unwrap().clone();

    stale.all().await.unwrap();
    db.close().await;
    db.close().await;

    assert!(*recorder.closed.lock().unwrap());
    assert!(matches!(stale.all().await, Err(DbVaultError::Disposed)));
    assert!(matches!(
        stale_insert.call(&frame(1)).await,
        Err(DbVaultError::Disposed)
    ));
    assert!(matches!(db.connection(), Err(DbVaultError::Disposed)));
}

#[tokio::test]
async fn test_dropping_the_connection_disposes_accessors() {
    let recorder = Arc::new(Recorder::default());
    let db = ConnectionMiddleware::open(Box::new(MockBackend::new(&recorder)), false, None)
        .await
        .unwrap();
    let stale = db.metadata("t").unwrap().clone();
    drop(db);

    assert!(matches!(stale.describe().await, Err(DbVaultError::Disposed)));
}

#[tokio::test]
async fn test_bulk_insert_chunks_rows() {
    let recorder = Arc::new(Recorder::default());
    let backend = MockBackend::new(&recorder);

    let inserted = bulk_insert(&frame(5), "t", &backend, None, &quick_policy(2))
        .await
        .unwrap();

    assert_eq!(inserted, 5);
    assert_eq!(*recorder.chunks.lock().unwrap(), vec![2, 2, 1]);
}

#[tokio::test]
async fn test_bulk_insert_of_empty_frame_writes_nothing() {
    let recorder = Arc::new(Recorder::default());
    let backend = MockBackend::new(&recorder);

    let inserted = bulk_insert(&frame(0), "t", &backend, None, &quick_policy(2))
        .await
        .unwrap();

    assert_eq!(inserted, 0);
    assert!(recorder.chunks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_insert_rejects_unknown_columns() {
    let recorder = Arc::new(Recorder::default());
    let backend = MockBackend::new(&recorder);
    let input = Frame::new(vec!["a".to_string(), "zzz".to_string()], vec![vec![json!(1), json!(2)]])
        .unwrap();

    let err = bulk_insert(&input, "t", &backend, None, &quick_policy(2))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Columns [zzz] are not in table t");
}

#[cfg(feature = "sqlx")]
#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let recorder = Arc::new(Recorder::default());
    recorder.failures.lock().unwrap().push_back(transient());
    let backend = MockBackend::new(&recorder);

    let inserted = bulk_insert(&frame(3), "t", &backend, None, &quick_policy(2))
        .await
        .unwrap();

    assert_eq!(inserted, 3);
    assert_eq!(*recorder.chunks.lock().unwrap(), vec![2, 2, 1]);
}

#[cfg(feature = "sqlx")]
#[tokio::test]
async fn test_second_failure_aborts_with_last_successful_row() {
    let recorder = Arc::new(Recorder::default());
    let backend = MockBackend::new(&recorder);
    let policy = quick_policy(2);

    // First chunk succeeds, then the second chunk fails twice.
    let wrapped = FailAfter {
        inner: backend,
        succeed: 1,
        calls: Mutex::new(0),
    };

    let err = bulk_insert(&frame(5), "t", &wrapped, None, &policy)
        .await
        .unwrap_err();

    match err {
        DbVaultError::Operational {
            rows_completed,
            last_successful,
            ..
        } => {
            assert_eq!(rows_completed, 2);
            assert_eq!(last_successful.as_deref(), Some(r#"{"a":1,"b":"row1"}"#));
        }
        other => panic!("expected an operational error, got {other:?}"),
    }
    // One success, then the failing chunk and its retry.
    assert_eq!(*recorder.chunks.lock().unwrap(), vec![2, 2, 2]);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let recorder = Arc::new(Recorder::default());
    recorder
        .failures
        .lock()
        .unwrap()
        .push_back(DbVaultError::configuration("constraint violated"));
    let backend = MockBackend::new(&recorder);

    let err = bulk_insert(&frame(3), "t", &backend, None, &quick_policy(2))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DbVaultError::Operational {
            rows_completed: 0,
            last_successful: None,
            ..
        }
    ));
    assert_eq!(*recorder.chunks.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn test_bulk_update_argument_checks() {
    let recorder = Arc::new(Recorder::default());
    let backend = MockBackend::new(&recorder);
    let policy = quick_policy(2);

    let mismatched = bulk_update(
        &frame(1),
        &UpdateColumns::names(["a"]),
        &UpdateColumns::mapping([("b", "b")]),
        "t",
        &backend,
        None,
        &policy,
    )
    .await;
    assert!(matches!(mismatched, Err(DbVaultError::BadArgumentType { .. })));

    let missing_source = bulk_update(
        &frame(1),
        &UpdateColumns::names(["a"]),
        &UpdateColumns::names(["c"]),
        "t",
        &backend,
        None,
        &policy,
    )
    .await;
    assert!(matches!(missing_source, Err(DbVaultError::BadArgumentType { .. })));
    assert!(recorder.chunks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_update_maps_frame_columns() {
    let recorder = Arc::new(Recorder::default());
    let backend = MockBackend::new(&recorder);
    let input = Frame::new(
        vec!["id".to_string(), "label".to_string()],
        vec![vec![json!(1), json!("z")]],
    )
    .unwrap();

    let updated = bulk_update(
        &input,
        &UpdateColumns::mapping([("a", "id")]),
        &UpdateColumns::mapping([("b", "label")]),
        "t",
        &backend,
        None,
        &quick_policy(10),
    )
    .await
    .unwrap();

    assert_eq!(updated, 1);
    assert_eq!(*recorder.chunks.lock().unwrap(), vec![1]);
}

/// Succeeds for the first `succeed` chunk calls, then fails transiently.
#[cfg(feature = "sqlx")]
struct FailAfter {
    inner: MockBackend,
    succeed: usize,
    calls: Mutex<usize>,
}

#[cfg(feature = "sqlx")]
#[async_trait]
impl Backend for FailAfter {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn default_schema(&self) -> Result<Option<String>> {
        self.inner.default_schema().await
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>> {
        self.inner.list_tables(schema).await
    }

    async fn list_views(&self, schema: Option<&str>) -> Result<Vec<String>> {
        self.inner.list_views(schema).await
    }

    async fn describe_columns(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> Result<Vec<ColumnDescriptor>> {
        self.inner.describe_columns(table, schema).await
    }

    async fn fetch(&self, statement: &Statement, columns: &[String]) -> Result<Vec<Vec<Value>>> {
        self.inner.fetch(statement, columns).await
    }

    async fn execute_many(&self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        let result = self.inner.execute_many(sql, rows).await;
        if call > self.succeed {
            return Err(transient());
        }
        result
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
