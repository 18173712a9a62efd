use async_trait::async_trait;
use connectors::{
    adapter::{DialectAdapter, KeySpec, PageRequest},
    error::AdapterError,
    DialectKind, SourceConfig,
};
use engine::{EngineConfig, ExtractError, Extractor, JobSpec};
use model::{
    core::value::Value,
    pagination::key::KeyTuple,
    records::row::Row,
    schema::{column::ColumnMeta, table::TableRef},
};
use sink::SinkFormat;
use state::{
    error::StateError,
    models::{Checkpoint, JobStatus},
    memory::MemoryStateStore,
    StateStore,
};
use std::{
    cmp::Ordering,
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Scripted in-memory source used by every engine test.
struct MockAdapter {
    columns: Vec<ColumnMeta>,
    rows: Vec<Row>,
    key: KeySpec,
    row_id: Option<ColumnMeta>,
    estimate: u64,
    filter: Option<Arc<dyn Fn(&Row) -> bool + Send + Sync>>,
    failures: Mutex<VecDeque<AdapterError>>,
    fetch_calls: AtomicUsize,
    on_fetch: Option<Box<dyn Fn(usize) + Send + Sync>>,
    seen_key_columns: Mutex<Vec<Vec<String>>>,
}

impl MockAdapter {
    fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>, key: KeySpec) -> Self {
        MockAdapter {
            columns,
            rows,
            key,
            row_id: None,
            estimate: 0,
            filter: None,
            failures: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
            on_fetch: None,
            seen_key_columns: Mutex::new(Vec::new()),
        }
    }

    fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(AtomicOrdering::SeqCst)
    }

    fn key_ordinals(request: &PageRequest) -> Vec<usize> {
        request
            .key_columns
            .iter()
            .map(|key| {
                request
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(key))
                    .expect("key column present in fetch list")
            })
            .collect()
    }
}

#[async_trait]
impl DialectAdapter for MockAdapter {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    async fn describe_columns(&self, _table: &TableRef) -> Result<Vec<ColumnMeta>, AdapterError> {
        Ok(self.columns.clone())
    }

    async fn discover_key(&self, _table: &TableRef) -> Result<KeySpec, AdapterError> {
        Ok(self.key.clone())
    }

    async fn estimate_rows(&self, _table: &TableRef) -> Result<u64, AdapterError> {
        Ok(self.estimate)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Row>, AdapterError> {
        let call = self.fetch_calls.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if let Some(hook) = &self.on_fetch {
            hook(call);
        }
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        self.seen_key_columns
            .lock()
            .unwrap()
            .push(request.key_columns.clone());

        let ordinals = Self::key_ordinals(request);
        let mut rows: Vec<Row> = self
            .rows
            .iter()
            .filter(|row| match (&request.where_clause, &self.filter) {
                (Some(_), Some(filter)) => filter(row),
                _ => true,
            })
            .filter(|row| match &request.last_key {
                Some(last) => {
                    row.key(&ordinals).compare(last) == Some(Ordering::Greater)
                }
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.key(&ordinals)
                .compare(&b.key(&ordinals))
                .expect("comparable keys")
        });
        rows.truncate(request.limit);
        Ok(rows)
    }

    fn row_id_column(&self) -> Option<ColumnMeta> {
        self.row_id.clone()
    }

    async fn close(&self) {}
}

fn id_name_columns() -> Vec<ColumnMeta> {
    vec![
        ColumnMeta::new("id", "integer", false, 0),
        ColumnMeta::new("name", "text", true, 1),
    ]
}

fn id_name_rows(n: i64) -> Vec<Row> {
    (1..=n)
        .map(|i| {
            Row::new(vec![
                Value::Int(i),
                Value::String(((b'a' + ((i - 1) % 26) as u8) as char).to_string()),
            ])
        })
        .collect()
}

fn job_spec(output: PathBuf, format: SinkFormat, batch_size: usize) -> JobSpec {
    JobSpec {
        source: SourceConfig {
            kind: Some(DialectKind::Postgres),
            host: Some("mock".into()),
            database: Some("test".into()),
            ..SourceConfig::default()
        },
        table: TableRef::new("public.t"),
        output,
        format,
        batch_size,
        where_clause: None,
        key_columns: None,
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: engine::retry::RetryPolicy::new(
            4,
            Duration::from_millis(1),
            Duration::from_millis(2),
        ),
        ..EngineConfig::default()
    }
}

/// Test-only entry point that injects the mock adapter where production
/// code would open a real connection.
async fn run(
    adapter: Arc<MockAdapter>,
    spec: JobSpec,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    cancel: CancellationToken,
) -> Result<engine::ExtractReport, ExtractError> {
    let extractor = Extractor::new(spec, store, config);
    let adapter: Arc<dyn DialectAdapter> = adapter;
    extractor.extract_with_adapter(adapter, cancel).await
}

#[tokio::test]
async fn extracts_table_in_pages_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        id_name_rows(4),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 2);
    let job_id = spec.job_id();

    let report = run(
        adapter.clone(),
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.rows_written, 4);
    assert_eq!(report.processed_rows, 4);
    assert!(!report.resumed);

    let contents = std::fs::read_to_string(&output).unwrap();
    assert_eq!(contents, "id,name\n1,a\n2,b\n3,c\n4,d\n");

    // 4 = 2 * batch_size: two full pages plus one empty page.
    assert_eq!(adapter.fetch_calls(), 3);

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Completed);
    assert_eq!(checkpoint.processed_rows, 4);
    assert_eq!(
        checkpoint.last_key,
        Some(KeyTuple::new(vec![Value::Int(4)]))
    );
}

#[tokio::test]
async fn resume_continues_strictly_after_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        id_name_rows(4),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 2);
    let job_id = spec.job_id();

    // Run 1 wrote rows 1 and 2, flushed, then crashed.
    std::fs::write(&output, "id,name\n1,a\n2,b\n").unwrap();
    let mut crashed = Checkpoint::new(&job_id, "public.t");
    crashed.status = JobStatus::Failed;
    crashed.last_key = Some(KeyTuple::new(vec![Value::Int(2)]));
    crashed.processed_rows = 2;
    crashed.error = Some("simulated crash".into());
    store.create(&crashed).await.unwrap();

    let report = run(
        adapter,
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.resumed);
    assert_eq!(report.rows_written, 2);
    assert_eq!(report.processed_rows, 4);

    let contents = std::fs::read_to_string(&output).unwrap();
    assert_eq!(contents, "id,name\n1,a\n2,b\n3,c\n4,d\n");

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Completed);
    assert!(checkpoint.error.is_none());
}

#[tokio::test]
async fn busy_lease_fails_fast_without_touching_sink() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        id_name_rows(4),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 2);
    let job_id = spec.job_id();

    assert!(store
        .acquire_lease(&job_id, Duration::from_secs(60))
        .await
        .unwrap());

    let err = run(
        adapter,
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExtractError::Busy(_)));
    assert!(!output.exists());

    // The pending checkpoint exists, but the loser never ran.
    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Pending);
    assert_eq!(checkpoint.processed_rows, 0);
}

#[tokio::test]
async fn empty_table_completes_with_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        Vec::new(),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 100);
    let job_id = spec.job_id();

    let report = run(
        adapter,
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.processed_rows, 0);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "id,name\n");

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Completed);
    assert_eq!(checkpoint.processed_rows, 0);
    assert!(checkpoint.last_key.is_none());
}

#[tokio::test]
async fn where_clause_filters_rows() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let mut adapter = MockAdapter::new(
        id_name_columns(),
        id_name_rows(1000),
        KeySpec::primary_key(vec!["id".into()]),
    );
    adapter.filter = Some(Arc::new(|row: &Row| {
        matches!(row.get(0), Value::Int(id) if *id > 500)
    }));
    let adapter = Arc::new(adapter);
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let mut spec = job_spec(output.clone(), SinkFormat::Csv, 128);
    spec.where_clause = Some("id > 500".into());
    let job_id = spec.job_id();

    let report = run(
        adapter,
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.processed_rows, 500);

    let contents = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 501);
    assert_eq!(lines[0], "id,name");
    assert!(lines[1].starts_with("501,"));
    assert!(lines[500].starts_with("1000,"));

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Completed);
    assert_eq!(checkpoint.processed_rows, 500);
}

#[tokio::test]
async fn cancellation_finishes_in_flight_row_and_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let cancel = CancellationToken::new();

    let mut adapter = MockAdapter::new(
        id_name_columns(),
        id_name_rows(100),
        KeySpec::primary_key(vec!["id".into()]),
    );
    let hook_token = cancel.clone();
    adapter.on_fetch = Some(Box::new(move |call| {
        if call == 1 {
            hook_token.cancel();
        }
    }));
    let adapter = Arc::new(adapter);

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 10);
    let job_id = spec.job_id();

    let err = run(adapter, spec, store.clone(), fast_config(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Canceled));

    // The in-flight row completed, was flushed, and nothing followed it.
    let contents = std::fs::read_to_string(&output).unwrap();
    assert_eq!(contents, "id,name\n1,a\n");

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Failed);
    assert_eq!(checkpoint.error.as_deref(), Some("canceled"));
    assert_eq!(checkpoint.processed_rows, 1);
    assert_eq!(
        checkpoint.last_key,
        Some(KeyTuple::new(vec![Value::Int(1)]))
    );
}

#[tokio::test]
async fn non_unique_key_without_tiebreaker_aborts_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let columns = vec![ColumnMeta::new("bucket", "integer", false, 0)];
    let rows = vec![
        Row::new(vec![Value::Int(1)]),
        Row::new(vec![Value::Int(1)]),
    ];
    let adapter = Arc::new(MockAdapter::new(
        columns,
        rows,
        KeySpec::clustering(vec!["bucket".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 10);

    let err = run(
        adapter,
        spec,
        store,
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExtractError::NoUniqueOrdering(_)));
    assert!(!output.exists());
}

#[tokio::test]
async fn non_unique_key_appends_row_id_tiebreaker() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    // Two rows share ts=1; the physical row id breaks the tie.
    let columns = vec![
        ColumnMeta::new("ts", "integer", false, 0),
        ColumnMeta::new("payload", "text", true, 1),
    ];
    let rows = vec![
        Row::new(vec![Value::Int(1), Value::String("x".into()), Value::Int(10)]),
        Row::new(vec![Value::Int(1), Value::String("y".into()), Value::Int(11)]),
        Row::new(vec![Value::Int(2), Value::String("z".into()), Value::Int(12)]),
    ];
    let mut adapter = MockAdapter::new(columns, rows, KeySpec::clustering(vec!["ts".into()]));
    adapter.row_id = Some(ColumnMeta::new("rid", "bigint", false, 0));
    let adapter = Arc::new(adapter);

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 2);

    run(
        adapter.clone(),
        spec,
        store,
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let seen = adapter.seen_key_columns.lock().unwrap();
    assert!(seen
        .iter()
        .all(|keys| keys == &["ts".to_string(), "rid".to_string()]));

    // The synthesized column is fetched but never written to the sink.
    let contents = std::fs::read_to_string(&output).unwrap();
    assert_eq!(contents, "ts,payload\n1,x\n1,y\n2,z\n");
}

#[tokio::test]
async fn retryable_fetch_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = MockAdapter::new(
        id_name_columns(),
        id_name_rows(3),
        KeySpec::primary_key(vec!["id".into()]),
    );
    adapter.failures.lock().unwrap().extend([
        AdapterError::fetch_retryable("transient 1"),
        AdapterError::fetch_retryable("transient 2"),
    ]);
    let adapter = Arc::new(adapter);

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 10);

    let report = run(
        adapter.clone(),
        spec,
        store,
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.processed_rows, 3);
    // One logical page, two failed attempts before it.
    assert_eq!(adapter.fetch_calls(), 3);
}

#[tokio::test]
async fn permanent_fetch_failure_marks_job_failed() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = MockAdapter::new(
        id_name_columns(),
        id_name_rows(3),
        KeySpec::primary_key(vec!["id".into()]),
    );
    adapter
        .failures
        .lock()
        .unwrap()
        .push_back(AdapterError::fetch_permanent("bad predicate"));
    let adapter = Arc::new(adapter);

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 10);
    let job_id = spec.job_id();

    let err = run(
        adapter,
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExtractError::Adapter(_)));

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Failed);
    assert!(checkpoint.error.is_some());
}

#[tokio::test]
async fn estimate_is_reported_but_not_load_bearing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let mut adapter = MockAdapter::new(
        id_name_columns(),
        id_name_rows(5),
        KeySpec::primary_key(vec!["id".into()]),
    );
    adapter.estimate = 2_010_000;
    let adapter = Arc::new(adapter);

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 2);
    let job_id = spec.job_id();

    let report = run(
        adapter,
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.total_rows_estimate, 2_010_000);
    assert_eq!(report.processed_rows, 5);

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.total_rows_estimate, 2_010_000);
    assert_eq!(checkpoint.processed_rows, 5);
}

#[tokio::test]
async fn completed_job_reruns_as_idempotent_success() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        id_name_rows(2),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Csv, 10);

    run(
        adapter.clone(),
        spec.clone(),
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let first = std::fs::read_to_string(&output).unwrap();

    let report = run(
        adapter,
        spec,
        store,
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.already_complete);
    assert_eq!(report.rows_written, 0);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), first);
}

#[tokio::test]
async fn key_override_must_name_existing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        id_name_rows(2),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let mut spec = job_spec(output, SinkFormat::Csv, 10);
    spec.key_columns = Some(vec!["missing".into()]);

    let err = run(
        adapter,
        spec,
        store,
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn key_override_covering_primary_key_orders_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let columns = vec![
        ColumnMeta::new("event_time", "integer", false, 0),
        ColumnMeta::new("event_id", "integer", false, 1),
    ];
    let rows = vec![
        Row::new(vec![Value::Int(2), Value::Int(1)]),
        Row::new(vec![Value::Int(1), Value::Int(2)]),
        Row::new(vec![Value::Int(1), Value::Int(1)]),
    ];
    let adapter = Arc::new(MockAdapter::new(
        columns,
        rows,
        KeySpec::primary_key(vec!["event_id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let mut spec = job_spec(output.clone(), SinkFormat::Csv, 2);
    spec.key_columns = Some(vec!["event_time".into(), "event_id".into()]);

    run(
        adapter,
        spec,
        store,
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let contents = std::fs::read_to_string(&output).unwrap();
    assert_eq!(contents, "event_time,event_id\n1,1\n1,2\n2,1\n");
}

/// Memory store whose lease renewal always fails.
struct RenewFailsStore {
    inner: MemoryStateStore,
}

#[async_trait]
impl StateStore for RenewFailsStore {
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, StateError> {
        self.inner.get(job_id).await
    }
    async fn create(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        self.inner.create(checkpoint).await
    }
    async fn update(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        self.inner.update(checkpoint).await
    }
    async fn delete(&self, job_id: &str) -> Result<(), StateError> {
        self.inner.delete(job_id).await
    }
    async fn list(&self) -> Result<Vec<Checkpoint>, StateError> {
        self.inner.list().await
    }
    async fn acquire_lease(&self, job_id: &str, ttl: Duration) -> Result<bool, StateError> {
        self.inner.acquire_lease(job_id, ttl).await
    }
    async fn renew_lease(&self, _job_id: &str, _ttl: Duration) -> Result<(), StateError> {
        Err(StateError::Transport("renewal refused".into()))
    }
    async fn release_lease(&self, job_id: &str) -> Result<(), StateError> {
        self.inner.release_lease(job_id).await
    }
}

#[tokio::test]
async fn failed_lease_renewal_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.csv");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        id_name_rows(4),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(RenewFailsStore {
        inner: MemoryStateStore::new(),
    });
    let spec = job_spec(output.clone(), SinkFormat::Csv, 2);
    let job_id = spec.job_id();

    let mut config = fast_config();
    // Zero TTL forces a renewal attempt after the very first page.
    config.lease_ttl = Duration::from_secs(0);

    let err = run(adapter, spec, store.clone(), config, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::LeaseLost(_)));

    // The first page was flushed and checkpointed before the renewal.
    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.processed_rows, 2);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "id,name\n1,a\n2,b\n");
}

#[tokio::test]
async fn parquet_job_stages_parts_with_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.parquet");
    let adapter = Arc::new(MockAdapter::new(
        id_name_columns(),
        id_name_rows(4),
        KeySpec::primary_key(vec!["id".into()]),
    ));
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let spec = job_spec(output.clone(), SinkFormat::Parquet, 2);
    let job_id = spec.job_id();

    run(
        adapter,
        spec,
        store.clone(),
        fast_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let manifest_path = dir.path().join("t.parquet.manifest.json");
    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["parts"].as_array().unwrap().len(), 2);
    assert!(dir
        .path()
        .join("t.parquet.parts")
        .join("part-00000.parquet")
        .exists());

    let checkpoint = store.get(&job_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, JobStatus::Completed);
    assert_eq!(checkpoint.processed_rows, 4);
}
