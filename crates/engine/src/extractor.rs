use crate::{
    error::ExtractError,
    job::JobSpec,
    retry::{RetryFailure, RetryPolicy},
};
use connectors::{
    adapter::{DialectAdapter, KeyOrigin, PageRequest, PageRequestBuilder},
    error::AdapterError,
};
use model::{pagination::key::KeyTuple, records::row::Row, schema::column::ColumnMeta};
use sink::{open_sink, OpenMode, SinkOptions, SinkWriter};
use state::{
    error::StateError,
    models::{Checkpoint, JobStatus},
    StateStore,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Engine tuning knobs; defaults fit interactive CLI use.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lease TTL; renewal happens after each page once a third of it has
    /// elapsed, so the cadence stays at most ttl/3.
    pub lease_ttl: Duration,
    /// Per-adapter-call deadline; expiry counts as a retryable fetch
    /// failure.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub sink_options: SinkOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            lease_ttl: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            sink_options: SinkOptions::default(),
        }
    }
}

/// What one engine invocation did.
#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub job_id: String,
    /// Rows written by this run.
    pub rows_written: u64,
    /// Cumulative rows across all runs of the job.
    pub processed_rows: u64,
    pub total_rows_estimate: u64,
    pub resumed: bool,
    /// The job was already `completed`; nothing was touched.
    pub already_complete: bool,
}

/// Frozen ordering for the lifetime of one job run.
struct OrderingPlan {
    /// Columns the page SELECT fetches: the table's columns, then any
    /// synthesized tiebreaker.
    fetch_columns: Vec<ColumnMeta>,
    key_columns: Vec<String>,
    /// Indexes of the key columns within `fetch_columns`.
    key_ordinals: Vec<usize>,
    /// How many leading values of each row belong in the sink.
    sink_width: usize,
}

/// One extraction invocation: single table, single output, single lease.
pub struct Extractor {
    spec: JobSpec,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
}

impl Extractor {
    pub fn new(spec: JobSpec, store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Extractor {
            spec,
            store,
            config,
        }
    }

    /// Runs the job to completion, resuming from a prior checkpoint when
    /// one exists. Fails fast with [`ExtractError::Busy`] when another
    /// worker holds the lease.
    pub async fn extract(
        &self,
        cancel: CancellationToken,
    ) -> Result<ExtractReport, ExtractError> {
        self.run(None, cancel).await
    }

    /// Same as [`extract`](Self::extract), with a caller-supplied adapter
    /// instead of one opened from the source configuration.
    pub async fn extract_with_adapter(
        &self,
        adapter: Arc<dyn DialectAdapter>,
        cancel: CancellationToken,
    ) -> Result<ExtractReport, ExtractError> {
        self.run(Some(adapter), cancel).await
    }

    async fn run(
        &self,
        adapter: Option<Arc<dyn DialectAdapter>>,
        cancel: CancellationToken,
    ) -> Result<ExtractReport, ExtractError> {
        if self.spec.batch_size == 0 {
            return Err(ExtractError::Config("batch-size must be positive".into()));
        }

        let job_id = self.spec.job_id();
        let existing = self.store.get(&job_id).await?;

        if let Some(checkpoint) = &existing {
            if checkpoint.status == JobStatus::Completed {
                info!(job_id, table = %self.spec.table, "job already completed");
                return Ok(ExtractReport {
                    job_id,
                    rows_written: 0,
                    processed_rows: checkpoint.processed_rows,
                    total_rows_estimate: checkpoint.total_rows_estimate,
                    resumed: false,
                    already_complete: true,
                });
            }
        }

        // Checkpoint before lease, per the documented algorithm; creation
        // is atomic so two racing workers cannot both own it.
        let mut checkpoint = match existing {
            Some(checkpoint) => checkpoint,
            None => {
                let checkpoint = Checkpoint::new(job_id.as_str(), self.spec.table.raw());
                match self.store.create(&checkpoint).await {
                    Ok(()) | Err(StateError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                checkpoint
            }
        };

        if !self
            .store
            .acquire_lease(&job_id, self.config.lease_ttl)
            .await?
        {
            return Err(ExtractError::Busy(job_id));
        }
        debug!(job_id, "lease acquired");

        let result = self
            .run_locked(&job_id, &mut checkpoint, adapter, &cancel)
            .await;

        if let Err(e) = self.store.release_lease(&job_id).await {
            warn!(job_id, error = %e, "failed to release lease");
        }

        result
    }

    async fn run_locked(
        &self,
        job_id: &str,
        checkpoint: &mut Checkpoint,
        adapter: Option<Arc<dyn DialectAdapter>>,
        cancel: &CancellationToken,
    ) -> Result<ExtractReport, ExtractError> {
        let resumed = checkpoint.processed_rows > 0 || checkpoint.last_key.is_some();
        let initial_rows = checkpoint.processed_rows;

        let adapter: Arc<dyn DialectAdapter> = match adapter {
            Some(adapter) => adapter,
            None => Arc::from(
                connectors::open(&self.spec.source)
                    .await
                    .map_err(ExtractError::from_adapter)?,
            ),
        };

        let result = self
            .run_with_adapter(&adapter, checkpoint, resumed, cancel)
            .await;
        adapter.close().await;

        match result {
            Ok(()) => Ok(ExtractReport {
                job_id: job_id.to_string(),
                rows_written: checkpoint.processed_rows - initial_rows,
                processed_rows: checkpoint.processed_rows,
                total_rows_estimate: checkpoint.total_rows_estimate,
                resumed,
                already_complete: false,
            }),
            Err(e) => {
                self.mark_failed(checkpoint, &e).await;
                Err(e)
            }
        }
    }

    async fn run_with_adapter(
        &self,
        adapter: &Arc<dyn DialectAdapter>,
        checkpoint: &mut Checkpoint,
        resumed: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractError> {
        let table = &self.spec.table;

        let columns = adapter
            .describe_columns(table)
            .await
            .map_err(ExtractError::from_adapter)?;
        let plan = self.plan_ordering(adapter.as_ref(), &columns).await?;
        info!(
            table = %table,
            columns = plan.sink_width,
            key = %plan.key_columns.join(","),
            "ordering frozen"
        );

        if !resumed {
            checkpoint.total_rows_estimate = adapter
                .estimate_rows(table)
                .await
                .map_err(ExtractError::from_adapter)?;
        }

        checkpoint.status = JobStatus::Running;
        checkpoint.error = None;
        checkpoint.touch();
        self.persist(checkpoint).await?;

        let mode = if resumed {
            OpenMode::Append
        } else {
            OpenMode::Create
        };
        let mut sink_writer = open_sink(
            self.spec.format,
            &self.spec.output,
            &columns,
            mode,
            &self.config.sink_options,
        )?;
        if mode == OpenMode::Create {
            sink_writer.write_header()?;
        }

        let result = self
            .pump(adapter, sink_writer.as_mut(), checkpoint, &plan, cancel)
            .await;

        match result {
            Ok(()) => {
                sink_writer.close()?;
                checkpoint.status = JobStatus::Completed;
                checkpoint.error = None;
                checkpoint.touch();
                self.persist(checkpoint).await?;
                info!(
                    job_id = %checkpoint.job_id,
                    rows = checkpoint.processed_rows,
                    "extraction completed"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = sink_writer.close() {
                    warn!(error = %close_err, "failed to close sink after error");
                }
                Err(e)
            }
        }
    }

    /// The extraction loop. Overlaps the next page's fetch with the
    /// current page's write, bounded to a single in-flight prefetch; the
    /// page-after-next is only requested once the checkpoint has advanced.
    async fn pump(
        &self,
        adapter: &Arc<dyn DialectAdapter>,
        sink_writer: &mut dyn SinkWriter,
        checkpoint: &mut Checkpoint,
        plan: &OrderingPlan,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractError> {
        let batch_size = self.spec.batch_size;
        let mut renewed_at = Instant::now();

        if cancel.is_cancelled() {
            return Err(ExtractError::Canceled);
        }

        let mut page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractError::Canceled),
            result = fetch_page(
                Arc::clone(adapter),
                self.page_request(plan, checkpoint.last_key.clone()),
                self.config.retry.clone(),
                self.config.call_timeout,
            ) => result?,
        };

        loop {
            let full_page = page.len() == batch_size;
            let prefetch = if full_page {
                let next_key = page
                    .last()
                    .map(|row| row.key(&plan.key_ordinals))
                    .expect("full page has a last row");
                Some(tokio::spawn(fetch_page(
                    Arc::clone(adapter),
                    self.page_request(plan, Some(next_key)),
                    self.config.retry.clone(),
                    self.config.call_timeout,
                )))
            } else {
                None
            };

            let mut pending_key = checkpoint.last_key.clone();
            let mut pending_rows = checkpoint.processed_rows;
            let mut canceled = false;

            for row in &page {
                // A row error is terminal with nothing flushed: the row is
                // never rewritten and the checkpoint stays at the last
                // durable flush.
                sink_writer.write_row(&row.values[..plan.sink_width])?;
                pending_key = Some(row.key(&plan.key_ordinals));
                pending_rows += 1;
                if cancel.is_cancelled() {
                    canceled = true;
                    break;
                }
            }

            sink_writer.flush()?;
            checkpoint.last_key = pending_key;
            checkpoint.processed_rows = pending_rows;
            checkpoint.touch();
            self.persist(checkpoint).await?;
            debug!(
                rows = checkpoint.processed_rows,
                last_key = %checkpoint
                    .last_key
                    .as_ref()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "-".into()),
                "checkpoint advanced"
            );

            if canceled {
                if let Some(handle) = &prefetch {
                    handle.abort();
                }
                return Err(ExtractError::Canceled);
            }

            if renewed_at.elapsed() >= self.config.lease_ttl / 3 {
                if let Err(e) = self
                    .store
                    .renew_lease(&checkpoint.job_id, self.config.lease_ttl)
                    .await
                {
                    warn!(job_id = %checkpoint.job_id, error = %e, "lease renewal failed");
                    if let Some(handle) = &prefetch {
                        handle.abort();
                    }
                    return Err(ExtractError::LeaseLost(checkpoint.job_id.clone()));
                }
                renewed_at = Instant::now();
            }

            let Some(mut handle) = prefetch else {
                return Ok(());
            };
            page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    handle.abort();
                    return Err(ExtractError::Canceled);
                }
                joined = &mut handle => joined
                    .map_err(|e| ExtractError::Internal(format!("prefetch task failed: {e}")))??,
            };
        }
    }

    fn page_request(&self, plan: &OrderingPlan, last_key: Option<KeyTuple>) -> PageRequest {
        PageRequestBuilder::new(self.spec.table.clone())
            .columns(plan.fetch_columns.clone())
            .key_columns(plan.key_columns.clone())
            .last_key(last_key)
            .where_clause(self.spec.where_clause.clone())
            .limit(self.spec.batch_size)
            .build()
    }

    /// Resolves pagination ordering: discovered or overridden key columns,
    /// made total with a tiebreaker when the source reports them
    /// non-unique.
    async fn plan_ordering(
        &self,
        adapter: &dyn DialectAdapter,
        columns: &[ColumnMeta],
    ) -> Result<OrderingPlan, ExtractError> {
        let discovered = adapter
            .discover_key(&self.spec.table)
            .await
            .map_err(ExtractError::from_adapter)?;

        let (mut key_columns, mut unique, origin) = match &self.spec.key_columns {
            Some(overridden) => {
                for key in overridden {
                    if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(key)) {
                        return Err(ExtractError::Config(format!(
                            "key column {key} does not exist in {}",
                            self.spec.table
                        )));
                    }
                }
                // The override is confirmed unique when it covers a key the
                // source itself guarantees.
                let covers_unique = discovered.unique
                    && discovered
                        .columns
                        .iter()
                        .all(|c| overridden.iter().any(|k| k.eq_ignore_ascii_case(c)));
                (overridden.clone(), covers_unique, discovered.origin)
            }
            None => (discovered.columns, discovered.unique, discovered.origin),
        };

        let mut fetch_columns = columns.to_vec();
        let sink_width = columns.len();

        if !unique {
            if let Some(mut row_id) = adapter.row_id_column() {
                if !key_columns
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(&row_id.name))
                {
                    key_columns.push(row_id.name.clone());
                    row_id.ordinal = fetch_columns.len();
                    fetch_columns.push(row_id);
                }
                unique = true;
            } else {
                let remaining: Vec<String> = columns
                    .iter()
                    .map(|c| c.name.clone())
                    .filter(|name| !key_columns.iter().any(|k| k.eq_ignore_ascii_case(name)))
                    .collect();
                if !remaining.is_empty() {
                    debug!(
                        table = %self.spec.table,
                        "appending full column tuple as ordering tiebreaker"
                    );
                    key_columns.extend(remaining);
                    unique = true;
                } else if origin == KeyOrigin::ColumnOrder {
                    // Full column order is the documented total-order
                    // fallback, expensive but legal.
                    warn!(
                        table = %self.spec.table,
                        "ordering by all columns: no key constraint exists"
                    );
                    unique = true;
                }
            }
        }

        if !unique {
            return Err(ExtractError::NoUniqueOrdering(
                self.spec.table.raw().to_string(),
            ));
        }

        let key_ordinals = key_columns
            .iter()
            .map(|key| {
                fetch_columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(key))
                    .ok_or_else(|| {
                        ExtractError::Internal(format!("key column {key} missing from fetch list"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderingPlan {
            fetch_columns,
            key_columns,
            key_ordinals,
            sink_width,
        })
    }

    /// Persists the checkpoint, retrying optimistic-concurrency conflicts
    /// and transient transport failures.
    async fn persist(&self, checkpoint: &Checkpoint) -> Result<(), ExtractError> {
        let result = self
            .config
            .retry
            .run(
                |e: &StateError| e.is_conflict() || matches!(e, StateError::Transport(_)),
                || self.store.update(checkpoint),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(RetryFailure::Fatal(e)) => Err(e.into()),
            Err(RetryFailure::Exhausted { last, .. }) => Err(last.into()),
        }
    }

    /// Transitions the checkpoint to `failed`, except for pre-checkpoint
    /// failures (connect, busy, configuration) which leave status alone.
    async fn mark_failed(&self, checkpoint: &mut Checkpoint, error: &ExtractError) {
        let reason = match error {
            ExtractError::Connect(_) | ExtractError::Busy(_) | ExtractError::Config(_) => return,
            // The lease may belong to someone else by now; stop writing.
            ExtractError::LeaseLost(_) => return,
            ExtractError::Canceled => "canceled".to_string(),
            other => other.to_string(),
        };

        checkpoint.status = JobStatus::Failed;
        checkpoint.error = Some(reason);
        checkpoint.touch();
        if let Err(e) = self.persist(checkpoint).await {
            warn!(job_id = %checkpoint.job_id, error = %e, "failed to persist failure status");
        }
    }
}

/// One page read with per-call deadline and bounded backoff retries.
async fn fetch_page(
    adapter: Arc<dyn DialectAdapter>,
    request: PageRequest,
    retry: RetryPolicy,
    call_timeout: Duration,
) -> Result<Vec<Row>, ExtractError> {
    let result = retry
        .run(
            |e: &AdapterError| e.is_retryable(),
            || async {
                match tokio::time::timeout(call_timeout, adapter.fetch_page(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::fetch_retryable(format!(
                        "page fetch deadline of {call_timeout:?} exceeded"
                    ))),
                }
            },
        )
        .await;

    match result {
        Ok(rows) => Ok(rows),
        Err(RetryFailure::Fatal(e)) => Err(ExtractError::from_adapter(e)),
        Err(RetryFailure::Exhausted { attempts, last }) => Err(ExtractError::FetchExhausted {
            attempts,
            message: last.to_string(),
        }),
    }
}
