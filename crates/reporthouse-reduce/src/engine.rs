//! The partitioned reduce engine.
//!
//! Probes the filtered identifier bounds, builds ranges, fans the
//! per-range aggregations out over a bounded worker pool, folds the
//! partial groups, and finalizes deterministically. Workers pull range
//! indexes from a shared atomic counter, so each range is processed by
//! exactly one worker; the accumulator, the buffered-partials vector and
//! the chunk metrics sit behind mutexes because workers run on a
//! preemptive runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use reporthouse_core::{normalize, Row, RowId};

use crate::accumulator::{reduce_partition_rows, Accumulator, Finalized};
use crate::error::{ReduceError, Result};
use crate::range::{build_ranges, IdRange};
use crate::spec::{partial_accums, AccumExpr, PartitionSpec, ReduceSpec};

/// Row source the engine aggregates against.
///
/// Implementations push the group stage down to the store; the engine
/// only ever sees partial group rows, never source rows.
#[async_trait]
pub trait ReduceSource: Send + Sync {
    /// Min and max identifier under the tenant-scoped filter, or `None`
    /// when the filtered set is empty.
    async fn id_bounds(
        &self,
        tenant: &str,
        collection: &str,
        filters: &Row,
    ) -> Result<Option<(RowId, RowId)>>;

    /// Run the group stage over one identifier range and return the
    /// partial group rows.
    async fn aggregate_range(
        &self,
        tenant: &str,
        collection: &str,
        filters: &Row,
        range: IdRange,
        group_by: &[String],
        accums: &[AccumExpr],
        batch_size: u32,
    ) -> Result<Vec<Row>>;
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct ReduceOptions {
    /// Cursor batch size passed down to the source.
    pub batch_size: u32,
    /// Chunk count when the job carries no partition hint.
    pub default_chunks: u32,
    /// Hard cap on the chunk count regardless of the hint.
    pub max_chunks: u32,
    /// Upper bound on concurrent range workers.
    pub max_concurrency: u32,
    /// Fold partials as they arrive (v2) instead of buffering (v1).
    pub streaming_accumulator: bool,
    /// Group-cardinality cap, enforced on both fold paths.
    pub max_groups: usize,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            default_chunks: 4,
            max_chunks: 64,
            max_concurrency: 4,
            streaming_accumulator: true,
            max_groups: 100_000,
        }
    }
}

/// Per-range timing reported back on the job's processing stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetric {
    pub index: u32,
    pub duration_ms: u64,
    pub rows_out: u64,
}

/// What the engine returns to the job processor.
#[derive(Debug)]
pub struct ReduceOutcome {
    pub rows: Vec<Row>,
    pub rows_in: u64,
    pub rows_out: u64,
    pub chunks: u32,
    pub chunk_metrics: Vec<ChunkMetric>,
}

impl ReduceOutcome {
    fn empty() -> Self {
        Self { rows: Vec::new(), rows_in: 0, rows_out: 0, chunks: 0, chunk_metrics: Vec::new() }
    }
}

#[derive(Clone)]
enum FoldMode {
    Streaming(Arc<Mutex<Accumulator>>),
    Buffered(Arc<Mutex<Vec<Row>>>),
}

/// Run a grouped aggregation over the filtered slice of `collection`.
///
/// `observer` is invoked once per consumed partial row; the job
/// processor uses it to sample its memory high-watermark.
#[allow(clippy::too_many_arguments)]
pub async fn run_reduce(
    source: Arc<dyn ReduceSource>,
    tenant: &str,
    collection: &str,
    filters: &Row,
    spec: &ReduceSpec,
    partition: Option<&PartitionSpec>,
    opts: &ReduceOptions,
    observer: Option<Arc<dyn Fn() + Send + Sync>>,
) -> Result<ReduceOutcome> {
    spec.validate()?;
    if let Some(partition) = partition {
        partition.validate()?;
    }

    let Some((min_id, max_id)) = source.id_bounds(tenant, collection, filters).await? else {
        return Ok(ReduceOutcome::empty());
    };

    let requested = partition
        .and_then(|p| p.chunks)
        .unwrap_or(opts.default_chunks);
    let k = requested.min(opts.max_chunks).max(1);
    let ranges = build_ranges(min_id.to_u128(), max_id.to_u128(), k);
    if ranges.is_empty() {
        return Ok(ReduceOutcome::empty());
    }

    let mode = if opts.streaming_accumulator {
        FoldMode::Streaming(Arc::new(Mutex::new(Accumulator::new(
            spec.clone(),
            opts.max_groups,
        ))))
    } else {
        FoldMode::Buffered(Arc::new(Mutex::new(Vec::new())))
    };

    let ranges = Arc::new(ranges);
    let counter = Arc::new(AtomicUsize::new(0));
    let metrics = Arc::new(Mutex::new(Vec::<ChunkMetric>::new()));
    let group_by = Arc::new(spec.group_by.clone());
    let accums = Arc::new(partial_accums(spec));
    let tenant_owned = Arc::new(tenant.to_string());
    let collection_owned = Arc::new(collection.to_string());
    let filters_owned = Arc::new(filters.clone());

    let workers = (opts.max_concurrency.max(1) as usize).min(ranges.len());
    debug!(
        chunks = ranges.len(),
        workers,
        streaming = opts.streaming_accumulator,
        "starting partitioned reduce"
    );

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let source = Arc::clone(&source);
        let ranges = Arc::clone(&ranges);
        let counter = Arc::clone(&counter);
        let metrics = Arc::clone(&metrics);
        let group_by = Arc::clone(&group_by);
        let accums = Arc::clone(&accums);
        let tenant = Arc::clone(&tenant_owned);
        let collection = Arc::clone(&collection_owned);
        let filters = Arc::clone(&filters_owned);
        let mode = mode.clone();
        let observer = observer.clone();
        let batch_size = opts.batch_size;

        handles.push(tokio::spawn(async move {
            loop {
                let idx = counter.fetch_add(1, Ordering::SeqCst);
                if idx >= ranges.len() {
                    return Ok::<(), ReduceError>(());
                }
                let range = ranges[idx];
                let started = Instant::now();
                let partials = source
                    .aggregate_range(
                        &tenant,
                        &collection,
                        &filters,
                        range,
                        &group_by,
                        &accums,
                        batch_size,
                    )
                    .await?;
                let rows_out = partials.len() as u64;
                match &mode {
                    FoldMode::Streaming(acc) => {
                        let mut acc = acc.lock().await;
                        for partial in &partials {
                            if let Some(observe) = &observer {
                                observe();
                            }
                            acc.consume(partial)?;
                        }
                    }
                    FoldMode::Buffered(buffer) => {
                        buffer.lock().await.extend(partials);
                    }
                }
                metrics.lock().await.push(ChunkMetric {
                    index: idx as u32,
                    duration_ms: started.elapsed().as_millis() as u64,
                    rows_out,
                });
            }
        }));
    }

    let mut first_err: Option<ReduceError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(join) => {
                first_err.get_or_insert(ReduceError::Source(join.to_string()));
            }
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    let finalized = match mode {
        FoldMode::Streaming(acc) => Arc::try_unwrap(acc)
            .map_err(|_| ReduceError::Source("accumulator still shared after join".into()))?
            .into_inner()
            .finalize(),
        FoldMode::Buffered(buffer) => {
            let partials = Arc::try_unwrap(buffer)
                .map_err(|_| ReduceError::Source("partial buffer still shared after join".into()))?
                .into_inner();
            reduce_partition_rows(spec, &partials, opts.max_groups)?
        }
    };
    let Finalized { rows, rows_in, rows_out } = finalized;

    let rows = rows
        .into_iter()
        .map(|row| {
            let mut out = Row::new();
            for (key, value) in row {
                out.insert(key, normalize(&value));
            }
            out
        })
        .collect();

    let mut chunk_metrics = Arc::try_unwrap(metrics)
        .map_err(|_| ReduceError::Source("chunk metrics still shared after join".into()))?
        .into_inner();
    chunk_metrics.sort_by_key(|m| m.index);

    Ok(ReduceOutcome {
        rows,
        rows_in,
        rows_out,
        chunks: ranges.len() as u32,
        chunk_metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Metric, MetricOp};
    use serde_json::{json, Value};

    /// In-process source that interprets the pushed-down group stage the
    /// way the SQL-backed store does.
    struct MemorySource {
        docs: Vec<(RowId, Row)>,
    }

    impl MemorySource {
        fn new(docs: Vec<(u128, Value)>) -> Self {
            let docs = docs
                .into_iter()
                .map(|(id, v)| match v {
                    Value::Object(map) => (RowId::from_u128(id), map),
                    other => panic!("doc must be an object: {other}"),
                })
                .collect();
            Self { docs }
        }

        fn matches(filters: &Row, doc: &Row) -> bool {
            filters.iter().all(|(k, v)| doc.get(k) == Some(v))
        }
    }

    #[async_trait]
    impl ReduceSource for MemorySource {
        async fn id_bounds(
            &self,
            _tenant: &str,
            _collection: &str,
            filters: &Row,
        ) -> Result<Option<(RowId, RowId)>> {
            let mut ids: Vec<RowId> = self
                .docs
                .iter()
                .filter(|(_, doc)| Self::matches(filters, doc))
                .map(|(id, _)| *id)
                .collect();
            ids.sort();
            Ok(ids.first().map(|min| (*min, *ids.last().unwrap_or(min))))
        }

        async fn aggregate_range(
            &self,
            _tenant: &str,
            _collection: &str,
            filters: &Row,
            range: IdRange,
            group_by: &[String],
            accums: &[AccumExpr],
            _batch_size: u32,
        ) -> Result<Vec<Row>> {
            let mut groups: std::collections::BTreeMap<String, Vec<&Row>> = Default::default();
            for (id, doc) in &self.docs {
                let wide = id.to_u128();
                let in_range = wide >= range.start && range.end.map_or(true, |end| wide < end);
                if in_range && Self::matches(filters, doc) {
                    let mut key = Row::new();
                    for field in group_by {
                        key.insert(field.clone(), doc.get(field).cloned().unwrap_or(Value::Null));
                    }
                    groups
                        .entry(serde_json::to_string(&key)?)
                        .or_default()
                        .push(doc);
                }
            }
            let mut out = Vec::new();
            for (key, members) in groups {
                let mut row: Row = serde_json::from_str(&key)?;
                for accum in accums {
                    match accum {
                        AccumExpr::CountAll { alias } => {
                            row.insert(alias.clone(), Value::from(members.len() as u64));
                        }
                        AccumExpr::Sum { field, alias } => {
                            let total: f64 = members
                                .iter()
                                .filter_map(|d| d.get(field).and_then(Value::as_f64))
                                .sum();
                            row.insert(alias.clone(), json!(total));
                        }
                        AccumExpr::Min { field, alias } | AccumExpr::Max { field, alias } => {
                            let mut vals: Vec<f64> = members
                                .iter()
                                .filter_map(|d| d.get(field).and_then(Value::as_f64))
                                .collect();
                            vals.sort_by(f64::total_cmp);
                            let pick = match accum {
                                AccumExpr::Min { .. } => vals.first(),
                                _ => vals.last(),
                            };
                            row.insert(
                                alias.clone(),
                                pick.map(|v| json!(v)).unwrap_or(Value::Null),
                            );
                        }
                        AccumExpr::CountNotNull { field, alias } => {
                            let n = members
                                .iter()
                                .filter(|d| {
                                    !matches!(d.get(field), None | Some(Value::Null))
                                })
                                .count();
                            row.insert(alias.clone(), Value::from(n as u64));
                        }
                    }
                }
                out.push(row);
            }
            Ok(out)
        }
    }

    fn orders() -> Arc<MemorySource> {
        Arc::new(MemorySource::new(vec![
            (1, json!({"status": "paid", "amount": 10, "region": "br"})),
            (2, json!({"status": "paid", "amount": 20, "region": "br"})),
            (3, json!({"status": "pending", "amount": 50, "region": "us"})),
        ]))
    }

    fn count_sum_spec() -> ReduceSpec {
        ReduceSpec {
            group_by: vec!["status".into()],
            metrics: vec![
                Metric { op: MetricOp::Count, field: None, alias: "totalOrders".into() },
                Metric { op: MetricOp::Sum, field: Some("amount".into()), alias: "sumAmount".into() },
            ],
        }
    }

    fn filters(v: Value) -> Row {
        match v {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[tokio::test]
    async fn test_filtered_grouped_reduce_over_chunks() {
        let partition = PartitionSpec { chunks: Some(4), ..Default::default() };
        let out = run_reduce(
            orders(),
            "t1",
            "reportSource",
            &filters(json!({"status": "paid"})),
            &count_sum_spec(),
            Some(&partition),
            &ReduceOptions::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(out.rows_in, 2);
        assert_eq!(out.rows_out, 1);
        assert!(out.chunks >= 1);
        assert_eq!(
            Value::Object(out.rows[0].clone()),
            json!({"status": "paid", "totalOrders": 2, "sumAmount": 30})
        );
        // metrics are sorted by range index and cover every chunk
        let indexes: Vec<u32> = out.chunk_metrics.iter().map(|m| m.index).collect();
        let mut sorted = indexes.clone();
        sorted.sort();
        assert_eq!(indexes, sorted);
        assert_eq!(out.chunk_metrics.len() as u32, out.chunks);
    }

    #[tokio::test]
    async fn test_empty_filtered_set_is_an_empty_outcome() {
        let out = run_reduce(
            orders(),
            "t1",
            "reportSource",
            &filters(json!({"status": "refunded"})),
            &count_sum_spec(),
            None,
            &ReduceOptions::default(),
            None,
        )
        .await
        .unwrap();
        assert!(out.rows.is_empty());
        assert_eq!((out.rows_in, out.rows_out, out.chunks), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_buffered_and_streaming_paths_agree() {
        let spec = ReduceSpec {
            group_by: vec!["region".into(), "status".into()],
            metrics: vec![
                Metric { op: MetricOp::Count, field: None, alias: "n".into() },
                Metric { op: MetricOp::Avg, field: Some("amount".into()), alias: "avgAmount".into() },
            ],
        };
        let mut v1 = ReduceOptions { streaming_accumulator: false, ..Default::default() };
        v1.default_chunks = 3;
        let mut v2 = ReduceOptions::default();
        v2.default_chunks = 3;

        let a = run_reduce(orders(), "t1", "s", &Row::new(), &spec, None, &v1, None)
            .await
            .unwrap();
        let b = run_reduce(orders(), "t1", "s", &Row::new(), &spec, None, &v2, None)
            .await
            .unwrap();
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.rows_in, b.rows_in);
        assert_eq!(a.rows_out, b.rows_out);
    }

    #[tokio::test]
    async fn test_group_order_is_canonical_regardless_of_input_order() {
        let spec = ReduceSpec {
            group_by: vec!["status".into()],
            metrics: vec![Metric { op: MetricOp::Count, field: None, alias: "n".into() }],
        };
        let out = run_reduce(
            orders(),
            "t1",
            "s",
            &Row::new(),
            &spec,
            None,
            &ReduceOptions::default(),
            None,
        )
        .await
        .unwrap();
        let statuses: Vec<&str> = out
            .rows
            .iter()
            .map(|r| r["status"].as_str().unwrap_or(""))
            .collect();
        assert_eq!(statuses, vec!["paid", "pending"]);
    }

    #[tokio::test]
    async fn test_cardinality_cap_applies_on_both_paths() {
        for streaming in [true, false] {
            let opts = ReduceOptions {
                streaming_accumulator: streaming,
                max_groups: 1,
                ..Default::default()
            };
            let err = run_reduce(
                orders(),
                "t1",
                "s",
                &Row::new(),
                &count_sum_spec(),
                None,
                &opts,
                None,
            )
            .await
            .unwrap_err();
            assert!(
                matches!(err, ReduceError::CardinalityExceeded { max: 1 }),
                "streaming={streaming} should hit the cap"
            );
        }
    }

    #[tokio::test]
    async fn test_observer_fires_per_consumed_partial() {
        let hits = Arc::new(AtomicUsize::new(0));
        let observer = {
            let hits = Arc::clone(&hits);
            Arc::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }) as Arc<dyn Fn() + Send + Sync>
        };
        run_reduce(
            orders(),
            "t1",
            "s",
            &Row::new(),
            &count_sum_spec(),
            None,
            &ReduceOptions::default(),
            Some(observer),
        )
        .await
        .unwrap();
        assert!(hits.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_invalid_spec_fails_before_touching_the_source() {
        let bad = ReduceSpec { group_by: vec![], metrics: vec![] };
        let err = run_reduce(
            orders(),
            "t1",
            "s",
            &Row::new(),
            &bad,
            None,
            &ReduceOptions::default(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReduceError::Validation(_)));
    }
}
