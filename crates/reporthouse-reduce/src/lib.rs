//! Partitioned Reduce Engine
//!
//! Computes grouped aggregations over a filtered slice of a source
//! collection without materializing the full input in the worker.
//!
//! ## How it works
//!
//! 1. Probe the filtered identifier space for its min/max bounds.
//! 2. Split `[min, max]` into `k` contiguous ranges (the last one
//!    open-ended so no upper bound is missed).
//! 3. Run one partial group aggregation per range, pushed down to the
//!    source store, with bounded parallelism.
//! 4. Fold the per-range partial groups into a single accumulator using
//!    a deterministic merge protocol (avg carried as sum/count pairs,
//!    every partial tagged with its input row count).
//! 5. Finalize: one output row per group, in ascending canonical-JSON
//!    order of the group key, so identical inputs produce byte-identical
//!    artifacts.
//!
//! Two fold modes exist: the streaming accumulator folds partials as they
//! arrive (the default), and the buffered path collects every partial and
//! folds serially afterwards. Both share the same accumulator, so the
//! group-cardinality cap applies to both.

pub mod accumulator;
pub mod engine;
pub mod error;
pub mod range;
pub mod spec;

pub use accumulator::{reduce_partition_rows, Accumulator, Finalized};
pub use engine::{run_reduce, ChunkMetric, ReduceOptions, ReduceOutcome, ReduceSource};
pub use error::{ReduceError, Result};
pub use range::{build_ranges, IdRange};
pub use spec::{partial_accums, AccumExpr, Metric, MetricOp, PartitionSpec, ReduceSpec};
