//! Adaptive batch dispatch: describe many images against a flaky, rate-limited
//! endpoint and decide, chunk by chunk, how hard to push it.
//!
//! ## State machine
//!
//! ```text
//!            ┌────────────────────────── next chunk ───────────────────────┐
//!            ▼                                                             │
//! Idle ──▶ ConcurrentChunk ──▶ assess failures ──┬─ Clean ─────────────────┤
//!                                                ├─ Retry: failures one at │
//!                                                │  a time, then ──────────┘
//!                                                ├─ Degrade: failures + every
//!                                                │  remaining image one at a
//!                                                │  time ──▶ Done
//!                                                └─ TotalFailure ──▶ Done
//! ```
//!
//! The verdict for a chunk depends only on that chunk's failures:
//!
//! 1. at least one failure and all of them `AuthError` → **TotalFailure**:
//!    the credential is bad, so stop calling the endpoint at all;
//! 2. at least half of the failures `RateLimited`/`ConcurrencyPressure` →
//!    **Degrade** for the rest of the run;
//! 3. any other failure → **Retry** them sequentially, then go back to
//!    concurrent mode for the next chunk.
//!
//! A chunk with one failure out of ten that happens to be a 429 still
//! degrades: the threshold is a fraction of *failures*, not of the chunk.
//!
//! ## Ownership
//!
//! The [`BatchResult`] lives on the dispatching task. Runners return local
//! [`RunReport`]s and the dispatcher merges them between runner calls, so no
//! locking is involved.

use crate::config::DescribeConfig;
use crate::error::IeeuError;
use crate::output::BatchResult;
use crate::pipeline::classify::ErrorKind;
use crate::pipeline::describe::Describer;
use crate::pipeline::runner::{run_concurrent, run_sequential, ItemFailure, RunReport, WorkItem};
use crate::progress::ProgressCallback;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to do after a concurrent chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkVerdict {
    /// No failures; move on.
    Clean,
    /// Retry the failures one at a time, then continue concurrently.
    Retry,
    /// Switch to one call at a time for everything that is left.
    Degrade,
    /// Every failure was an auth error; stop issuing calls.
    TotalFailure,
}

/// Decide how to continue from the failure kinds of one chunk.
pub fn assess_chunk(failures: &[ErrorKind]) -> ChunkVerdict {
    if failures.is_empty() {
        return ChunkVerdict::Clean;
    }
    if is_total_failure(failures) {
        return ChunkVerdict::TotalFailure;
    }
    let pressure = failures.iter().filter(|k| k.is_pressure()).count();
    // pressure / failures >= 0.5, in integers
    if pressure * 2 >= failures.len() {
        ChunkVerdict::Degrade
    } else {
        ChunkVerdict::Retry
    }
}

fn is_total_failure(failures: &[ErrorKind]) -> bool {
    !failures.is_empty() && failures.iter().all(|k| *k == ErrorKind::AuthError)
}

/// Whether the dispatch may keep issuing calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

/// Drives a [`Describer`] over a set of work items.
pub struct Dispatcher {
    describer: Describer,
    max_concurrency: usize,
    batch_size: usize,
    progress: Option<ProgressCallback>,
}

impl Dispatcher {
    /// Validate `config` and build the describer it names.
    pub fn new(config: &DescribeConfig) -> Result<Self, IeeuError> {
        config.validate()?;
        Ok(Self::with_describer(Describer::from_config(config)?, config))
    }

    /// Use an already-built describer with the concurrency settings of `config`.
    pub fn with_describer(describer: Describer, config: &DescribeConfig) -> Self {
        Self {
            describer,
            max_concurrency: config.max_concurrency.max(1),
            batch_size: config.batch_size.max(1),
            progress: config.progress_callback.clone(),
        }
    }

    /// Describe every item.
    ///
    /// Per-image failures never surface as `Err`; they end up in
    /// [`BatchResult::failed_keys`]. The only error is malformed input
    /// (duplicate keys), reported before any call is made.
    pub async fn dispatch(&self, items: &[WorkItem]) -> Result<BatchResult, IeeuError> {
        let mut keys = HashSet::with_capacity(items.len());
        for item in items {
            if !keys.insert(item.key.as_str()) {
                return Err(IeeuError::DuplicateKey {
                    key: item.key.clone(),
                });
            }
        }

        if items.is_empty() {
            debug!("Nothing to dispatch");
            return Ok(BatchResult::default());
        }

        let start = Instant::now();
        let total = items.len();
        let chunks: Vec<&[WorkItem]> = items.chunks(self.batch_size).collect();
        info!(
            "Dispatching {} images in {} chunk(s) of ≤{} (≤{} in flight)",
            total,
            chunks.len(),
            self.batch_size,
            self.max_concurrency
        );
        if let Some(ref cb) = self.progress {
            cb.on_dispatch_start(total);
        }

        let mut agg = Aggregate::new(total, self.progress.as_ref());

        for (index, chunk) in chunks.iter().enumerate() {
            let later = || chunks[index + 1..].iter().flat_map(|c| c.iter());

            info!(
                "Chunk {}/{}: {} images concurrently",
                index + 1,
                chunks.len(),
                chunk.len()
            );
            let report = run_concurrent(&self.describer, chunk, self.max_concurrency).await;
            agg.record_chunk_successes(&report);

            let kinds = report.failure_kinds();
            let verdict = assess_chunk(&kinds);
            debug!("Chunk {}: {} failure(s) → {:?}", index + 1, kinds.len(), verdict);

            match verdict {
                ChunkVerdict::Clean => {}
                ChunkVerdict::TotalFailure => {
                    warn!(
                        "All {} failures in chunk {} are auth errors; the API is unusable",
                        kinds.len(),
                        index + 1
                    );
                    agg.record_failures(&report.failures);
                    agg.record_unattempted(later());
                    agg.total_failure();
                    break;
                }
                ChunkVerdict::Degrade => {
                    let retry = report.failed_items();
                    let remaining: Vec<WorkItem> = later().cloned().collect();
                    warn!(
                        "Rate limiting detected in chunk {}; degrading to sequential for {} image(s)",
                        index + 1,
                        retry.len() + remaining.len()
                    );
                    agg.result.degraded_to_sequential = true;
                    if let Some(cb) = self.progress.as_ref() {
                        cb.on_degraded(retry.len() + remaining.len());
                    }

                    if self.sequential_pass(&mut agg, &retry).await == Flow::Halt {
                        agg.record_unattempted(remaining.iter());
                        break;
                    }
                    if !remaining.is_empty() {
                        info!("Processing remaining {} images sequentially", remaining.len());
                        self.sequential_pass(&mut agg, &remaining).await;
                    }
                    break;
                }
                ChunkVerdict::Retry => {
                    let retry = report.failed_items();
                    info!("Retrying {} failed image(s) sequentially", retry.len());
                    if self.sequential_pass(&mut agg, &retry).await == Flow::Halt {
                        agg.record_unattempted(later());
                        break;
                    }
                }
            }
        }

        let result = agg.finish();
        assert!(
            result.is_partition_of(items.iter().map(|i| i.key.as_str())),
            "dispatch lost or duplicated an image key"
        );

        info!(
            "Dispatch complete: {}/{} described, {} failed, {}ms{}",
            result.descriptions.len(),
            total,
            result.failed_keys.len(),
            start.elapsed().as_millis(),
            if result.degraded_to_sequential { " (sequential)" } else { "" }
        );
        if let Some(ref cb) = self.progress {
            cb.on_dispatch_complete(total, result.descriptions.len());
        }

        Ok(result)
    }

    /// Run `items` sequentially and merge. Halts the dispatch when the pass
    /// was cut short by an auth error and every failure in it was auth.
    async fn sequential_pass(&self, agg: &mut Aggregate<'_>, items: &[WorkItem]) -> Flow {
        if items.is_empty() {
            return Flow::Continue;
        }
        let report = run_sequential(
            &self.describer,
            items,
            agg.settled(),
            agg.total,
            self.progress.as_ref(),
        )
        .await;

        for (key, description) in report.successes {
            agg.result.descriptions.insert(key, description);
        }
        agg.result
            .failed_keys
            .extend(report.failures.iter().map(|f| f.item.key.clone()));
        agg.record_unattempted(report.unattempted.iter());

        let kinds: Vec<ErrorKind> = report.failures.iter().map(|f| f.kind).collect();
        if report.aborted_on_auth && is_total_failure(&kinds) {
            warn!("Sequential pass rejected by the endpoint; the API is unusable");
            agg.total_failure();
            Flow::Halt
        } else {
            Flow::Continue
        }
    }
}

/// The dispatch-owned result plus progress bookkeeping.
struct Aggregate<'a> {
    result: BatchResult,
    total: usize,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> Aggregate<'a> {
    fn new(total: usize, progress: Option<&'a ProgressCallback>) -> Self {
        Self {
            result: BatchResult::default(),
            total,
            progress,
        }
    }

    /// Images with a final answer either way.
    fn settled(&self) -> usize {
        self.result.descriptions.len() + self.result.failed_keys.len()
    }

    fn record_chunk_successes(&mut self, report: &RunReport) {
        for (key, description) in &report.successes {
            self.result.descriptions.insert(key.clone(), description.clone());
            info!("Processing {}/{}: {} ... ✓", self.settled(), self.total, key);
            if let Some(cb) = self.progress {
                cb.on_item_complete(self.settled(), self.total, key);
            }
        }
    }

    fn record_failures(&mut self, failures: &[ItemFailure]) {
        for failure in failures {
            self.result.failed_keys.push(failure.item.key.clone());
            if let Some(cb) = self.progress {
                cb.on_item_error(self.settled(), self.total, &failure.item.key, failure.kind);
            }
        }
    }

    fn record_unattempted<'i>(&mut self, items: impl Iterator<Item = &'i WorkItem>) {
        self.result
            .failed_keys
            .extend(items.map(|item| item.key.clone()));
    }

    fn total_failure(&mut self) {
        self.result.api_totally_failed = true;
        if let Some(cb) = self.progress {
            cb.on_total_failure(self.result.failed_keys.len());
        }
    }

    fn finish(self) -> BatchResult {
        self.result
    }
}
