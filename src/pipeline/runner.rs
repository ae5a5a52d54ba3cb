//! Runners: drive the [`Describer`] over a set of work items.
//!
//! * [`run_concurrent`]: up to `max_concurrency` calls in flight, results
//!   joined once every item has an outcome. Completion order is arbitrary.
//! * [`run_sequential`]: strictly one call at a time in input order. This is
//!   the deliberate throughput reduction the dispatcher falls back to when the
//!   endpoint complains about load.
//!
//! Runners never touch the dispatch aggregate. They return a [`RunReport`]
//! and the dispatcher merges it on its own task.

use crate::pipeline::classify::ErrorKind;
use crate::pipeline::describe::Describer;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// One image to describe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// Stable identifier, e.g. the relative path written in the document.
    pub key: String,
    /// Where to read the image bytes from.
    pub location: PathBuf,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            location: location.into(),
        }
    }
}

/// Result of one describe attempt for one item.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item: WorkItem,
    pub result: Result<String, ErrorKind>,
}

impl ItemOutcome {
    pub fn key(&self) -> &str {
        &self.item.key
    }

    /// `Success` for a description, otherwise the failure kind.
    pub fn kind(&self) -> ErrorKind {
        match self.result {
            Ok(_) => ErrorKind::Success,
            Err(kind) => kind,
        }
    }
}

/// An item whose latest attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item: WorkItem,
    pub kind: ErrorKind,
}

/// What a runner hands back to the dispatcher.
#[derive(Debug, Default)]
pub struct RunReport {
    pub successes: BTreeMap<String, String>,
    /// Concurrent runs: completion order. Sequential runs: input order.
    pub failures: Vec<ItemFailure>,
    /// Items a sequential run skipped after an `AuthError`.
    pub unattempted: Vec<WorkItem>,
    /// A sequential run stopped early on an `AuthError`.
    pub aborted_on_auth: bool,
}

impl RunReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome.result {
            Ok(description) => {
                self.successes.insert(outcome.item.key, description);
            }
            Err(kind) => self.failures.push(ItemFailure {
                item: outcome.item,
                kind,
            }),
        }
    }

    /// Kinds of every failure, in report order.
    pub fn failure_kinds(&self) -> Vec<ErrorKind> {
        self.failures.iter().map(|f| f.kind).collect()
    }

    /// The failed items, ready to be retried.
    pub fn failed_items(&self) -> Vec<WorkItem> {
        self.failures.iter().map(|f| f.item.clone()).collect()
    }
}

/// Describe `items` with at most `min(items.len(), max_concurrency)` calls in flight.
///
/// Returns only after every item has an outcome; in-flight calls are never
/// cancelled.
pub async fn run_concurrent(
    describer: &Describer,
    items: &[WorkItem],
    max_concurrency: usize,
) -> RunReport {
    let width = items.len().min(max_concurrency).max(1);

    let outcomes: Vec<ItemOutcome> = stream::iter(items.iter().map(|item| async move {
        let result = describer.describe(&item.location).await;
        ItemOutcome {
            item: item.clone(),
            result,
        }
    }))
    .buffer_unordered(width)
    .collect()
    .await;

    let mut report = RunReport::default();
    for outcome in outcomes {
        report.record(outcome);
    }
    report
}

/// Describe `items` one at a time, in order.
///
/// After each item reports `(progress_offset + index + 1) / total` to
/// `progress`. Stops at the first `AuthError`: the credential will not
/// recover mid-list, so the rest go to [`RunReport::unattempted`].
pub async fn run_sequential(
    describer: &Describer,
    items: &[WorkItem],
    progress_offset: usize,
    total: usize,
    progress: Option<&ProgressCallback>,
) -> RunReport {
    let mut report = RunReport::default();

    for (index, item) in items.iter().enumerate() {
        let current = progress_offset + index + 1;
        let outcome = ItemOutcome {
            item: item.clone(),
            result: describer.describe(&item.location).await,
        };
        let kind = outcome.kind();

        match kind {
            ErrorKind::Success => {
                info!("Processing {}/{}: {} ... ✓", current, total, item.key);
                if let Some(cb) = progress {
                    cb.on_item_complete(current, total, &item.key);
                }
            }
            _ => {
                warn!("Processing {}/{}: {} ... ✗ ({})", current, total, item.key, kind);
                if let Some(cb) = progress {
                    cb.on_item_error(current, total, &item.key, kind);
                }
            }
        }

        report.record(outcome);

        if kind == ErrorKind::AuthError {
            warn!("Credential rejected; skipping {} queued image(s)", items.len() - index - 1);
            report.unattempted = items[index + 1..].to_vec();
            report.aborted_on_auth = true;
            break;
        }
    }

    report
}
