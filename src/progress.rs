//! Progress-callback trait for per-image dispatch events.
//!
//! Inject an [`Arc<dyn DescribeProgressCallback>`] via
//! [`crate::config::DescribeConfigBuilder::progress_callback`] to receive
//! events as the dispatcher settles each image.
//!
//! `current` counts settled images (described or given up on), so it rises
//! monotonically from 1 to `total` across concurrent chunks, sequential
//! retries and the degraded tail of a run.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ieeu::{DescribeProgressCallback, ErrorKind};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl DescribeProgressCallback for FailureCounter {
//!     fn on_item_error(&self, _current: usize, _total: usize, key: &str, kind: ErrorKind) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{key}: {kind}");
//!     }
//! }
//! ```

use crate::pipeline::classify::ErrorKind;
use std::sync::Arc;

/// Called by the dispatcher as it processes a set of images.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. The dispatcher invokes them from its own task, never
/// from inside concurrent workers, but implementations must still be
/// `Send + Sync` because the config travels across tasks.
pub trait DescribeProgressCallback: Send + Sync {
    /// Called once before the first remote call.
    fn on_dispatch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when an image has a description.
    fn on_item_complete(&self, current: usize, total: usize, key: &str) {
        let _ = (current, total, key);
    }

    /// Called when an image has failed its final attempt.
    fn on_item_error(&self, current: usize, total: usize, key: &str, kind: ErrorKind) {
        let _ = (current, total, key, kind);
    }

    /// Called when the dispatcher switches to one call at a time for the rest
    /// of the run.
    ///
    /// `pending` counts images not yet described (chunk failures to retry plus
    /// images never attempted).
    fn on_degraded(&self, pending: usize) {
        let _ = pending;
    }

    /// Called when the endpoint rejected the credential and the dispatcher
    /// stopped issuing calls.
    fn on_total_failure(&self, failed: usize) {
        let _ = failed;
    }

    /// Called once after the last image settles.
    fn on_dispatch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DescribeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DescribeConfig`].
pub type ProgressCallback = Arc<dyn DescribeProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        completes: AtomicUsize,
        errors: AtomicUsize,
        degraded: AtomicUsize,
    }

    impl DescribeProgressCallback for TrackingCallback {
        fn on_item_complete(&self, _current: usize, _total: usize, _key: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _current: usize, _total: usize, _key: &str, _kind: ErrorKind) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_degraded(&self, pending: usize) {
            self.degraded.store(pending, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_dispatch_start(5);
        cb.on_item_complete(1, 5, "images/a.jpg");
        cb.on_item_error(2, 5, "images/b.jpg", ErrorKind::Timeout);
        cb.on_degraded(3);
        cb.on_total_failure(5);
        cb.on_dispatch_complete(5, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_item_complete(1, 3, "a");
        tracker.on_item_complete(2, 3, "b");
        tracker.on_item_error(3, 3, "c", ErrorKind::RateLimited);
        tracker.on_degraded(7);

        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.degraded.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_dispatch_start(10);
        cb.on_item_complete(1, 10, "images/a.jpg");
    }
}
