//! Progress-callback trait for analysis-run events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the run rasterises files and moves through its stages.
//!
//! The callback travels inside the config for the run that owns it, so two
//! runs in one process never see each other's events.
//!
//! # Example
//!
//! ```rust
//! use edgequake_deeds::{AnalysisConfig, AnalysisProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     calls: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: &Stage) {
//!         let done = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{stage} done ({done} calls so far)");
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { calls: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// One model-call step of a run, as reported to progress callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Document boundary detection over every page.
    Identification,
    /// Detailed analysis of one identified document (0-based index, total).
    SegmentAnalysis {
        index: usize,
        total: usize,
        document_type: String,
    },
    /// One batch of one narrow task (1-based batch number).
    BatchTask {
        task: String,
        batch_num: usize,
        total_batches: usize,
    },
    /// Merging the partial results of one task.
    Synthesis { task: String },
    /// The single comprehensive call.
    SinglePass,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Identification => f.write_str("identification"),
            Stage::SegmentAnalysis {
                index,
                total,
                document_type,
            } => write!(f, "document {}/{} ({document_type})", index + 1, total),
            Stage::BatchTask {
                task,
                batch_num,
                total_batches,
            } => write!(f, "{task} batch {batch_num}/{total_batches}"),
            Stage::Synthesis { task } => write!(f, "{task} synthesis"),
            Stage::SinglePass => f.write_str("single-pass analysis"),
        }
    }
}

/// Called by the orchestrator as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `segment_concurrency > 1`, stage events for
/// different segments may arrive concurrently and out of order.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once after every input has been rasterised.
    fn on_run_start(&self, total_files: usize, total_pages: usize) {
        let _ = (total_files, total_pages);
    }

    /// Called after each input file is rasterised.
    fn on_file_rasterized(&self, file_name: &str, pages: usize) {
        let _ = (file_name, pages);
    }

    /// Called just before a model call is made.
    fn on_stage_start(&self, stage: &Stage) {
        let _ = stage;
    }

    /// Called when a model call produced usable output.
    fn on_stage_complete(&self, stage: &Stage) {
        let _ = stage;
    }

    /// Called when a stage failed (recorded inline or fatal).
    fn on_stage_error(&self, stage: &Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called once when the outcome has been assembled.
    fn on_run_complete(&self, documents: usize, title_events: usize, red_flags: usize) {
        let _ = (documents, title_events, red_flags);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        last_stage: Mutex<Option<String>>,
    }

    impl AnalysisProgressCallback for TrackingCallback {
        fn on_stage_start(&self, stage: &Stage) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.last_stage.lock().unwrap() = Some(stage.to_string());
        }

        fn on_stage_complete(&self, _stage: &Stage) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_error(&self, _stage: &Stage, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(2, 13);
        cb.on_file_rasterized("a.pdf", 3);
        cb.on_stage_start(&Stage::Identification);
        cb.on_stage_error(&Stage::SinglePass, "boom");
        cb.on_run_complete(2, 1, 0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let stage = Stage::BatchTask {
            task: "titleChain".into(),
            batch_num: 2,
            total_batches: 3,
        };
        tracker.on_stage_start(&Stage::Identification);
        tracker.on_stage_complete(&Stage::Identification);
        tracker.on_stage_start(&stage);
        tracker.on_stage_error(&stage, "timeout");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(
            tracker.last_stage.lock().unwrap().as_deref(),
            Some("titleChain batch 2/3")
        );
    }

    #[test]
    fn stage_display() {
        let s = Stage::SegmentAnalysis {
            index: 0,
            total: 4,
            document_type: "Sale Deed".into(),
        };
        assert_eq!(s.to_string(), "document 1/4 (Sale Deed)");
        assert_eq!(
            Stage::Synthesis { task: "redFlags".into() }.to_string(),
            "redFlags synthesis"
        );
    }
}
