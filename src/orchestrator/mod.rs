//! Stage orchestration: the pipeline controller.
//!
//! Three interchangeable strategies share the prompt builders, the response
//! extractor and the inference client, and differ only in control flow and
//! failure granularity:
//!
//! ```text
//! SegmentThenAnalyze   Identifying ──▶ AnalyzingSegments[0..n] ──▶ Done
//! BatchThenSynthesize  ForEachTask ──▶ ForEachBatch ──▶ Synthesizing ──▶ Merging ──▶ Done
//! SinglePass           Analyzing ──▶ Done
//! ```
//!
//! Every run, whatever the strategy, ends with [`reconcile::finalize`].
//! All mutable run state (counters, statistics) lives in a [`RunContext`]
//! owned by that run.

pub mod batched;
pub mod reconcile;
pub mod segment;
pub mod single;

pub use batched::BatchThenSynthesize;
pub use segment::SegmentThenAnalyze;
pub use single::SinglePass;

use crate::config::{AnalysisConfig, PipelineShape};
use crate::error::AnalysisError;
use crate::output::{AnalysisRun, DocumentAnalysisOutcome, PageImage, RunStats};
use crate::pipeline::extract::extract_json;
use crate::pipeline::llm::InferenceClient;
use crate::pipeline::pages::PageSet;
use crate::pipeline::parse::ShapeError;
use crate::progress::Stage;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One orchestration strategy.
#[async_trait]
pub trait AnalysisStrategy: Send + Sync {
    fn shape(&self) -> PipelineShape;

    /// Produce the raw outcome. Reconciliation is applied by the caller.
    async fn run(&self, ctx: &RunContext<'_>) -> Result<DocumentAnalysisOutcome, AnalysisError>;
}

/// Everything one run needs, threaded explicitly through the strategy.
pub struct RunContext<'a> {
    pub pages: &'a PageSet,
    pub client: &'a dyn InferenceClient,
    pub config: &'a AnalysisConfig,
    stats: Mutex<RunStats>,
}

impl<'a> RunContext<'a> {
    pub fn new(pages: &'a PageSet, client: &'a dyn InferenceClient, config: &'a AnalysisConfig) -> Self {
        Self {
            pages,
            client,
            config,
            stats: Mutex::new(RunStats {
                shape: config.shape,
                total_files: pages.input_files.len(),
                total_pages: pages.total_pages(),
                failed_renders: pages.unsupported.len(),
                ..Default::default()
            }),
        }
    }

    /// Apply an update to the run statistics.
    pub fn record(&self, f: impl FnOnce(&mut RunStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    pub fn stats(&self) -> RunStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// One model call: prompt → raw text → extracted JSON → `parse`.
    ///
    /// Reports the stage to the progress callback and counts tokens and
    /// failures. Inference failures are lifted with
    /// [`AnalysisError::from_inference`], so rejected credentials come back
    /// as [`AnalysisError::InvalidCredentials`].
    pub async fn call_parsed<T>(
        &self,
        stage: &Stage,
        prompt: &str,
        pages: &[PageImage],
        parse: impl FnOnce(&Value) -> Result<T, ShapeError> + Send,
    ) -> Result<T, AnalysisError> {
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_stage_start(stage);
        }
        debug!("{}: sending {} images, prompt {} chars", stage, pages.len(), prompt.len());

        let result = match self.client.generate(prompt, pages).await {
            Ok(response) => {
                self.record(|s| {
                    s.inference_calls += 1;
                    s.input_tokens += response.input_tokens as u64;
                    s.output_tokens += response.output_tokens as u64;
                });
                extract_json(&response.text).and_then(|value| {
                    parse(&value).map_err(|e| AnalysisError::UnparsableResponse {
                        reason: e.to_string(),
                        raw: response.text.clone(),
                    })
                })
            }
            Err(e) => {
                self.record(|s| s.inference_calls += 1);
                Err(AnalysisError::from_inference(
                    stage.to_string(),
                    self.client.provider_label(),
                    e,
                ))
            }
        };

        match &result {
            Ok(_) => {
                if let Some(cb) = cb {
                    cb.on_stage_complete(stage);
                }
            }
            Err(e) => {
                self.record(|s| s.failed_calls += 1);
                warn!("{} failed: {}", stage, e);
                if let Some(cb) = cb {
                    cb.on_stage_error(stage, &e.to_string());
                }
            }
        }
        result
    }
}

/// Failures that abort a run even where per-item failures are recorded inline.
pub(crate) fn is_fatal_mid_run(e: &AnalysisError) -> bool {
    matches!(
        e,
        AnalysisError::InvalidCredentials { .. } | AnalysisError::ProviderNotConfigured { .. }
    )
}

/// Runs one strategy end to end over a prepared page set.
pub struct Orchestrator {
    strategy: Box<dyn AnalysisStrategy>,
}

impl Orchestrator {
    pub fn for_shape(shape: PipelineShape) -> Self {
        let strategy: Box<dyn AnalysisStrategy> = match shape {
            PipelineShape::SegmentThenAnalyze => Box::new(SegmentThenAnalyze),
            PipelineShape::BatchThenSynthesize => Box::new(BatchThenSynthesize),
            PipelineShape::SinglePass => Box::new(SinglePass),
        };
        Self { strategy }
    }

    pub fn with_strategy(strategy: Box<dyn AnalysisStrategy>) -> Self {
        Self { strategy }
    }

    pub fn shape(&self) -> PipelineShape {
        self.strategy.shape()
    }

    pub async fn run(
        &self,
        pages: &PageSet,
        client: &dyn InferenceClient,
        config: &AnalysisConfig,
    ) -> Result<AnalysisRun, AnalysisError> {
        let start = Instant::now();
        if pages.total_pages() == 0 {
            return Err(AnalysisError::NoPages);
        }
        pages.warn_if_large(config.warn_pages_per_file, config.warn_total_pages);

        info!(
            "Starting {} analysis: {} files, {} pages",
            self.strategy.shape(),
            pages.input_files.len(),
            pages.total_pages()
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_start(pages.input_files.len(), pages.total_pages());
        }

        let ctx = RunContext::new(pages, client, config);
        let mut outcome = self.strategy.run(&ctx).await?;
        reconcile::finalize(&mut outcome, pages, config);

        let mut stats = ctx.stats();
        stats.shape = self.strategy.shape();
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Analysis complete: {} documents, {} title-chain events, {} red flags, {} unsupported pages, {}ms",
            outcome.processed_documents.len(),
            outcome.title_chain_events.len(),
            outcome.red_flags.len(),
            outcome.unsupported_pages.len(),
            stats.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(
                outcome.processed_documents.len(),
                outcome.title_chain_events.len(),
                outcome.red_flags.len(),
            );
        }

        Ok(AnalysisRun { outcome, stats })
    }
}
