//! # edgequake-deeds
//!
//! Property due diligence over scanned title documents using Vision
//! Language Models (VLMs).
//!
//! A bundle of PDFs (sale deeds, tax receipts, encumbrance certificates,
//! mutation records…) goes in; a structured [`DocumentAnalysisOutcome`]
//! comes out: one entry per logical document found in the bundle, a dated
//! chain of title transfers, risk flags, and the pages that could not be
//! attributed to anything.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Input       resolve local files or download URLs
//!  ├─ 2. Render      rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode      JPEG/PNG → base64 ImageData, one global page sequence
//!  ├─ 4. Orchestrate one of three strategies (see below), each call going
//!  │                 prompt → VLM → JSON extraction → lenient parse
//!  ├─ 5. Reconcile   unique IDs, resolvable references, dated title chain
//!  └─ 6. Output      DocumentAnalysisOutcome JSON + run statistics
//! ```
//!
//! | Shape | Calls | Failure granularity |
//! |-------|-------|---------------------|
//! | [`PipelineShape::SegmentThenAnalyze`] (default) | 1 + one per document | per document |
//! | [`PipelineShape::BatchThenSynthesize`] | 4 tasks × (batches + 1) | per batch / per task |
//! | [`PipelineShape::SinglePass`] | 1 | whole run |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_deeds::{analyze, AnalysisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = AnalysisConfig::default();
//!     let run = analyze(&["sale-deed.pdf", "tax-receipts.pdf"], &config).await?;
//!     println!("{}", run.outcome.to_json()?);
//!     eprintln!("{} calls, {} tokens in", run.stats.inference_calls, run.stats.input_tokens);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deeds` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-deeds = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_blocking, analyze_bytes, analyze_pages, analyze_to_file, inspect};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, ImageEncoding, PipelineShape};
pub use error::{AnalysisError, ErrorCategory, InferenceError, PageError};
pub use orchestrator::{AnalysisStrategy, Orchestrator};
pub use output::{
    AnalysisRun, DocumentAnalysisOutcome, DocumentStatus, InputFile, PageImage, ProcessedDocument,
    PropertySummary, RedFlagItem, RunStats, Severity, TaskFailure, TitleChainEvent, UnsupportedPage,
};
pub use pipeline::llm::{InferenceClient, InferenceResponse, LlmInferenceClient, RetryingClient};
pub use pipeline::pages::PageSet;
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use service::{AnalysisService, PollResponse, StartResponse, SyncAnalyzeResponse};
pub use store::{BlobStore, FsStore, MemoryStore, ReportStore};
