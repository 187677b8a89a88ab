//! Configuration types for a property-document analysis run.
//!
//! All run behaviour is controlled through [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. One struct means one place to look when two runs
//! over the same documents produce different reports.

use crate::error::AnalysisError;
use crate::progress::AnalysisProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound for [`AnalysisConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for an analysis run.
///
/// Built via [`AnalysisConfig::builder()`] or using
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_deeds::{AnalysisConfig, PipelineShape};
///
/// let config = AnalysisConfig::builder()
///     .shape(PipelineShape::BatchThenSynthesize)
///     .batch_size(8)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 8);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Render scale applied to each PDF page. Range: 0.5–4.0. Default: 1.5.
    ///
    /// 1.2–1.5 keeps stamps and handwritten registration numbers legible while
    /// holding a 100-page bundle under typical request-size limits.
    pub render_scale: f32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Image encoding for rendered pages. Default: JPEG quality 90.
    pub image_encoding: ImageEncoding,

    /// Pages per batch for the batched pipeline shape. Default: 10.
    pub batch_size: usize,

    /// Which orchestration strategy to run. Default: [`PipelineShape::SegmentThenAnalyze`].
    pub shape: PipelineShape,

    /// Number of segment analyses in flight at once. Default: 1.
    ///
    /// Results are always re-assembled in segment order before IDs are
    /// assigned, so raising this never changes the report.
    pub segment_concurrency: usize,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "anthropic").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 8192.
    ///
    /// Synthesis and single-pass responses carry the whole report; 4096 tokens
    /// truncates them on bundles with more than a dozen documents.
    pub max_tokens: usize,

    /// Ask the provider for JSON output when it supports it. Default: true.
    pub json_mode: bool,

    /// Maximum retry attempts on a retryable inference failure. Default: 2.
    ///
    /// Applied by [`crate::pipeline::llm::RetryingClient`]; the bare client
    /// never retries.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 300.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Re-sort title-chain events by date and renumber `order`. Default: true.
    pub chronological_title_chain: bool,

    /// Report pages covered by no document as unsupported. Default: true.
    pub fill_uncovered_pages: bool,

    /// Warn when a single file has more pages than this. Default: 50.
    pub warn_pages_per_file: usize,

    /// Warn when the run has more pages than this. Default: 150.
    pub warn_total_pages: usize,

    /// Optional progress callback. Default: None.
    pub progress_callback: Option<Arc<dyn AnalysisProgressCallback>>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            render_scale: 1.5,
            max_rendered_pixels: 2000,
            image_encoding: ImageEncoding::default(),
            batch_size: 10,
            shape: PipelineShape::default(),
            segment_concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            json_mode: true,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 300,
            download_timeout_secs: 120,
            password: None,
            chronological_title_chain: true,
            fill_uncovered_pages: true,
            warn_pages_per_file: 50,
            warn_total_pages: 150,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("render_scale", &self.render_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("image_encoding", &self.image_encoding)
            .field("batch_size", &self.batch_size)
            .field("shape", &self.shape)
            .field("segment_concurrency", &self.segment_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("json_mode", &self.json_mode)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("chronological_title_chain", &self.chronological_title_chain)
            .field("fill_uncovered_pages", &self.fill_uncovered_pages)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AnalysisProgressCallback>"),
            )
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.config.image_encoding = match encoding {
            ImageEncoding::Jpeg { quality } => ImageEncoding::Jpeg {
                quality: quality.clamp(1, 100),
            },
            ImageEncoding::Png => ImageEncoding::Png,
        };
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn shape(mut self, shape: PipelineShape) -> Self {
        self.config.shape = shape;
        self
    }

    pub fn segment_concurrency(mut self, n: usize) -> Self {
        self.config.segment_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn json_mode(mut self, v: bool) -> Self {
        self.config.json_mode = v;
        self
    }

    /// Capped at [`MAX_RETRIES`].
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn chronological_title_chain(mut self, v: bool) -> Self {
        self.config.chronological_title_chain = v;
        self
    }

    pub fn fill_uncovered_pages(mut self, v: bool) -> Self {
        self.config.fill_uncovered_pages = v;
        self
    }

    pub fn warn_pages_per_file(mut self, n: usize) -> Self {
        self.config.warn_pages_per_file = n;
        self
    }

    pub fn warn_total_pages(mut self, n: usize) -> Self {
        self.config.warn_total_pages = n;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn AnalysisProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalysisError> {
        let c = &self.config;
        if !(0.5..=4.0).contains(&c.render_scale) {
            return Err(AnalysisError::InvalidConfig(format!(
                "render scale must be 0.5–4.0, got {}",
                c.render_scale
            )));
        }
        if c.batch_size == 0 {
            return Err(AnalysisError::InvalidConfig("batch size must be ≥ 1".into()));
        }
        if c.segment_concurrency == 0 {
            return Err(AnalysisError::InvalidConfig(
                "segment concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(AnalysisError::InvalidConfig("max tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(AnalysisError::InvalidConfig(
                "API timeout must be at least one second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Orchestration strategy for a run.
///
/// | Shape | Calls | Failure granularity |
/// |-------|-------|---------------------|
/// | `SegmentThenAnalyze` | 1 + one per document | per document |
/// | `BatchThenSynthesize` | 4 × (batches + 1) | per batch / per task |
/// | `SinglePass` | 1 | whole run |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineShape {
    /// Identify document boundaries first, then analyse each document. (default)
    #[default]
    SegmentThenAnalyze,
    /// Run four narrow tasks over page batches, then synthesise each task.
    BatchThenSynthesize,
    /// One comprehensive call over every page. Only viable for small bundles.
    SinglePass,
}

impl fmt::Display for PipelineShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineShape::SegmentThenAnalyze => "segment-then-analyze",
            PipelineShape::BatchThenSynthesize => "batch-then-synthesize",
            PipelineShape::SinglePass => "single-pass",
        })
    }
}

/// How rendered pages are encoded before they are sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageEncoding {
    /// Lossy JPEG. Scanned deeds compress 5–10× better than PNG.
    Jpeg { quality: u8 },
    /// Lossless PNG.
    Png,
}

impl Default for ImageEncoding {
    fn default() -> Self {
        ImageEncoding::Jpeg { quality: 90 }
    }
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg { .. } => "image/jpeg",
            ImageEncoding::Png => "image/png",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = AnalysisConfig::default();
        assert_eq!(c.batch_size, 10);
        assert_eq!(c.shape, PipelineShape::SegmentThenAnalyze);
        assert_eq!(c.image_encoding, ImageEncoding::Jpeg { quality: 90 });
        assert!((c.render_scale - 1.5).abs() < f32::EPSILON);
        assert!(c.chronological_title_chain);
        assert!(c.fill_uncovered_pages);
        assert_eq!(c.warn_pages_per_file, 50);
        assert_eq!(c.warn_total_pages, 150);
    }

    #[test]
    fn setters_clamp() {
        let c = AnalysisConfig::builder()
            .render_scale(10.0)
            .batch_size(0)
            .segment_concurrency(0)
            .temperature(5.0)
            .max_retries(u32::MAX)
            .image_encoding(ImageEncoding::Jpeg { quality: 0 })
            .build()
            .unwrap();
        assert!((c.render_scale - 4.0).abs() < f32::EPSILON);
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.segment_concurrency, 1);
        assert!((c.temperature - 2.0).abs() < f32::EPSILON);
        assert_eq!(c.image_encoding, ImageEncoding::Jpeg { quality: 1 });
        assert_eq!(c.max_retries, MAX_RETRIES);
    }

    #[test]
    fn build_rejects_zero_timeout() {
        let err = AnalysisConfig::builder().api_timeout_secs(0).build().unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
    }

    #[test]
    fn mime_types() {
        assert_eq!(ImageEncoding::Png.mime_type(), "image/png");
        assert_eq!(ImageEncoding::default().mime_type(), "image/jpeg");
    }

    #[test]
    fn shape_display_matches_serde() {
        for shape in [
            PipelineShape::SegmentThenAnalyze,
            PipelineShape::BatchThenSynthesize,
            PipelineShape::SinglePass,
        ] {
            let json = serde_json::to_string(&shape).unwrap();
            assert_eq!(json, format!("\"{shape}\""));
        }
    }

    #[test]
    fn debug_hides_provider() {
        let s = format!("{:?}", AnalysisConfig::default());
        assert!(s.contains("AnalysisConfig"));
        assert!(s.contains("provider: None"));
    }
}
