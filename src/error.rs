//! Error types for the edgequake-deeds library.
//!
//! Three error types reflect three distinct failure granularities:
//!
//! * [`AnalysisError`]: **Fatal**, the analysis run cannot proceed at all
//!   (unreadable PDF, identification produced nothing usable, provider not
//!   configured, credentials rejected). Returned as `Err(AnalysisError)` from
//!   the top-level `analyze*` functions and from the service layer.
//!
//! * [`InferenceError`]: a single model call failed. Whether this is fatal
//!   depends on the stage: during identification it aborts the run, during
//!   per-segment or per-batch analysis it is recorded inline and the run
//!   continues. Invalid credentials are always fatal.
//!
//! * [`PageError`]: **Non-fatal**, a single page failed to render or encode.
//!   The page is replaced by a blank placeholder and reported as an
//!   [`crate::output::UnsupportedPage`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-deeds library.
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are not a PDF.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("Could not load PDF '{file}': {detail}")]
    DocumentLoad { file: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{file}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { file: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{file}'")]
    WrongPassword { file: String },

    /// Every input was empty; there is nothing to analyse.
    #[error("No pages could be processed from any of the input files")]
    NoPages,

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The identification stage produced no usable document segments.
    #[error("Document segmentation failed: {reason}")]
    SegmentationFailed { reason: String },

    /// Model output was not JSON even after lenient extraction.
    ///
    /// `raw` carries the original model text for diagnostics; it is not part
    /// of the display string because it can be arbitrarily long.
    #[error("Model response could not be parsed as JSON: {reason}")]
    UnparsableResponse { reason: String, raw: String },

    /// A model call failed at a stage where failure is fatal.
    #[error("Inference failed during {stage}: {source}")]
    Inference {
        stage: String,
        #[source]
        source: InferenceError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The provider rejected the configured credentials.
    #[error("The configured API key for '{provider}' was rejected: {detail}")]
    InvalidCredentials { provider: String, detail: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── Storage errors ────────────────────────────────────────────────────
    /// A blob or report store operation failed.
    #[error("Storage operation on '{key}' failed: {detail}")]
    Storage { key: String, detail: String },

    /// Could not create or write the output report file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to pick the user-facing message.
///
/// The three categories require different user actions: fix configuration,
/// shrink the input, or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    PayloadTooLarge,
    Generic,
}

impl AnalysisError {
    /// Wrap an inference failure, lifting credential problems to
    /// [`AnalysisError::InvalidCredentials`].
    pub fn from_inference(stage: impl Into<String>, provider: &str, source: InferenceError) -> Self {
        match source {
            InferenceError::InvalidCredentials { detail } => AnalysisError::InvalidCredentials {
                provider: provider.to_string(),
                detail,
            },
            source => AnalysisError::Inference {
                stage: stage.into(),
                source,
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AnalysisError::InvalidCredentials { .. }
            | AnalysisError::ProviderNotConfigured { .. }
            | AnalysisError::InvalidConfig(_)
            | AnalysisError::PdfiumBindingFailed(_) => ErrorCategory::Configuration,
            AnalysisError::Inference {
                source: InferenceError::PayloadTooLarge { .. },
                ..
            } => ErrorCategory::PayloadTooLarge,
            AnalysisError::Inference {
                source: InferenceError::InvalidCredentials { .. },
                ..
            } => ErrorCategory::Configuration,
            _ => ErrorCategory::Generic,
        }
    }

    /// A single human-readable sentence suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!(
                "The analysis service is not configured correctly. Please check the API key and provider settings. ({self})"
            ),
            ErrorCategory::PayloadTooLarge => "The combined document data is too large to be processed. \
                 Please try again with smaller documents or fewer pages."
                .to_string(),
            ErrorCategory::Generic => format!(
                "An error occurred while analysing the documents. Please retry. Details: {self}"
            ),
        }
    }
}

/// Failure of a single call to the generative model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// The provider rejected the API key (HTTP 401/403 or equivalent).
    #[error("invalid credentials: {detail}")]
    InvalidCredentials { detail: String },

    /// The request exceeded the provider's payload or context limits.
    #[error("request payload too large: {detail}")]
    PayloadTooLarge { detail: String },

    /// HTTP 429 or quota exhaustion.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// The call did not complete within the configured timeout.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Network or provider-side failure.
    #[error("{detail}")]
    Transport { detail: String },

    /// The provider answered with no text.
    #[error("received an empty response from the model")]
    EmptyResponse,
}

impl InferenceError {
    /// Map a provider error message onto the inference taxonomy.
    ///
    /// Providers surface failures as free-form strings; matching on the
    /// well-known fragments is the only portable way to tell them apart.
    pub fn classify(message: impl Into<String>) -> Self {
        let detail = message.into();
        let lower = detail.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&[
            "api key not valid",
            "invalid api key",
            "invalid_api_key",
            "incorrect api key",
            "unauthorized",
            "authentication",
            "permission denied",
            "401",
            "403",
        ]) {
            InferenceError::InvalidCredentials { detail }
        } else if has(&[
            "request entity too large",
            "payload size",
            "payload too large",
            "413",
            "context length",
            "maximum context",
            "too many images",
        ]) {
            InferenceError::PayloadTooLarge { detail }
        } else if has(&["429", "rate limit", "ratelimit", "quota", "resource exhausted"]) {
            InferenceError::RateLimited { detail }
        } else {
            InferenceError::Transport { detail }
        }
    }

    /// Whether a caller-side retry can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::RateLimited { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::Transport { .. }
        )
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("{file} page {page}: rasterisation failed: {detail}")]
    RenderFailed {
        file: String,
        page: usize,
        detail: String,
    },

    /// The rendered bitmap could not be encoded.
    #[error("{file} page {page}: image encoding failed: {detail}")]
    EncodeFailed {
        file: String,
        page: usize,
        detail: String,
    },
}

impl PageError {
    pub fn file(&self) -> &str {
        match self {
            PageError::RenderFailed { file, .. } | PageError::EncodeFailed { file, .. } => file,
        }
    }

    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. } | PageError::EncodeFailed { page, .. } => *page,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            PageError::RenderFailed { detail, .. } | PageError::EncodeFailed { detail, .. } => {
                detail
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_invalid_key() {
        let e = InferenceError::classify("API key not valid. Please pass a valid API key.");
        assert!(matches!(e, InferenceError::InvalidCredentials { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn classify_payload_too_large() {
        let e = InferenceError::classify("HTTP 413: Request Entity Too Large");
        assert!(matches!(e, InferenceError::PayloadTooLarge { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn classify_rate_limit_is_retryable() {
        let e = InferenceError::classify("429 Too Many Requests");
        assert!(matches!(e, InferenceError::RateLimited { .. }));
        assert!(e.is_retryable());
    }

    #[test]
    fn classify_generic_transport() {
        let e = InferenceError::classify("connection reset by peer");
        assert_eq!(
            e,
            InferenceError::Transport {
                detail: "connection reset by peer".into()
            }
        );
        assert!(e.is_retryable());
    }

    #[test]
    fn credentials_lifted_to_configuration_error() {
        let e = AnalysisError::from_inference(
            "identification",
            "gemini",
            InferenceError::InvalidCredentials {
                detail: "bad key".into(),
            },
        );
        assert!(matches!(e, AnalysisError::InvalidCredentials { .. }));
        assert_eq!(e.category(), ErrorCategory::Configuration);
        assert!(e.user_message().contains("API key"));
    }

    #[test]
    fn payload_category_and_message() {
        let e = AnalysisError::from_inference(
            "identification",
            "openai",
            InferenceError::PayloadTooLarge {
                detail: "413".into(),
            },
        );
        assert_eq!(e.category(), ErrorCategory::PayloadTooLarge);
        assert!(e.user_message().contains("too large"));
    }

    #[test]
    fn generic_category_for_segmentation() {
        let e = AnalysisError::SegmentationFailed {
            reason: "zero segments".into(),
        };
        assert_eq!(e.category(), ErrorCategory::Generic);
        assert!(e.user_message().contains("zero segments"));
    }

    #[test]
    fn unparsable_display_omits_raw() {
        let e = AnalysisError::UnparsableResponse {
            reason: "no JSON object found".into(),
            raw: "x".repeat(10_000),
        };
        assert!(e.to_string().len() < 200);
    }

    #[test]
    fn page_error_accessors() {
        let e = PageError::RenderFailed {
            file: "deed.pdf".into(),
            page: 4,
            detail: "bitmap".into(),
        };
        assert_eq!(e.file(), "deed.pdf");
        assert_eq!(e.page(), 4);
        assert!(e.to_string().contains("page 4"));
    }
}
