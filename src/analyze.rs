//! Synchronous-result entry points: inputs in, finished report out.
//!
//! These wait for the whole run. For the "start, then poll" contract use
//! [`crate::service::AnalysisService`].

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::orchestrator::Orchestrator;
use crate::output::{AnalysisRun, InputFile, RunStats};
use crate::pipeline::pages::PageSet;
use crate::pipeline::{input, llm, render};
use crate::pipeline::llm::InferenceClient;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Analyse one or more PDF files or URLs as a single bundle.
///
/// Inputs are rasterised in the order given; that order defines the global
/// page sequence and the `inputFiles` list of the report.
///
/// # Errors
/// Fatal errors only: unreadable or invalid inputs, no usable provider,
/// rejected credentials, or a failed identification stage. Per-document and
/// per-batch failures are recorded inside the report.
pub async fn analyze(
    inputs: &[impl AsRef<str>],
    config: &AnalysisConfig,
) -> Result<AnalysisRun, AnalysisError> {
    let mut files = Vec::with_capacity(inputs.len());
    for raw in inputs {
        let resolved = input::resolve_input(raw.as_ref(), config.download_timeout_secs).await?;
        files.push((resolved.name, resolved.bytes));
    }
    analyze_bytes(files, config).await
}

/// Analyse PDFs already held in memory, as `(file name, bytes)` pairs.
pub async fn analyze_bytes(
    files: Vec<(String, Vec<u8>)>,
    config: &AnalysisConfig,
) -> Result<AnalysisRun, AnalysisError> {
    if files.is_empty() {
        return Err(AnalysisError::NoPages);
    }
    // Fail on configuration before spending time on rendering.
    let client = llm::build_client(config).await?;

    let render_start = Instant::now();
    let mut rasterized = Vec::with_capacity(files.len());
    for (name, bytes) in files {
        input::check_magic(&name, &bytes)?;
        let file = render::rasterize_pdf(&name, bytes, config).await?;
        info!(
            "Rasterised '{}': {} pages ({} failed)",
            file.name,
            file.total_pages(),
            file.failed_pages()
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_file_rasterized(&file.name, file.total_pages());
        }
        rasterized.push(file);
    }
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    let pages = PageSet::from_rasterized(rasterized, config.image_encoding)?;
    let mut run = analyze_pages(&pages, client.as_ref(), config).await?;
    run.stats.render_duration_ms = render_duration_ms;
    run.stats.total_duration_ms += render_duration_ms;
    Ok(run)
}

/// Analyse an already prepared page sequence with a caller-supplied client.
pub async fn analyze_pages(
    pages: &PageSet,
    client: &dyn InferenceClient,
    config: &AnalysisConfig,
) -> Result<AnalysisRun, AnalysisError> {
    Orchestrator::for_shape(config.shape)
        .run(pages, client, config)
        .await
}

/// Analyse and write the report as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn analyze_to_file(
    inputs: &[impl AsRef<str>],
    output_path: impl AsRef<Path>,
    config: &AnalysisConfig,
) -> Result<RunStats, AnalysisError> {
    let run = analyze(inputs, config).await?;
    let json = run.outcome.to_json()?;
    let path = output_path.as_ref();
    let write_err = |e| AnalysisError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(run.stats)
}

/// Blocking wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally; do not call from inside one.
pub fn analyze_blocking(
    inputs: &[impl AsRef<str>],
    config: &AnalysisConfig,
) -> Result<AnalysisRun, AnalysisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalysisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(inputs, config))
}

/// Page count of one PDF. Does not require a provider or API key.
pub async fn inspect(input_str: impl AsRef<str>, password: Option<String>) -> Result<InputFile, AnalysisError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120).await?;
    let total_pages = render::page_count(&resolved.name, resolved.bytes, password).await?;
    Ok(InputFile {
        name: resolved.name,
        total_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_input_list_is_rejected() {
        let config = AnalysisConfig::default();
        let err = analyze_bytes(Vec::new(), &config).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoPages));
    }

    #[tokio::test]
    async fn missing_file_is_reported_before_any_provider_lookup() {
        let config = AnalysisConfig::default();
        let err = analyze(&["/definitely/not/here.pdf"], &config).await.unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn inspect_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.pdf");
        std::fs::write(&path, b"hello world").unwrap();
        let err = inspect(path.to_string_lossy(), None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NotAPdf { .. }), "{err:?}");
    }
}
