//! The external contract: start an analysis and poll for its report, or run
//! a small analysis inline.
//!
//! Long runs scale with pages × stages, so the primary surface never holds
//! a caller waiting: [`AnalysisService::start_analysis`] returns at once and
//! the report appears in the [`ReportStore`] when the background task ends.
//! A run that fails is logged and never written; pollers keep seeing
//! `PENDING`.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::orchestrator::Orchestrator;
use crate::output::DocumentAnalysisOutcome;
use crate::pipeline::input::{check_magic, file_name_from_key};
use crate::pipeline::llm::{self, InferenceClient};
use crate::pipeline::pages::PageSet;
use crate::pipeline::render;
use crate::store::{BlobStore, ReportStore};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Reply to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub started: bool,
    pub analysis_id: String,
}

/// Reply to a poll. A missing report is `PENDING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollResponse {
    Pending,
    Complete { report: DocumentAnalysisOutcome },
}

/// Reply of the inline variant: the report itself, or `{error, details?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncAnalyzeResponse {
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Outcome(DocumentAnalysisOutcome),
}

/// A fresh globally unique analysis identifier.
pub fn new_analysis_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone)]
pub struct AnalysisService {
    blobs: Arc<dyn BlobStore>,
    reports: Arc<dyn ReportStore>,
    client: Arc<dyn InferenceClient>,
    config: Arc<AnalysisConfig>,
}

impl AnalysisService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        reports: Arc<dyn ReportStore>,
        client: Arc<dyn InferenceClient>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            blobs,
            reports,
            client,
            config: Arc::new(config),
        }
    }

    /// Build the inference client from `config` (provider auto-detection,
    /// retries and timeouts included).
    pub async fn connect(
        blobs: Arc<dyn BlobStore>,
        reports: Arc<dyn ReportStore>,
        config: AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        let client = llm::build_client(&config).await?;
        Ok(Self::new(blobs, reports, client, config))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Kick off a background run over the bytes stored under `key`.
    ///
    /// `key` is either a `*.pdf` object, rasterised in-process, or a prefix
    /// whose `{key}/images/` objects are pre-rendered pages, ordered by the
    /// page number in their names (`page_2.png` before `page_10.png`).
    /// Must be called from within a tokio runtime.
    pub fn start_analysis(&self, key: &str, analysis_id: Option<String>) -> Result<StartResponse, AnalysisError> {
        let analysis_id = analysis_id.unwrap_or_else(new_analysis_id);
        if analysis_id.is_empty() || analysis_id.contains(['/', '\\']) || analysis_id.contains("..") {
            return Err(AnalysisError::InvalidInput { input: analysis_id });
        }
        if key.trim().is_empty() {
            return Err(AnalysisError::InvalidInput { input: key.to_string() });
        }

        info!("Starting analysis {} for '{}'", analysis_id, key);
        let this = self.clone();
        let key = key.to_string();
        let id = analysis_id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_analysis(&key, &id).await {
                error!("Analysis {} for '{}' failed: {}", id, key, e);
            }
        });

        Ok(StartResponse {
            started: true,
            analysis_id,
        })
    }

    /// The background body of [`Self::start_analysis`]: load, analyse, persist.
    pub async fn run_analysis(&self, key: &str, analysis_id: &str) -> Result<(), AnalysisError> {
        let pages = self.load_pages(key).await?;
        let run = Orchestrator::for_shape(self.config.shape)
            .run(&pages, self.client.as_ref(), &self.config)
            .await?;
        self.reports.put_report(analysis_id, &run.outcome).await?;
        info!(
            "Analysis {} stored: {} documents, {} calls",
            analysis_id,
            run.outcome.processed_documents.len(),
            run.stats.inference_calls
        );
        Ok(())
    }

    pub async fn poll_report(&self, analysis_id: &str) -> Result<PollResponse, AnalysisError> {
        Ok(match self.reports.get_report(analysis_id).await? {
            Some(report) => PollResponse::Complete { report },
            None => PollResponse::Pending,
        })
    }

    /// Run to completion over inline page images and return the report or
    /// a user-facing error object.
    pub async fn analyze_inline(&self, file_name: &str, images: Vec<ImageData>) -> SyncAnalyzeResponse {
        let pages = PageSet::from_images(file_name, images);
        match Orchestrator::for_shape(self.config.shape)
            .run(&pages, self.client.as_ref(), &self.config)
            .await
        {
            Ok(run) => SyncAnalyzeResponse::Outcome(run.outcome),
            Err(e) => {
                warn!("Inline analysis of '{}' failed: {}", file_name, e);
                SyncAnalyzeResponse::Error {
                    error: e.user_message(),
                    details: Some(e.to_string()),
                }
            }
        }
    }

    async fn load_pages(&self, key: &str) -> Result<PageSet, AnalysisError> {
        let name = file_name_from_key(key);
        if key.to_ascii_lowercase().ends_with(".pdf") {
            let bytes = self.blobs.get(key).await?.ok_or_else(|| AnalysisError::Storage {
                key: key.to_string(),
                detail: "object not found".into(),
            })?;
            check_magic(&name, &bytes)?;
            let file = render::rasterize_pdf(&name, bytes, &self.config).await?;
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_file_rasterized(&file.name, file.total_pages());
            }
            return PageSet::from_rasterized(vec![file], self.config.image_encoding);
        }

        let prefix = format!("{}/images/", key.trim_end_matches('/'));
        let mut keys = self.blobs.list(&prefix).await?;
        keys.sort_by(|a, b| page_sort_key(a).cmp(&page_sort_key(b)));
        let mut images = Vec::new();
        for image_key in keys {
            let Some(mime) = image_mime(&image_key) else {
                warn!("Skipping non-image object '{}'", image_key);
                continue;
            };
            match self.blobs.get(&image_key).await? {
                Some(bytes) => images.push(ImageData::new(STANDARD.encode(&bytes), mime).with_detail("high")),
                None => warn!("'{}' disappeared while loading", image_key),
            }
        }
        if images.is_empty() {
            return Err(AnalysisError::NoPages);
        }
        info!("Loaded {} page images from '{}'", images.len(), prefix);
        Ok(PageSet::from_images(&name, images))
    }
}

static PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\D*$").expect("valid regex"));

/// Orders page-image keys by the last number in the file stem, then by key.
/// Unnumbered keys come first.
fn page_sort_key(key: &str) -> (Option<u64>, &str) {
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let number = PAGE_NUMBER
        .captures(stem)
        .and_then(|c| c[1].parse().ok());
    (number, key)
}

/// MIME type from a page-image key's extension.
fn image_mime(key: &str) -> Option<&'static str> {
    let ext = key.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_wire_format() {
        assert_eq!(
            serde_json::to_value(PollResponse::Pending).unwrap(),
            serde_json::json!({"status": "PENDING"})
        );
        let complete = serde_json::to_value(PollResponse::Complete {
            report: DocumentAnalysisOutcome::default(),
        })
        .unwrap();
        assert_eq!(complete["status"], "COMPLETE");
        assert!(complete["report"]["processedDocuments"].is_array());
    }

    #[test]
    fn start_wire_format() {
        let v = serde_json::to_value(StartResponse {
            started: true,
            analysis_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"started": true, "analysisId": "abc"}));
    }

    #[test]
    fn sync_error_wire_format() {
        let v = serde_json::to_value(SyncAnalyzeResponse::Error {
            error: "bad".into(),
            details: None,
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"error": "bad"}));
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(image_mime("a/images/0001.PNG"), Some("image/png"));
        assert_eq!(image_mime("a/images/0001.jpeg"), Some("image/jpeg"));
        assert_eq!(image_mime("a/images/notes.txt"), None);
        assert_eq!(image_mime("noext"), None);
    }

    #[test]
    fn page_keys_sort_by_number() {
        let mut keys: Vec<String> = (1..=12).rev().map(|n| format!("up/d/images/page_{n}.png")).collect();
        keys.push("up/d/images/cover.png".into());
        keys.sort_by(|a, b| page_sort_key(a).cmp(&page_sort_key(b)));
        assert_eq!(keys[0], "up/d/images/cover.png");
        assert_eq!(keys[1], "up/d/images/page_1.png");
        assert_eq!(keys[2], "up/d/images/page_2.png");
        assert_eq!(keys[10], "up/d/images/page_10.png");
        assert_eq!(keys[12], "up/d/images/page_12.png");
        // zero-padded names keep their order
        assert!(page_sort_key("a/images/0002.jpg") < page_sort_key("a/images/0010.png"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_analysis_id(), new_analysis_id());
    }
}
