//! Output types: the report aggregate and the per-run statistics.
//!
//! Everything in [`DocumentAnalysisOutcome`] is serialised with camelCase
//! keys because the persisted report is consumed by a browser front-end that
//! reads `processedDocuments[].documentId`, `titleChainEvents[].order` and so
//! on. [`RunStats`] is returned beside the outcome and never persisted.

use crate::config::PipelineShape;
use crate::error::AnalysisError;
use edgequake_llm::ImageData;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

// ── Inputs ───────────────────────────────────────────────────────────────

/// One uploaded PDF, after rasterisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFile {
    pub name: String,
    #[serde(alias = "totalPageCount")]
    pub total_pages: usize,
}

/// One rendered page, positioned in the concatenated run sequence.
#[derive(Clone)]
pub struct PageImage {
    pub source_file_name: String,
    /// 1-based.
    pub page_number_in_source_file: usize,
    /// 0-based position across all input files.
    pub global_index: usize,
    pub image: ImageData,
    /// False when the page failed to render and `image` is a blank placeholder.
    pub rendered: bool,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("source_file_name", &self.source_file_name)
            .field("page_number_in_source_file", &self.page_number_in_source_file)
            .field("global_index", &self.global_index)
            .field("mime_type", &self.image.mime_type)
            .field("base64_len", &self.image.data.len())
            .field("rendered", &self.rendered)
            .finish()
    }
}

// ── Stage-1 output ───────────────────────────────────────────────────────

/// A contiguous page range of one file believed to be one logical document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedSegment {
    pub document_type: String,
    pub source_file_name: String,
    pub start_page: usize,
    pub end_page: usize,
}

// ── Report entities ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentStatus {
    #[default]
    Processed,
    Unsupported,
}

/// One logical document after detailed analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocument {
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub source_file_name: String,
    #[serde(default)]
    pub original_image_index: usize,
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub page_range_in_source_file: String,
    /// Narrative summary, may embed markdown tables.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parties_involved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_reason: Option<String>,
}

/// One ownership-transferring event in the title chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleChainEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub transferor: String,
    #[serde(default)]
    pub transferee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_description: Option<String>,
    #[serde(default)]
    pub summary_of_transaction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_document_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    /// Lenient parse of a model-supplied severity label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "critical" | "severe" => Some(Severity::High),
            _ => None,
        }
    }
}

/// A due-diligence risk surfaced for human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedFlagItem {
    #[serde(default)]
    pub red_flag_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_document_ids: Option<Vec<String>>,
}

/// A page not attributable to any processed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsupportedPage {
    pub source_file_name: String,
    #[serde(deserialize_with = "page_number_lenient")]
    pub page_number_in_source_file: usize,
    pub reason: String,
}

/// Who owns the property now and what it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySummary {
    #[serde(default)]
    pub current_owner: String,
    #[serde(default)]
    pub property_brief: String,
}

/// A batched-pipeline task whose synthesis failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task: String,
    pub error: String,
    pub details: String,
}

// ── Aggregate ────────────────────────────────────────────────────────────

/// The report for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnalysisOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_summary: Option<PropertySummary>,
    #[serde(default)]
    pub input_files: Vec<InputFile>,
    #[serde(default)]
    pub processed_documents: Vec<ProcessedDocument>,
    #[serde(default)]
    pub title_chain_events: Vec<TitleChainEvent>,
    #[serde(default)]
    pub red_flags: Vec<RedFlagItem>,
    #[serde(default)]
    pub unsupported_pages: Vec<UnsupportedPage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_failures: Vec<TaskFailure>,
}

impl DocumentAnalysisOutcome {
    /// An empty outcome for the given inputs.
    pub fn new(input_files: Vec<InputFile>) -> Self {
        Self {
            input_files,
            ..Default::default()
        }
    }

    pub fn document_ids(&self) -> HashSet<&str> {
        self.processed_documents
            .iter()
            .map(|d| d.document_id.as_str())
            .collect()
    }

    /// Pretty-printed JSON, the persisted report format.
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AnalysisError::Internal(format!("report serialisation failed: {e}")))
    }
}

/// Outcome plus the statistics of the run that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub outcome: DocumentAnalysisOutcome,
    pub stats: RunStats,
}

/// Counters collected while a run executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub shape: PipelineShape,
    pub total_files: usize,
    pub total_pages: usize,
    pub failed_renders: usize,
    pub inference_calls: usize,
    pub failed_calls: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub segments_identified: usize,
    pub segments_skipped: usize,
    pub unsupported_documents: usize,
    pub failed_batches: usize,
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}

// ── Serde helpers ────────────────────────────────────────────────────────

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").expect("valid regex"));

/// Accept `3`, `"3"` or `"Page 3"`; models are not consistent.
fn page_number_lenient<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n as usize),
        Raw::Text(s) => DIGITS
            .captures(&s)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| serde::de::Error::custom(format!("no page number in '{s}'"))),
    }
}

/// Shared by the parsers: first integer in a free-form string.
pub(crate) fn first_number(s: &str) -> Option<usize> {
    DIGITS.captures(s).and_then(|c| c[1].parse().ok())
}
