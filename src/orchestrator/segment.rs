//! Segment-then-analyze: identify document boundaries over every page, then
//! run one detailed analysis per identified document.
//!
//! Identification failure aborts the run; there is no per-page fallback.
//! A single document's analysis failure is recorded inline as an
//! `Unsupported` document and the run continues.

use super::{is_fatal_mid_run, AnalysisStrategy, RunContext};
use crate::config::PipelineShape;
use crate::error::AnalysisError;
use crate::output::{
    DocumentAnalysisOutcome, DocumentStatus, IdentifiedSegment, ProcessedDocument,
};
use crate::pipeline::parse::{self, page_range_label, DetailedAnalysis};
use crate::progress::Stage;
use crate::prompts;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::ops::Range;
use tracing::{info, warn};

pub struct SegmentThenAnalyze;

/// A segment whose local range resolved onto the global page sequence.
#[derive(Debug, Clone)]
struct PlannedSegment {
    /// Position in the identification output; used in the document ID.
    index: usize,
    segment: IdentifiedSegment,
    /// Canonical input-file name.
    file: String,
    range: Range<usize>,
}

#[async_trait]
impl AnalysisStrategy for SegmentThenAnalyze {
    fn shape(&self) -> PipelineShape {
        PipelineShape::SegmentThenAnalyze
    }

    async fn run(&self, ctx: &RunContext<'_>) -> Result<DocumentAnalysisOutcome, AnalysisError> {
        let segments = identify(ctx).await?;
        let planned = plan(ctx, segments);

        let total = planned.len();
        info!("Analysing {} documents (concurrency {})", total, ctx.config.segment_concurrency);

        // `buffered` yields in input order regardless of completion order.
        let mut results: Vec<(PlannedSegment, Result<DetailedAnalysis, AnalysisError>)> =
            stream::iter(planned.into_iter().enumerate().map(move |(k, seg)| async move {
                let stage = Stage::SegmentAnalysis {
                    index: k,
                    total,
                    document_type: seg.segment.document_type.clone(),
                };
                let slice = &ctx.pages.pages[seg.range.clone()];
                let prompt =
                    prompts::detailed_analysis(&seg.segment.document_type, &seg.file, slice.len());
                let result = ctx
                    .call_parsed(&stage, &prompt, slice, parse::parse_detailed_analysis)
                    .await;
                (seg, result)
            }))
            .buffered(ctx.config.segment_concurrency)
            .collect()
            .await;

        if let Some(pos) = results
            .iter()
            .position(|(_, r)| matches!(r, Err(e) if is_fatal_mid_run(e)))
        {
            if let (_, Err(e)) = results.swap_remove(pos) {
                return Err(e);
            }
        }

        Ok(assemble(ctx, results))
    }
}

async fn identify(ctx: &RunContext<'_>) -> Result<Vec<IdentifiedSegment>, AnalysisError> {
    let files = &ctx.pages.input_files;
    let default_file = match files.as_slice() {
        [only] => Some(only.name.as_str()),
        _ => None,
    };
    let prompt = prompts::identification(files, ctx.pages.total_pages());

    let segments = ctx
        .call_parsed(&Stage::Identification, &prompt, &ctx.pages.pages, |v| {
            parse::parse_segments(v, default_file)
        })
        .await
        .map_err(|e| match e {
            AnalysisError::UnparsableResponse { reason, .. } => {
                AnalysisError::SegmentationFailed { reason }
            }
            other => other,
        })?;

    if segments.is_empty() {
        return Err(AnalysisError::SegmentationFailed {
            reason: "identification returned zero segments".into(),
        });
    }
    info!("Identified {} document segments", segments.len());
    ctx.record(|s| s.segments_identified = segments.len());
    Ok(segments)
}

/// Resolve local ranges; out-of-bounds or inverted segments are skipped.
fn plan(ctx: &RunContext<'_>, segments: Vec<IdentifiedSegment>) -> Vec<PlannedSegment> {
    let offsets = ctx.pages.offsets();
    let mut planned = Vec::with_capacity(segments.len());
    for (index, segment) in segments.into_iter().enumerate() {
        let resolved = offsets
            .resolve_range(&segment.source_file_name, segment.start_page, segment.end_page)
            .zip(offsets.canonical_name(&segment.source_file_name));
        match resolved {
            Some((range, file)) => planned.push(PlannedSegment {
                index,
                file: file.to_string(),
                segment,
                range,
            }),
            None => {
                warn!(
                    "Skipping segment {} ({} in '{}', pages {}-{}): range does not resolve",
                    index,
                    segment.document_type,
                    segment.source_file_name,
                    segment.start_page,
                    segment.end_page
                );
                ctx.record(|s| s.segments_skipped += 1);
            }
        }
    }
    planned
}

/// Assign IDs in segment order and accumulate the outcome.
fn assemble(
    ctx: &RunContext<'_>,
    results: Vec<(PlannedSegment, Result<DetailedAnalysis, AnalysisError>)>,
) -> DocumentAnalysisOutcome {
    let mut outcome = DocumentAnalysisOutcome::new(ctx.pages.input_files.clone());
    let mut event_counter = 0;
    let mut flag_counter = 0;

    for (seg, result) in results {
        let document_id = format!("doc_{}_idx{}", seg.file, seg.index);
        let mut doc = ProcessedDocument {
            document_id: document_id.clone(),
            source_file_name: seg.file.clone(),
            original_image_index: seg.range.start,
            document_type: seg.segment.document_type.clone(),
            page_range_in_source_file: page_range_label(seg.segment.start_page, seg.segment.end_page),
            summary: String::new(),
            status: DocumentStatus::Processed,
            date: None,
            parties_involved: None,
            unsupported_reason: None,
        };

        match result {
            Ok(analysis) => {
                doc.summary = analysis.summary;
                doc.date = analysis.date;
                doc.parties_involved = analysis.parties_involved;

                if let Some(mut event) = analysis.title_chain_event {
                    event.event_id = format!("tc_event_{event_counter}");
                    event.order = event_counter;
                    event.related_document_id = Some(document_id.clone());
                    if event.document_type.is_empty() {
                        event.document_type = doc.document_type.clone();
                    }
                    if event.date.is_empty() {
                        event.date = doc.date.clone().unwrap_or_default();
                    }
                    event_counter += 1;
                    outcome.title_chain_events.push(event);
                }

                for mut flag in analysis.red_flags {
                    flag.red_flag_id = format!("rf_{flag_counter}");
                    flag.related_document_ids = Some(vec![document_id.clone()]);
                    flag_counter += 1;
                    outcome.red_flags.push(flag);
                }
            }
            Err(e) => {
                doc.status = DocumentStatus::Unsupported;
                doc.summary = "Detailed analysis could not be completed for this document.".into();
                doc.unsupported_reason = Some(format!("Analysis failed: {e}"));
                ctx.record(|s| s.unsupported_documents += 1);
            }
        }
        outcome.processed_documents.push(doc);
    }
    outcome
}
