//! Batch-then-synthesize: four narrow tasks, each run over fixed-size page
//! batches and then merged by a synthesis call.
//!
//! Failure granularity is the batch: a failed batch leaves an
//! `{error, details}` placeholder among the partials and the task goes on.
//! A failed synthesis leaves a [`TaskFailure`] in the report and the other
//! tasks go on.

use super::{is_fatal_mid_run, AnalysisStrategy, RunContext};
use crate::config::PipelineShape;
use crate::error::AnalysisError;
use crate::output::{DocumentAnalysisOutcome, TaskFailure};
use crate::pipeline::batch::plan_batches;
use crate::pipeline::parse::{self, ShapeError};
use crate::progress::Stage;
use crate::prompts::{self, AnalysisTask};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

pub struct BatchThenSynthesize;

#[async_trait]
impl AnalysisStrategy for BatchThenSynthesize {
    fn shape(&self) -> PipelineShape {
        PipelineShape::BatchThenSynthesize
    }

    async fn run(&self, ctx: &RunContext<'_>) -> Result<DocumentAnalysisOutcome, AnalysisError> {
        let mut outcome = DocumentAnalysisOutcome::new(ctx.pages.input_files.clone());
        let label = file_label(ctx);

        for task in AnalysisTask::ALL {
            info!("--- Task {} ---", task);
            let partials = run_batches(ctx, task, &label).await?;

            match synthesize(ctx, task, &label, partials).await {
                Ok(value) => merge(&mut outcome, task, &value),
                Err(e) if is_fatal_mid_run(&e) => return Err(e),
                Err(e) => {
                    warn!("Synthesis failed for {}: {}", task, e);
                    outcome.task_failures.push(TaskFailure {
                        task: task.key().to_string(),
                        error: format!("Failed to synthesize results for {}", task.key()),
                        details: e.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }
}

/// Name used for "the document" in batch prompts.
fn file_label(ctx: &RunContext<'_>) -> String {
    match ctx.pages.input_files.as_slice() {
        [only] => only.name.clone(),
        files => format!(
            "{} files ({})",
            files.len(),
            files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// One call per batch; failures become placeholders.
async fn run_batches(
    ctx: &RunContext<'_>,
    task: AnalysisTask,
    label: &str,
) -> Result<Vec<Value>, AnalysisError> {
    let total_pages = ctx.pages.total_pages();
    let mut partials = Vec::new();

    for batch in plan_batches(&ctx.pages.pages, ctx.config.batch_size) {
        let stage = Stage::BatchTask {
            task: task.key().to_string(),
            batch_num: batch.batch_num,
            total_batches: batch.total_batches,
        };
        let prompt = format!(
            "{}\n\n{}",
            prompts::batch_task(task, label, total_pages, batch.batch_num, batch.total_batches),
            prompts::page_legend(batch.pages)
        );

        match ctx
            .call_parsed(&stage, &prompt, batch.pages, |v| Ok::<_, ShapeError>(v.clone()))
            .await
        {
            Ok(value) => partials.push(value),
            Err(e) if is_fatal_mid_run(&e) => return Err(e),
            Err(e) => {
                ctx.record(|s| s.failed_batches += 1);
                partials.push(json!({
                    "error": format!("Failed to process batch {}", batch.batch_num),
                    "details": e.to_string(),
                }));
            }
        }
    }
    info!("{}: {} batches complete", task, partials.len());
    Ok(partials)
}

fn is_placeholder(v: &Value) -> bool {
    v.get("error").is_some() && v.get("details").is_some()
}

async fn synthesize(
    ctx: &RunContext<'_>,
    task: AnalysisTask,
    label: &str,
    partials: Vec<Value>,
) -> Result<Value, AnalysisError> {
    let good = partials.iter().filter(|v| !is_placeholder(v)).count();
    if good == 0 {
        return Err(AnalysisError::Internal(format!(
            "all {} batches failed for {}",
            partials.len(),
            task.key()
        )));
    }
    // A single successful batch already is the whole answer.
    if partials.len() == 1 {
        return partials
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::Internal("empty partials".into()));
    }

    let stage = Stage::Synthesis {
        task: task.key().to_string(),
    };
    let prompt = prompts::synthesis(task, label, &partials);
    ctx.call_parsed(&stage, &prompt, &[], |v| Ok::<_, ShapeError>(v.clone()))
        .await
}

/// Shallow merge by the task's top-level key. A result without the key is a
/// task failure, not an empty section.
fn merge(outcome: &mut DocumentAnalysisOutcome, task: AnalysisTask, value: &Value) {
    let present = match task {
        AnalysisTask::PropertySummary => match parse::parse_property_summary(value) {
            Some(summary) => {
                outcome.property_summary = Some(summary);
                true
            }
            None => false,
        },
        AnalysisTask::TitleChain => parse::has_array(value, parse::EVENT_KEYS),
        AnalysisTask::DocumentDetails => parse::has_array(value, parse::DOCUMENT_KEYS),
        AnalysisTask::RedFlags => parse::has_array(value, parse::RED_FLAG_KEYS),
    };
    if !present {
        warn!("{} result has no `{}`", task, task.output_key());
        outcome.task_failures.push(TaskFailure {
            task: task.key().to_string(),
            error: format!("Result for {} contained no {}", task.key(), task.output_key()),
            details: truncate(&value.to_string(), 500),
        });
        return;
    }
    match task {
        AnalysisTask::PropertySummary => {}
        AnalysisTask::TitleChain => {
            outcome.title_chain_events = parse::parse_title_chain_events(value);
        }
        AnalysisTask::DocumentDetails => {
            outcome.processed_documents = parse::parse_processed_documents(value);
        }
        AnalysisTask::RedFlags => {
            outcome.red_flags = parse::parse_red_flags(value);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder(&json!({"error": "Failed to process batch 1", "details": "x"})));
        assert!(!is_placeholder(&json!({"redFlags": []})));
    }

    #[test]
    fn merge_sets_task_fields() {
        let mut o = DocumentAnalysisOutcome::default();
        merge(
            &mut o,
            AnalysisTask::TitleChain,
            &json!({"titleChainEvents": [{"transferor": "A", "transferee": "B"}]}),
        );
        merge(&mut o, AnalysisTask::PropertySummary, &json!({"unrelated": 1}));
        assert_eq!(o.title_chain_events.len(), 1);
        assert!(o.property_summary.is_none());
        assert_eq!(o.task_failures.len(), 1);
        assert_eq!(o.task_failures[0].task, "propertySummary");
    }

    #[test]
    fn missing_list_key_is_a_task_failure() {
        let mut o = DocumentAnalysisOutcome::default();
        merge(&mut o, AnalysisTask::RedFlags, &json!({"redFlags": []}));
        assert!(o.task_failures.is_empty());

        merge(&mut o, AnalysisTask::DocumentDetails, &json!({"note": "pages illegible"}));
        assert!(o.processed_documents.is_empty());
        assert_eq!(o.task_failures.len(), 1);
        assert_eq!(o.task_failures[0].task, "documentDetails");
        assert!(o.task_failures[0].error.contains("processedDocuments"));
        assert!(o.task_failures[0].details.contains("pages illegible"));
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate("ééé", 2), "éé…");
        assert_eq!(truncate("ab", 5), "ab");
    }
}
