//! Single pass: one comprehensive call over every page.
//!
//! Cheapest in calls but bounded by the provider's request size, so only
//! sensible for small bundles. Any failure fails the run.

use super::{AnalysisStrategy, RunContext};
use crate::config::PipelineShape;
use crate::error::AnalysisError;
use crate::output::DocumentAnalysisOutcome;
use crate::pipeline::parse;
use crate::progress::Stage;
use crate::prompts;
use async_trait::async_trait;

pub struct SinglePass;

#[async_trait]
impl AnalysisStrategy for SinglePass {
    fn shape(&self) -> PipelineShape {
        PipelineShape::SinglePass
    }

    async fn run(&self, ctx: &RunContext<'_>) -> Result<DocumentAnalysisOutcome, AnalysisError> {
        let files = &ctx.pages.input_files;
        let prompt = prompts::single_pass(files, ctx.pages.total_pages());
        ctx.call_parsed(&Stage::SinglePass, &prompt, &ctx.pages.pages, |v| {
            parse::parse_outcome(v, files)
        })
        .await
    }
}
