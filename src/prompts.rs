//! Prompt builders for every model call the pipeline makes.
//!
//! Each builder is a pure function of its arguments so prompt regressions can
//! be caught by unit tests without a model. Every variant ends with
//! [`JSON_ONLY_CONTRACT`]; the response extractor is lenient, but the
//! contract is what keeps it from having to be.

use crate::output::{InputFile, PageImage};
use serde_json::Value;
use std::fmt;

/// System message sent with every call.
pub const SYSTEM_PROMPT: &str = "You are an expert AI assistant specialized in analyzing property and legal \
documents for due diligence purposes. You read scanned page images carefully, extract facts exactly as \
written, and never invent names, dates or amounts that are not visible on the pages.";

/// Extra system message sent when `json_mode` is on.
pub const JSON_MODE_HINT: &str =
    "Respond in JSON mode: the assistant message must be one JSON object and nothing else.";

/// Output contract appended to every prompt.
pub const JSON_ONLY_CONTRACT: &str = "CRITICAL INSTRUCTION: Your entire response MUST be a single, valid JSON object. \
Do not include any introductory text, phrases like \"Here is the JSON you requested\", markdown fences, or any \
text after the closing brace. The response must start with `{` and end with `}`.";

/// The four narrow tasks of the batched pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisTask {
    PropertySummary,
    TitleChain,
    DocumentDetails,
    RedFlags,
}

impl AnalysisTask {
    pub const ALL: [AnalysisTask; 4] = [
        AnalysisTask::PropertySummary,
        AnalysisTask::TitleChain,
        AnalysisTask::DocumentDetails,
        AnalysisTask::RedFlags,
    ];

    /// Task name used in logs and failure records.
    pub fn key(&self) -> &'static str {
        match self {
            AnalysisTask::PropertySummary => "propertySummary",
            AnalysisTask::TitleChain => "titleChain",
            AnalysisTask::DocumentDetails => "documentDetails",
            AnalysisTask::RedFlags => "redFlags",
        }
    }

    /// Top-level key of the task's output object.
    pub fn output_key(&self) -> &'static str {
        match self {
            AnalysisTask::PropertySummary => "propertySummary",
            AnalysisTask::TitleChain => "titleChainEvents",
            AnalysisTask::DocumentDetails => "processedDocuments",
            AnalysisTask::RedFlags => "redFlags",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AnalysisTask::PropertySummary => {
                r#"Generate a `propertySummary` object.
- Based on all documents, determine the `currentOwner`.
- Provide a concise, one-paragraph `propertyBrief` summarizing the property's key identifiers (area, location, address, survey or plot numbers).
- The output for this task must be a JSON object like: {"propertySummary": {"currentOwner": "...", "propertyBrief": "..."}}"#
            }
            AnalysisTask::TitleChain => {
                r#"Generate a `titleChainEvents` array.
- Identify all documents representing ownership transfers (Sale Deed, Gift Deed, Release Deed, inheritance or partition documents, court orders affecting title).
- For each event, extract: `eventId`, `order` (chronological, starting from 0), `date` (YYYY-MM-DD where possible), `documentType`, `transferor`, `transferee`, an optional `propertyDescription`, and a `summaryOfTransaction`.
- Use the image legend to name the `sourceFileName` and page of the evidencing document in the summary.
- Order the events strictly from oldest to newest.
- The output for this task must be a JSON object like: {"titleChainEvents": [{"eventId": "...", "order": 0, "date": "...", ...}]}"#
            }
            AnalysisTask::DocumentDetails => {
                r#"Generate a `processedDocuments` array.
- For each distinct document section, determine its `documentType`, `sourceFileName` and `pageRangeInSourceFile` (e.g. "Pages 1-5"), using the image legend.
- Provide a comprehensive `summary` that narrates the document's story and extracts all specific details: names, dates, measurements, monetary amounts, registration numbers. Use markdown tables for structured data.
- Extract the primary `date` and `partiesInvolved`.
- Assign a unique `documentId` and the starting `originalImageIndex` (0-based position in the combined page sequence, from the legend).
- The output for this task must be a JSON object like: {"processedDocuments": [{"documentId": "...", ...}]}"#
            }
            AnalysisTask::RedFlags => {
                r#"Generate a `redFlags` array.
- Identify potential issues or inconsistencies that a lawyer should be aware of.
- For each red flag, provide: `redFlagId`, a clear `description`, a `severity` ('Low', 'Medium', or 'High'), an actionable `suggestion`, and optional `relatedDocumentIds`.
- Examples: discrepancies in names or dates, gaps in the title chain, undischarged mortgages, missing documents referred to by other documents.
- The output for this task must be a JSON object like: {"redFlags": [{"redFlagId": "...", ...}]}"#
            }
        }
    }
}

impl fmt::Display for AnalysisTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// `- name (N pages)` per line.
pub fn file_list_summary(files: &[InputFile]) -> String {
    files
        .iter()
        .map(|f| format!("- {} ({} pages)", f.name, f.total_pages))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stage 1: find document boundaries across the whole page sequence.
pub fn identification(files: &[InputFile], total_pages: usize) -> String {
    format!(
        r#"The user has uploaded PDF documents which, combined, have {total_pages} pages.
The uploaded documents are:
{list}

The attached images are every page of the above documents, concatenated in the order listed.

Your task is ONLY to identify the distinct document sections (e.g. Sale Deed, Gift Deed, Lease Agreement, Tax Receipt, Legal Notice, Encumbrance Certificate, Title Search Report).
For each section report:
- `documentType`: the kind of document.
- `sourceFileName`: exactly one of the file names listed above.
- `startPage` and `endPage`: 1-based page numbers WITHIN that source file (not within the combined sequence). A section never spans two files.

Cover every document you can find. Do not summarise content yet.
Return a JSON object of the form:
{{"documents": [{{"documentType": "Sale Deed", "sourceFileName": "file.pdf", "startPage": 1, "endPage": 3}}]}}

{contract}"#,
        list = file_list_summary(files),
        contract = JSON_ONLY_CONTRACT,
    )
}

/// Stage 2: deep analysis of one already-segmented document.
pub fn detailed_analysis(document_type: &str, source_file_name: &str, page_count: usize) -> String {
    format!(
        r#"The attached {page_count} image(s) are one document of type "{document_type}" taken from the file "{source_file_name}".

Analyse ONLY this document and return:
- `summary`: a detailed explanation of the document's content, purpose and implications. Narrate any sequence of events. Extract all measurements, full names, monetary amounts (with currency), registration/survey/plot numbers and relevant dates. Present structured data (schedules of property, payment breakdowns, lists of heirs) as concise markdown tables inside the summary. Translate key content that is not in English.
- `date` (optional): the primary execution or effective date, YYYY-MM-DD where possible.
- `partiesInvolved` (optional): e.g. "John Doe (Seller) & Jane Smith (Buyer)".
- `titleChainEvent` (optional): include it ONLY if this document is itself a title-transferring instrument: a sale deed, gift deed, release deed, inheritance/succession or partition instrument, or a court order that transfers or declares title. Do NOT include it for supporting documents such as tax receipts, mutation or revenue extracts, notices, encumbrance certificates, agreements to sell or other agreements that are not the final instrument. Fields: `date`, `documentType`, `transferor`, `transferee`, `propertyDescription` (optional), `summaryOfTransaction`.
- `redFlags` (optional): issues a lawyer should investigate in this document, each with `description`, `severity` ('Low', 'Medium' or 'High') and an actionable `suggestion`.

Return a JSON object of the form:
{{"summary": "...", "date": "...", "partiesInvolved": "...", "titleChainEvent": {{"date": "...", "documentType": "...", "transferor": "...", "transferee": "...", "summaryOfTransaction": "..."}}, "redFlags": [{{"description": "...", "severity": "Medium", "suggestion": "..."}}]}}
Omit optional fields that do not apply.

{contract}"#,
        contract = JSON_ONLY_CONTRACT,
    )
}

/// Batched pipeline: one narrow task over one batch of pages.
pub fn batch_task(
    task: AnalysisTask,
    file_name: &str,
    total_pages: usize,
    batch_num: usize,
    total_batches: usize,
) -> String {
    format!(
        r#"The user has provided "{file_name}" which has {total_pages} pages in total.
This is BATCH {batch_num} of {total_batches}. You must analyze ONLY the images provided in this batch.
Your task is to focus ONLY on the following:
{description}

IMPORTANT: Your analysis for this batch will be combined with other batches later. Do not assume this batch is the complete document set. Extract all relevant details from the pages in THIS BATCH ONLY.

{contract}"#,
        description = task.description(),
        contract = JSON_ONLY_CONTRACT,
    )
}

/// Batched pipeline: merge the per-batch partials of one task.
pub fn synthesis(task: AnalysisTask, file_name: &str, partial_results: &[Value]) -> String {
    let partials = serde_json::to_string_pretty(partial_results).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"The user has provided "{file_name}". It was analyzed in multiple batches.
The following is a JSON array of the partial analysis results from each batch. Entries with an "error" key are batches that failed; ignore them.
{partials}

Your task is to synthesize these partial results into a single, final and coherent JSON object for the following task:
{description}

Consolidate all the information, remove duplicates, and ensure the final output is a complete and accurate representation of the entire document set. The top-level key must be `{output_key}`.

{contract}"#,
        description = task.description(),
        output_key = task.output_key(),
        contract = JSON_ONLY_CONTRACT,
    )
}

/// One comprehensive call producing the full report.
pub fn single_pass(files: &[InputFile], total_pages: usize) -> String {
    let input_files = serde_json::to_string(files).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"The user has uploaded PDF documents which, combined, have {total_pages} pages.
The uploaded documents are:
{list}

The attached images are every page of the above documents, concatenated in the order listed. Analyze them as one consolidated set:

1. `propertySummary`: {{"currentOwner": "...", "propertyBrief": "..."}} describing who owns the property now and its key identifiers.
2. `processedDocuments`: one entry per distinct document section with `documentId` (unique, e.g. "doc_file0_idx0"), `sourceFileName`, `originalImageIndex` (0-based index of its first image in the combined sequence), `documentType`, `pageRangeInSourceFile` (e.g. "Pages 1-5"), a comprehensive `summary` (narrative plus markdown tables for structured data), `status` ('Processed' or 'Unsupported'), optional `date`, `partiesInvolved` and `unsupportedReason`.
3. `titleChainEvents`: ownership transfers only (sale, gift, release, inheritance, court orders affecting title) with `eventId`, `order` (0 = oldest), `date` (YYYY-MM-DD), `documentType`, `transferor`, `transferee`, optional `propertyDescription`, `summaryOfTransaction`, optional `relatedDocumentId`. Strictly oldest to newest.
4. `redFlags`: issues a lawyer should investigate, with `redFlagId`, `description`, `severity` ('Low', 'Medium', 'High'), `suggestion`, optional `relatedDocumentIds`.
5. `unsupportedPages`: blank, separator or illegible pages with `sourceFileName`, `pageNumberInSourceFile` and `reason`.
6. `inputFiles`: populate with {input_files}

{contract}"#,
        list = file_list_summary(files),
        contract = JSON_ONLY_CONTRACT,
    )
}

/// Per-image legend so batch-scoped results can name files and pages.
pub fn page_legend(pages: &[PageImage]) -> String {
    let mut out = String::from("Image legend (images are attached in this order):\n");
    for (k, p) in pages.iter().enumerate() {
        out.push_str(&format!(
            "- Image {} = file \"{}\", page {} (combined index {}){}\n",
            k + 1,
            p.source_file_name,
            p.page_number_in_source_file,
            p.global_index,
            if p.rendered { "" } else { " [could not be rendered]" }
        ));
    }
    out
}
