//! Post-run reconciliation, applied to every strategy's outcome.
//!
//! Enforces the report invariants the model cannot be trusted with:
//! unique IDs, references that resolve, a contiguous `order` sequence,
//! and (optionally) chronological order and full page coverage.

use crate::config::AnalysisConfig;
use crate::output::{DocumentAnalysisOutcome, TitleChainEvent, UnsupportedPage};
use crate::pipeline::pages::{FileOffsets, PageSet};
use crate::pipeline::parse::parse_page_range;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

const UNCOVERED_REASON: &str = "Page not attributed to any identified document";

static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[5-9]\d{2}|2\d{3})\b").expect("valid regex"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y",
    "%d %B %Y", "%d %b %Y", "%B %d %Y",
];

/// Best-effort date parse; a bare year maps to January 1st.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| {
            // ISO prefix of a timestamp, e.g. "2001-04-05T00:00:00Z".
            s.get(..10).and_then(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").ok())
        })
        .or_else(|| {
            RE_YEAR
                .captures(s)
                .and_then(|c| c[1].parse::<i32>().ok())
                .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
        })
}

/// Apply every reconciliation pass in order.
pub fn finalize(outcome: &mut DocumentAnalysisOutcome, pages: &PageSet, config: &AnalysisConfig) {
    outcome.input_files = pages.input_files.clone();
    let offsets = pages.offsets();

    canonicalize_files(outcome, &offsets, pages);
    unique_document_ids(outcome);
    reconcile_events(outcome, config.chronological_title_chain);
    reconcile_red_flags(outcome);
    merge_unsupported(outcome, &pages.unsupported, &offsets);
    if config.fill_uncovered_pages {
        fill_uncovered(outcome, &offsets);
    }
    sort_unsupported(outcome, &offsets);
}

fn canonicalize_files(outcome: &mut DocumentAnalysisOutcome, offsets: &FileOffsets, pages: &PageSet) {
    let only = match pages.input_files.as_slice() {
        [f] => Some(f.name.clone()),
        _ => None,
    };
    for doc in &mut outcome.processed_documents {
        if let Some(name) = offsets.canonical_name(&doc.source_file_name) {
            doc.source_file_name = name.to_string();
        } else if let Some(ref only) = only {
            doc.source_file_name = only.clone();
        }
    }
}

/// Generate `base`, then `base_2`, `base_3`… until unused.
fn fresh_id(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn unique_document_ids(outcome: &mut DocumentAnalysisOutcome) {
    let mut used = HashSet::new();
    for (idx, doc) in outcome.processed_documents.iter_mut().enumerate() {
        if doc.document_id.is_empty() || used.contains(&doc.document_id) {
            let old = std::mem::take(&mut doc.document_id);
            doc.document_id = fresh_id(format!("doc_{}_idx{}", doc.source_file_name, idx), &mut used);
            debug!("Regenerated document id '{}' → '{}'", old, doc.document_id);
        } else {
            used.insert(doc.document_id.clone());
        }
    }
}

fn reconcile_events(outcome: &mut DocumentAnalysisOutcome, chronological: bool) {
    let docs: Vec<(String, String, Option<NaiveDate>)> = outcome
        .processed_documents
        .iter()
        .map(|d| {
            (
                d.document_id.clone(),
                d.document_type.to_lowercase(),
                d.date.as_deref().and_then(parse_date),
            )
        })
        .collect();
    let known: HashSet<&str> = docs.iter().map(|(id, _, _)| id.as_str()).collect();

    let mut used = HashSet::new();
    for (idx, event) in outcome.title_chain_events.iter_mut().enumerate() {
        if event.event_id.is_empty() || used.contains(&event.event_id) {
            event.event_id = fresh_id(format!("tc_event_{idx}"), &mut used);
        } else {
            used.insert(event.event_id.clone());
        }

        if let Some(ref id) = event.related_document_id {
            if !known.contains(id.as_str()) {
                warn!("Dropping dangling relatedDocumentId '{}' on {}", id, event.event_id);
                event.related_document_id = None;
            }
        }
        if event.related_document_id.is_none() {
            event.related_document_id = link_event(event, &docs);
        }
    }

    // Model-supplied order first, then (optionally) by date; both stable.
    outcome.title_chain_events.sort_by_key(|e| e.order);
    if chronological {
        outcome
            .title_chain_events
            .sort_by_key(|e| match parse_date(&e.date) {
                Some(d) => (0, d),
                None => (1, NaiveDate::MIN),
            });
    }
    for (order, event) in outcome.title_chain_events.iter_mut().enumerate() {
        event.order = order;
    }
}

/// Link an event to the document with the same type and date, if any.
fn link_event(
    event: &TitleChainEvent,
    docs: &[(String, String, Option<NaiveDate>)],
) -> Option<String> {
    let date = parse_date(&event.date)?;
    let doc_type = event.document_type.to_lowercase();
    docs.iter()
        .find(|(_, t, d)| *t == doc_type && *d == Some(date))
        .map(|(id, _, _)| id.clone())
}

fn reconcile_red_flags(outcome: &mut DocumentAnalysisOutcome) {
    let known: HashSet<String> = outcome
        .processed_documents
        .iter()
        .map(|d| d.document_id.clone())
        .collect();
    let mut used = HashSet::new();
    for (idx, flag) in outcome.red_flags.iter_mut().enumerate() {
        if flag.red_flag_id.is_empty() || used.contains(&flag.red_flag_id) {
            flag.red_flag_id = fresh_id(format!("rf_{idx}"), &mut used);
        } else {
            used.insert(flag.red_flag_id.clone());
        }
        if let Some(ids) = flag.related_document_ids.take() {
            let before = ids.len();
            let kept: Vec<String> = ids.into_iter().filter(|id| known.contains(id)).collect();
            if kept.len() < before {
                warn!(
                    "Dropped {} dangling relatedDocumentIds on {}",
                    before - kept.len(),
                    flag.red_flag_id
                );
            }
            flag.related_document_ids = (!kept.is_empty()).then_some(kept);
        }
    }
}

fn merge_unsupported(outcome: &mut DocumentAnalysisOutcome, render_failures: &[UnsupportedPage], offsets: &FileOffsets) {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(outcome.unsupported_pages.len() + render_failures.len());
    // Render failures carry the precise reason; they win over model entries.
    for page in render_failures.iter().cloned().chain(outcome.unsupported_pages.drain(..)) {
        let mut page = page;
        if let Some(name) = offsets.canonical_name(&page.source_file_name) {
            page.source_file_name = name.to_string();
        }
        if seen.insert((page.source_file_name.clone(), page.page_number_in_source_file)) {
            merged.push(page);
        }
    }
    outcome.unsupported_pages = merged;
}

fn fill_uncovered(outcome: &mut DocumentAnalysisOutcome, offsets: &FileOffsets) {
    let mut covered: HashSet<(String, usize)> = outcome
        .unsupported_pages
        .iter()
        .map(|p| (p.source_file_name.clone(), p.page_number_in_source_file))
        .collect();
    for doc in &outcome.processed_documents {
        if let Some((start, end)) = parse_page_range(&doc.page_range_in_source_file) {
            for page in start..=end.min(start + 10_000) {
                covered.insert((doc.source_file_name.clone(), page));
            }
        }
    }

    for file in &outcome.input_files {
        let Some(total) = offsets.file_pages(&file.name) else {
            continue;
        };
        for page in 1..=total {
            if !covered.contains(&(file.name.clone(), page)) {
                outcome.unsupported_pages.push(UnsupportedPage {
                    source_file_name: file.name.clone(),
                    page_number_in_source_file: page,
                    reason: UNCOVERED_REASON.to_string(),
                });
            }
        }
    }
}

fn sort_unsupported(outcome: &mut DocumentAnalysisOutcome, offsets: &FileOffsets) {
    outcome.unsupported_pages.sort_by_key(|p| {
        (
            offsets.file_order(&p.source_file_name).unwrap_or(usize::MAX),
            p.page_number_in_source_file,
        )
    });
}
