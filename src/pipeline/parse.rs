//! Validation of model JSON into domain entities.
//!
//! The model's output is untyped. Nothing here deserialises it straight into
//! the report types: each field is read explicitly, coerced where a model is
//! known to drift (numbers as strings, `"Pages 1-3"` instead of two integers,
//! `"high"` instead of `"High"`), and entries missing required fields are
//! dropped with a warning instead of poisoning the whole response.

use crate::output::{
    first_number, DocumentAnalysisOutcome, DocumentStatus, IdentifiedSegment, InputFile,
    ProcessedDocument, PropertySummary, RedFlagItem, Severity, TitleChainEvent, UnsupportedPage,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Model JSON parsed, but not into the shape a stage needs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unexpected response shape: {0}")]
pub struct ShapeError(pub String);

/// Result of one detailed-analysis call, before IDs are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailedAnalysis {
    pub summary: String,
    pub date: Option<String>,
    pub parties_involved: Option<String>,
    /// `event_id`, `order` and `related_document_id` are left for the orchestrator.
    pub title_chain_event: Option<TitleChainEvent>,
    /// `red_flag_id` and `related_document_ids` are left for the orchestrator.
    pub red_flags: Vec<RedFlagItem>,
}

static RE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:-|–|—|to|through)\s*(\d+)").expect("valid regex")
});

// ── Page ranges ──────────────────────────────────────────────────────────

/// `"Pages a-b"`, or `"Page a"` for a single page.
pub fn page_range_label(start: usize, end: usize) -> String {
    if start == end {
        format!("Page {start}")
    } else {
        format!("Pages {start}-{end}")
    }
}

/// Parse `"Pages 1-3"`, `"pages 4 to 6"`, `"Page 2"` into an inclusive range.
pub fn parse_page_range(label: &str) -> Option<(usize, usize)> {
    if let Some(c) = RE_RANGE.captures(label) {
        let start = c[1].parse().ok()?;
        let end = c[2].parse().ok()?;
        return Some((start, end));
    }
    first_number(label).map(|n| (n, n))
}

// ── Field helpers ────────────────────────────────────────────────────────

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Array(items)) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
                .map(str::to_string)
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    })
}

fn usize_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<usize> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
        Some(Value::String(s)) => first_number(s),
        _ => None,
    })
}

/// Locate an array under any of `keys`, at the top level or one object deeper.
/// A bare array is returned as is.
/// Keys a processed-document list may appear under.
pub const DOCUMENT_KEYS: &[&str] = &["processedDocuments", "documents"];
/// Keys a title-chain list may appear under.
pub const EVENT_KEYS: &[&str] = &["titleChainEvents", "titleChain", "events"];
/// Keys a red-flag list may appear under.
pub const RED_FLAG_KEYS: &[&str] = &["redFlags", "flags"];

/// Whether `value` carries a list under one of `keys`. An empty list counts.
pub fn has_array(value: &Value, keys: &[&str]) -> bool {
    find_array(value, keys).is_some()
}

fn find_array<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(obj) => keys
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
            .or_else(|| {
                obj.values()
                    .filter(|v| v.is_object())
                    .find_map(|v| keys.iter().find_map(|k| v.get(*k).and_then(Value::as_array)))
            }),
        _ => None,
    }
}

fn objects<'a>(items: &'a [Value], what: &str) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
    let what = what.to_string();
    items.iter().filter_map(move |v| {
        let obj = v.as_object();
        if obj.is_none() {
            warn!("Dropping non-object {} entry: {}", what, v);
        }
        obj
    })
}

// ── Stage parsers ────────────────────────────────────────────────────────

/// Identification output → segments.
///
/// `default_file` is used when an entry omits `sourceFileName`, which is only
/// unambiguous for single-file runs.
pub fn parse_segments(
    value: &Value,
    default_file: Option<&str>,
) -> Result<Vec<IdentifiedSegment>, ShapeError> {
    let items = find_array(
        value,
        &["documents", "segments", "identifiedDocuments", "identifiedSegments", "processedDocuments"],
    )
    .ok_or_else(|| ShapeError("no document list in identification response".into()))?;

    let mut segments = Vec::with_capacity(items.len());
    for obj in objects(items, "segment") {
        let Some(source_file_name) = str_field(obj, &["sourceFileName", "fileName", "file"])
            .or_else(|| default_file.map(str::to_string))
        else {
            warn!("Dropping segment without sourceFileName: {:?}", obj);
            continue;
        };
        let explicit = usize_field(obj, &["startPage", "start"])
            .map(|s| (s, usize_field(obj, &["endPage", "end"]).unwrap_or(s)));
        let range = explicit.or_else(|| {
            str_field(obj, &["pageRangeInSourceFile", "pageRange", "pages"])
                .and_then(|l| parse_page_range(&l))
        });
        let Some((start_page, end_page)) = range else {
            warn!("Dropping segment without page range in {}", source_file_name);
            continue;
        };
        segments.push(IdentifiedSegment {
            document_type: str_field(obj, &["documentType", "type"])
                .unwrap_or_else(|| "Unknown Document".to_string()),
            source_file_name,
            start_page,
            end_page,
        });
    }
    Ok(segments)
}

/// Detailed-analysis output for one document.
pub fn parse_detailed_analysis(value: &Value) -> Result<DetailedAnalysis, ShapeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ShapeError("detailed analysis is not a JSON object".into()))?;
    let summary = str_field(obj, &["summary", "documentSummary"])
        .ok_or_else(|| ShapeError("detailed analysis has no summary".into()))?;

    let title_chain_event = obj
        .get("titleChainEvent")
        .and_then(Value::as_object)
        .and_then(event_from)
        .or_else(|| {
            // Some models answer with a one-element array under the plural key.
            obj.get("titleChainEvents")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_object)
                .and_then(event_from)
        });

    let red_flags = obj
        .get("redFlags")
        .and_then(Value::as_array)
        .map(|items| objects(items, "red flag").filter_map(red_flag_from).collect())
        .unwrap_or_default();

    Ok(DetailedAnalysis {
        summary,
        date: str_field(obj, &["date"]),
        parties_involved: str_field(obj, &["partiesInvolved", "parties"]),
        title_chain_event,
        red_flags,
    })
}

/// `{"propertySummary": {...}}`, the inner object, or a bare string.
pub fn parse_property_summary(value: &Value) -> Option<PropertySummary> {
    let inner = value.get("propertySummary").unwrap_or(value);
    match inner {
        Value::Object(obj) => {
            let current_owner = str_field(obj, &["currentOwner", "owner"]);
            let property_brief = str_field(obj, &["propertyBrief", "brief", "description"]);
            if current_owner.is_none() && property_brief.is_none() {
                return None;
            }
            Some(PropertySummary {
                current_owner: current_owner.unwrap_or_default(),
                property_brief: property_brief.unwrap_or_default(),
            })
        }
        Value::String(s) if !s.trim().is_empty() => Some(PropertySummary {
            current_owner: String::new(),
            property_brief: s.trim().to_string(),
        }),
        _ => None,
    }
}

pub fn parse_processed_documents(value: &Value) -> Vec<ProcessedDocument> {
    let Some(items) = find_array(value, DOCUMENT_KEYS) else {
        return Vec::new();
    };
    objects(items, "document")
        .filter_map(|obj| {
            let summary = str_field(obj, &["summary"]);
            let document_type = str_field(obj, &["documentType", "type"]);
            if summary.is_none() && document_type.is_none() {
                warn!("Dropping document with neither type nor summary");
                return None;
            }
            let page_range = str_field(obj, &["pageRangeInSourceFile", "pageRange"]).or_else(|| {
                usize_field(obj, &["startPage"]).map(|s| {
                    page_range_label(s, usize_field(obj, &["endPage"]).unwrap_or(s))
                })
            });
            let status = match str_field(obj, &["status"]) {
                Some(s) if s.eq_ignore_ascii_case("unsupported") => DocumentStatus::Unsupported,
                _ => DocumentStatus::Processed,
            };
            Some(ProcessedDocument {
                document_id: str_field(obj, &["documentId", "id"]).unwrap_or_default(),
                source_file_name: str_field(obj, &["sourceFileName", "fileName"]).unwrap_or_default(),
                original_image_index: usize_field(obj, &["originalImageIndex"]).unwrap_or(0),
                document_type: document_type.unwrap_or_else(|| "Unknown Document".to_string()),
                page_range_in_source_file: page_range.unwrap_or_default(),
                summary: summary.unwrap_or_default(),
                status,
                date: str_field(obj, &["date"]),
                parties_involved: str_field(obj, &["partiesInvolved", "parties"]),
                unsupported_reason: str_field(obj, &["unsupportedReason", "reason"]),
            })
        })
        .collect()
}

pub fn parse_title_chain_events(value: &Value) -> Vec<TitleChainEvent> {
    find_array(value, EVENT_KEYS)
        .map(|items| objects(items, "title-chain event").filter_map(event_from).collect())
        .unwrap_or_default()
}

pub fn parse_red_flags(value: &Value) -> Vec<RedFlagItem> {
    find_array(value, RED_FLAG_KEYS)
        .map(|items| objects(items, "red flag").filter_map(red_flag_from).collect())
        .unwrap_or_default()
}

pub fn parse_unsupported_pages(value: &Value) -> Vec<UnsupportedPage> {
    let Some(items) = find_array(value, &["unsupportedPages"]) else {
        return Vec::new();
    };
    objects(items, "unsupported page")
        .filter_map(|obj| {
            let page = usize_field(obj, &["pageNumberInSourceFile", "pageNumber", "page"])?;
            Some(UnsupportedPage {
                source_file_name: str_field(obj, &["sourceFileName", "fileName"]).unwrap_or_default(),
                page_number_in_source_file: page,
                reason: str_field(obj, &["reason"]).unwrap_or_else(|| "Unsupported page".to_string()),
            })
        })
        .collect()
}

/// A full report as produced by the single-pass prompt.
///
/// Missing arrays default to empty. `inputFiles` always comes from the run:
/// the model only echoes what it was told.
pub fn parse_outcome(value: &Value, input_files: &[InputFile]) -> Result<DocumentAnalysisOutcome, ShapeError> {
    if !value.is_object() {
        return Err(ShapeError("report is not a JSON object".into()));
    }
    Ok(DocumentAnalysisOutcome {
        property_summary: value.get("propertySummary").and_then(parse_property_summary),
        input_files: input_files.to_vec(),
        processed_documents: value
            .get("processedDocuments")
            .map(parse_processed_documents)
            .unwrap_or_default(),
        title_chain_events: value
            .get("titleChainEvents")
            .map(parse_title_chain_events)
            .unwrap_or_default(),
        red_flags: value.get("redFlags").map(parse_red_flags).unwrap_or_default(),
        unsupported_pages: value
            .get("unsupportedPages")
            .map(parse_unsupported_pages)
            .unwrap_or_default(),
        task_failures: Vec::new(),
    })
}

fn event_from(obj: &Map<String, Value>) -> Option<TitleChainEvent> {
    let transferor = str_field(obj, &["transferor", "from"]);
    let transferee = str_field(obj, &["transferee", "to"]);
    let summary = str_field(obj, &["summaryOfTransaction", "summary"]);
    if transferor.is_none() && transferee.is_none() && summary.is_none() {
        warn!("Dropping title-chain event with no parties and no summary");
        return None;
    }
    Some(TitleChainEvent {
        event_id: str_field(obj, &["eventId", "id"]).unwrap_or_default(),
        order: usize_field(obj, &["order"]).unwrap_or(0),
        date: str_field(obj, &["date"]).unwrap_or_default(),
        document_type: str_field(obj, &["documentType", "type"]).unwrap_or_default(),
        transferor: transferor.unwrap_or_else(|| "N/A".to_string()),
        transferee: transferee.unwrap_or_else(|| "N/A".to_string()),
        property_description: str_field(obj, &["propertyDescription"]),
        summary_of_transaction: summary.unwrap_or_default(),
        related_document_id: str_field(obj, &["relatedDocumentId"]),
    })
}

fn red_flag_from(obj: &Map<String, Value>) -> Option<RedFlagItem> {
    let Some(description) = str_field(obj, &["description", "issue"]) else {
        warn!("Dropping red flag without description");
        return None;
    };
    let severity = str_field(obj, &["severity"])
        .and_then(|s| Severity::from_label(&s))
        .unwrap_or_default();
    let related = match obj.get("relatedDocumentIds") {
        Some(Value::Array(ids)) => Some(
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>(),
        ),
        Some(Value::String(id)) if !id.is_empty() => Some(vec![id.clone()]),
        _ => None,
    };
    Some(RedFlagItem {
        red_flag_id: str_field(obj, &["redFlagId", "id"]).unwrap_or_default(),
        description,
        severity,
        suggestion: str_field(obj, &["suggestion", "recommendation"]).unwrap_or_default(),
        related_document_ids: related,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels() {
        assert_eq!(page_range_label(1, 3), "Pages 1-3");
        assert_eq!(page_range_label(4, 4), "Page 4");
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_page_range("Pages 1-10"), Some((1, 10)));
        assert_eq!(parse_page_range("pages 4 to 6"), Some((4, 6)));
        assert_eq!(parse_page_range("Pages 2–5"), Some((2, 5)));
        assert_eq!(parse_page_range("Page 7"), Some((7, 7)));
        assert_eq!(parse_page_range("cover"), None);
    }

    #[test]
    fn segments_from_documents_key() {
        let v = json!({"documents": [
            {"documentType": "Sale Deed", "sourceFileName": "a.pdf", "startPage": 1, "endPage": 3},
            {"documentType": "Lease", "sourceFileName": "b.pdf", "startPage": "1", "endPage": "10"}
        ]});
        let s = parse_segments(&v, None).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s[1].end_page, 10);
        assert_eq!(s[0].document_type, "Sale Deed");
    }

    #[test]
    fn segments_from_bare_array_and_range_label() {
        let v = json!([{"documentType": "Will", "pageRangeInSourceFile": "Pages 2-4"}]);
        let s = parse_segments(&v, Some("only.pdf")).unwrap();
        assert_eq!(
            s,
            vec![IdentifiedSegment {
                document_type: "Will".into(),
                source_file_name: "only.pdf".into(),
                start_page: 2,
                end_page: 4,
            }]
        );
    }

    #[test]
    fn segments_drop_incomplete_entries() {
        let v = json!({"documents": [
            {"documentType": "Will"},
            "garbage",
            {"documentType": "Deed", "sourceFileName": "a.pdf", "startPage": 5}
        ]});
        let s = parse_segments(&v, None).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!((s[0].start_page, s[0].end_page), (5, 5));
    }

    #[test]
    fn segments_require_a_list() {
        assert!(parse_segments(&json!({"note": "nothing"}), None).is_err());
    }

    #[test]
    fn detailed_without_event() {
        let v = json!({"summary": "Property tax paid for 2019.", "date": "2019-03-01"});
        let d = parse_detailed_analysis(&v).unwrap();
        assert!(d.title_chain_event.is_none());
        assert!(d.red_flags.is_empty());
        assert_eq!(d.date.as_deref(), Some("2019-03-01"));
    }

    #[test]
    fn detailed_with_event_and_flags() {
        let v = json!({
            "summary": "Sale of plot 12.",
            "partiesInvolved": ["John Doe", "Jane Smith"],
            "titleChainEvent": {"date": "2001-04-05", "documentType": "Sale Deed",
                                "transferor": "John Doe", "transferee": "Jane Smith",
                                "summaryOfTransaction": "Sold for $50,000"},
            "redFlags": [{"description": "Witness unsigned", "severity": "high", "suggestion": "Check"}]
        });
        let d = parse_detailed_analysis(&v).unwrap();
        assert_eq!(d.parties_involved.as_deref(), Some("John Doe, Jane Smith"));
        let e = d.title_chain_event.unwrap();
        assert_eq!(e.transferee, "Jane Smith");
        assert_eq!(d.red_flags[0].severity, Severity::High);
    }

    #[test]
    fn detailed_null_event_is_none() {
        let v = json!({"summary": "Notice.", "titleChainEvent": null});
        assert!(parse_detailed_analysis(&v).unwrap().title_chain_event.is_none());
    }

    #[test]
    fn detailed_requires_summary() {
        assert!(parse_detailed_analysis(&json!({"date": "2001"})).is_err());
        assert!(parse_detailed_analysis(&json!([1])).is_err());
    }

    #[test]
    fn property_summary_shapes() {
        let a = parse_property_summary(&json!({"propertySummary": {"currentOwner": "Jane", "propertyBrief": "Plot 12"}}));
        assert_eq!(a.unwrap().current_owner, "Jane");
        let b = parse_property_summary(&json!({"currentOwner": "Jane"}));
        assert_eq!(b.unwrap().property_brief, "");
        assert!(parse_property_summary(&json!({"error": "x"})).is_none());
    }

    #[test]
    fn nested_task_key_is_found() {
        let v = json!({"titleChain": {"titleChainEvents": [{"transferor": "A", "transferee": "B", "order": "1"}]}});
        let e = parse_title_chain_events(&v);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].order, 1);
    }

    #[test]
    fn documents_derive_page_range() {
        let v = json!({"processedDocuments": [
            {"documentType": "Deed", "startPage": 2, "endPage": 2, "summary": "s", "status": "unsupported"}
        ]});
        let d = parse_processed_documents(&v);
        assert_eq!(d[0].page_range_in_source_file, "Page 2");
        assert_eq!(d[0].status, DocumentStatus::Unsupported);
    }

    #[test]
    fn red_flags_default_severity_and_single_id() {
        let v = json!({"redFlags": [{"description": "Gap", "severity": "???", "relatedDocumentIds": "doc_1"}]});
        let f = parse_red_flags(&v);
        assert_eq!(f[0].severity, Severity::Medium);
        assert_eq!(f[0].related_document_ids, Some(vec!["doc_1".to_string()]));
    }

    #[test]
    fn unsupported_pages_from_strings() {
        let v = json!({"unsupportedPages": [
            {"sourceFileName": "a.pdf", "pageNumberInSourceFile": "3", "reason": "blank"},
            {"sourceFileName": "a.pdf", "reason": "no page"}
        ]});
        let p = parse_unsupported_pages(&v);
        assert_eq!(p.len(), 1);
        assert_eq!(p[0].page_number_in_source_file, 3);
    }

    #[test]
    fn outcome_defaults_missing_arrays() {
        let files = vec![InputFile {
            name: "a.pdf".into(),
            total_pages: 2,
        }];
        let o = parse_outcome(&json!({"processedDocuments": []}), &files).unwrap();
        assert_eq!(o.input_files, files);
        assert!(o.title_chain_events.is_empty());
        assert!(o.red_flags.is_empty());
        assert!(o.property_summary.is_none());
        assert!(parse_outcome(&json!([]), &files).is_err());
    }
}
