use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::tabular::{self, ParseError};
use crate::validate;
use serde_json::json;
use std::path::PathBuf;

fn parse_error_response(id: &str, e: ParseError) -> serde_json::Value {
    let code = match &e {
        ParseError::Empty | ParseError::NoDataRows => "empty_file",
        ParseError::MissingColumns(_) => "missing_columns",
        ParseError::UnsupportedFormat(_) => "bad_params",
        _ => "parse_failed",
    };
    err(id, code, e.to_string(), None)
}

/// Freshly parsed batches are validated immediately so the operator sees
/// findings without an extra round trip.
fn stage_batch(
    id: &str,
    state: &mut AppState,
    mut doc: crate::model::StagingDocument,
) -> serde_json::Value {
    let summary = validate::validate_document(&mut doc);
    let response = match serde_json::to_value(&doc) {
        Ok(batch) => ok(
            id,
            json!({
                "batch": batch,
                "summary": summary,
                "totalSchools": doc.metadata.total_schools,
                "totalStudents": doc.metadata.total_students,
            }),
        ),
        Err(e) => return err(id, "internal", e.to_string(), None),
    };
    state.staging.load(doc);
    response
}

fn handle_ingest_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match tabular::parse_file(&PathBuf::from(path)) {
        Ok(doc) => stage_batch(&req.id, state, doc),
        Err(e) => parse_error_response(&req.id, e),
    }
}

/// Rows handed over pre-extracted (e.g. from a clipboard paste); the first
/// row is still the header row.
fn handle_ingest_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    let rows: Vec<Vec<String>> = match req.params.get("rows") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(rows) => rows,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("params.rows must be an array of string arrays: {e}"),
                    None,
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing params.rows", None),
    };
    let source = req
        .params
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or("rows");

    match tabular::from_rows(rows, source) {
        Ok(doc) => stage_batch(&req.id, state, doc),
        Err(e) => parse_error_response(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ingest.file" => Some(handle_ingest_file(state, req)),
        "ingest.rows" => Some(handle_ingest_rows(state, req)),
        _ => None,
    }
}
