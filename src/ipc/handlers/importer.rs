use crate::identity;
use crate::import;
use crate::ipc::error::{err, ok, staging_err};
use crate::ipc::types::{AppState, Request};
use crate::model::ProcessingStage;
use crate::staging;
use crate::store::SqliteStore;
use crate::validate;
use serde_json::json;

/// Commit the staged batch. Refused outright while duplicates are
/// unresolved, blocking errors remain, or flagged schools are unconfirmed.
fn handle_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(doc) = state.staging.current() else {
        return err(&req.id, "no_batch", "no batch is staged", None);
    };

    if doc.stage == ProcessingStage::Parsed {
        return err(
            &req.id,
            "duplicates_not_checked",
            "run duplicates.check before importing",
            None,
        );
    }

    let resolutions = identity::validate_resolutions(doc);
    if !resolutions.is_valid {
        return err(
            &req.id,
            "unresolved_duplicates",
            format!("{} duplicate decisions outstanding", resolutions.total_unresolved),
            serde_json::to_value(&resolutions).ok(),
        );
    }

    let blocking = validate::validate_for_import(doc);
    if !blocking.is_empty() {
        return err(
            &req.id,
            "blocking_errors",
            format!("{} blocking errors", blocking.len()),
            Some(json!({ "errors": blocking })),
        );
    }

    let unconfirmed = staging::unconfirmed_schools(doc);
    if !unconfirmed.is_empty() {
        return err(
            &req.id,
            "not_confirmed",
            format!("{} schools await confirmation", unconfirmed.len()),
            Some(json!({ "schools": unconfirmed })),
        );
    }

    let doc = doc.clone();
    let mut store = SqliteStore::new(conn);
    let mut events = Vec::new();
    // Request/response protocol: progress is collected and returned with the
    // outcome rather than streamed.
    let outcome = match import::import_batch(&mut store, &doc, None, &mut |e| {
        events.push(e.clone());
    }) {
        Ok(outcome) => outcome,
        Err(e) => return err(&req.id, "bad_resolution", e.to_string(), None),
    };

    let stage = if outcome.cancelled {
        ProcessingStage::Validated
    } else {
        ProcessingStage::Imported
    };
    if let Err(e) = state.staging.set_stage(stage) {
        return staging_err(&req.id, e);
    }

    ok(
        &req.id,
        json!({ "outcome": outcome, "progress": events }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.run" => Some(handle_run(state, req)),
        _ => None,
    }
}
