use std::collections::HashMap;

use crate::identity;
use crate::ipc::error::{err, ok, staging_err};
use crate::ipc::types::{AppState, Request};
use crate::model::ResolutionDecision;
use crate::store::SqliteStore;
use serde_json::json;

/// Rank the staged batch against the record store. Fallible work runs on a
/// clone first so a store failure leaves the staged batch untouched.
fn handle_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(current) = state.staging.current() else {
        return err(&req.id, "no_batch", "no batch is staged", None);
    };

    let store = SqliteStore::new(conn);
    let mut checked = current.clone();
    let summary = match identity::check_duplicates(&mut checked, &store) {
        Ok(summary) => summary,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };

    if let Err(e) = state.staging.mutate(|doc| *doc = checked) {
        return staging_err(&req.id, e);
    }
    ok(&req.id, json!({ "summary": summary }))
}

fn handle_apply_decisions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let decisions: HashMap<String, ResolutionDecision> = match req.params.get("decisions") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(decisions) => decisions,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("bad params.decisions: {e}"),
                    None,
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing params.decisions", None),
    };

    let mut applied = 0;
    match state.staging.mutate(|doc| {
        applied = identity::apply_decisions(doc, &decisions);
    }) {
        Ok(()) => {}
        Err(e) => return staging_err(&req.id, e),
    }

    let status = state
        .staging
        .current()
        .map(identity::validate_resolutions)
        .unwrap_or_default();
    ok(&req.id, json!({ "applied": applied, "status": status }))
}

fn handle_auto_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut resolved = 0;
    match state.staging.mutate(|doc| {
        resolved = identity::auto_resolve(doc);
    }) {
        Ok(()) => ok(&req.id, json!({ "resolved": resolved })),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_validate_resolutions(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.staging.current() {
        Some(doc) => ok(
            &req.id,
            json!({ "status": identity::validate_resolutions(doc) }),
        ),
        None => err(&req.id, "no_batch", "no batch is staged", None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "duplicates.check" => Some(handle_check(state, req)),
        "duplicates.applyDecisions" => Some(handle_apply_decisions(state, req)),
        "duplicates.autoResolve" => Some(handle_auto_resolve(state, req)),
        "duplicates.validateResolutions" => Some(handle_validate_resolutions(state, req)),
        _ => None,
    }
}
