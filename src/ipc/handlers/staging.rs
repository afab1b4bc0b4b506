use crate::ipc::error::{err, ok, staging_err};
use crate::ipc::types::{AppState, Request};
use crate::staging::{BatchEdit, SchoolEdit, StudentEdit};
use crate::validate;
use serde_json::json;

fn current_batch_json(state: &AppState) -> Result<serde_json::Value, String> {
    match state.staging.current() {
        Some(doc) => serde_json::to_value(doc).map_err(|e| e.to_string()),
        None => Err("no batch is staged".to_string()),
    }
}

fn usize_param(req: &Request, key: &str) -> Option<usize> {
    req.params.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

fn edit_param<T: serde::de::DeserializeOwned>(req: &Request) -> Result<T, String> {
    let edit = req.params.get("edit").cloned().unwrap_or(json!({}));
    serde_json::from_value(edit).map_err(|e| format!("bad params.edit: {e}"))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match current_batch_json(state) {
        Ok(batch) => ok(
            &req.id,
            json!({ "batch": batch, "history": state.staging.history_status() }),
        ),
        Err(_) => err(&req.id, "no_batch", "no batch is staged", None),
    }
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.staging.current() {
        Some(doc) => ok(
            &req.id,
            json!({ "summary": crate::staging::batch_summary(doc) }),
        ),
        None => err(&req.id, "no_batch", "no batch is staged", None),
    }
}

fn handle_update_school(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(index) = usize_param(req, "schoolIndex") else {
        return err(&req.id, "bad_params", "missing schoolIndex", None);
    };
    let edit: SchoolEdit = match edit_param(req) {
        Ok(edit) => edit,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };
    match state.staging.update_school(index, &edit) {
        Ok(()) => handle_get(state, req),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_update_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(school), Some(student)) =
        (usize_param(req, "schoolIndex"), usize_param(req, "studentIndex"))
    else {
        return err(&req.id, "bad_params", "missing schoolIndex or studentIndex", None);
    };
    let edit: StudentEdit = match edit_param(req) {
        Ok(edit) => edit,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };
    match state.staging.update_student(school, student, &edit) {
        Ok(()) => handle_get(state, req),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_add_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(index) = usize_param(req, "schoolIndex") else {
        return err(&req.id, "bad_params", "missing schoolIndex", None);
    };
    let edit: StudentEdit = match edit_param(req) {
        Ok(edit) => edit,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };
    match state.staging.add_student(index, &edit) {
        Ok(()) => handle_get(state, req),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_remove_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(school), Some(student)) =
        (usize_param(req, "schoolIndex"), usize_param(req, "studentIndex"))
    else {
        return err(&req.id, "bad_params", "missing schoolIndex or studentIndex", None);
    };
    match state.staging.remove_student(school, student) {
        Ok(()) => handle_get(state, req),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_confirm_school(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(index) = usize_param(req, "schoolIndex") else {
        return err(&req.id, "bad_params", "missing schoolIndex", None);
    };
    let confirmed = req
        .params
        .get("confirmed")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    match state.staging.confirm_school(index, confirmed) {
        Ok(()) => handle_get(state, req),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_batch_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let edits: Vec<BatchEdit> = match req.params.get("edits") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(edits) => edits,
            Err(e) => return err(&req.id, "bad_params", format!("bad params.edits: {e}"), None),
        },
        None => return err(&req.id, "bad_params", "missing params.edits", None),
    };
    match state.staging.batch_update(&edits) {
        Ok(()) => handle_get(state, req),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_undo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let applied = state.staging.undo();
    ok(
        &req.id,
        json!({ "applied": applied, "history": state.staging.history_status() }),
    )
}

fn handle_redo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let applied = state.staging.redo();
    ok(
        &req.id,
        json!({ "applied": applied, "history": state.staging.history_status() }),
    )
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "history": state.staging.history_status() }))
}

/// Re-run the full rule table over the staged batch. One undoable step.
fn handle_revalidate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut summary = None;
    match state.staging.mutate(|doc| {
        summary = Some(validate::validate_document(doc));
    }) {
        Ok(()) => ok(&req.id, json!({ "summary": summary })),
        Err(e) => staging_err(&req.id, e),
    }
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.staging.clear();
    ok(&req.id, json!({ "cleared": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staging.get" => Some(handle_get(state, req)),
        "staging.summary" => Some(handle_summary(state, req)),
        "staging.updateSchool" => Some(handle_update_school(state, req)),
        "staging.updateStudent" => Some(handle_update_student(state, req)),
        "staging.addStudent" => Some(handle_add_student(state, req)),
        "staging.removeStudent" => Some(handle_remove_student(state, req)),
        "staging.confirmSchool" => Some(handle_confirm_school(state, req)),
        "staging.batchUpdate" => Some(handle_batch_update(state, req)),
        "staging.undo" => Some(handle_undo(state, req)),
        "staging.redo" => Some(handle_redo(state, req)),
        "staging.history" => Some(handle_history(state, req)),
        "staging.revalidate" => Some(handle_revalidate(state, req)),
        "staging.clear" => Some(handle_clear(state, req)),
        _ => None,
    }
}
