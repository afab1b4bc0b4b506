use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{RecordStore, SqliteStore};
use serde_json::json;

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let store = SqliteStore::new(conn);
    match store.list_schools() {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let school_id = req.params.get("schoolId").and_then(|v| v.as_str());
    let store = SqliteStore::new(conn);
    match store.list_students(school_id) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.list" => Some(handle_schools_list(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
