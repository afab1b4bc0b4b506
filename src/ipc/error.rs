use serde_json::json;

use crate::staging::StagingError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn staging_err(id: &str, e: StagingError) -> serde_json::Value {
    let code = match e {
        StagingError::NoBatch => "no_batch",
        StagingError::SchoolIndex(_) | StagingError::StudentIndex(_, _) => "bad_params",
    };
    err(id, code, e.to_string(), None)
}
