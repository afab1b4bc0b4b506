use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, nanos));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(resp["ok"], false, "expected error, got {}", resp);
    resp["error"]["code"].as_str().expect("error code")
}

fn sample_rows() -> serde_json::Value {
    json!([
        ["School", "Type", "Name", "Grade", "Class", "Number", "Email"],
        ["Oak Primary", "primary", "Amy", "P3", "3A", "7", "amy@example.com"],
        ["", "", "Ben", "P4", "4B", "12", ""],
        ["Elm Secondary", "secondary", "Cho", "S2", "2C", "3", ""]
    ])
}

#[test]
fn clean_batch_imports_end_to_end() {
    let workspace = temp_dir("rosterd-import");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "ingest.rows",
        json!({ "rows": sample_rows() }),
    );

    // Importing straight after parse is refused.
    let resp = request(&mut stdin, &mut reader, "3", "import.run", json!({}));
    assert_eq!(error_code(&resp), "duplicates_not_checked");

    let result = request_ok(&mut stdin, &mut reader, "4", "duplicates.check", json!({}));
    assert_eq!(result["summary"]["totalDuplicates"], 0);
    assert_eq!(result["summary"]["requiresUserAction"], false);

    let result = request_ok(&mut stdin, &mut reader, "5", "import.run", json!({}));
    assert_eq!(result["outcome"]["successCount"], 5); // 2 schools + 3 students
    assert_eq!(result["outcome"]["failureCount"], 0);
    assert_eq!(result["outcome"]["cancelled"], false);
    let stages: Vec<&str> = result["progress"]
        .as_array()
        .expect("progress")
        .iter()
        .map(|e| e["stage"].as_str().expect("stage"))
        .collect();
    assert_eq!(stages.first(), Some(&"processing_school"));
    assert_eq!(stages.last(), Some(&"completed"));

    let result = request_ok(&mut stdin, &mut reader, "6", "schools.list", json!({}));
    let schools = result["schools"].as_array().expect("schools");
    assert_eq!(schools.len(), 2);
    let oak_id = schools
        .iter()
        .find(|s| s["name"] == "Oak Primary")
        .and_then(|s| s["id"].as_str())
        .expect("oak id")
        .to_string();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({ "schoolId": oak_id }),
    );
    let students = result["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);

    let _ = child.kill();
}

#[test]
fn reimport_resolves_duplicates_against_stored_records() {
    let workspace = temp_dir("rosterd-reimport");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "ingest.rows",
        json!({ "rows": sample_rows() }),
    );
    request_ok(&mut stdin, &mut reader, "3", "duplicates.check", json!({}));
    request_ok(&mut stdin, &mut reader, "4", "import.run", json!({}));

    // Same sheet again: everything now collides with stored records.
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "ingest.rows",
        json!({ "rows": sample_rows() }),
    );
    let result = request_ok(&mut stdin, &mut reader, "6", "duplicates.check", json!({}));
    assert_eq!(result["summary"]["schoolDuplicates"], 2);
    assert_eq!(result["summary"]["studentDuplicates"], 3);
    assert_eq!(result["summary"]["requiresUserAction"], true);

    let resp = request(&mut stdin, &mut reader, "7", "import.run", json!({}));
    assert_eq!(error_code(&resp), "unresolved_duplicates");
    assert_eq!(resp["error"]["details"]["totalUnresolved"], 5);

    let result = request_ok(&mut stdin, &mut reader, "8", "schools.list", json!({}));
    let schools = result["schools"].as_array().expect("schools").clone();
    let id_of = |name: &str| {
        schools
            .iter()
            .find(|s| s["name"] == name)
            .and_then(|s| s["id"].as_str())
            .unwrap_or_else(|| panic!("no school {}", name))
            .to_string()
    };
    let oak_id = id_of("Oak Primary");
    let elm_id = id_of("Elm Secondary");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "schoolId": oak_id }),
    );
    let amy_id = result["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|s| s["name"] == "Amy")
        .and_then(|s| s["id"].as_str())
        .expect("amy id")
        .to_string();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "duplicates.applyDecisions",
        json!({
            "decisions": {
                "school:Oak Primary|primary": { "action": "use_existing", "existingId": oak_id },
                "school:Elm Secondary|secondary": { "action": "use_existing", "existingId": elm_id },
                "student:Oak Primary|Amy|P3|3A": { "action": "merge", "existingId": amy_id },
                "student:Oak Primary|Ben|P4|4B": { "action": "skip" },
                "student:Elm Secondary|Cho|S2|2C": { "action": "skip" }
            }
        }),
    );
    assert_eq!(result["applied"], 5);
    assert_eq!(result["status"]["isValid"], true);

    // Duplicates resolved, but flagged schools still await confirmation.
    let resp = request(&mut stdin, &mut reader, "11", "import.run", json!({}));
    assert_eq!(error_code(&resp), "not_confirmed");

    request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "staging.confirmSchool",
        json!({ "schoolIndex": 0 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "staging.confirmSchool",
        json!({ "schoolIndex": 1 }),
    );

    let result = request_ok(&mut stdin, &mut reader, "14", "import.run", json!({}));
    // Both reused schools and Amy's merge count; skips stay out of both tallies.
    assert_eq!(result["outcome"]["successCount"], 3);
    assert_eq!(result["outcome"]["failureCount"], 0);
    let merged = result["outcome"]["results"]
        .as_array()
        .expect("results")
        .iter()
        .find(|r| r["name"] == "Amy")
        .expect("amy outcome")
        .clone();
    assert_eq!(merged["action"], "merged");
    assert_eq!(merged["id"], amy_id.as_str());

    // No new rows were written for the collided records.
    let result = request_ok(&mut stdin, &mut reader, "15", "schools.list", json!({}));
    assert_eq!(result["schools"].as_array().expect("schools").len(), 2);
    let result = request_ok(&mut stdin, &mut reader, "16", "students.list", json!({}));
    assert_eq!(result["students"].as_array().expect("students").len(), 3);

    let _ = child.kill();
}

#[test]
fn import_refuses_blocking_errors_and_unconfirmed_warnings() {
    let workspace = temp_dir("rosterd-gates");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(&mut stdin, &mut reader, "1", "import.run", json!({}));
    assert_eq!(error_code(&resp), "no_workspace");

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(&mut stdin, &mut reader, "3", "import.run", json!({}));
    assert_eq!(error_code(&resp), "no_batch");

    // S2 in a primary school is a warning; the bad email is a blocking error.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "ingest.rows",
        json!({ "rows": [
            ["School", "Type", "Name", "Grade", "Class", "Email"],
            ["Oak Primary", "primary", "Amy", "S2", "3A", "not-an-email"]
        ]}),
    );
    request_ok(&mut stdin, &mut reader, "5", "duplicates.check", json!({}));
    request_ok(&mut stdin, &mut reader, "6", "staging.revalidate", json!({}));

    let resp = request(&mut stdin, &mut reader, "7", "import.run", json!({}));
    assert_eq!(error_code(&resp), "blocking_errors");
    let errors = resp["error"]["details"]["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 1);

    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "staging.updateStudent",
        json!({
            "schoolIndex": 0,
            "studentIndex": 0,
            "edit": { "email": "amy@example.com" }
        }),
    );
    request_ok(&mut stdin, &mut reader, "9", "staging.revalidate", json!({}));

    let resp = request(&mut stdin, &mut reader, "10", "import.run", json!({}));
    assert_eq!(error_code(&resp), "not_confirmed");
    assert_eq!(resp["error"]["details"]["schools"][0], "Oak Primary");

    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "staging.confirmSchool",
        json!({ "schoolIndex": 0 }),
    );
    let result = request_ok(&mut stdin, &mut reader, "12", "import.run", json!({}));
    assert_eq!(result["outcome"]["successCount"], 2); // school + Amy

    let _ = child.kill();
}

#[test]
fn warning_batch_imports_after_confirmation_with_full_counts() {
    let workspace = temp_dir("rosterd-warnings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Ben's row has no school cell; he lands under the previous one.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "ingest.rows",
        json!({ "rows": [
            ["School", "Type", "Name", "Grade"],
            ["Oak Primary", "primary", "Amy", "P1"],
            ["", "", "Ben", "S1"]
        ]}),
    );
    assert_eq!(result["totalSchools"], 1);
    assert_eq!(result["totalStudents"], 2);
    assert_eq!(result["summary"]["isValid"], true);
    assert_eq!(result["summary"]["errorCount"], 0);
    assert!(result["summary"]["warningCount"].as_u64().expect("warnings") >= 1);

    // The band mismatch lands on Ben as a warning, not a blocking error.
    let result = request_ok(&mut stdin, &mut reader, "3", "staging.get", json!({}));
    let ben = &result["batch"]["schools"][0]["students"][1];
    assert_eq!(ben["name"], "Ben");
    let warning = ben["validation"]["warnings"][0].as_str().expect("warning");
    assert!(warning.contains("S1"), "unexpected warning: {}", warning);
    assert!(ben["validation"]["errors"].as_array().expect("errors").is_empty());

    let result = request_ok(&mut stdin, &mut reader, "4", "duplicates.check", json!({}));
    assert_eq!(result["summary"]["totalDuplicates"], 0);

    // The warning keeps the school behind the confirmation gate.
    let resp = request(&mut stdin, &mut reader, "5", "import.run", json!({}));
    assert_eq!(error_code(&resp), "not_confirmed");

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "staging.confirmSchool",
        json!({ "schoolIndex": 0 }),
    );

    let result = request_ok(&mut stdin, &mut reader, "7", "import.run", json!({}));
    assert_eq!(result["outcome"]["successCount"], 3); // the school, Amy and Ben
    assert_eq!(result["outcome"]["failureCount"], 0);
    let stages: Vec<&str> = result["progress"]
        .as_array()
        .expect("progress")
        .iter()
        .map(|e| e["stage"].as_str().expect("stage"))
        .collect();
    assert_eq!(
        stages,
        vec![
            "processing_school",
            "processing_student",
            "processing_student",
            "completed",
        ]
    );

    let _ = child.kill();
}
