#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub fn temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("create temp dir")
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_educonnectd");
    let mut child = Command::new(exe)
        .env_remove("EDUCONNECTD_WORKSPACE")
        .env_remove("EDUCONNECTD_BULK_MAX_ROWS")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn educonnectd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
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
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Sends a request expected to fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

/// Opens `workspace` and seeds one school, two students, two teachers and
/// the MATH/ENG subjects. Ids are 1-based in insertion order.
pub fn seed_directory(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "seed-school",
        "schools.create",
        json!({ "schoolName": "North Ridge Secondary" }),
    );
    request_ok(
        stdin,
        reader,
        "seed-students",
        "students.create",
        json!({ "items": [
            { "nric": "S0000001A", "schoolId": 1, "firstName": "Ada" },
            { "nric": "S0000002B", "schoolId": 1, "firstName": "Ben" }
        ] }),
    );
    request_ok(
        stdin,
        reader,
        "seed-teachers",
        "teachers.create",
        json!({ "items": [
            { "nric": "T0000001A", "schoolId": 1, "firstName": "Grace", "userId": 501 },
            { "nric": "T0000002B", "schoolId": 1, "firstName": "Alan", "userId": 502 }
        ] }),
    );
    request_ok(
        stdin,
        reader,
        "seed-subjects",
        "subjects.create",
        json!({ "items": [
            { "subjectName": "Mathematics", "subjectCode": "MATH", "subjectCategory": "mathematics" },
            { "subjectName": "English", "subjectCode": "ENG", "subjectCategory": "languages" }
        ] }),
    );
}
