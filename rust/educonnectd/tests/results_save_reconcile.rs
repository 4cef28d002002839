mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, seed_directory, spawn_sidecar, temp_dir};

const TERM: &str = "AY2026 Term 1";

fn subjects_of(view: &serde_json::Value) -> Vec<String> {
    let mut names: Vec<String> = view["results"]
        .as_array()
        .expect("results")
        .iter()
        .map(|r| r["subject"].as_str().expect("subject").to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn save_replaces_term_results_and_keeps_other_terms() {
    let workspace = temp_dir("educonnect-save-replace");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_directory(&mut stdin, &mut reader, workspace.path());

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "results.save",
        json!({
            "studentId": 1,
            "term": TERM,
            "results": [
                { "subject": "Mathematics", "score": 72.0, "grade": "B", "teacherId": 1 },
                { "subject": "English", "score": 65.0, "grade": "C", "teacherId": 2 }
            ],
            "summary": { "overallPercentage": 68.5, "conduct": "good" }
        }),
    );
    assert_eq!(first["added"], 2);
    assert_eq!(first["summaryCreated"], true);
    assert_eq!(first["message"], "Results updated successfully");

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.save",
        json!({
            "studentId": 1,
            "term": "AY2026 Term 2",
            "results": [{ "subject": "English", "score": 70.0, "teacherId": 2 }],
            "summary": {}
        }),
    );

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.save",
        json!({
            "studentId": 1,
            "term": TERM,
            "results": [{ "subject": "Mathematics", "score": 91.0, "grade": "A", "teacherId": 1 }],
            "summary": { "overallPercentage": 91.0 }
        }),
    );
    assert_eq!(second["updated"], 1);
    assert_eq!(second["deleted"], 1);
    assert_eq!(second["summaryCreated"], false);

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.get",
        json!({ "studentId": 1, "term": TERM }),
    );
    assert_eq!(subjects_of(&view), vec!["Mathematics".to_string()]);
    let math = &view["results"][0];
    assert_eq!(math["score"], 91.0);
    assert_eq!(math["grade"], "A");
    assert_eq!(math["maxScore"], 100.0);
    assert_eq!(math["year"], 2026);
    assert_eq!(math["subjectCode"], "MATH");
    // Unsent summary fields are cleared.
    assert_eq!(view["summary"]["overallPercentage"], 91.0);
    assert!(view["summary"]["conduct"].is_null());

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "results.get",
        json!({ "studentId": 1, "term": "AY2026 Term 2" }),
    );
    assert_eq!(subjects_of(&other), vec!["English".to_string()]);
}

#[test]
fn empty_results_clear_the_term_but_write_summary() {
    let workspace = temp_dir("educonnect-save-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_directory(&mut stdin, &mut reader, workspace.path());

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "results.save",
        json!({
            "studentId": 2,
            "term": TERM,
            "results": [
                { "subject": "Mathematics", "score": 50.0, "teacherId": 1 },
                { "subject": "English", "score": 55.0, "teacherId": 1 }
            ],
            "summary": {}
        }),
    );
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.save",
        json!({
            "studentId": 2,
            "term": TERM,
            "results": [],
            "summary": { "teacherComments": "Transferred mid-term", "conduct": "very_good" }
        }),
    );
    assert_eq!(cleared["deleted"], 2);

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.get",
        json!({ "studentId": 2, "term": TERM }),
    );
    assert!(view["results"].as_array().expect("results").is_empty());
    assert_eq!(view["summary"]["teacherComments"], "Transferred mid-term");
    assert_eq!(view["summary"]["conduct"], "very_good");
}

#[test]
fn unknown_subject_is_created_once_with_derived_code() {
    let workspace = temp_dir("educonnect-save-new-subject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_directory(&mut stdin, &mut reader, workspace.path());

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "results.save",
        json!({
            "studentId": 1,
            "term": TERM,
            "results": [
                { "subject": "Food and Nutrition", "score": 60.0, "teacherId": 1 },
                { "subject": "  ", "score": 10.0, "teacherId": 1 },
                { "subject": "Food and Nutrition ", "score": 64.0, "teacherId": 2 }
            ],
            "summary": {}
        }),
    );
    assert_eq!(out["added"], 1);
    let created = out["createdSubjects"].as_array().expect("createdSubjects");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["code"], "FOOD_AND_NUTRITION");

    let subjects = request_ok(&mut stdin, &mut reader, "2", "subjects.list", json!({}));
    let list = subjects["subjects"].as_array().expect("subjects");
    assert_eq!(list.len(), 3);
    let food = list
        .iter()
        .find(|s| s["subjectCode"] == "FOOD_AND_NUTRITION")
        .expect("created subject");
    assert_eq!(food["subjectCategory"], "others");

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.get",
        json!({ "studentId": 1, "term": TERM }),
    );
    let rows = view["results"].as_array().expect("results");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["score"], 64.0);
    assert_eq!(rows[0]["teacherId"], 2);
}

#[test]
fn rejected_saves_leave_stored_state_untouched() {
    let workspace = temp_dir("educonnect-save-rejected");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_directory(&mut stdin, &mut reader, workspace.path());

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "results.save",
        json!({
            "studentId": 1,
            "term": TERM,
            "results": [{ "subject": "English", "score": 80.0, "teacherId": 1 }],
            "summary": { "overallPercentage": 80.0 }
        }),
    );

    let bad_term = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "results.save",
        json!({ "studentId": 1, "term": "AY2026 Term 7", "results": [], "summary": {} }),
    );
    assert_eq!(bad_term, "invalid_term");

    let bad_teacher = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "results.save",
        json!({
            "studentId": 1,
            "term": TERM,
            "results": [{ "subject": "Geography", "score": 40.0, "teacherId": 99 }],
            "summary": {}
        }),
    );
    assert_eq!(bad_teacher, "not_found");

    let bad_student = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "results.save",
        json!({ "studentId": 42, "term": TERM, "results": [], "summary": {} }),
    );
    assert_eq!(bad_student, "not_found");

    let missing_summary = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "results.save",
        json!({ "studentId": 1, "term": TERM, "results": [] }),
    );
    assert_eq!(missing_summary, "bad_params");

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "results.get",
        json!({ "studentId": 1, "term": TERM }),
    );
    assert_eq!(subjects_of(&view), vec!["English".to_string()]);
    assert_eq!(view["summary"]["overallPercentage"], 80.0);

    let subjects = request_ok(&mut stdin, &mut reader, "7", "subjects.list", json!({}));
    assert_eq!(subjects["subjects"].as_array().map(Vec::len), Some(2));
}
