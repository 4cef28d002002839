use crate::bulk;
use crate::ipc::error::{err, no_workspace, ok};
use crate::ipc::types::{parse_params, AppState, Request};
use crate::reconcile::{self, SaveResultsRequest};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TermQuery {
    student_id: i64,
    term: String,
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    path: PathBuf,
}

fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let q: TermQuery = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match reconcile::load_term_results(conn, q.student_id, &q.term) {
        Ok(view) => ok(&req.id, json!(view)),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_results_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    let save: SaveResultsRequest = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match reconcile::save_results(conn, &save) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => {
            tracing::warn!(
                student_id = save.student_id,
                term = %save.term,
                error = %e,
                "results save rolled back"
            );
            err(
                &req.id,
                e.code(),
                e.to_string(),
                Some(json!({ "studentId": save.student_id, "term": save.term })),
            )
        }
    }
}

fn handle_results_bulk_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let max_rows = state.bulk_max_rows;
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    let params: UploadParams = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let bytes = match std::fs::read(&params.path) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "file_read_failed",
                e.to_string(),
                Some(json!({ "path": params.path.to_string_lossy() })),
            )
        }
    };

    match bulk::bulk_upload(conn, &bytes, max_rows) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => {
            tracing::warn!(path = %params.path.display(), error = %e, "bulk upload failed");
            err(&req.id, e.code(), e.to_string(), None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.get" => Some(handle_results_get(state, req)),
        "results.save" => Some(handle_results_save(state, req)),
        "results.bulkUpload" => Some(handle_results_bulk_upload(state, req)),
        _ => None,
    }
}
