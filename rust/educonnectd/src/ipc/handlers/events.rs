use crate::events::{self, NewEvent, EVENT_CREATED_MESSAGE};
use crate::ipc::error::{err, no_workspace, ok};
use crate::ipc::types::{parse_params, AppState, Request};
use serde_json::json;

fn handle_events_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let ev: NewEvent = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match events::create_event(conn, &ev) {
        Ok(event_id) => ok(
            &req.id,
            json!({ "message": EVENT_CREATED_MESSAGE, "eventId": event_id }),
        ),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "events": [], "count": 0 }));
    };
    match events::list_events(conn) {
        Ok(list) => ok(&req.id, json!({ "count": list.len(), "events": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.create" => Some(handle_events_create(state, req)),
        "events.list" => Some(handle_events_list(state, req)),
        _ => None,
    }
}
