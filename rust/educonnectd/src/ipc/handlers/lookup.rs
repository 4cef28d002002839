use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::model::{
    options, AffectedGroup, Conduct, EventType, Gender, SubjectCategory, Term,
};
use chrono::Datelike;
use serde_json::json;

fn term_options() -> Vec<serde_json::Value> {
    Term::options_around(chrono::Local::now().year())
        .into_iter()
        .map(|t| json!({ "label": t.to_string(), "value": t.to_string() }))
        .collect()
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let opts = match req.method.as_str() {
        "lookup.genderOptions" => options::<Gender>(),
        "lookup.eventTypeOptions" => options::<EventType>(),
        "lookup.affectedGroupOptions" => options::<AffectedGroup>(),
        "lookup.conductOptions" => options::<Conduct>(),
        "lookup.subjectCategoryOptions" => options::<SubjectCategory>(),
        "lookup.termOptions" => term_options(),
        _ => return None,
    };
    Some(ok(&req.id, json!(opts)))
}
