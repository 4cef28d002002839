use crate::directory::{
    self, NewParent, NewParentStudent, NewRecord, NewSchool, NewStudent, NewSubject,
    NewTeacher, NewTeacherStudent, Payload,
};
use crate::ipc::error::{err, no_workspace, ok};
use crate::ipc::types::{parse_params, AppState, Request};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchoolFilter {
    #[serde(default)]
    school_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: i64,
}

fn handle_create<T: NewRecord>(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return no_workspace(&req.id);
    };
    let payload: Payload<T> = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match directory::create(conn, payload) {
        Ok(created) => ok(&req.id, created),
        Err(e) => err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({ "entity": T::ENTITY })),
        ),
    }
}

fn handle_list(
    state: &mut AppState,
    req: &Request,
    key: &str,
    list: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<Vec<serde_json::Value>>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ key: [] }));
    };
    match list(conn) {
        Ok(rows) => ok(&req.id, json!({ key: rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn school_filter(req: &Request) -> Result<Option<i64>, serde_json::Value> {
    if req.params.is_null() {
        return Ok(None);
    }
    parse_params::<SchoolFilter>(req).map(|f| f.school_id)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let school_id = match school_filter(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    handle_list(state, req, "students", |c| directory::list_students(c, school_id))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let school_id = match school_filter(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    handle_list(state, req, "teachers", |c| directory::list_teachers(c, school_id))
}

fn handle_students_for_user(
    state: &mut AppState,
    req: &Request,
    query: fn(&rusqlite::Connection, i64) -> rusqlite::Result<Vec<serde_json::Value>>,
) -> serde_json::Value {
    let q: UserQuery = match parse_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    handle_list(state, req, "students", |c| query(c, q.user_id))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.create" => Some(handle_create::<NewSchool>(state, req)),
        "schools.list" => Some(handle_list(state, req, "schools", directory::list_schools)),
        "students.create" => Some(handle_create::<NewStudent>(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "parents.create" => Some(handle_create::<NewParent>(state, req)),
        "parents.list" => Some(handle_list(state, req, "parents", directory::list_parents)),
        "teachers.create" => Some(handle_create::<NewTeacher>(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "parentStudents.link" => Some(handle_create::<NewParentStudent>(state, req)),
        "parentStudents.list" => Some(handle_list(
            state,
            req,
            "links",
            directory::list_parent_students,
        )),
        "teacherStudents.link" => Some(handle_create::<NewTeacherStudent>(state, req)),
        "teacherStudents.list" => Some(handle_list(
            state,
            req,
            "links",
            directory::list_teacher_students,
        )),
        "subjects.create" => Some(handle_create::<NewSubject>(state, req)),
        "subjects.list" => Some(handle_list(state, req, "subjects", directory::list_subjects)),
        "students.forParentUser" => Some(handle_students_for_user(
            state,
            req,
            directory::students_for_parent_user,
        )),
        "students.forTeacherUser" => Some(handle_students_for_user(
            state,
            req,
            directory::students_for_teacher_user,
        )),
        _ => None,
    }
}
