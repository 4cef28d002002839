use crate::db::{self, now_stamp, Table};
use crate::model::{AffectedGroup, Choice, EventType};
use chrono::{DateTime, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const EVENT_CREATED_MESSAGE: &str = "Event created successfully";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("school {0} not found")]
    SchoolNotFound(i64),
    #[error("invalid datetime {0:?}")]
    BadDateTime(String),
    #[error("event ends before it starts")]
    EndsBeforeStart,
    #[error("title must not be empty")]
    EmptyTitle,
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl EventError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchoolNotFound(_) => "not_found",
            Self::BadDateTime(_) | Self::EndsBeforeStart | Self::EmptyTitle => "bad_params",
            Self::Storage(_) => "db_insert_failed",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub school_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_type: EventType,
    #[serde(default)]
    pub venue: Option<String>,
    pub start_datetime: String,
    #[serde(default)]
    pub end_datetime: Option<String>,
    #[serde(default)]
    pub affected_groups: Option<AffectedGroup>,
    pub created_by: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventItem {
    pub id: i64,
    pub school_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub event_type: String,
    pub venue: Option<String>,
    pub start_datetime: String,
    pub end_datetime: Option<String>,
    pub affected_groups: Option<String>,
    pub created_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Accepts RFC 3339 (offset converted to UTC) or a naive ISO datetime, and
/// normalises to `YYYY-MM-DDTHH:MM:SS` so stored values sort as text.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, EventError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| EventError::BadDateTime(s.to_string()))
}

fn stamp(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn create_event(conn: &Connection, ev: &NewEvent) -> Result<i64, EventError> {
    let title = ev.title.trim();
    if title.is_empty() {
        return Err(EventError::EmptyTitle);
    }
    let start = parse_datetime(&ev.start_datetime)?;
    let end = ev
        .end_datetime
        .as_deref()
        .map(parse_datetime)
        .transpose()?;
    if end.is_some_and(|end| end < start) {
        return Err(EventError::EndsBeforeStart);
    }
    if !db::row_exists(conn, Table::Schools, ev.school_id)? {
        return Err(EventError::SchoolNotFound(ev.school_id));
    }

    let now = now_stamp();
    conn.execute(
        "INSERT INTO event_items(school_id, title, description, event_type, venue,
                                 start_datetime, end_datetime, affected_groups,
                                 created_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            ev.school_id,
            title,
            ev.description,
            ev.event_type.as_str(),
            ev.venue,
            stamp(start),
            end.map(stamp),
            ev.affected_groups.map(|g| g.as_str()),
            ev.created_by,
            now,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(event_id = id, school_id = ev.school_id, "event created");
    Ok(id)
}

pub fn list_events(conn: &Connection) -> rusqlite::Result<Vec<EventItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, school_id, title, description, event_type, venue,
                start_datetime, end_datetime, affected_groups,
                created_by, created_at, updated_at
         FROM event_items
         ORDER BY start_datetime, id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(EventItem {
            id: r.get(0)?,
            school_id: r.get(1)?,
            title: r.get(2)?,
            description: r.get(3)?,
            event_type: r.get(4)?,
            venue: r.get(5)?,
            start_datetime: r.get(6)?,
            end_datetime: r.get(7)?,
            affected_groups: r.get(8)?,
            created_by: r.get(9)?,
            created_at: r.get(10)?,
            updated_at: r.get(11)?,
        })
    })?;
    rows.collect()
}
