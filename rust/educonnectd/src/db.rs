use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "educonnect.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    tracing::debug!(path = %db_path.display(), "database opened");
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_name TEXT NOT NULL UNIQUE,
            address TEXT,
            contact_email TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nric TEXT NOT NULL UNIQUE,
            school_id INTEGER NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT,
            date_of_birth TEXT,
            gender TEXT,
            assigned_groups TEXT,
            enrollment_year INTEGER,
            parent_contact_email TEXT,
            parent_contact_number TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nric TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT,
            email TEXT,
            mobile_number TEXT,
            gender TEXT,
            user_id INTEGER,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parents_user ON parents(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nric TEXT NOT NULL UNIQUE,
            school_id INTEGER NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT,
            email TEXT,
            mobile_number TEXT,
            gender TEXT,
            school_role TEXT,
            assigned_groups TEXT,
            user_id INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_user ON teachers(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            relationship TEXT NOT NULL DEFAULT 'other',
            created_at TEXT NOT NULL,
            FOREIGN KEY(parent_id) REFERENCES parents(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(parent_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            teacher_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(teacher_id, student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_name TEXT NOT NULL UNIQUE,
            subject_code TEXT NOT NULL UNIQUE,
            subject_category TEXT NOT NULL DEFAULT 'others',
            description TEXT
        )",
        [],
    )?;

    // No unique index: one row per (student, subject, term) is maintained by
    // the reconcile and bulk upsert paths.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_results(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            term TEXT NOT NULL,
            grade TEXT,
            score REAL,
            teacher_id INTEGER,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_results_student_term
         ON student_results(student_id, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_performance_summaries(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            term TEXT NOT NULL,
            overall_percentage REAL,
            overall_grade TEXT,
            total_marks REAL,
            total_max_marks REAL,
            class_position INTEGER,
            class_total INTEGER,
            level_position INTEGER,
            level_total INTEGER,
            l1r4 INTEGER,
            l1r5 INTEGER,
            attendance_present INTEGER,
            attendance_total INTEGER,
            conduct TEXT,
            teacher_comments TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, term)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS event_items(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            event_type TEXT NOT NULL DEFAULT 'other',
            venue TEXT,
            start_datetime TEXT NOT NULL,
            end_datetime TEXT,
            affected_groups TEXT,
            created_by INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_event_items_start ON event_items(start_datetime)",
        [],
    )?;
    ensure_event_items_affected_groups(conn)?;

    Ok(())
}

/// Workspaces created before events carried an audience lack the column.
fn ensure_event_items_affected_groups(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, Table::EventItems, "affected_groups")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE event_items ADD COLUMN affected_groups TEXT", [])?;
    tracing::info!("added event_items.affected_groups");
    Ok(())
}

/// Tables addressed by id from validation paths. SQL is only ever built
/// from these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Schools,
    Students,
    Parents,
    Teachers,
    EventItems,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schools => "schools",
            Self::Students => "students",
            Self::Parents => "parents",
            Self::Teachers => "teachers",
            Self::EventItems => "event_items",
        }
    }
}

fn table_has_column(conn: &Connection, table: Table, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table.as_str());
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn row_exists(conn: &Connection, table: Table, id: i64) -> rusqlite::Result<bool> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?)", table.as_str());
    conn.query_row(&sql, [id], |r| r.get(0))
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
