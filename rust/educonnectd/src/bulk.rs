use crate::db::{self, Table};
use crate::model::{Choice, Conduct, Term};
use crate::reconcile::{self, SummaryFields};
use crate::sheets::{self, CellTypeError, SheetError, SheetRow};
use rusqlite::{Connection, Transaction};
use serde::Serialize;
use uuid::Uuid;

pub const DEFAULT_MAX_ROWS_PER_SHEET: usize = 5000;

#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error("sheet {sheet:?} has {rows} rows, limit is {max}")]
    TooManyRows {
        sheet: &'static str,
        rows: usize,
        max: usize,
    },
    #[error("bulk upload failed: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl BulkError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sheet(_) => "bad_spreadsheet",
            Self::TooManyRows { .. } => "too_many_rows",
            Self::Storage(_) => "db_tx_failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RowError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error(transparent)]
    Cell(#[from] CellTypeError),
    #[error("invalid conduct {0:?}")]
    Conduct(String),
    #[error(transparent)]
    Term(#[from] crate::model::InvalidTerm),
    #[error("unknown student_id {0}")]
    UnknownStudent(i64),
    #[error("unknown subject_code {0:?}")]
    UnknownSubject(String),
    #[error("unknown teacher_id {0}")]
    UnknownTeacher(i64),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Added,
    Updated,
}

/// Outcome of one spreadsheet row: either the key fields plus a status, or
/// an error message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RowStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RowOutcome {
    fn failed(row: usize, error: String) -> Self {
        Self {
            row,
            student_id: None,
            subject_id: None,
            subject_code: None,
            term: None,
            status: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub upload_id: String,
    pub results: Vec<RowOutcome>,
    pub summaries: Vec<RowOutcome>,
}

/// Applies the `results` and `summaries` sheets of a workbook row by row.
///
/// Rows update the record with the same key or insert a new one; nothing is
/// ever deleted. A row that fails is reported and rolled back on its own,
/// the remaining rows still commit.
pub fn bulk_upload(
    conn: &mut Connection,
    bytes: &[u8],
    max_rows: usize,
) -> Result<BulkReport, BulkError> {
    let workbook = sheets::decode_workbook(bytes)?;
    for (sheet, rows) in [
        (sheets::RESULTS_SHEET, &workbook.results),
        (sheets::SUMMARIES_SHEET, &workbook.summaries),
    ] {
        if rows.len() > max_rows {
            return Err(BulkError::TooManyRows {
                sheet,
                rows: rows.len(),
                max: max_rows,
            });
        }
    }

    let upload_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("bulk_upload", upload_id = %upload_id);
    let _guard = span.enter();

    let mut tx = conn.transaction()?;
    let results: Vec<RowOutcome> = workbook
        .results
        .iter()
        .map(|row| apply_row(&mut tx, row, apply_result_row))
        .collect();
    let summaries: Vec<RowOutcome> = workbook
        .summaries
        .iter()
        .map(|row| apply_row(&mut tx, row, apply_summary_row))
        .collect();
    tx.commit()?;

    let errors = results
        .iter()
        .chain(summaries.iter())
        .filter(|o| o.is_error())
        .count();
    tracing::info!(
        results = results.len(),
        summaries = summaries.len(),
        errors,
        "bulk upload applied"
    );

    Ok(BulkReport {
        upload_id,
        results,
        summaries,
    })
}

/// Runs one row inside its own savepoint; a failed row leaves no trace.
fn apply_row(
    tx: &mut Transaction<'_>,
    row: &SheetRow,
    apply: fn(&Connection, &SheetRow) -> Result<RowOutcome, RowError>,
) -> RowOutcome {
    match try_row(tx, row, apply) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(row = row.line, error = %e, "bulk row rejected");
            RowOutcome::failed(row.line, e.to_string())
        }
    }
}

fn try_row(
    tx: &mut Transaction<'_>,
    row: &SheetRow,
    apply: fn(&Connection, &SheetRow) -> Result<RowOutcome, RowError>,
) -> Result<RowOutcome, RowError> {
    let sp = tx.savepoint()?;
    let outcome = apply(&sp, row)?;
    sp.commit()?;
    Ok(outcome)
}

fn required_int(row: &SheetRow, column: &'static str) -> Result<i64, RowError> {
    row.int(column)?.ok_or(RowError::Missing(column))
}

fn required_term(row: &SheetRow) -> Result<String, RowError> {
    let raw = row.text("term").ok_or(RowError::Missing("term"))?;
    let term: Term = raw.parse()?;
    Ok(term.to_string())
}

fn check_student(conn: &Connection, student_id: i64) -> Result<(), RowError> {
    if db::row_exists(conn, Table::Students, student_id)? {
        Ok(())
    } else {
        Err(RowError::UnknownStudent(student_id))
    }
}

fn apply_result_row(conn: &Connection, row: &SheetRow) -> Result<RowOutcome, RowError> {
    let student_id = required_int(row, "student_id")?;
    let subject_code = row
        .text("subject_code")
        .ok_or(RowError::Missing("subject_code"))?;
    let term = required_term(row)?;
    let grade = row.text("grade");
    let score = row.number("score")?;
    let teacher_id = row.int("teacher_id")?;

    check_student(conn, student_id)?;
    let subject_id = reconcile::find_subject_id_by_code(conn, &subject_code)?
        .ok_or_else(|| RowError::UnknownSubject(subject_code.clone()))?;
    if let Some(tid) = teacher_id {
        if !db::row_exists(conn, Table::Teachers, tid)? {
            return Err(RowError::UnknownTeacher(tid));
        }
    }

    let status = match reconcile::find_result_id(conn, student_id, subject_id, &term)? {
        Some(result_id) => {
            reconcile::update_result(conn, result_id, grade.as_deref(), score, teacher_id)?;
            RowStatus::Updated
        }
        None => {
            reconcile::insert_result(
                conn,
                student_id,
                subject_id,
                &term,
                grade.as_deref(),
                score,
                teacher_id,
            )?;
            RowStatus::Added
        }
    };

    Ok(RowOutcome {
        row: row.line,
        student_id: Some(student_id),
        subject_id: Some(subject_id),
        subject_code: Some(subject_code),
        term: Some(term),
        status: Some(status),
        error: None,
    })
}

fn apply_summary_row(conn: &Connection, row: &SheetRow) -> Result<RowOutcome, RowError> {
    let student_id = required_int(row, "student_id")?;
    let term = required_term(row)?;
    let conduct = match row.text("conduct") {
        Some(raw) => Some(Conduct::parse(&raw).ok_or(RowError::Conduct(raw))?),
        None => None,
    };
    let fields = SummaryFields {
        overall_percentage: row.number("overall_percentage")?,
        overall_grade: row.text("overall_grade"),
        total_marks: row.number("total_marks")?,
        total_max_marks: row.number("total_max_marks")?,
        class_position: row.int("class_position")?,
        class_total: row.int("class_total")?,
        level_position: row.int("level_position")?,
        level_total: row.int("level_total")?,
        l1r4: row.int("l1r4")?,
        l1r5: row.int("l1r5")?,
        attendance_present: row.int("attendance_present")?,
        attendance_total: row.int("attendance_total")?,
        conduct,
        teacher_comments: row.text("teacher_comments"),
    };

    check_student(conn, student_id)?;
    let created = reconcile::write_summary(conn, student_id, &term, &fields)?;

    Ok(RowOutcome {
        row: row.line,
        student_id: Some(student_id),
        subject_id: None,
        subject_code: None,
        term: Some(term),
        status: Some(if created {
            RowStatus::Added
        } else {
            RowStatus::Updated
        }),
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    const TERM: &str = "AY2026 Term 1";

    fn seed(conn: &Connection) -> i64 {
        conn.execute_batch(
            "INSERT INTO schools(school_name, created_at) VALUES('North Ridge', '');
             INSERT INTO students(nric, school_id, first_name, created_at, updated_at)
               VALUES('S1', 1, 'Ada', '', '');
             INSERT INTO teachers(nric, school_id, first_name, created_at)
               VALUES('T1', 1, 'Grace', '');
             INSERT INTO subjects(subject_name, subject_code) VALUES('Mathematics', 'MATH');
             INSERT INTO subjects(subject_name, subject_code) VALUES('English', 'ENG');",
        )
        .expect("seed");
        1
    }

    fn results_sheet(rows: &[(&str, &str, &str, f64)]) -> Vec<u8> {
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name("results").expect("name");
        for (c, h) in ["student_id", "subject_code", "term", "score", "teacher_id"]
            .iter()
            .enumerate()
        {
            ws.write_string(0, c as u16, *h).expect("header");
        }
        for (i, (student, code, term, score)) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            ws.write_string(r, 0, *student).expect("student");
            ws.write_string(r, 1, *code).expect("code");
            ws.write_string(r, 2, *term).expect("term");
            ws.write_number(r, 3, *score).expect("score");
            ws.write_number(r, 4, 1.0).expect("teacher");
        }
        wb.save_to_buffer().expect("buffer")
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).expect("count")
    }

    #[test]
    fn same_key_twice_updates_in_place() {
        let mut conn = db::open_memory();
        let sid = seed(&conn);
        conn.execute(
            "INSERT INTO student_results(student_id, subject_id, term, score, updated_at)
             VALUES(?, 2, ?, 61.0, '')",
            (sid, TERM),
        )
        .expect("pre-existing english");

        let bytes = results_sheet(&[("1", "MATH", TERM, 70.0), ("1", "MATH", TERM, 95.0)]);
        let report = bulk_upload(&mut conn, &bytes, DEFAULT_MAX_ROWS_PER_SHEET).expect("upload");

        let statuses: Vec<_> = report.results.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![Some(RowStatus::Added), Some(RowStatus::Updated)]);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM student_results WHERE subject_id = 1"),
            1
        );
        let score: f64 = conn
            .query_row("SELECT score FROM student_results WHERE subject_id = 1", [], |r| r.get(0))
            .expect("score");
        assert_eq!(score, 95.0);
        // Additive only: the English row is untouched.
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM student_results WHERE subject_id = 2"),
            1
        );
    }

    #[test]
    fn bad_rows_are_isolated() {
        let mut conn = db::open_memory();
        seed(&conn);
        let bytes = results_sheet(&[
            ("1", "ENG", TERM, 80.0),
            ("999", "ENG", TERM, 50.0),
            ("1", "NOPE", TERM, 50.0),
            ("1", "MATH", "Term 9", 50.0),
        ]);
        let report = bulk_upload(&mut conn, &bytes, DEFAULT_MAX_ROWS_PER_SHEET).expect("upload");

        assert_eq!(report.results[0].status, Some(RowStatus::Added));
        let errors: Vec<_> = report.results[1..]
            .iter()
            .map(|o| o.error.clone().unwrap_or_default())
            .collect();
        assert!(errors[0].contains("student_id 999"), "{errors:?}");
        assert!(errors[1].contains("NOPE"), "{errors:?}");
        assert!(errors[2].contains("invalid term"), "{errors:?}");
        assert_eq!(report.results[1].row, 3);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM student_results"), 1);
        assert!(report.summaries.is_empty());
    }

    #[test]
    fn storage_failure_rolls_back_only_its_row() {
        let mut conn = db::open_memory();
        seed(&conn);
        conn.execute_batch(
            "INSERT INTO subjects(subject_name, subject_code) VALUES('Art', 'ART');
             CREATE TRIGGER reject_high_scores BEFORE INSERT ON student_results
             WHEN NEW.score > 100
             BEGIN
                 SELECT RAISE(ABORT, 'score too high');
             END;",
        )
        .expect("trigger");

        let bytes = results_sheet(&[
            ("1", "MATH", TERM, 50.0),
            ("1", "ENG", TERM, 500.0),
            ("1", "ART", TERM, 60.0),
        ]);
        let report = bulk_upload(&mut conn, &bytes, DEFAULT_MAX_ROWS_PER_SHEET).expect("upload");

        assert_eq!(report.results[0].status, Some(RowStatus::Added));
        assert_eq!(report.results[1].row, 3);
        let error = report.results[1].error.clone().unwrap_or_default();
        assert!(error.contains("score too high"), "{error}");
        assert_eq!(report.results[2].status, Some(RowStatus::Added));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM student_results"), 2);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM student_results WHERE subject_id = 2"),
            0
        );
    }

    #[test]
    fn summaries_upsert_and_validate_conduct() {
        let mut conn = db::open_memory();
        seed(&conn);
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name("summaries").expect("name");
        for (c, h) in ["student_id", "term", "overall_percentage", "conduct"]
            .iter()
            .enumerate()
        {
            ws.write_string(0, c as u16, *h).expect("header");
        }
        ws.write_number(1, 0, 1.0).expect("c");
        ws.write_string(1, 1, TERM).expect("c");
        ws.write_number(1, 2, 77.5).expect("c");
        ws.write_string(1, 3, "Very_Good").expect("c");
        ws.write_number(2, 0, 1.0).expect("c");
        ws.write_string(2, 1, TERM).expect("c");
        ws.write_number(2, 2, 79.0).expect("c");
        ws.write_string(2, 3, "stellar").expect("c");
        ws.write_number(3, 0, 1.0).expect("c");
        ws.write_string(3, 1, TERM).expect("c");
        ws.write_number(3, 2, 80.0).expect("c");
        let bytes = wb.save_to_buffer().expect("buffer");

        let report = bulk_upload(&mut conn, &bytes, DEFAULT_MAX_ROWS_PER_SHEET).expect("upload");
        assert_eq!(report.summaries[0].status, Some(RowStatus::Added));
        assert!(report.summaries[1].is_error());
        assert_eq!(report.summaries[2].status, Some(RowStatus::Updated));

        let (pct, conduct): (f64, Option<String>) = conn
            .query_row(
                "SELECT overall_percentage, conduct FROM student_performance_summaries",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("summary");
        assert_eq!(pct, 80.0);
        assert_eq!(conduct, None);
    }

    #[test]
    fn oversized_sheet_is_rejected_before_writes() {
        let mut conn = db::open_memory();
        seed(&conn);
        let bytes = results_sheet(&[("1", "ENG", TERM, 1.0), ("1", "MATH", TERM, 2.0)]);
        let err = bulk_upload(&mut conn, &bytes, 1).expect_err("limit");
        assert_eq!(err.code(), "too_many_rows");
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM student_results"), 0);
    }

    #[test]
    fn unparseable_input_fails_whole_call() {
        let mut conn = db::open_memory();
        let err = bulk_upload(&mut conn, b"\x00\x01garbage", 10).expect_err("garbage");
        assert_eq!(err.code(), "bad_spreadsheet");
    }
}
