use crate::db::{self, Table};
use crate::model::{Choice, Conduct, InvalidTerm, Term};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const SAVE_OK_MESSAGE: &str = "Results updated successfully";
pub const DEFAULT_MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub subject: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub grade: Option<String>,
    pub teacher_id: i64,
}

/// Aggregate metrics of one (student, term). Every save overwrites all of
/// them; an absent field is stored as NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFields {
    pub overall_percentage: Option<f64>,
    pub overall_grade: Option<String>,
    pub total_marks: Option<f64>,
    pub total_max_marks: Option<f64>,
    pub class_position: Option<i64>,
    pub class_total: Option<i64>,
    pub level_position: Option<i64>,
    pub level_total: Option<i64>,
    pub l1r4: Option<i64>,
    pub l1r5: Option<i64>,
    pub attendance_present: Option<i64>,
    pub attendance_total: Option<i64>,
    pub conduct: Option<Conduct>,
    pub teacher_comments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResultsRequest {
    pub student_id: i64,
    pub term: String,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
    pub summary: SummaryFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub id: i64,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub message: String,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub summary_created: bool,
    pub created_subjects: Vec<SubjectRef>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    InvalidTerm(#[from] InvalidTerm),
    #[error("student {0} not found")]
    StudentNotFound(i64),
    #[error("teacher {0} not found")]
    TeacherNotFound(i64),
    #[error("failed to save results: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTerm(_) => "invalid_term",
            Self::StudentNotFound(_) | Self::TeacherNotFound(_) => "not_found",
            Self::Storage(_) => "db_tx_failed",
        }
    }
}

/// Subject code used when a result names a subject that is not stored yet:
/// trimmed, upper-cased, spaces replaced by underscores.
pub fn derive_subject_code(name: &str) -> String {
    name.trim().to_uppercase().replace(' ', "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubjectSlot {
    Stored(i64),
    Pending(usize),
}

#[derive(Debug)]
struct PendingSubject {
    name: String,
    code: String,
}

/// Subjects resolved during one pass, including ones not yet inserted.
/// Consulted before storage so repeated names map to a single row.
#[derive(Debug, Default)]
struct SubjectStaging {
    by_name: HashMap<String, SubjectSlot>,
    by_code: HashMap<String, SubjectSlot>,
    pending: Vec<PendingSubject>,
}

impl SubjectStaging {
    fn resolve(&mut self, conn: &Connection, raw_name: &str) -> rusqlite::Result<Option<SubjectSlot>> {
        let name = raw_name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(slot) = self.by_name.get(name) {
            return Ok(Some(*slot));
        }

        let slot = match find_subject_id_by_name(conn, name)? {
            Some(id) => SubjectSlot::Stored(id),
            None => {
                let code = derive_subject_code(name);
                let slot = match self.by_code.get(&code) {
                    Some(slot) => *slot,
                    None => match find_subject_id_by_code(conn, &code)? {
                        Some(id) => SubjectSlot::Stored(id),
                        None => {
                            self.pending.push(PendingSubject {
                                name: name.to_string(),
                                code: code.clone(),
                            });
                            SubjectSlot::Pending(self.pending.len() - 1)
                        }
                    },
                };
                self.by_code.insert(code, slot);
                slot
            }
        };
        self.by_name.insert(name.to_string(), slot);
        Ok(Some(slot))
    }

    /// Inserts pending subjects and returns their ids in staging order.
    fn flush(&self, conn: &Connection) -> rusqlite::Result<Vec<SubjectRef>> {
        let mut created = Vec::with_capacity(self.pending.len());
        for p in &self.pending {
            conn.execute(
                "INSERT INTO subjects(subject_name, subject_code, subject_category)
                 VALUES(?, ?, 'others')",
                (&p.name, &p.code),
            )?;
            created.push(SubjectRef {
                id: conn.last_insert_rowid(),
                name: p.name.clone(),
                code: p.code.clone(),
            });
        }
        Ok(created)
    }
}

pub(crate) fn find_subject_id_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM subjects WHERE subject_name = ?",
        [name],
        |r| r.get(0),
    )
    .optional()
}

pub(crate) fn find_subject_id_by_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM subjects WHERE subject_code = ?",
        [code],
        |r| r.get(0),
    )
    .optional()
}

pub(crate) fn find_result_id(
    conn: &Connection,
    student_id: i64,
    subject_id: i64,
    term: &str,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM student_results
         WHERE student_id = ? AND subject_id = ? AND term = ?
         ORDER BY id
         LIMIT 1",
        (student_id, subject_id, term),
        |r| r.get(0),
    )
    .optional()
}

pub(crate) fn insert_result(
    conn: &Connection,
    student_id: i64,
    subject_id: i64,
    term: &str,
    grade: Option<&str>,
    score: Option<f64>,
    teacher_id: Option<i64>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO student_results(student_id, subject_id, term, grade, score, teacher_id, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            student_id,
            subject_id,
            term,
            grade,
            score,
            teacher_id,
            db::now_stamp(),
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn update_result(
    conn: &Connection,
    result_id: i64,
    grade: Option<&str>,
    score: Option<f64>,
    teacher_id: Option<i64>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE student_results
         SET grade = ?, score = ?, teacher_id = ?, updated_at = ?
         WHERE id = ?",
        (grade, score, teacher_id, db::now_stamp(), result_id),
    )?;
    Ok(())
}

/// Creates or fully overwrites the summary row. Returns true when created.
pub(crate) fn write_summary(
    conn: &Connection,
    student_id: i64,
    term: &str,
    s: &SummaryFields,
) -> rusqlite::Result<bool> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM student_performance_summaries WHERE student_id = ? AND term = ?",
            (student_id, term),
            |r| r.get(0),
        )
        .optional()?;
    let conduct = s.conduct.map(|c| c.as_str());

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE student_performance_summaries SET
                   overall_percentage = ?, overall_grade = ?, total_marks = ?, total_max_marks = ?,
                   class_position = ?, class_total = ?, level_position = ?, level_total = ?,
                   l1r4 = ?, l1r5 = ?, attendance_present = ?, attendance_total = ?,
                   conduct = ?, teacher_comments = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    s.overall_percentage,
                    s.overall_grade,
                    s.total_marks,
                    s.total_max_marks,
                    s.class_position,
                    s.class_total,
                    s.level_position,
                    s.level_total,
                    s.l1r4,
                    s.l1r5,
                    s.attendance_present,
                    s.attendance_total,
                    conduct,
                    s.teacher_comments,
                    db::now_stamp(),
                    id,
                ],
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO student_performance_summaries(
                   student_id, term,
                   overall_percentage, overall_grade, total_marks, total_max_marks,
                   class_position, class_total, level_position, level_total,
                   l1r4, l1r5, attendance_present, attendance_total,
                   conduct, teacher_comments, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    student_id,
                    term,
                    s.overall_percentage,
                    s.overall_grade,
                    s.total_marks,
                    s.total_max_marks,
                    s.class_position,
                    s.class_total,
                    s.level_position,
                    s.level_total,
                    s.l1r4,
                    s.l1r5,
                    s.attendance_present,
                    s.attendance_total,
                    conduct,
                    s.teacher_comments,
                    db::now_stamp(),
                ],
            )?;
            Ok(true)
        }
    }
}

/// Replaces the stored results of (student, term) with `req.results` and
/// overwrites the term summary, all in one transaction.
///
/// Subjects missing from the payload lose their stored result. Blank subject
/// names are ignored. Unknown subjects are created with a derived code.
pub fn save_results(
    conn: &mut Connection,
    req: &SaveResultsRequest,
) -> Result<SaveOutcome, ReconcileError> {
    let term: Term = req.term.parse()?;
    let term = term.to_string();

    // Dropping `tx` on any early return rolls back.
    let tx = conn.transaction()?;

    if !db::row_exists(&tx, Table::Students, req.student_id)? {
        return Err(ReconcileError::StudentNotFound(req.student_id));
    }
    let mut checked_teachers = HashSet::new();
    for entry in req.results.iter().filter(|e| !e.subject.trim().is_empty()) {
        if checked_teachers.insert(entry.teacher_id)
            && !db::row_exists(&tx, Table::Teachers, entry.teacher_id)?
        {
            return Err(ReconcileError::TeacherNotFound(entry.teacher_id));
        }
    }

    // Snapshot before any write. Extra rows for an already-seen subject are
    // leftovers and always removed.
    let mut stored: HashMap<i64, i64> = HashMap::new();
    let mut duplicates: Vec<i64> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT id, subject_id FROM student_results
             WHERE student_id = ? AND term = ?
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map((req.student_id, &term), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (result_id, subject_id) in rows {
            if stored.contains_key(&subject_id) {
                duplicates.push(result_id);
            } else {
                stored.insert(subject_id, result_id);
            }
        }
    }

    let mut staging = SubjectStaging::default();
    let mut planned: Vec<(SubjectSlot, &ResultEntry)> = Vec::new();
    let mut planned_idx: HashMap<SubjectSlot, usize> = HashMap::new();
    for entry in &req.results {
        let Some(slot) = staging.resolve(&tx, &entry.subject)? else {
            continue;
        };
        match planned_idx.get(&slot) {
            Some(&i) => planned[i].1 = entry,
            None => {
                planned_idx.insert(slot, planned.len());
                planned.push((slot, entry));
            }
        }
    }

    let created_subjects = staging.flush(&tx)?;

    let mut touched: HashSet<i64> = HashSet::new();
    let mut added = 0usize;
    let mut updated = 0usize;
    for (slot, entry) in planned {
        let subject_id = match slot {
            SubjectSlot::Stored(id) => id,
            SubjectSlot::Pending(i) => created_subjects[i].id,
        };
        touched.insert(subject_id);
        match stored.get(&subject_id) {
            Some(&result_id) => {
                update_result(
                    &tx,
                    result_id,
                    entry.grade.as_deref(),
                    entry.score,
                    Some(entry.teacher_id),
                )?;
                updated += 1;
            }
            None => {
                insert_result(
                    &tx,
                    req.student_id,
                    subject_id,
                    &term,
                    entry.grade.as_deref(),
                    entry.score,
                    Some(entry.teacher_id),
                )?;
                added += 1;
            }
        }
    }

    let stale: Vec<i64> = stored
        .iter()
        .filter(|(subject_id, _)| !touched.contains(*subject_id))
        .map(|(_, result_id)| *result_id)
        .chain(duplicates)
        .collect();
    for result_id in &stale {
        tx.execute("DELETE FROM student_results WHERE id = ?", [result_id])?;
    }

    let summary_created = write_summary(&tx, req.student_id, &term, &req.summary)?;

    tx.commit()?;

    tracing::info!(
        student_id = req.student_id,
        term = %term,
        added,
        updated,
        deleted = stale.len(),
        created_subjects = created_subjects.len(),
        "results reconciled"
    );

    Ok(SaveOutcome {
        message: SAVE_OK_MESSAGE.to_string(),
        added,
        updated,
        deleted: stale.len(),
        summary_created,
        created_subjects,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub id: i64,
    pub student_id: i64,
    pub subject: String,
    pub subject_code: String,
    pub grade: Option<String>,
    pub score: Option<f64>,
    pub max_score: f64,
    pub term: String,
    pub year: i32,
    pub teacher_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSummary {
    pub id: i64,
    pub student_id: i64,
    pub term: String,
    #[serde(flatten)]
    pub fields: SummaryFields,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TermResults {
    pub summary: Option<StoredSummary>,
    pub results: Vec<StoredResult>,
}

pub fn load_term_results(
    conn: &Connection,
    student_id: i64,
    term: &str,
) -> Result<TermResults, ReconcileError> {
    let term: Term = term.parse()?;
    let term_key = term.to_string();

    let summary = conn
        .query_row(
            "SELECT id, overall_percentage, overall_grade, total_marks, total_max_marks,
                    class_position, class_total, level_position, level_total,
                    l1r4, l1r5, attendance_present, attendance_total,
                    conduct, teacher_comments, updated_at
             FROM student_performance_summaries
             WHERE student_id = ? AND term = ?",
            (student_id, &term_key),
            |r| {
                let conduct: Option<String> = r.get(13)?;
                Ok(StoredSummary {
                    id: r.get(0)?,
                    student_id,
                    term: term_key.clone(),
                    fields: SummaryFields {
                        overall_percentage: r.get(1)?,
                        overall_grade: r.get(2)?,
                        total_marks: r.get(3)?,
                        total_max_marks: r.get(4)?,
                        class_position: r.get(5)?,
                        class_total: r.get(6)?,
                        level_position: r.get(7)?,
                        level_total: r.get(8)?,
                        l1r4: r.get(9)?,
                        l1r5: r.get(10)?,
                        attendance_present: r.get(11)?,
                        attendance_total: r.get(12)?,
                        conduct: conduct.as_deref().and_then(Conduct::parse),
                        teacher_comments: r.get(14)?,
                    },
                    updated_at: r.get(15)?,
                })
            },
        )
        .optional()?;

    let mut stmt = conn.prepare(
        "SELECT r.id, s.subject_name, s.subject_code, r.grade, r.score, r.teacher_id
         FROM student_results r
         JOIN subjects s ON s.id = r.subject_id
         WHERE r.student_id = ? AND r.term = ?
         ORDER BY s.subject_name",
    )?;
    let results = stmt
        .query_map((student_id, &term_key), |r| {
            Ok(StoredResult {
                id: r.get(0)?,
                student_id,
                subject: r.get(1)?,
                subject_code: r.get(2)?,
                grade: r.get(3)?,
                score: r.get(4)?,
                max_score: DEFAULT_MAX_SCORE,
                term: term_key.clone(),
                year: term.year,
                teacher_id: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TermResults { summary, results })
}
