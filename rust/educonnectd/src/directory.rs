use crate::db::{self, now_stamp, Table};
use crate::model::{Choice, Gender, ParentRelationship, SubjectCategory};
use crate::reconcile::derive_subject_code;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl DirectoryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "already_exists",
            Self::NotFound { .. } => "not_found",
            Self::Invalid(_) => "bad_params",
            Self::Storage(_) => "db_insert_failed",
        }
    }
}

/// Create payload: one record, or `{items: [...]}` for a batch.
#[derive(Debug)]
pub enum Payload<T> {
    Batch { items: Vec<T> },
    Single(T),
}

// Decoded by hand so a bad batch item reports its index and field.
impl<'de, T: DeserializeOwned> Deserialize<'de> for Payload<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = Value::deserialize(deserializer)?;
        let Some(items) = value.get_mut("items").map(Value::take) else {
            return serde_json::from_value(value)
                .map(Payload::Single)
                .map_err(D::Error::custom);
        };
        let Value::Array(items) = items else {
            return Err(D::Error::custom("items must be an array"));
        };
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item)
                    .map_err(|e| D::Error::custom(format!("items[{i}]: {e}")))
            })
            .collect::<Result<Vec<T>, D::Error>>()
            .map(|items| Payload::Batch { items })
    }
}

#[derive(Debug, Serialize)]
pub struct BatchCreated {
    pub created: Vec<Value>,
    pub skipped: usize,
}

/// A directory record that can be inserted under a natural key.
pub trait NewRecord: DeserializeOwned {
    const ENTITY: &'static str;

    /// Natural key used in duplicate reports.
    fn key(&self) -> String;

    fn validate(&self) -> Result<(), DirectoryError> {
        Ok(())
    }

    /// Checks referenced rows exist.
    fn check_refs(&self, _tx: &Transaction) -> Result<(), DirectoryError> {
        Ok(())
    }

    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool>;

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value>;
}

fn require_row(
    tx: &Transaction,
    table: Table,
    entity: &'static str,
    id: i64,
) -> Result<(), DirectoryError> {
    if db::row_exists(tx, table, id)? {
        Ok(())
    } else {
        Err(DirectoryError::NotFound { entity, id })
    }
}

fn require_text(field: &str, value: &str) -> Result<(), DirectoryError> {
    if value.trim().is_empty() {
        return Err(DirectoryError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn exists(tx: &Transaction, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<bool> {
    Ok(tx
        .query_row(sql, params, |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

/// Single creates fail on a duplicate key; batches skip duplicates.
/// Any other failure rolls the whole request back.
pub fn create<T: NewRecord>(
    conn: &mut Connection,
    payload: Payload<T>,
) -> Result<Value, DirectoryError> {
    let tx = conn.transaction()?;
    let out = match payload {
        Payload::Single(record) => {
            record.validate()?;
            if record.is_duplicate(&tx)? {
                return Err(DirectoryError::AlreadyExists {
                    entity: T::ENTITY,
                    key: record.key(),
                });
            }
            record.check_refs(&tx)?;
            record.insert(&tx)?
        }
        Payload::Batch { items } => {
            let mut created = Vec::new();
            let mut skipped = 0usize;
            for record in &items {
                record.validate()?;
                if record.is_duplicate(&tx)? {
                    skipped += 1;
                    continue;
                }
                record.check_refs(&tx)?;
                created.push(record.insert(&tx)?);
            }
            json!(BatchCreated { created, skipped })
        }
    };
    tx.commit()?;
    tracing::info!(entity = T::ENTITY, "directory records created");
    Ok(out)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchool {
    pub school_name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
}

impl NewRecord for NewSchool {
    const ENTITY: &'static str = "school";

    fn key(&self) -> String {
        self.school_name.trim().to_string()
    }

    fn validate(&self) -> Result<(), DirectoryError> {
        require_text("schoolName", &self.school_name)
    }

    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool> {
        exists(tx, "SELECT 1 FROM schools WHERE school_name = ?", [self.key()])
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value> {
        tx.execute(
            "INSERT INTO schools(school_name, address, contact_email, created_at)
             VALUES(?, ?, ?, ?)",
            (self.key(), &self.address, &self.contact_email, now_stamp()),
        )?;
        Ok(json!({
            "id": tx.last_insert_rowid(),
            "schoolName": self.key(),
            "address": self.address,
            "contactEmail": self.contact_email,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub nric: String,
    pub school_id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub assigned_groups: Option<String>,
    #[serde(default)]
    pub enrollment_year: Option<i32>,
    #[serde(default)]
    pub parent_contact_email: Option<String>,
    #[serde(default)]
    pub parent_contact_number: Option<String>,
}

impl NewRecord for NewStudent {
    const ENTITY: &'static str = "student";

    fn key(&self) -> String {
        self.nric.trim().to_string()
    }

    fn validate(&self) -> Result<(), DirectoryError> {
        require_text("nric", &self.nric)?;
        require_text("firstName", &self.first_name)
    }

    fn check_refs(&self, tx: &Transaction) -> Result<(), DirectoryError> {
        require_row(tx, Table::Schools, "school", self.school_id)
    }

    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool> {
        exists(tx, "SELECT 1 FROM students WHERE nric = ?", [self.key()])
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value> {
        let now = now_stamp();
        let gender = self.gender.unwrap_or(Gender::Other);
        let dob = self.date_of_birth.map(|d| d.to_string());
        tx.execute(
            "INSERT INTO students(nric, school_id, first_name, last_name, date_of_birth,
                                  gender, assigned_groups, enrollment_year,
                                  parent_contact_email, parent_contact_number,
                                  created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                self.key(),
                self.school_id,
                self.first_name.trim(),
                self.last_name,
                dob,
                gender.as_str(),
                self.assigned_groups,
                self.enrollment_year,
                self.parent_contact_email,
                self.parent_contact_number,
                now,
                now,
            ],
        )?;
        Ok(json!({
            "id": tx.last_insert_rowid(),
            "nric": self.key(),
            "schoolId": self.school_id,
            "firstName": self.first_name.trim(),
            "lastName": self.last_name,
            "dateOfBirth": dob,
            "gender": gender.as_str(),
            "assignedGroups": self.assigned_groups,
            "enrollmentYear": self.enrollment_year,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParent {
    pub nric: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl NewRecord for NewParent {
    const ENTITY: &'static str = "parent";

    fn key(&self) -> String {
        self.nric.trim().to_string()
    }

    fn validate(&self) -> Result<(), DirectoryError> {
        require_text("nric", &self.nric)?;
        require_text("firstName", &self.first_name)
    }

    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool> {
        exists(tx, "SELECT 1 FROM parents WHERE nric = ?", [self.key()])
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value> {
        let gender = self.gender.unwrap_or(Gender::Other);
        tx.execute(
            "INSERT INTO parents(nric, first_name, last_name, email, mobile_number,
                                 gender, user_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                self.key(),
                self.first_name.trim(),
                self.last_name,
                self.email,
                self.mobile_number,
                gender.as_str(),
                self.user_id,
                now_stamp(),
            ],
        )?;
        Ok(json!({
            "id": tx.last_insert_rowid(),
            "nric": self.key(),
            "firstName": self.first_name.trim(),
            "lastName": self.last_name,
            "email": self.email,
            "gender": gender.as_str(),
            "userId": self.user_id,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeacher {
    pub nric: String,
    pub school_id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub school_role: Option<String>,
    #[serde(default)]
    pub assigned_groups: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl NewRecord for NewTeacher {
    const ENTITY: &'static str = "teacher";

    fn key(&self) -> String {
        self.nric.trim().to_string()
    }

    fn validate(&self) -> Result<(), DirectoryError> {
        require_text("nric", &self.nric)?;
        require_text("firstName", &self.first_name)
    }

    fn check_refs(&self, tx: &Transaction) -> Result<(), DirectoryError> {
        require_row(tx, Table::Schools, "school", self.school_id)
    }

    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool> {
        exists(tx, "SELECT 1 FROM teachers WHERE nric = ?", [self.key()])
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value> {
        let gender = self.gender.unwrap_or(Gender::Other);
        tx.execute(
            "INSERT INTO teachers(nric, school_id, first_name, last_name, email,
                                  mobile_number, gender, school_role, assigned_groups,
                                  user_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                self.key(),
                self.school_id,
                self.first_name.trim(),
                self.last_name,
                self.email,
                self.mobile_number,
                gender.as_str(),
                self.school_role,
                self.assigned_groups,
                self.user_id,
                now_stamp(),
            ],
        )?;
        Ok(json!({
            "id": tx.last_insert_rowid(),
            "nric": self.key(),
            "schoolId": self.school_id,
            "firstName": self.first_name.trim(),
            "lastName": self.last_name,
            "gender": gender.as_str(),
            "schoolRole": self.school_role,
            "userId": self.user_id,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParentStudent {
    pub parent_id: i64,
    pub student_id: i64,
    #[serde(default)]
    pub relationship: Option<ParentRelationship>,
}

impl NewRecord for NewParentStudent {
    const ENTITY: &'static str = "parent-student link";

    fn key(&self) -> String {
        format!("parent {} / student {}", self.parent_id, self.student_id)
    }

    fn check_refs(&self, tx: &Transaction) -> Result<(), DirectoryError> {
        require_row(tx, Table::Parents, "parent", self.parent_id)?;
        require_row(tx, Table::Students, "student", self.student_id)
    }

    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool> {
        exists(
            tx,
            "SELECT 1 FROM parent_students WHERE parent_id = ? AND student_id = ?",
            (self.parent_id, self.student_id),
        )
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value> {
        let relationship = self.relationship.unwrap_or(ParentRelationship::Other);
        tx.execute(
            "INSERT INTO parent_students(parent_id, student_id, relationship, created_at)
             VALUES(?, ?, ?, ?)",
            (
                self.parent_id,
                self.student_id,
                relationship.as_str(),
                now_stamp(),
            ),
        )?;
        Ok(json!({
            "id": tx.last_insert_rowid(),
            "parentId": self.parent_id,
            "studentId": self.student_id,
            "relationship": relationship.as_str(),
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeacherStudent {
    pub teacher_id: i64,
    pub student_id: i64,
}

impl NewRecord for NewTeacherStudent {
    const ENTITY: &'static str = "teacher-student link";

    fn key(&self) -> String {
        format!("teacher {} / student {}", self.teacher_id, self.student_id)
    }

    fn check_refs(&self, tx: &Transaction) -> Result<(), DirectoryError> {
        require_row(tx, Table::Teachers, "teacher", self.teacher_id)?;
        require_row(tx, Table::Students, "student", self.student_id)
    }

    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool> {
        exists(
            tx,
            "SELECT 1 FROM teacher_students WHERE teacher_id = ? AND student_id = ?",
            (self.teacher_id, self.student_id),
        )
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value> {
        tx.execute(
            "INSERT INTO teacher_students(teacher_id, student_id, created_at)
             VALUES(?, ?, ?)",
            (self.teacher_id, self.student_id, now_stamp()),
        )?;
        Ok(json!({
            "id": tx.last_insert_rowid(),
            "teacherId": self.teacher_id,
            "studentId": self.student_id,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub subject_name: String,
    #[serde(default)]
    pub subject_code: Option<String>,
    #[serde(default)]
    pub subject_category: Option<SubjectCategory>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSubject {
    fn code(&self) -> String {
        match self.subject_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => derive_subject_code(&self.subject_name),
        }
    }
}

impl NewRecord for NewSubject {
    const ENTITY: &'static str = "subject";

    fn key(&self) -> String {
        self.code()
    }

    fn validate(&self) -> Result<(), DirectoryError> {
        require_text("subjectName", &self.subject_name)
    }

    // Name and code are both unique in storage.
    fn is_duplicate(&self, tx: &Transaction) -> rusqlite::Result<bool> {
        exists(
            tx,
            "SELECT 1 FROM subjects WHERE subject_code = ? OR subject_name = ?",
            (self.code(), self.subject_name.trim()),
        )
    }

    fn insert(&self, tx: &Transaction) -> rusqlite::Result<Value> {
        let category = self.subject_category.unwrap_or_default();
        tx.execute(
            "INSERT INTO subjects(subject_name, subject_code, subject_category, description)
             VALUES(?, ?, ?, ?)",
            (
                self.subject_name.trim(),
                self.code(),
                category.as_str(),
                &self.description,
            ),
        )?;
        Ok(json!({
            "id": tx.last_insert_rowid(),
            "subjectName": self.subject_name.trim(),
            "subjectCode": self.code(),
            "subjectCategory": category.as_str(),
            "description": self.description,
        }))
    }
}

fn query_json<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    row: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Value>,
) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row)?;
    rows.collect()
}

pub fn list_schools(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    query_json(
        conn,
        "SELECT id, school_name, address, contact_email FROM schools ORDER BY school_name",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "schoolName": r.get::<_, String>(1)?,
                "address": r.get::<_, Option<String>>(2)?,
                "contactEmail": r.get::<_, Option<String>>(3)?,
            }))
        },
    )
}

const STUDENT_COLUMNS: &str = "s.id, s.nric, s.school_id, s.first_name, s.last_name,
     s.date_of_birth, s.gender, s.assigned_groups, s.enrollment_year";

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, i64>(0)?,
        "nric": r.get::<_, String>(1)?,
        "schoolId": r.get::<_, i64>(2)?,
        "firstName": r.get::<_, String>(3)?,
        "lastName": r.get::<_, Option<String>>(4)?,
        "dateOfBirth": r.get::<_, Option<String>>(5)?,
        "gender": r.get::<_, Option<String>>(6)?,
        "assignedGroups": r.get::<_, Option<String>>(7)?,
        "enrollmentYear": r.get::<_, Option<i64>>(8)?,
    }))
}

pub fn list_students(conn: &Connection, school_id: Option<i64>) -> rusqlite::Result<Vec<Value>> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students s
         WHERE (?1 IS NULL OR s.school_id = ?1)
         ORDER BY s.first_name, s.id"
    );
    query_json(conn, &sql, [school_id], student_json)
}

pub fn list_parents(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    query_json(
        conn,
        "SELECT id, nric, first_name, last_name, email, mobile_number, gender, user_id
         FROM parents ORDER BY first_name, id",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "nric": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "lastName": r.get::<_, Option<String>>(3)?,
                "email": r.get::<_, Option<String>>(4)?,
                "mobileNumber": r.get::<_, Option<String>>(5)?,
                "gender": r.get::<_, Option<String>>(6)?,
                "userId": r.get::<_, Option<i64>>(7)?,
            }))
        },
    )
}

pub fn list_teachers(conn: &Connection, school_id: Option<i64>) -> rusqlite::Result<Vec<Value>> {
    query_json(
        conn,
        "SELECT id, nric, school_id, first_name, last_name, email, gender,
                school_role, assigned_groups, user_id
         FROM teachers
         WHERE (?1 IS NULL OR school_id = ?1)
         ORDER BY first_name, id",
        [school_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "nric": r.get::<_, String>(1)?,
                "schoolId": r.get::<_, i64>(2)?,
                "firstName": r.get::<_, String>(3)?,
                "lastName": r.get::<_, Option<String>>(4)?,
                "email": r.get::<_, Option<String>>(5)?,
                "gender": r.get::<_, Option<String>>(6)?,
                "schoolRole": r.get::<_, Option<String>>(7)?,
                "assignedGroups": r.get::<_, Option<String>>(8)?,
                "userId": r.get::<_, Option<i64>>(9)?,
            }))
        },
    )
}

pub fn list_parent_students(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    query_json(
        conn,
        "SELECT id, parent_id, student_id, relationship
         FROM parent_students ORDER BY id",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "parentId": r.get::<_, i64>(1)?,
                "studentId": r.get::<_, i64>(2)?,
                "relationship": r.get::<_, String>(3)?,
            }))
        },
    )
}

pub fn list_teacher_students(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    query_json(
        conn,
        "SELECT id, teacher_id, student_id FROM teacher_students ORDER BY id",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "teacherId": r.get::<_, i64>(1)?,
                "studentId": r.get::<_, i64>(2)?,
            }))
        },
    )
}

pub fn list_subjects(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    query_json(
        conn,
        "SELECT id, subject_name, subject_code, subject_category, description
         FROM subjects ORDER BY subject_name",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "subjectName": r.get::<_, String>(1)?,
                "subjectCode": r.get::<_, String>(2)?,
                "subjectCategory": r.get::<_, String>(3)?,
                "description": r.get::<_, Option<String>>(4)?,
            }))
        },
    )
}

/// Students linked to the parent row owned by `user_id`; empty when the
/// user has no parent row.
pub fn students_for_parent_user(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<Value>> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS}, ps.relationship
         FROM parents p
         JOIN parent_students ps ON ps.parent_id = p.id
         JOIN students s ON s.id = ps.student_id
         WHERE p.user_id = ?
         ORDER BY s.first_name, s.id"
    );
    query_json(conn, &sql, [user_id], |r| {
        let mut v = student_json(r)?;
        v["relationship"] = json!(r.get::<_, String>(9)?);
        Ok(v)
    })
}

pub fn students_for_teacher_user(
    conn: &Connection,
    user_id: i64,
) -> rusqlite::Result<Vec<Value>> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS}
         FROM teachers t
         JOIN teacher_students ts ON ts.teacher_id = t.id
         JOIN students s ON s.id = ts.student_id
         WHERE t.user_id = ?
         ORDER BY s.first_name, s.id"
    );
    query_json(conn, &sql, [user_id], student_json)
}
