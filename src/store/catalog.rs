//! Schools, subjects, classes and students: the configuration and roster
//! rows the engine reads.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::{new_id, now_rfc3339};
use crate::engine::config_resolver::{
    is_valid_period_max, ConfigResolver, PeriodMaxLookup, PeriodMaxSource,
};
use crate::engine::promotion::{AcademicYear, ClassRef, EnrollmentStatus};
use crate::engine::ranking::SubjectMax;
use crate::engine::EngineError;

pub struct SqlitePeriodMaxSource<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePeriodMaxSource<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl PeriodMaxSource for SqlitePeriodMaxSource<'_> {
    fn lookup(
        &self,
        class_id: Option<&str>,
        subject_id: &str,
    ) -> Result<PeriodMaxLookup, EngineError> {
        let class_override: Option<i64> = match class_id {
            Some(cid) => self
                .conn
                .query_row(
                    "SELECT period_max FROM class_subjects WHERE class_id = ? AND subject_id = ?",
                    (cid, subject_id),
                    |r| r.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten(),
            None => None,
        };
        let subject_default: Option<i64> = self
            .conn
            .query_row(
                "SELECT period_max FROM subjects WHERE id = ?",
                [subject_id],
                |r| r.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(PeriodMaxLookup {
            class_override: class_override.and_then(|v| u32::try_from(v).ok()),
            subject_default: subject_default.and_then(|v| u32::try_from(v).ok()),
        })
    }
}

pub fn resolver(conn: &Connection) -> ConfigResolver<SqlitePeriodMaxSource<'_>> {
    ConfigResolver::new(SqlitePeriodMaxSource::new(conn))
}

/// Every subject taught in the class with its resolved base score.
pub fn class_subject_maxima(conn: &Connection, class_id: &str) -> Result<Vec<SubjectMax>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT subject_id FROM class_subjects WHERE class_id = ? ORDER BY subject_id",
    )?;
    let subject_ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let resolver = resolver(conn);
    let mut out = Vec::with_capacity(subject_ids.len());
    for subject_id in subject_ids {
        let period_max = resolver.period_max(Some(class_id), &subject_id)?;
        out.push(SubjectMax {
            subject_id,
            period_max,
        });
    }
    Ok(out)
}

pub fn create_school(conn: &Connection, name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::BadInput("name must not be empty".to_string()));
    }
    let id = new_id();
    conn.execute("INSERT INTO schools(id, name) VALUES(?, ?)", (&id, name))?;
    Ok(id)
}

fn school_exists(conn: &Connection, school_id: &str) -> Result<bool, EngineError> {
    Ok(conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn require_school(conn: &Connection, school_id: &str) -> Result<(), EngineError> {
    if !school_exists(conn, school_id)? {
        return Err(EngineError::NotFound {
            entity: "school",
            id: school_id.to_string(),
        });
    }
    Ok(())
}

fn check_period_max(value: i64) -> Result<u32, EngineError> {
    if !is_valid_period_max(value) {
        return Err(EngineError::BadInput(format!(
            "periodMax must be one of 10, 20, ..., 100 (got {})",
            value
        )));
    }
    Ok(value as u32)
}

#[derive(Debug, Clone)]
pub struct NewSubject {
    pub school_id: String,
    pub name: String,
    pub code: String,
    pub period_max: i64,
}

pub fn create_subject(conn: &Connection, subject: &NewSubject) -> Result<String, EngineError> {
    require_school(conn, &subject.school_id)?;
    let period_max = check_period_max(subject.period_max)?;
    let name = subject.name.trim();
    let code = subject.code.trim();
    if name.is_empty() || code.is_empty() {
        return Err(EngineError::BadInput(
            "name and code must not be empty".to_string(),
        ));
    }
    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, school_id, name, code, period_max, is_active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (&id, &subject.school_id, name, code, period_max),
    )?;
    Ok(id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub academic_year: String,
    pub next_class_name: Option<String>,
    pub is_terminal: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewClass {
    pub school_id: String,
    pub name: String,
    pub academic_year: String,
    pub next_class_name: Option<String>,
    pub is_terminal: bool,
}

pub fn create_class(conn: &Connection, class: &NewClass) -> Result<String, EngineError> {
    require_school(conn, &class.school_id)?;
    let name = class.name.trim();
    if name.is_empty() {
        return Err(EngineError::BadInput("name must not be empty".to_string()));
    }
    let year = AcademicYear::parse(&class.academic_year)?;
    let next_class_name = class
        .next_class_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let id = new_id();
    conn.execute(
        "INSERT INTO classes(id, school_id, name, academic_year, next_class_name, is_terminal, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &class.school_id,
            name,
            year.to_string(),
            next_class_name,
            class.is_terminal,
            now_rfc3339(),
        ),
    )?;
    Ok(id)
}

const CLASS_COLUMNS: &str =
    "id, school_id, name, academic_year, next_class_name, is_terminal, is_active";

fn class_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassRow> {
    Ok(ClassRow {
        id: r.get(0)?,
        school_id: r.get(1)?,
        name: r.get(2)?,
        academic_year: r.get(3)?,
        next_class_name: r.get(4)?,
        is_terminal: r.get::<_, i64>(5)? != 0,
        is_active: r.get::<_, i64>(6)? != 0,
    })
}

pub fn load_class(conn: &Connection, class_id: &str) -> Result<ClassRow, EngineError> {
    let sql = format!("SELECT {} FROM classes WHERE id = ?", CLASS_COLUMNS);
    conn.query_row(&sql, [class_id], class_from_row)
        .optional()?
        .ok_or_else(|| EngineError::NotFound {
            entity: "class",
            id: class_id.to_string(),
        })
}

pub fn list_classes(conn: &Connection, school_id: Option<&str>) -> Result<Vec<ClassRow>, EngineError> {
    let sql = format!(
        "SELECT {} FROM classes
         WHERE (?1 IS NULL OR school_id = ?1)
         ORDER BY academic_year, name",
        CLASS_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([school_id], class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The active class called `name` for `academic_year` in the same school.
pub fn find_active_class(
    conn: &Connection,
    school_id: &str,
    name: &str,
    academic_year: &str,
) -> Result<Option<ClassRef>, EngineError> {
    let found = conn
        .query_row(
            "SELECT id, name, academic_year FROM classes
             WHERE school_id = ? AND name = ? AND academic_year = ? AND is_active = 1",
            (school_id, name.trim(), academic_year),
            |r| {
                Ok(ClassRef {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    academic_year: r.get(2)?,
                })
            },
        )
        .optional()?;
    debug!(school_id, name, academic_year, found = found.is_some(), "destination lookup");
    Ok(found)
}

pub fn upsert_class_subject(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    period_max: Option<i64>,
    teacher_name: Option<&str>,
) -> Result<String, EngineError> {
    let class = load_class(conn, class_id)?;
    let subject_school: Option<String> = conn
        .query_row(
            "SELECT school_id FROM subjects WHERE id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(subject_school) = subject_school else {
        return Err(EngineError::NotFound {
            entity: "subject",
            id: subject_id.to_string(),
        });
    };
    if subject_school != class.school_id {
        return Err(EngineError::BadInput(
            "subject and class belong to different schools".to_string(),
        ));
    }
    let period_max = period_max.map(check_period_max).transpose()?;

    conn.execute(
        "INSERT INTO class_subjects(id, class_id, subject_id, period_max, teacher_name)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, subject_id) DO UPDATE SET
           period_max = excluded.period_max,
           teacher_name = excluded.teacher_name",
        (new_id(), class_id, subject_id, period_max, teacher_name),
    )?;
    let id: String = conn.query_row(
        "SELECT id FROM class_subjects WHERE class_id = ? AND subject_id = ?",
        (class_id, subject_id),
        |r| r.get(0),
    )?;
    Ok(id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub matricule: String,
    pub class_id: Option<String>,
    pub is_former_student: bool,
    pub graduation_year: Option<String>,
}

pub(crate) fn full_name(first: &str, last: &str) -> String {
    format!("{} {}", first.trim(), last.trim()).trim().to_string()
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<StudentRow, EngineError> {
    conn.query_row(
        "SELECT id, school_id, first_name, last_name, matricule, class_id,
                is_former_student, graduation_year
         FROM students WHERE id = ?",
        [student_id],
        |r| {
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            Ok(StudentRow {
                id: r.get(0)?,
                school_id: r.get(1)?,
                name: full_name(&first, &last),
                matricule: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                class_id: r.get(5)?,
                is_former_student: r.get::<_, i64>(6)? != 0,
                graduation_year: r.get(7)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| EngineError::NotFound {
        entity: "student",
        id: student_id.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub school_id: String,
    pub first_name: String,
    pub last_name: String,
    pub matricule: Option<String>,
    pub class_id: Option<String>,
}

/// Creates the student and, when a class is given, its first `active`
/// enrollment.
pub fn create_student(conn: &Connection, student: &NewStudent) -> Result<String, EngineError> {
    require_school(conn, &student.school_id)?;
    if student.first_name.trim().is_empty() && student.last_name.trim().is_empty() {
        return Err(EngineError::BadInput(
            "firstName or lastName is required".to_string(),
        ));
    }
    if let Some(class_id) = &student.class_id {
        let class = load_class(conn, class_id)?;
        if class.school_id != student.school_id {
            return Err(EngineError::BadInput(
                "class belongs to a different school".to_string(),
            ));
        }
    }

    let id = new_id();
    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO students(id, school_id, first_name, last_name, matricule, class_id,
                              is_former_student, graduation_year, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, NULL, ?)",
        (
            &id,
            &student.school_id,
            student.first_name.trim(),
            student.last_name.trim(),
            student.matricule.as_deref().map(str::trim),
            student.class_id.as_deref(),
            &now,
        ),
    )?;
    if let Some(class_id) = &student.class_id {
        tx.execute(
            "INSERT INTO enrollments(id, student_id, class_id, status, enrolled_at, left_at)
             VALUES(?, ?, ?, ?, ?, NULL)",
            (
                new_id(),
                &id,
                class_id,
                EnrollmentStatus::Active.as_str(),
                &now,
            ),
        )?;
    }
    tx.commit()?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::store::fixtures;

    #[test]
    fn class_override_then_subject_default() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let r = resolver(&conn);
        assert_eq!(r.period_max(Some(&c1), &school.subject_id).unwrap(), 20);

        upsert_class_subject(&conn, &c1, &school.subject_id, Some(50), Some("M. Kabongo")).unwrap();
        assert_eq!(r.period_max(Some(&c1), &school.subject_id).unwrap(), 50);
        assert_eq!(r.period_max(None, &school.subject_id).unwrap(), 20);
        assert_eq!(r.period_max(Some(&c1), "no-such-subject").unwrap(), 20);

        let maxima = class_subject_maxima(&conn, &c1).unwrap();
        assert_eq!(maxima.len(), 1);
        assert_eq!(maxima[0].period_max, 50);
    }

    #[test]
    fn class_subject_is_unique_per_pair() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let a = upsert_class_subject(&conn, &c1, &school.subject_id, Some(30), None).unwrap();
        let b = upsert_class_subject(&conn, &c1, &school.subject_id, None, None).unwrap();
        assert_eq!(a, b);
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM class_subjects", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn rejects_bad_period_max_and_year() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let e = create_subject(
            &conn,
            &NewSubject {
                school_id: school.school_id.clone(),
                name: "Dessin".into(),
                code: "DES".into(),
                period_max: 15,
            },
        )
        .unwrap_err();
        assert_eq!(e.code(), "bad_params");

        let e = create_class(
            &conn,
            &NewClass {
                school_id: school.school_id.clone(),
                name: "5ème".into(),
                academic_year: "2025".into(),
                next_class_name: None,
                is_terminal: false,
            },
        )
        .unwrap_err();
        assert_eq!(e.code(), "invalid_academic_year");
    }

    #[test]
    fn student_with_class_gets_active_enrollment() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let sid = fixtures::student(&conn, &school, "Amani", &c1);
        let st = load_student(&conn, &sid).unwrap();
        assert_eq!(st.class_id.as_deref(), Some(c1.as_str()));
        assert_eq!(st.name, "Amani Test");
        let status: String = conn
            .query_row(
                "SELECT status FROM enrollments WHERE student_id = ? AND class_id = ?",
                (&sid, &c1),
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "active");
    }

    #[test]
    fn destination_lookup_ignores_inactive_and_other_years() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        fixtures::class(&conn, &school, "4ème A", "2025-2026", None, false);
        let next = fixtures::class(&conn, &school, "4ème A", "2026-2027", None, false);
        let found = find_active_class(&conn, &school.school_id, "4ème A", "2026-2027")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, next);

        conn.execute("UPDATE classes SET is_active = 0 WHERE id = ?", [&next])
            .unwrap();
        assert!(find_active_class(&conn, &school.school_id, "4ème A", "2026-2027")
            .unwrap()
            .is_none());
    }
}
