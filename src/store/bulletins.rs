use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use super::catalog::{load_class, load_student, resolver};
use super::{decimal_to_sql, get_decimal, get_decimal_or_zero, new_id, now_rfc3339};
use crate::engine::promotion::AcademicYear;
use crate::engine::scores::{
    aggregate, check_scale, BulletinTotals, FieldErrors, RawScores, ScoreField,
};
use crate::engine::EngineError;

/// A partial write for one (student, subject, academic year) entry.
///
/// Only keys present in `scores` are touched. A present key with `None`
/// clears the stored value.
#[derive(Debug, Clone)]
pub struct BulletinWrite {
    pub student_id: String,
    pub subject_id: String,
    pub academic_year: String,
    pub class_id: Option<String>,
    pub scores: BTreeMap<ScoreField, Option<Decimal>>,
    pub reclamation_score: Option<Option<Decimal>>,
    pub reclamation_passed: Option<Option<bool>>,
}

impl BulletinWrite {
    pub fn new(student_id: &str, subject_id: &str, academic_year: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
            academic_year: academic_year.to_string(),
            class_id: None,
            scores: BTreeMap::new(),
            reclamation_score: None,
            reclamation_passed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub class_id: Option<String>,
    pub academic_year: String,
    pub period_max: u32,
    pub scores: serde_json::Value,
    #[serde(flatten)]
    pub totals: BulletinTotals,
    pub reclamation_score: Option<Decimal>,
    pub reclamation_passed: Option<bool>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinSaved {
    pub created: bool,
    pub bulletin: BulletinRecord,
}

struct StoredEntry {
    class_id: Option<String>,
    raw: RawScores,
    reclamation_score: Option<Decimal>,
    reclamation_passed: Option<bool>,
}

fn load_entry(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    academic_year: &str,
) -> Result<Option<StoredEntry>, EngineError> {
    let entry = conn
        .query_row(
            "SELECT class_id, s1_p1, s1_p2, s1_exam, s2_p3, s2_p4, s2_exam,
                    reclamation_score, reclamation_passed
             FROM bulletins
             WHERE student_id = ? AND subject_id = ? AND academic_year = ?",
            (student_id, subject_id, academic_year),
            |r| {
                Ok(StoredEntry {
                    class_id: r.get(0)?,
                    raw: RawScores {
                        s1_p1: get_decimal(r, 1)?,
                        s1_p2: get_decimal(r, 2)?,
                        s1_exam: get_decimal(r, 3)?,
                        s2_p3: get_decimal(r, 4)?,
                        s2_p4: get_decimal(r, 5)?,
                        s2_exam: get_decimal(r, 6)?,
                    },
                    reclamation_score: get_decimal(r, 7)?,
                    reclamation_passed: r.get::<_, Option<i64>>(8)?.map(|v| v != 0),
                })
            },
        )
        .optional()?;
    Ok(entry)
}

fn check_reclamation(score: Option<Decimal>, errors: &mut FieldErrors) {
    let Some(v) = score else {
        return;
    };
    if v < Decimal::ZERO || v > Decimal::ONE_HUNDRED {
        errors.insert("reclamation_score", "must be between 0 and 100 (percent)");
        return;
    }
    if let Err(msg) = check_scale(v) {
        errors.insert("reclamation_score", msg);
    }
}

/// Validates, totals and stores one bulletin entry.
///
/// Fields missing from the write keep their stored value. Totals are always
/// recomputed from the merged fields.
pub fn upsert_bulletin(conn: &Connection, write: &BulletinWrite) -> Result<BulletinSaved, EngineError> {
    let year = AcademicYear::parse(&write.academic_year)?.to_string();
    let student = load_student(conn, &write.student_id)?;
    let subject_exists = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ?",
            [&write.subject_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !subject_exists {
        return Err(EngineError::NotFound {
            entity: "subject",
            id: write.subject_id.clone(),
        });
    }
    if let Some(class_id) = &write.class_id {
        load_class(conn, class_id)?;
    }

    let existing = load_entry(conn, &write.student_id, &write.subject_id, &year)?;
    let created = existing.is_none();
    let (mut raw, stored_class, mut reclamation_score, mut reclamation_passed) = match existing {
        Some(e) => (e.raw, e.class_id, e.reclamation_score, e.reclamation_passed),
        None => (RawScores::default(), None, None, None),
    };

    for (field, value) in &write.scores {
        raw.set(*field, *value);
    }
    if let Some(v) = write.reclamation_score {
        reclamation_score = v;
    }
    if let Some(v) = write.reclamation_passed {
        reclamation_passed = v;
    }

    let class_id = write.class_id.clone().or(stored_class);
    let bound_class = class_id.as_deref().or(student.class_id.as_deref());
    let period_max = resolver(conn).period_max(bound_class, &write.subject_id)?;

    let (totals, mut errors) = match aggregate(&raw, period_max) {
        Ok(t) => (Some(t), FieldErrors::default()),
        Err(e) => (None, e),
    };
    check_reclamation(reclamation_score, &mut errors);
    let Some(totals) = totals.filter(|_| errors.is_empty()) else {
        return Err(errors.into());
    };

    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO bulletins(
            id, student_id, subject_id, class_id, academic_year,
            s1_p1, s1_p2, s1_exam, total_s1,
            s2_p3, s2_p4, s2_exam, total_s2,
            total_general, reclamation_score, reclamation_passed,
            created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
         ON CONFLICT(student_id, subject_id, academic_year) DO UPDATE SET
            class_id = excluded.class_id,
            s1_p1 = excluded.s1_p1,
            s1_p2 = excluded.s1_p2,
            s1_exam = excluded.s1_exam,
            total_s1 = excluded.total_s1,
            s2_p3 = excluded.s2_p3,
            s2_p4 = excluded.s2_p4,
            s2_exam = excluded.s2_exam,
            total_s2 = excluded.total_s2,
            total_general = excluded.total_general,
            reclamation_score = excluded.reclamation_score,
            reclamation_passed = excluded.reclamation_passed,
            updated_at = excluded.updated_at",
        rusqlite::params![
            new_id(),
            &write.student_id,
            &write.subject_id,
            class_id.as_deref(),
            &year,
            decimal_to_sql(raw.s1_p1),
            decimal_to_sql(raw.s1_p2),
            decimal_to_sql(raw.s1_exam),
            decimal_to_sql(Some(totals.total_s1)),
            decimal_to_sql(raw.s2_p3),
            decimal_to_sql(raw.s2_p4),
            decimal_to_sql(raw.s2_exam),
            decimal_to_sql(Some(totals.total_s2)),
            decimal_to_sql(Some(totals.total_general)),
            decimal_to_sql(reclamation_score),
            reclamation_passed,
            &now,
        ],
    )?;

    info!(
        student_id = %write.student_id,
        subject_id = %write.subject_id,
        academic_year = %year,
        total_general = %totals.total_general,
        created,
        "bulletin saved"
    );

    let bulletin = get_bulletins(conn, &write.student_id, &year, None)?
        .into_iter()
        .find(|b| b.subject_id == write.subject_id)
        .ok_or_else(|| EngineError::NotFound {
            entity: "bulletin",
            id: format!("{}/{}", write.student_id, write.subject_id),
        })?;
    Ok(BulletinSaved { created, bulletin })
}

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<(BulletinRecord, Option<String>)> {
    let raw = RawScores {
        s1_p1: get_decimal(r, 6)?,
        s1_p2: get_decimal(r, 7)?,
        s1_exam: get_decimal(r, 8)?,
        s2_p3: get_decimal(r, 9)?,
        s2_p4: get_decimal(r, 10)?,
        s2_exam: get_decimal(r, 11)?,
    };
    let record = BulletinRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        subject_id: r.get(2)?,
        subject_name: r.get(3)?,
        class_id: r.get(4)?,
        academic_year: r.get(5)?,
        period_max: 0,
        scores: raw.to_json(),
        totals: BulletinTotals {
            total_s1: get_decimal_or_zero(r, 12)?,
            total_s2: get_decimal_or_zero(r, 13)?,
            total_general: get_decimal_or_zero(r, 14)?,
        },
        reclamation_score: get_decimal(r, 15)?,
        reclamation_passed: r.get::<_, Option<i64>>(16)?.map(|v| v != 0),
        created_at: r.get(17)?,
        updated_at: r.get(18)?,
    };
    let student_class: Option<String> = r.get(19)?;
    Ok((record, student_class))
}

/// Entries of one student for a year, ordered by subject name. With
/// `class_id`, only entries of that class and legacy entries without one.
pub fn get_bulletins(
    conn: &Connection,
    student_id: &str,
    academic_year: &str,
    class_id: Option<&str>,
) -> Result<Vec<BulletinRecord>, EngineError> {
    let year = AcademicYear::parse(academic_year)?.to_string();
    load_student(conn, student_id)?;

    let mut stmt = conn.prepare(
        "SELECT b.id, b.student_id, b.subject_id, s.name, b.class_id, b.academic_year,
                b.s1_p1, b.s1_p2, b.s1_exam, b.s2_p3, b.s2_p4, b.s2_exam,
                b.total_s1, b.total_s2, b.total_general,
                b.reclamation_score, b.reclamation_passed,
                b.created_at, b.updated_at, st.class_id
         FROM bulletins b
         JOIN subjects s ON s.id = b.subject_id
         JOIN students st ON st.id = b.student_id
         WHERE b.student_id = ?1 AND b.academic_year = ?2
           AND (?3 IS NULL OR b.class_id = ?3 OR b.class_id IS NULL)
         ORDER BY s.name, b.subject_id",
    )?;
    let rows = stmt
        .query_map((student_id, &year, class_id), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let resolver = resolver(conn);
    let mut out = Vec::with_capacity(rows.len());
    for (mut record, student_class) in rows {
        let bound = record.class_id.as_deref().or(student_class.as_deref());
        record.period_max = resolver.period_max(bound, &record.subject_id)?;
        out.push(record);
    }
    Ok(out)
}
