use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use super::catalog::{full_name, load_class, load_student};
use super::ranking::compute_class_ranking;
use super::{new_id, now_rfc3339};
use crate::engine::promotion::EnrollmentStatus;
use crate::engine::ranking::ClassRanking;
use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub class_name: String,
    pub academic_year: String,
    pub status: String,
    pub enrolled_at: String,
    pub left_at: Option<String>,
}

const ENROLLMENT_SELECT: &str = "SELECT e.id, e.student_id, st.first_name, st.last_name,
        e.class_id, c.name, c.academic_year, e.status, e.enrolled_at, e.left_at
 FROM enrollments e
 JOIN students st ON st.id = e.student_id
 JOIN classes c ON c.id = e.class_id";

fn enrollment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<EnrollmentRow> {
    let first: String = r.get(2)?;
    let last: String = r.get(3)?;
    Ok(EnrollmentRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: full_name(&first, &last),
        class_id: r.get(4)?,
        class_name: r.get(5)?,
        academic_year: r.get(6)?,
        status: r.get(7)?,
        enrolled_at: r.get(8)?,
        left_at: r.get(9)?,
    })
}

/// Students pointing at `class_id` without any record there get an
/// `active` one.
fn backfill_current_students(conn: &Connection, class_id: &str) -> Result<usize, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT st.id FROM students st
         WHERE st.class_id = ?1
           AND NOT EXISTS (
             SELECT 1 FROM enrollments e WHERE e.student_id = st.id AND e.class_id = ?1
           )",
    )?;
    let missing = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if missing.is_empty() {
        return Ok(0);
    }
    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;
    for student_id in &missing {
        tx.execute(
            "INSERT INTO enrollments(id, student_id, class_id, status, enrolled_at, left_at)
             VALUES(?, ?, ?, ?, ?, NULL)",
            (
                new_id(),
                student_id,
                class_id,
                EnrollmentStatus::Active.as_str(),
                &now,
            ),
        )?;
    }
    tx.commit()?;
    info!(class_id, created = missing.len(), "backfilled enrollments");
    Ok(missing.len())
}

/// Enrollment records of a class, newest first.
pub fn list_enrollments(conn: &Connection, class_id: &str) -> Result<Vec<EnrollmentRow>, EngineError> {
    load_class(conn, class_id)?;
    backfill_current_students(conn, class_id)?;

    let sql = format!(
        "{} WHERE e.class_id = ? ORDER BY e.enrolled_at DESC, st.last_name, st.first_name",
        ENROLLMENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([class_id], enrollment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub enrollment: EnrollmentRow,
    pub rank: Option<usize>,
    pub class_size: usize,
    pub total_points: Option<Decimal>,
    pub percentage: Option<Decimal>,
}

/// Every class the student has been enrolled in, oldest year first, with the
/// student's standing in that class.
pub fn student_history(conn: &Connection, student_id: &str) -> Result<Vec<HistoryEntry>, EngineError> {
    load_student(conn, student_id)?;

    let sql = format!(
        "{} WHERE e.student_id = ? ORDER BY c.academic_year, e.enrolled_at",
        ENROLLMENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], enrollment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rankings: HashMap<(String, String), ClassRanking> = HashMap::new();
    let mut out = Vec::with_capacity(rows.len());
    for enrollment in rows {
        let key = (enrollment.class_id.clone(), enrollment.academic_year.clone());
        if !rankings.contains_key(&key) {
            let ranking = compute_class_ranking(conn, &key.0, &key.1)?;
            rankings.insert(key.clone(), ranking);
        }
        let ranking = &rankings[&key];
        let standing = ranking
            .rank_map()
            .get(enrollment.student_id.as_str())
            .copied();
        out.push(HistoryEntry {
            rank: standing.map(|r| r.rank),
            class_size: ranking.results.len(),
            total_points: standing.map(|r| r.total_points),
            percentage: standing.map(|r| r.percentage),
            enrollment,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairEntry {
    pub student_id: String,
    pub class_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub dry_run: bool,
    pub created: usize,
    pub entries: Vec<RepairEntry>,
}

/// Creates the enrollment records implied by bulletins tied to a class for
/// that class's own year. Class-less bulletins are ignored.
pub fn repair_enrollments(conn: &Connection, dry_run: bool) -> Result<RepairReport, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT b.student_id, c.id, st.class_id
         FROM bulletins b
         JOIN classes c ON c.id = b.class_id AND c.academic_year = b.academic_year
         JOIN students st ON st.id = b.student_id
         WHERE NOT EXISTS (
           SELECT 1 FROM enrollments e WHERE e.student_id = b.student_id AND e.class_id = c.id
         )
         ORDER BY c.id, b.student_id",
    )?;
    let entries = stmt
        .query_map([], |r| {
            let student_id: String = r.get(0)?;
            let class_id: String = r.get(1)?;
            let current: Option<String> = r.get(2)?;
            let status = if current.as_deref() == Some(class_id.as_str()) {
                EnrollmentStatus::Active
            } else {
                EnrollmentStatus::Promoted
            };
            Ok(RepairEntry {
                student_id,
                class_id,
                status: status.as_str().to_string(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if dry_run || entries.is_empty() {
        return Ok(RepairReport {
            dry_run,
            created: 0,
            entries,
        });
    }

    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let mut created = 0;
    for e in &entries {
        created += tx.execute(
            "INSERT INTO enrollments(id, student_id, class_id, status, enrolled_at, left_at)
             VALUES(?, ?, ?, ?, ?, NULL)
             ON CONFLICT(student_id, class_id) DO NOTHING",
            (new_id(), &e.student_id, &e.class_id, &e.status, &now),
        )?;
    }
    tx.commit()?;
    info!(created, "enrollment repair applied");

    Ok(RepairReport {
        dry_run,
        created,
        entries,
    })
}

/// Marks the enrollment withdrawn; the student's current class is cleared
/// when it pointed at that class.
pub fn withdraw_enrollment(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<EnrollmentRow, EngineError> {
    let enrollment_id: Option<String> = conn
        .query_row(
            "SELECT id FROM enrollments WHERE student_id = ? AND class_id = ?",
            (student_id, class_id),
            |r| r.get(0),
        )
        .optional()?;
    let Some(enrollment_id) = enrollment_id else {
        return Err(EngineError::NotFound {
            entity: "enrollment",
            id: format!("{}/{}", student_id, class_id),
        });
    };

    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE enrollments SET status = ?, left_at = ? WHERE id = ?",
        (EnrollmentStatus::Withdrawn.as_str(), &now, &enrollment_id),
    )?;
    tx.execute(
        "UPDATE students SET class_id = NULL, updated_at = ? WHERE id = ? AND class_id = ?",
        (&now, student_id, class_id),
    )?;
    tx.commit()?;
    info!(student_id, class_id, "enrollment withdrawn");

    let sql = format!("{} WHERE e.id = ?", ENROLLMENT_SELECT);
    Ok(conn.query_row(&sql, [&enrollment_id], enrollment_from_row)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::db::open_in_memory;
    use crate::store::fixtures::{self, dec};
    use crate::store::promotion::run_promotion;

    #[test]
    fn listing_backfills_students_pointing_at_the_class() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let s = fixtures::student(&conn, &school, "Amani", &c1);
        conn.execute("DELETE FROM enrollments", []).unwrap();

        let rows = list_enrollments(&conn, &c1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, s);
        assert_eq!(rows[0].status, "active");
        assert_eq!(rows[0].class_name, "3ème A");

        assert_eq!(list_enrollments(&conn, &c1).unwrap().len(), 1);
    }

    #[test]
    fn history_carries_rank_per_class() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", Some("4ème A"), false);
        let next = fixtures::class(&conn, &school, "4ème A", "2026-2027", None, false);
        let a = fixtures::student(&conn, &school, "Amani", &c1);
        let b = fixtures::student(&conn, &school, "Baraka", &c1);
        fixtures::grade(&conn, &school, &a, &c1, "2025-2026", ["15", "18", "30", "10", "12", "20"]);
        fixtures::grade(&conn, &school, &b, &c1, "2025-2026", ["20", "20", "40", "20", "20", "40"]);
        run_promotion(&conn, &c1, None, &EngineSettings::default()).unwrap();

        let h = student_history(&conn, &a).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].enrollment.class_id, c1);
        assert_eq!(h[0].enrollment.status, "promoted");
        assert_eq!(h[0].rank, Some(2));
        assert_eq!(h[0].class_size, 2);
        assert_eq!(h[0].total_points, Some(dec("105")));
        assert_eq!(h[1].enrollment.class_id, next);
        assert_eq!(h[1].enrollment.status, "active");
        assert_eq!(h[1].total_points, Some(dec("0")));
    }

    #[test]
    fn repair_creates_missing_records_unless_dry_run() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let c2 = fixtures::class(&conn, &school, "4ème A", "2026-2027", None, false);
        let s = fixtures::student(&conn, &school, "Amani", &c2);
        fixtures::grade(&conn, &school, &s, &c1, "2025-2026", ["10", "10", "20", "10", "10", "20"]);
        // A bulletin for a year the class does not belong to is not evidence.
        fixtures::grade(&conn, &school, &s, &c1, "2024-2025", ["10", "10", "20", "10", "10", "20"]);

        let dry = repair_enrollments(&conn, true).unwrap();
        assert_eq!(dry.created, 0);
        assert_eq!(
            dry.entries,
            vec![RepairEntry {
                student_id: s.clone(),
                class_id: c1.clone(),
                status: "promoted".to_string(),
            }]
        );
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM enrollments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);

        let applied = repair_enrollments(&conn, false).unwrap();
        assert_eq!(applied.created, 1);
        assert!(repair_enrollments(&conn, false).unwrap().entries.is_empty());
    }

    #[test]
    fn withdraw_clears_current_class() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let s = fixtures::student(&conn, &school, "Amani", &c1);

        let row = withdraw_enrollment(&conn, &s, &c1).unwrap();
        assert_eq!(row.status, "withdrawn");
        assert!(row.left_at.is_some());
        assert_eq!(load_student(&conn, &s).unwrap().class_id, None);

        let e = withdraw_enrollment(&conn, &s, "other").unwrap_err();
        assert_eq!(e.code(), "not_found");
    }
}
