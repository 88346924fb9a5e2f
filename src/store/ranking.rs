use rusqlite::Connection;
use std::collections::HashMap;
use tracing::debug;

use super::catalog::{class_subject_maxima, full_name, load_class};
use super::get_decimal_or_zero;
use crate::engine::promotion::AcademicYear;
use crate::engine::ranking::{rank_class, BulletinTotal, ClassRanking, RankingInput, StudentInfo};
use crate::engine::EngineError;

/// Years are stored normalized; anything unparseable simply matches nothing.
pub(crate) fn normalize_year(raw: &str) -> String {
    AcademicYear::parse(raw)
        .map(|y| y.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

pub fn load_ranking_input(
    conn: &Connection,
    class_id: &str,
    academic_year: &str,
) -> Result<RankingInput, EngineError> {
    load_class(conn, class_id)?;
    let year = normalize_year(academic_year);

    let subjects = class_subject_maxima(conn, class_id)?;

    let mut stmt = conn.prepare("SELECT student_id FROM enrollments WHERE class_id = ?")?;
    let enrolled = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    // Class-less rows count for every candidate, enrolled or graded here.
    let mut stmt = conn.prepare(
        "SELECT student_id, subject_id, class_id, total_general
         FROM bulletins
         WHERE academic_year = ?2
           AND (class_id = ?1
                OR (class_id IS NULL
                    AND student_id IN (
                      SELECT student_id FROM enrollments WHERE class_id = ?1
                      UNION
                      SELECT student_id FROM bulletins WHERE class_id = ?1 AND academic_year = ?2
                    )))",
    )?;
    let bulletins = stmt
        .query_map((class_id, &year), |r| {
            Ok(BulletinTotal {
                student_id: r.get(0)?,
                subject_id: r.get(1)?,
                class_id: r.get(2)?,
                total_general: get_decimal_or_zero(r, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, matricule FROM students
         WHERE id IN (
           SELECT student_id FROM enrollments WHERE class_id = ?1
           UNION
           SELECT student_id FROM bulletins WHERE class_id = ?1 AND academic_year = ?2
         )",
    )?;
    let students = stmt
        .query_map((class_id, &year), |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok((
                r.get::<_, String>(0)?,
                StudentInfo {
                    name: full_name(&first, &last),
                    matricule: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                },
            ))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;

    Ok(RankingInput {
        class_id: class_id.to_string(),
        subjects,
        students,
        enrolled,
        bulletins,
    })
}

pub fn compute_class_ranking(
    conn: &Connection,
    class_id: &str,
    academic_year: &str,
) -> Result<ClassRanking, EngineError> {
    let input = load_ranking_input(conn, class_id, academic_year)?;
    let ranking = rank_class(&input);
    debug!(
        class_id,
        academic_year,
        subjects = input.subjects.len(),
        students = ranking.results.len(),
        total_max = %ranking.total_max,
        "class ranking computed"
    );
    Ok(ranking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::store::bulletins::{upsert_bulletin, BulletinWrite};
    use crate::store::catalog::{create_subject, upsert_class_subject, NewSubject};
    use crate::store::fixtures::{self, dec};
    use crate::engine::scores::ScoreField;

    #[test]
    fn ranks_by_points_then_name() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let zoe = fixtures::student(&conn, &school, "Zoé", &c1);
        let ali = fixtures::student(&conn, &school, "Ali", &c1);
        let ben = fixtures::student(&conn, &school, "Ben", &c1);
        fixtures::grade(&conn, &school, &zoe, &c1, "2025-2026", ["15", "18", "30", "10", "12", "20"]);
        fixtures::grade(&conn, &school, &ali, &c1, "2025-2026", ["10", "10", "20", "10", "10", "20"]);
        fixtures::grade(&conn, &school, &ben, &c1, "2025-2026", ["10", "10", "20", "10", "10", "20"]);

        let r = compute_class_ranking(&conn, &c1, "2025-2026").unwrap();
        assert_eq!(r.total_max, dec("160"));
        let order: Vec<_> = r.results.iter().map(|x| x.student_id.as_str()).collect();
        assert_eq!(order, vec![zoe.as_str(), ali.as_str(), ben.as_str()]);
        let ranks: Vec<_> = r.results.iter().map(|x| x.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(r.results[0].percentage, dec("65.62"));
        assert_eq!(r.results[0].name, "Zoé Test");
        assert_eq!(r.results[1].percentage, dec("50"));
    }

    #[test]
    fn legacy_rows_count_but_other_classes_do_not() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let c2 = fixtures::class(&conn, &school, "3ème B", "2025-2026", None, false);
        let enrolled = fixtures::student(&conn, &school, "Amani", &c1);
        let elsewhere = fixtures::student(&conn, &school, "Baraka", &c2);

        let mut legacy = BulletinWrite::new(&enrolled, &school.subject_id, "2025-2026");
        legacy.scores.insert(ScoreField::S1P1, Some(dec("12")));
        upsert_bulletin(&conn, &legacy).unwrap();

        fixtures::grade(&conn, &school, &elsewhere, &c2, "2025-2026", ["20", "20", "40", "20", "20", "40"]);

        let r = compute_class_ranking(&conn, &c1, "2025-2026").unwrap();
        assert_eq!(r.results.len(), 1);
        assert_eq!(r.results[0].student_id, enrolled);
        assert_eq!(r.results[0].total_points, dec("12"));
    }

    #[test]
    fn graded_but_unenrolled_students_are_ranked() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let c2 = fixtures::class(&conn, &school, "3ème B", "2025-2026", None, false);
        let s = fixtures::student(&conn, &school, "Amani", &c2);
        fixtures::grade(&conn, &school, &s, &c1, "2025-2026", ["10", "10", "20", "0", "0", "0"]);

        let r = compute_class_ranking(&conn, &c1, "2025-2026").unwrap();
        assert_eq!(r.results.len(), 1);
        assert_eq!(r.results[0].total_points, dec("40"));
        assert_eq!(r.results[0].percentage, dec("25"));
    }

    #[test]
    fn legacy_rows_count_for_graded_but_unenrolled_students() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        let c2 = fixtures::class(&conn, &school, "3ème B", "2025-2026", None, false);
        let french = create_subject(
            &conn,
            &NewSubject {
                school_id: school.school_id.clone(),
                name: "Français".into(),
                code: "FR".into(),
                period_max: 20,
            },
        )
        .unwrap();
        upsert_class_subject(&conn, &c1, &french, None, None).unwrap();

        let s = fixtures::student(&conn, &school, "Amani", &c2);
        fixtures::grade(&conn, &school, &s, &c1, "2025-2026", ["10", "10", "20", "0", "0", "0"]);
        let mut legacy = BulletinWrite::new(&s, &french, "2025-2026");
        legacy.scores.insert(ScoreField::S1P1, Some(dec("12")));
        upsert_bulletin(&conn, &legacy).unwrap();

        let r = compute_class_ranking(&conn, &c1, "2025-2026").unwrap();
        assert_eq!(r.total_max, dec("320"));
        assert_eq!(r.results.len(), 1);
        assert_eq!(r.results[0].total_points, dec("52"));
    }

    #[test]
    fn class_without_subjects_reports_zero_percent() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        fixtures::student(&conn, &school, "Amani", &c1);
        conn.execute("DELETE FROM class_subjects WHERE class_id = ?", [&c1])
            .unwrap();

        let r = compute_class_ranking(&conn, &c1, "2025-2026").unwrap();
        assert_eq!(r.total_max, dec("0"));
        assert_eq!(r.results.len(), 1);
        assert_eq!(r.results[0].percentage, dec("0"));
    }

    #[test]
    fn empty_class_and_unknown_class() {
        let conn = open_in_memory();
        let school = fixtures::school(&conn);
        let c1 = fixtures::class(&conn, &school, "3ème A", "2025-2026", None, false);
        assert!(compute_class_ranking(&conn, &c1, "2025-2026")
            .unwrap()
            .results
            .is_empty());
        assert_eq!(
            compute_class_ranking(&conn, "missing", "2025-2026")
                .unwrap_err()
                .code(),
            "not_found"
        );
    }
}
