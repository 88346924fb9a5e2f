//! Loads a class for year-end promotion and applies the resulting plan.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{info, warn};

use super::catalog::{find_active_class, load_class, ClassRow};
use super::ranking::compute_class_ranking;
use super::{new_id, now_rfc3339};
use crate::config::EngineSettings;
use crate::engine::promotion::{
    classify, plan_promotion, AcademicYear, Decision, EnrollmentStatus, Outcome, PromotionPlan,
    PromotionSummary, SourceClass,
};
use crate::engine::ranking::ClassRanking;
use crate::engine::EngineError;

struct Prepared {
    class: ClassRow,
    academic_year: String,
    ranking: ClassRanking,
    skip: HashSet<String>,
}

fn prepare(
    conn: &Connection,
    class_id: &str,
    academic_year: Option<&str>,
) -> Result<Prepared, EngineError> {
    let class = load_class(conn, class_id)?;
    let class_year = AcademicYear::parse(&class.academic_year)?;
    if let Some(raw) = academic_year {
        let requested = AcademicYear::parse(raw)?;
        if requested != class_year {
            return Err(EngineError::AcademicYearMismatch {
                class_name: class.name.clone(),
                class_year: class_year.to_string(),
                requested: requested.to_string(),
            });
        }
    }
    let academic_year = class_year.to_string();
    let ranking = compute_class_ranking(conn, class_id, &academic_year)?;

    let mut stmt =
        conn.prepare("SELECT student_id FROM enrollments WHERE class_id = ? AND status = ?")?;
    let skip = stmt
        .query_map((class_id, EnrollmentStatus::Withdrawn.as_str()), |r| {
            r.get::<_, String>(0)
        })?
        .collect::<Result<HashSet<_>, _>>()?;

    Ok(Prepared {
        class,
        academic_year,
        ranking,
        skip,
    })
}

fn plan(conn: &Connection, prepared: &Prepared, threshold: Decimal) -> Result<PromotionPlan, EngineError> {
    let class = &prepared.class;
    let source = SourceClass {
        id: class.id.clone(),
        name: class.name.clone(),
        is_terminal: class.is_terminal,
        next_class_name: class.next_class_name.clone(),
    };
    plan_promotion(
        &source,
        &prepared.academic_year,
        &prepared.ranking,
        threshold,
        &prepared.skip,
        |name, year| find_active_class(conn, &class.school_id, name, year),
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionPreview {
    pub class_id: String,
    pub academic_year: String,
    pub threshold: Decimal,
    pub total_max: Decimal,
    pub decisions: Vec<Decision>,
    pub ready: bool,
    pub summary: Option<PromotionSummary>,
    pub blocker: Option<serde_json::Value>,
}

/// Classification and destination checks for a class, without writing.
pub fn preview_promotion(
    conn: &Connection,
    class_id: &str,
    academic_year: Option<&str>,
    settings: &EngineSettings,
) -> Result<PromotionPreview, EngineError> {
    let threshold = settings.pass_threshold_percent;
    let prepared = prepare(conn, class_id, academic_year)?;
    let decisions = classify(
        &prepared.ranking,
        threshold,
        prepared.class.is_terminal,
        &prepared.skip,
    );

    let (summary, blocker) = match plan(conn, &prepared, threshold) {
        Ok(p) => (Some(p.summary()), None),
        Err(e) if e.is_promotion_blocker() => (
            None,
            Some(json!({
                "code": e.code(),
                "message": e.to_string(),
                "details": e.details(),
            })),
        ),
        Err(e) => return Err(e),
    };

    Ok(PromotionPreview {
        class_id: class_id.to_string(),
        academic_year: prepared.academic_year,
        threshold,
        total_max: prepared.ranking.total_max,
        decisions,
        ready: blocker.is_none(),
        summary,
        blocker,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionReport {
    #[serde(flatten)]
    pub summary: PromotionSummary,
    pub academic_year: String,
    pub decisions: Vec<Decision>,
    /// Students already past the destination year; left unchanged.
    pub settled: Vec<String>,
}

/// Runs the year-end promotion for one class.
///
/// The write lock is taken before anything is read. Every destination is
/// checked before the first write, and any error rolls the batch back.
pub fn run_promotion(
    conn: &Connection,
    class_id: &str,
    academic_year: Option<&str>,
    settings: &EngineSettings,
) -> Result<PromotionReport, EngineError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let prepared = prepare(&tx, class_id, academic_year)?;
    let plan = match plan(&tx, &prepared, settings.pass_threshold_percent) {
        Ok(p) => p,
        Err(e) => {
            if e.is_promotion_blocker() {
                warn!(class_id, code = e.code(), error = %e, "promotion blocked");
            }
            return Err(e);
        }
    };

    let settled = apply(&tx, &plan)?;
    tx.commit()?;

    let summary = plan.summary();
    info!(
        class_id,
        academic_year = %plan.academic_year,
        promoted = summary.promoted_count,
        repeated = summary.repeated_count,
        graduated = summary.graduated_count.unwrap_or(0),
        settled = settled.len(),
        "promotion applied"
    );
    Ok(PromotionReport {
        summary,
        academic_year: plan.academic_year.to_string(),
        decisions: plan.decisions,
        settled,
    })
}

fn upsert_enrollment(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    status: EnrollmentStatus,
    left_at: Option<&str>,
    now: &str,
) -> Result<(), EngineError> {
    // An unchanged status keeps its original left_at.
    conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, status, enrolled_at, left_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, class_id) DO UPDATE SET
           left_at = CASE WHEN enrollments.status = excluded.status
                          THEN COALESCE(enrollments.left_at, excluded.left_at)
                          ELSE excluded.left_at END,
           status = excluded.status",
        (new_id(), student_id, class_id, status.as_str(), now, left_at),
    )?;
    Ok(())
}

/// True once the student has finished a class of `next_year`, i.e. that
/// class has been promoted in turn. Such students are not rewound.
fn is_settled(conn: &Connection, student_id: &str, next_year: &str) -> Result<bool, EngineError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrollments e
         JOIN classes c ON c.id = e.class_id
         WHERE e.student_id = ?1 AND c.academic_year = ?2 AND e.status IN (?3, ?4, ?5)",
        (
            student_id,
            next_year,
            EnrollmentStatus::Promoted.as_str(),
            EnrollmentStatus::Echec.as_str(),
            EnrollmentStatus::Graduated.as_str(),
        ),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Closes the student's `active` enrollments in classes of `years`, except
/// those in `keep`. Later years are never touched.
fn close_stale_active(
    conn: &Connection,
    student_id: &str,
    keep: &[&str],
    years: [&str; 2],
    now: &str,
) -> Result<usize, EngineError> {
    let mut closed = 0;
    let mut stmt = conn.prepare(
        "SELECT e.class_id FROM enrollments e
         JOIN classes c ON c.id = e.class_id
         WHERE e.student_id = ?1 AND e.status = ?2 AND c.academic_year IN (?3, ?4)",
    )?;
    let active = stmt
        .query_map(
            (student_id, EnrollmentStatus::Active.as_str(), years[0], years[1]),
            |r| r.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for class_id in active.iter().filter(|c| !keep.contains(&c.as_str())) {
        closed += conn.execute(
            "UPDATE enrollments SET status = ?, left_at = ? WHERE student_id = ? AND class_id = ?",
            (EnrollmentStatus::Withdrawn.as_str(), now, student_id, class_id),
        )?;
    }
    Ok(closed)
}

/// Writes the plan and returns the students left alone because they are
/// already settled past the destination year.
fn apply(conn: &Connection, plan: &PromotionPlan) -> Result<Vec<String>, EngineError> {
    let now = now_rfc3339();
    let source = plan.source_class_id.as_str();
    let year = plan.academic_year.to_string();
    let next_year = plan.next_year.to_string();
    let years = [year.as_str(), next_year.as_str()];
    let mut settled = Vec::new();

    for t in &plan.transitions {
        let student = t.student_id.as_str();
        if is_settled(conn, student, &next_year)? {
            settled.push(t.student_id.clone());
            continue;
        }
        upsert_enrollment(conn, student, source, t.outcome.source_status(), Some(now.as_str()), &now)?;

        match (&t.destination, t.outcome) {
            (Some(dest), _) => {
                close_stale_active(conn, student, &[source, dest.id.as_str()], years, &now)?;
                upsert_enrollment(conn, student, &dest.id, EnrollmentStatus::Active, None, &now)?;
                conn.execute(
                    "UPDATE students SET class_id = ?, updated_at = ? WHERE id = ?",
                    (&dest.id, &now, student),
                )?;
            }
            (None, Outcome::Graduate) => {
                close_stale_active(conn, student, &[source], years, &now)?;
                conn.execute(
                    "UPDATE students
                     SET class_id = NULL, is_former_student = 1, graduation_year = ?, updated_at = ?
                     WHERE id = ?",
                    (&year, &now, student),
                )?;
            }
            (None, outcome) => {
                return Err(EngineError::BadInput(format!(
                    "no destination class for {:?} outcome of student {}",
                    outcome, student
                )));
            }
        }
    }
    Ok(settled)
}
