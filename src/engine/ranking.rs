use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Number of periods' worth of points one subject contributes per year
/// (4 periods + 2 exams at twice the period max).
pub const PERIODS_PER_YEAR_EQUIVALENT: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectMax {
    pub subject_id: String,
    pub period_max: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentInfo {
    pub name: String,
    pub matricule: String,
}

/// A stored general total, already restricted to the ranked academic year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletinTotal {
    pub student_id: String,
    pub subject_id: String,
    pub class_id: Option<String>,
    pub total_general: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct RankingInput {
    pub class_id: String,
    pub subjects: Vec<SubjectMax>,
    pub students: HashMap<String, StudentInfo>,
    /// Students with an enrollment record in the class, any status.
    pub enrolled: Vec<String>,
    pub bulletins: Vec<BulletinTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub student_id: String,
    pub name: String,
    pub matricule: String,
    pub total_points: Decimal,
    pub max_points: Decimal,
    pub percentage: Decimal,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRanking {
    /// Sum of subject maxima as configured (zero when the class has no subjects).
    pub total_max: Decimal,
    pub results: Vec<RankingRow>,
}

impl ClassRanking {
    pub fn rank_map(&self) -> HashMap<&str, &RankingRow> {
        self.results
            .iter()
            .map(|r| (r.student_id.as_str(), r))
            .collect()
    }
}

pub fn max_per_subject(subjects: &[SubjectMax]) -> BTreeMap<&str, Decimal> {
    subjects
        .iter()
        .map(|s| {
            (
                s.subject_id.as_str(),
                Decimal::from(s.period_max) * Decimal::from(PERIODS_PER_YEAR_EQUIVALENT),
            )
        })
        .collect()
}

/// Unrounded share of `total_max`, in percent. A zero maximum yields 0.
pub fn percentage(points: Decimal, total_max: Decimal) -> Decimal {
    if total_max <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    points / total_max * Decimal::ONE_HUNDRED
}

/// Enrolled students plus students graded in this exact class. Bulletins
/// without a class never add candidates: the same subject exists in other
/// classes.
pub fn candidate_ids(input: &RankingInput) -> BTreeSet<&str> {
    let mut ids: BTreeSet<&str> = input.enrolled.iter().map(|s| s.as_str()).collect();
    for b in &input.bulletins {
        if b.class_id.as_deref() == Some(input.class_id.as_str()) {
            ids.insert(b.student_id.as_str());
        }
    }
    ids
}

pub fn rank_class(input: &RankingInput) -> ClassRanking {
    let maxima = max_per_subject(&input.subjects);
    let total_max: Decimal = maxima.values().copied().sum();

    let candidates = candidate_ids(input);

    // Legacy rows without a class still count towards this class's points.
    let mut points_by_subject: HashMap<&str, BTreeMap<&str, Decimal>> = HashMap::new();
    for b in &input.bulletins {
        if !candidates.contains(b.student_id.as_str()) {
            continue;
        }
        if !maxima.contains_key(b.subject_id.as_str()) {
            continue;
        }
        let class_ok = match b.class_id.as_deref() {
            None => true,
            Some(c) => c == input.class_id,
        };
        if !class_ok {
            continue;
        }
        points_by_subject
            .entry(b.student_id.as_str())
            .or_default()
            .insert(b.subject_id.as_str(), b.total_general);
    }

    let mut rows: Vec<RankingRow> = candidates
        .iter()
        .map(|sid| {
            let points: Decimal = points_by_subject
                .get(sid)
                .map(|m| m.values().copied().sum())
                .unwrap_or(Decimal::ZERO);
            let (name, matricule) = match input.students.get(*sid) {
                Some(info) => (info.name.clone(), info.matricule.clone()),
                None => (format!("Student #{}", sid), String::new()),
            };
            RankingRow {
                student_id: sid.to_string(),
                name,
                matricule,
                total_points: points,
                max_points: total_max,
                percentage: percentage(points, total_max).round_dp(2),
                rank: 0,
            }
        })
        .collect();

    // Raw points, not the rounded percentage; ties broken by name.
    rows.sort_by(|a, b| match b.total_points.cmp(&a.total_points) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }

    ClassRanking {
        total_max,
        results: rows,
    }
}
