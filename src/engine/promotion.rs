//! Year-end classification and transition planning.
//!
//! Planning is separated from applying: `plan_promotion` resolves every
//! destination class a batch needs before anything is written, so a missing
//! class aborts the whole batch.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use super::ranking::{percentage, ClassRanking};
use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcademicYear {
    pub start: i32,
    pub end: i32,
}

impl AcademicYear {
    /// Exactly two hyphen-separated integers, e.g. `2025-2026`.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidAcademicYear {
            value: raw.to_string(),
        };
        let trimmed = raw.trim();
        let parts: Vec<&str> = trimmed.split('-').collect();
        if parts.len() != 2 {
            return Err(invalid());
        }
        let start = parts[0].trim().parse::<i32>().map_err(|_| invalid())?;
        let end = parts[1].trim().parse::<i32>().map_err(|_| invalid())?;
        Ok(Self { start, end })
    }

    pub fn next(self) -> Result<Self, EngineError> {
        match (self.start.checked_add(1), self.end.checked_add(1)) {
            (Some(start), Some(end)) => Ok(Self { start, end }),
            _ => Err(EngineError::InvalidAcademicYear {
                value: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for AcademicYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Promoted,
    Graduated,
    Withdrawn,
    Echec,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Promoted => "promoted",
            Self::Graduated => "graduated",
            Self::Withdrawn => "withdrawn",
            Self::Echec => "echec",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Promote,
    Repeat,
    Graduate,
}

impl Outcome {
    /// Status left on the enrollment in the source class.
    pub fn source_status(self) -> EnrollmentStatus {
        match self {
            Self::Promote => EnrollmentStatus::Promoted,
            Self::Repeat => EnrollmentStatus::Echec,
            Self::Graduate => EnrollmentStatus::Graduated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub id: String,
    pub name: String,
    pub academic_year: String,
}

#[derive(Debug, Clone)]
pub struct SourceClass {
    pub id: String,
    pub name: String,
    pub is_terminal: bool,
    pub next_class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub student_id: String,
    pub name: String,
    pub percentage: Decimal,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub student_id: String,
    pub outcome: Outcome,
    pub destination: Option<ClassRef>,
}

#[derive(Debug, Clone)]
pub struct PromotionPlan {
    pub source_class_id: String,
    pub academic_year: AcademicYear,
    pub next_year: AcademicYear,
    pub is_terminal: bool,
    pub threshold: Decimal,
    pub decisions: Vec<Decision>,
    pub transitions: Vec<Transition>,
    pub target: Option<ClassRef>,
    pub repeat: Option<ClassRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionSummary {
    pub promoted_count: usize,
    pub repeated_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graduated_count: Option<usize>,
    pub target_class_name: Option<String>,
    pub target_academic_year: String,
    pub message: String,
}

impl PromotionPlan {
    fn count(&self, outcome: Outcome) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.outcome == outcome)
            .count()
    }

    pub fn summary(&self) -> PromotionSummary {
        let promoted = self.count(Outcome::Promote);
        let repeated = self.count(Outcome::Repeat);
        let graduated = self.count(Outcome::Graduate);
        let next = self.next_year.to_string();

        let mut parts: Vec<String> = Vec::new();
        if self.is_terminal {
            parts.push(format!(
                "{} student(s) graduated and left the school.",
                graduated
            ));
        } else if let Some(target) = &self.target {
            parts.push(format!(
                "{} student(s) promoted to {} ({}).",
                promoted, target.name, next
            ));
        }
        if repeated > 0 {
            parts.push(format!(
                "{} failed (<{}%) and repeat the same class in {}.",
                repeated,
                self.threshold.normalize(),
                next
            ));
        }
        let message = if parts.is_empty() {
            "No students to process.".to_string()
        } else {
            parts.join(" ")
        };

        PromotionSummary {
            promoted_count: promoted,
            repeated_count: repeated,
            graduated_count: self.is_terminal.then_some(graduated),
            target_class_name: self.target.as_ref().map(|c| c.name.clone()),
            target_academic_year: next,
            message,
        }
    }
}

/// Pass/fail for every ranked student against `threshold` percent of the
/// ranking's class maximum. Students listed in `skip` are left out.
pub fn classify(
    ranking: &ClassRanking,
    threshold: Decimal,
    is_terminal: bool,
    skip: &HashSet<String>,
) -> Vec<Decision> {
    ranking
        .results
        .iter()
        .filter(|r| !skip.contains(&r.student_id))
        .map(|r| {
            let pct = percentage(r.total_points, ranking.total_max);
            let outcome = match (pct >= threshold, is_terminal) {
                (true, true) => Outcome::Graduate,
                (true, false) => Outcome::Promote,
                (false, _) => Outcome::Repeat,
            };
            Decision {
                student_id: r.student_id.clone(),
                name: r.name.clone(),
                percentage: pct.round_dp(2),
                outcome,
            }
        })
        .collect()
}

/// A destination can never be the class being promoted; that only happens
/// when the requested year is not the class's own.
fn not_source(
    source: &SourceClass,
    found: ClassRef,
    requested: &str,
) -> Result<ClassRef, EngineError> {
    if found.id == source.id {
        return Err(EngineError::AcademicYearMismatch {
            class_name: source.name.clone(),
            class_year: found.academic_year,
            requested: requested.to_string(),
        });
    }
    Ok(found)
}

/// Classifies the class and resolves every destination the batch needs.
///
/// `find_class(name, academic_year)` returns the active class with that name
/// in the source class's school, if any.
pub fn plan_promotion<F>(
    source: &SourceClass,
    academic_year: &str,
    ranking: &ClassRanking,
    threshold: Decimal,
    skip: &HashSet<String>,
    mut find_class: F,
) -> Result<PromotionPlan, EngineError>
where
    F: FnMut(&str, &str) -> Result<Option<ClassRef>, EngineError>,
{
    let year = AcademicYear::parse(academic_year)?;
    let next_year = year.next()?;
    let next = next_year.to_string();

    let decisions = classify(ranking, threshold, source.is_terminal, skip);
    let any_pass = decisions.iter().any(|d| d.outcome == Outcome::Promote);
    let any_fail = decisions.iter().any(|d| d.outcome == Outcome::Repeat);

    let target = if any_pass {
        let name = source
            .next_class_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| EngineError::MissingNextClassName {
                class_name: source.name.clone(),
            })?;
        let found = find_class(name, &next)?.ok_or_else(|| EngineError::MissingTargetClass {
            class_name: name.to_string(),
            academic_year: next.clone(),
        })?;
        Some(not_source(source, found, academic_year)?)
    } else {
        None
    };

    let repeat = if any_fail {
        let found =
            find_class(&source.name, &next)?.ok_or_else(|| EngineError::MissingRepeatClass {
                class_name: source.name.clone(),
                academic_year: next.clone(),
            })?;
        Some(not_source(source, found, academic_year)?)
    } else {
        None
    };

    let transitions = decisions
        .iter()
        .map(|d| Transition {
            student_id: d.student_id.clone(),
            outcome: d.outcome,
            destination: match d.outcome {
                Outcome::Promote => target.clone(),
                Outcome::Repeat => repeat.clone(),
                Outcome::Graduate => None,
            },
        })
        .collect();

    Ok(PromotionPlan {
        source_class_id: source.id.clone(),
        academic_year: year,
        next_year,
        is_terminal: source.is_terminal,
        threshold,
        decisions,
        transitions,
        target,
        repeat,
    })
}
