use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

/// Stored scores carry two decimal places.
pub const SCORE_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScoreField {
    S1P1,
    S1P2,
    S1Exam,
    S2P3,
    S2P4,
    S2Exam,
}

impl ScoreField {
    pub const ALL: [ScoreField; 6] = [
        ScoreField::S1P1,
        ScoreField::S1P2,
        ScoreField::S1Exam,
        ScoreField::S2P3,
        ScoreField::S2P4,
        ScoreField::S2Exam,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::S1P1 => "s1_p1",
            Self::S1P2 => "s1_p2",
            Self::S1Exam => "s1_exam",
            Self::S2P3 => "s2_p3",
            Self::S2P4 => "s2_p4",
            Self::S2Exam => "s2_exam",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn is_exam(self) -> bool {
        matches!(self, Self::S1Exam | Self::S2Exam)
    }

    /// Upper bound for this field: period max, or twice that for exams.
    pub fn bound(self, period_max: u32) -> Decimal {
        let pm = Decimal::from(period_max);
        if self.is_exam() {
            pm * Decimal::TWO
        } else {
            pm
        }
    }
}

/// The six raw bulletin fields. `None` means "not graded yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawScores {
    pub s1_p1: Option<Decimal>,
    pub s1_p2: Option<Decimal>,
    pub s1_exam: Option<Decimal>,
    pub s2_p3: Option<Decimal>,
    pub s2_p4: Option<Decimal>,
    pub s2_exam: Option<Decimal>,
}

impl RawScores {
    pub fn get(&self, field: ScoreField) -> Option<Decimal> {
        match field {
            ScoreField::S1P1 => self.s1_p1,
            ScoreField::S1P2 => self.s1_p2,
            ScoreField::S1Exam => self.s1_exam,
            ScoreField::S2P3 => self.s2_p3,
            ScoreField::S2P4 => self.s2_p4,
            ScoreField::S2Exam => self.s2_exam,
        }
    }

    pub fn set(&mut self, field: ScoreField, value: Option<Decimal>) {
        let slot = match field {
            ScoreField::S1P1 => &mut self.s1_p1,
            ScoreField::S1P2 => &mut self.s1_p2,
            ScoreField::S1Exam => &mut self.s1_exam,
            ScoreField::S2P3 => &mut self.s2_p3,
            ScoreField::S2P4 => &mut self.s2_p4,
            ScoreField::S2Exam => &mut self.s2_exam,
        };
        *slot = value;
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for f in ScoreField::ALL {
            out.insert(f.key().to_string(), json!(self.get(f)));
        }
        serde_json::Value::Object(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinTotals {
    pub total_s1: Decimal,
    pub total_s2: Decimal,
    pub total_general: Decimal,
}

/// Per-field validation messages, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{} score field(s) rejected", .0.len())]
pub struct FieldErrors(pub BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn insert(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(|s| s.as_str())
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!(self.0)
    }
}

/// Checks that `value` fits the storage precision.
pub fn check_scale(value: Decimal) -> Result<Decimal, String> {
    let normalized = value.normalize();
    if normalized.scale() > SCORE_SCALE {
        return Err(format!("at most {} decimal places", SCORE_SCALE));
    }
    Ok(normalized)
}

pub fn validate(raw: &RawScores, period_max: u32) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::default();
    for field in ScoreField::ALL {
        let Some(v) = raw.get(field) else {
            continue;
        };
        let bound = field.bound(period_max);
        if v < Decimal::ZERO || v > bound {
            let kind = if field.is_exam() { "exam max" } else { "period max" };
            errors.insert(
                field.key(),
                format!("must be between 0 and {} ({})", bound, kind),
            );
            continue;
        }
        if let Err(msg) = check_scale(v) {
            errors.insert(field.key(), msg);
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Semester and general totals. Ungraded fields count as zero.
pub fn compute_totals(raw: &RawScores) -> BulletinTotals {
    let d = |v: Option<Decimal>| v.unwrap_or(Decimal::ZERO);
    let total_s1 = (d(raw.s1_p1) + d(raw.s1_p2) + d(raw.s1_exam)).round_dp(SCORE_SCALE);
    let total_s2 = (d(raw.s2_p3) + d(raw.s2_p4) + d(raw.s2_exam)).round_dp(SCORE_SCALE);
    BulletinTotals {
        total_s1,
        total_s2,
        total_general: total_s1 + total_s2,
    }
}

pub fn aggregate(raw: &RawScores, period_max: u32) -> Result<BulletinTotals, FieldErrors> {
    validate(raw, period_max)?;
    Ok(compute_totals(raw))
}
