use super::EngineError;

/// Used when neither the class nor the subject carries a base score.
pub const FALLBACK_PERIOD_MAX: u32 = 20;

/// Base scores go from 10 to 100 in steps of 10.
pub fn is_valid_period_max(value: i64) -> bool {
    (10..=100).contains(&value) && value % 10 == 0
}

/// Raw configuration rows for one (class, subject) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodMaxLookup {
    pub class_override: Option<u32>,
    pub subject_default: Option<u32>,
}

impl PeriodMaxLookup {
    /// Class override, then subject default, then the fixed fallback.
    /// Zero values are treated as unset.
    pub fn resolve(self) -> u32 {
        self.class_override
            .filter(|v| *v > 0)
            .or(self.subject_default.filter(|v| *v > 0))
            .unwrap_or(FALLBACK_PERIOD_MAX)
    }
}

/// Where period-max configuration comes from.
pub trait PeriodMaxSource {
    fn lookup(&self, class_id: Option<&str>, subject_id: &str)
        -> Result<PeriodMaxLookup, EngineError>;
}

pub struct ConfigResolver<S> {
    source: S,
}

impl<S: PeriodMaxSource> ConfigResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn period_max(&self, class_id: Option<&str>, subject_id: &str) -> Result<u32, EngineError> {
        Ok(self.source.lookup(class_id, subject_id)?.resolve())
    }
}
