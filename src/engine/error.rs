use serde_json::json;
use thiserror::Error;

use super::scores::FieldErrors;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid academic year \"{value}\"")]
    InvalidAcademicYear { value: String },

    #[error("the successor class (next class name) is not set for class \"{class_name}\"")]
    MissingNextClassName { class_name: String },

    #[error("target class \"{class_name}\" for academic year {academic_year} does not exist yet")]
    MissingTargetClass {
        class_name: String,
        academic_year: String,
    },

    #[error("class \"{class_name}\" for academic year {academic_year} does not exist yet")]
    MissingRepeatClass {
        class_name: String,
        academic_year: String,
    },

    #[error("class \"{class_name}\" belongs to academic year {class_year}, not {requested}")]
    AcademicYearMismatch {
        class_name: String,
        class_year: String,
        requested: String,
    },

    #[error(transparent)]
    InvalidScores(#[from] FieldErrors),

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    BadInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAcademicYear { .. } => "invalid_academic_year",
            Self::MissingNextClassName { .. } => "missing_next_class_name",
            Self::MissingTargetClass { .. } => "missing_target_class",
            Self::MissingRepeatClass { .. } => "missing_repeat_class",
            Self::AcademicYearMismatch { .. } => "academic_year_mismatch",
            Self::InvalidScores(_) => "validation_failed",
            Self::NotFound { .. } => "not_found",
            Self::BadInput(_) => "bad_params",
            Self::Db(_) => "db_query_failed",
        }
    }

    /// Remediation text shown to the operator next to the error message.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::InvalidAcademicYear { .. } => {
                Some("Expected two hyphen-separated years, e.g. 2025-2026.".to_string())
            }
            Self::MissingNextClassName { .. } => Some(
                "Set the next class on this class (e.g. 4ème CG for 3ème CG) before running the promotion."
                    .to_string(),
            ),
            Self::MissingTargetClass { .. } => Some(
                "Create this class for the next academic year before running the promotion."
                    .to_string(),
            ),
            Self::MissingRepeatClass { .. } => Some(
                "Create this class for the next academic year so that failing students can repeat it."
                    .to_string(),
            ),
            _ => None,
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidAcademicYear { value } => Some(json!({
                "error": self.to_string(),
                "detail": self.detail(),
                "academicYear": value,
            })),
            Self::MissingNextClassName { class_name } => Some(json!({
                "error": self.to_string(),
                "detail": self.detail(),
                "className": class_name,
            })),
            Self::MissingTargetClass {
                class_name,
                academic_year,
            }
            | Self::MissingRepeatClass {
                class_name,
                academic_year,
            } => Some(json!({
                "error": self.to_string(),
                "detail": self.detail(),
                "className": class_name,
                "academicYear": academic_year,
            })),
            Self::AcademicYearMismatch {
                class_name,
                class_year,
                requested,
            } => Some(json!({
                "error": self.to_string(),
                "className": class_name,
                "classAcademicYear": class_year,
                "academicYear": requested,
            })),
            Self::InvalidScores(fields) => Some(json!({ "fields": fields.to_json() })),
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::BadInput(_) | Self::Db(_) => None,
        }
    }

    pub fn is_promotion_blocker(&self) -> bool {
        matches!(
            self,
            Self::InvalidAcademicYear { .. }
                | Self::MissingNextClassName { .. }
                | Self::MissingTargetClass { .. }
                | Self::MissingRepeatClass { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_class_errors_name_class_and_year() {
        let e = EngineError::MissingRepeatClass {
            class_name: "3ème A".to_string(),
            academic_year: "2026-2027".to_string(),
        };
        assert_eq!(e.code(), "missing_repeat_class");
        let msg = e.to_string();
        assert!(msg.contains("3ème A"));
        assert!(msg.contains("2026-2027"));
        let details = e.details().expect("details");
        assert_eq!(details["className"], "3ème A");
        assert_eq!(details["academicYear"], "2026-2027");
        assert!(details["detail"].as_str().unwrap_or("").contains("Create"));
    }

    #[test]
    fn only_configuration_errors_block_promotion() {
        assert!(EngineError::MissingNextClassName {
            class_name: "x".into()
        }
        .is_promotion_blocker());
        assert!(!EngineError::BadInput("x".into()).is_promotion_blocker());
    }
}
