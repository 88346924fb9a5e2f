use rusqlite::Connection;
use serde_json::{json, Value};

use crate::engine::scores::{FieldErrors, ScoreField};
use crate::engine::EngineError;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, parse_decimal, to_result, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::bulletins::{self, BulletinWrite};

/// Builds the write from params. Unparseable marks are reported per field,
/// the same way range errors are.
fn parse_write(params: &Value) -> Result<BulletinWrite, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let academic_year = get_required_str(params, "academicYear")?;
    let mut write = BulletinWrite::new(&student_id, &subject_id, &academic_year);
    write.class_id = get_optional_str(params, "classId")?;

    let mut errors = FieldErrors::default();
    match params.get("scores") {
        None | Some(Value::Null) => {}
        Some(Value::Object(scores)) => {
            for (key, value) in scores {
                let Some(field) = ScoreField::from_key(key) else {
                    return Err(HandlerErr::bad_params(format!("unknown score field: {}", key)));
                };
                if value.is_null() {
                    write.scores.insert(field, None);
                    continue;
                }
                match parse_decimal(value) {
                    Ok(d) => {
                        write.scores.insert(field, Some(d));
                    }
                    Err(msg) => errors.insert(field.key(), msg),
                }
            }
        }
        Some(_) => return Err(HandlerErr::bad_params("scores must be an object")),
    }

    match params.get("reclamationScore") {
        None => {}
        Some(Value::Null) => write.reclamation_score = Some(None),
        Some(v) => match parse_decimal(v) {
            Ok(d) => write.reclamation_score = Some(Some(d)),
            Err(msg) => errors.insert("reclamation_score", msg),
        },
    }
    match params.get("reclamationPassed") {
        None => {}
        Some(Value::Null) => write.reclamation_passed = Some(None),
        Some(Value::Bool(b)) => write.reclamation_passed = Some(Some(*b)),
        Some(_) => return Err(HandlerErr::bad_params("reclamationPassed must be boolean")),
    }

    if !errors.is_empty() {
        return Err(EngineError::from(errors).into());
    }
    Ok(write)
}

fn bulletins_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let write = parse_write(params)?;
    let saved = bulletins::upsert_bulletin(conn, &write)?;
    to_result(&saved)
}

fn bulletins_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let academic_year = get_required_str(params, "academicYear")?;
    let class_id = get_optional_str(params, "classId")?;
    let rows = bulletins::get_bulletins(conn, &student_id, &academic_year, class_id.as_deref())?;
    Ok(json!({ "bulletins": to_result(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "bulletins.upsert" => Some(with_db(state, req, bulletins_upsert)),
        "bulletins.get" => Some(with_db(state, req, bulletins_get)),
        _ => None,
    }
}
