use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::helpers::{
    get_optional_bool, get_required_str, to_result, with_db, DbHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::enrollments;

fn enrollments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let rows = enrollments::list_enrollments(conn, &class_id)?;
    Ok(json!({ "enrollments": to_result(&rows)? }))
}

fn enrollments_repair(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let dry_run = get_optional_bool(params, "dryRun")?.unwrap_or(false);
    let report = enrollments::repair_enrollments(conn, dry_run)?;
    to_result(&report)
}

fn enrollments_withdraw(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_required_str(params, "classId")?;
    let row = enrollments::withdraw_enrollment(conn, &student_id, &class_id)?;
    Ok(json!({ "enrollment": to_result(&row)? }))
}

fn students_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let history = enrollments::student_history(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "history": to_result(&history)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: DbHandler = match req.method.as_str() {
        "enrollments.list" => enrollments_list,
        "enrollments.repair" => enrollments_repair,
        "enrollments.withdraw" => enrollments_withdraw,
        "students.history" => students_history,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
