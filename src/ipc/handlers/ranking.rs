use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::helpers::{get_optional_str, get_required_str, to_result, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::catalog::load_class;
use crate::store::ranking::compute_class_ranking;

fn ranking_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class = load_class(conn, &class_id)?;
    let academic_year = get_optional_str(params, "academicYear")?.unwrap_or(class.academic_year);
    let ranking = compute_class_ranking(conn, &class_id, &academic_year)?;
    Ok(json!({
        "classId": class_id,
        "className": class.name,
        "academicYear": academic_year,
        "totalMax": ranking.total_max,
        "results": to_result(&ranking.results)?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "ranking.class" => Some(with_db(state, req, ranking_class)),
        _ => None,
    }
}
