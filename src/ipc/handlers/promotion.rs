use rusqlite::Connection;
use serde_json::Value;

use crate::config::EngineSettings;
use crate::ipc::helpers::{get_optional_str, get_required_str, to_result, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::promotion::{preview_promotion, run_promotion};

fn load_settings(conn: &Connection) -> Result<EngineSettings, HandlerErr> {
    EngineSettings::load(conn).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn promotion_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let academic_year = get_optional_str(params, "academicYear")?;
    let settings = load_settings(conn)?;
    let preview = preview_promotion(conn, &class_id, academic_year.as_deref(), &settings)?;
    to_result(&preview)
}

fn promotion_run(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let academic_year = get_optional_str(params, "academicYear")?;
    let settings = load_settings(conn)?;
    let report = run_promotion(conn, &class_id, academic_year.as_deref(), &settings)?;
    to_result(&report)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "promotion.preview" => Some(with_db(state, req, promotion_preview)),
        "promotion.run" => Some(with_db(state, req, promotion_run)),
        _ => None,
    }
}
