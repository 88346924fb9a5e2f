use crate::config::EngineSettings;
use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

#[derive(Clone, Copy)]
enum SetupSection {
    Engine,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "engine" => Some(Self::Engine),
            _ => None,
        }
    }
}

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let engine = EngineSettings::load(conn).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "engine": engine.to_json() }))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_raw = get_required_str(params, "section")?;
    let Some(section) = SetupSection::parse(&section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    match section {
        SetupSection::Engine => {
            let mut current = EngineSettings::load(conn).map_err(|e| HandlerErr {
                code: "db_query_failed",
                message: e.to_string(),
                details: None,
            })?;
            current.apply_patch(patch).map_err(HandlerErr::bad_params)?;
            current.save(conn).map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: None,
            })?;
            info!(
                pass_threshold_percent = %current.pass_threshold_percent,
                "engine settings updated"
            );
            Ok(json!({ "ok": true, "engine": current.to_json() }))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
