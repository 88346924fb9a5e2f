use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

use crate::engine::EngineError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub type DbHandler = fn(&Connection, &Value) -> Result<Value, HandlerErr>;

/// Runs `f` against the workspace database and wraps the outcome in a reply.
pub fn with_db(state: &AppState, req: &Request, f: DbHandler) -> Value {
    match db_conn(state).and_then(|conn| f(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn to_result<T: Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent, null and blank strings all read as `None`.
pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

/// Reads a mark sent either as a JSON number or a numeric string.
pub fn parse_decimal(v: &Value) -> Result<Decimal, String> {
    let raw = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err("must be a number".to_string()),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| format!("not a valid number: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(_conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
        Ok(params.clone())
    }

    #[test]
    fn with_db_requires_a_workspace() {
        let mut state = AppState::default();
        let req = Request {
            id: "1".into(),
            method: "ranking.class".into(),
            params: json!({ "classId": "c" }),
        };
        let resp = with_db(&state, &req, echo);
        assert_eq!(resp["error"]["code"], "no_workspace");

        state.db = Some(crate::db::open_in_memory());
        let resp = with_db(&state, &req, echo);
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["result"]["classId"], "c");
    }
}
