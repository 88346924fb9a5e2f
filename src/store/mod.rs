//! SQLite-backed loading and writing around the engine.

pub mod bulletins;
pub mod catalog;
pub mod enrollments;
pub mod promotion;
pub mod ranking;

use rusqlite::types::Type;
use rusqlite::Row;
use rust_decimal::Decimal;
use std::str::FromStr;

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn get_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Decimal::from_str(s.trim())
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn get_decimal_or_zero(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    Ok(get_decimal(row, idx)?.unwrap_or(Decimal::ZERO))
}

pub(crate) fn decimal_to_sql(v: Option<Decimal>) -> Option<String> {
    v.map(|d| d.round_dp(2).to_string())
}
