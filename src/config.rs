use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::db;

pub const WORKSPACE_ENV: &str = "BULLETIND_WORKSPACE";
pub const ENGINE_SETTINGS_KEY: &str = "setup.engine";

/// Workspace-level engine settings, stored as JSON in the settings table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Minimum share of the class maximum, in percent, needed to pass.
    pub pass_threshold_percent: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pass_threshold_percent: Decimal::from(50),
        }
    }
}

impl EngineSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        if let Some(stored) = db::settings_get_json(conn, ENGINE_SETTINGS_KEY)? {
            // Values written by older builds may carry keys we no longer know.
            if let Some(v) = stored.get("passThresholdPercent") {
                if let Some(parsed) = parse_threshold(v) {
                    settings.pass_threshold_percent = parsed;
                }
            }
        }
        Ok(settings)
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, ENGINE_SETTINGS_KEY, &self.to_json())
    }

    pub fn to_json(&self) -> Value {
        json!({ "passThresholdPercent": self.pass_threshold_percent })
    }

    pub fn apply_patch(&mut self, patch: &Value) -> Result<(), String> {
        let Some(obj) = patch.as_object() else {
            return Err("patch must be an object".to_string());
        };
        for (key, value) in obj {
            match key.as_str() {
                "passThresholdPercent" => {
                    let Some(v) = parse_threshold(value) else {
                        return Err("passThresholdPercent must be a number between 0 and 100"
                            .to_string());
                    };
                    self.pass_threshold_percent = v;
                }
                other => return Err(format!("unknown engine setting: {}", other)),
            }
        }
        Ok(())
    }
}

fn parse_threshold(v: &Value) -> Option<Decimal> {
    let Value::Number(n) = v else {
        return None;
    };
    let d: Decimal = n.to_string().parse().ok()?;
    if d < Decimal::ZERO || d > Decimal::ONE_HUNDRED {
        return None;
    }
    Some(d)
}
