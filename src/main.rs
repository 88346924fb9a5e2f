mod config;
mod db;
mod engine;
mod ipc;
mod logging;
mod store;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use serde_json::json;
use tracing::{info, warn};

fn main() {
    logging::init();

    let mut state = ipc::AppState::default();

    if let Some(path) = std::env::var_os(config::WORKSPACE_ENV) {
        let path = PathBuf::from(path);
        if let Err(e) = ipc::select_workspace(&mut state, path.clone()) {
            warn!(workspace = %path.display(), error = %e, "could not open workspace from environment");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "bulletind ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
