mod bulk;
mod config;
mod db;
mod directory;
mod events;
mod ipc;
mod model;
mod reconcile;
mod sheets;

use clap::Parser;
use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::Config::parse();
    config::init_tracing(&cfg.log_filter);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        bulk_max_rows: cfg.bulk_max_rows,
    };

    if let Some(ws) = cfg.workspace {
        match db::open_db(&ws) {
            Ok(conn) => {
                tracing::info!(workspace = %ws.display(), "workspace opened");
                state.workspace = Some(ws);
                state.db = Some(conn);
            }
            Err(e) => tracing::error!(error = ?e, "startup workspace unavailable"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{resp}");
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
