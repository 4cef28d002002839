use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::bulk::DEFAULT_MAX_ROWS_PER_SHEET;

#[derive(Parser, Debug, Clone)]
#[command(name = "educonnectd")]
#[command(about = "School-community records sidecar speaking JSON lines over stdio")]
pub struct Config {
    /// Workspace directory to open at startup
    #[arg(long, env = "EDUCONNECTD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log filter, e.g. `info` or `educonnectd=debug`
    #[arg(long = "log", env = "EDUCONNECTD_LOG", default_value = "info")]
    pub log_filter: String,

    /// Row limit for each sheet of a bulk upload
    #[arg(long, env = "EDUCONNECTD_BULK_MAX_ROWS", default_value_t = DEFAULT_MAX_ROWS_PER_SHEET)]
    pub bulk_max_rows: usize,
}

/// Logs go to stderr; stdout carries the protocol.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_flags() {
        let cfg = Config::try_parse_from(["educonnectd"]).expect("parse");
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.bulk_max_rows, DEFAULT_MAX_ROWS_PER_SHEET);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "educonnectd",
            "--workspace",
            "/tmp/ws",
            "--log",
            "debug",
            "--bulk-max-rows",
            "10",
        ])
        .expect("parse");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.log_filter, "debug");
        assert_eq!(cfg.bulk_max_rows, 10);
    }
}
