use std::path::PathBuf;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::ipc::error::err;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub bulk_max_rows: usize,
}

/// Decodes `params` into a typed payload, or the `bad_params` response.
pub fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, serde_json::Value> {
    serde_json::from_value(req.params.clone())
        .map_err(|e| err(&req.id, "bad_params", e.to_string(), None))
}
