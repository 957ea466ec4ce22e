use std::{io::ErrorKind, path::Path, sync::Arc};

use axum::{routing::get, Router, Extension, Json};
use serde_json::{json, Value};
use tokio::fs;

use crate::{
    config::Config,
    error::AppResult,
    hub::Hub,
    session::SessionHandle,
};

pub fn router() -> Router {
    Router::new()
        .route("/sounds",      get(sounds))
        .route("/backgrounds", get(backgrounds))
        .route("/status",      get(status))
}

async fn sounds(Extension(cfg): Extension<Arc<Config>>) -> AppResult<Json<Vec<String>>> {
    list(&cfg.static_dir, "sounds", "audio").await.map(Json)
}

async fn backgrounds(Extension(cfg): Extension<Arc<Config>>) -> AppResult<Json<Vec<String>>> {
    list(&cfg.static_dir, "bg", "image").await.map(Json)
}

async fn status(
    Extension(hub):      Extension<Arc<Hub>>,
    Extension(sessions): Extension<SessionHandle>,
) -> Json<Value> {
    Json(json!({
        "clients": hub.client_count(),
        "session": sessions.snapshot().await,
    }))
}

/// Files directly under `root/sub` whose guessed mime type is `kind/*`, as
/// `sub/<name>` paths the overlay can fetch. A missing directory is empty.
pub async fn list(root: &Path, sub: &str, kind: &str) -> AppResult<Vec<String>> {
    let mut rd = match fs::read_dir(root.join(sub)).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut out = Vec::new();
    while let Some(ent) = rd.next_entry().await? {
        if !ent.file_type().await?.is_file() { continue; }
        let name = ent.file_name().to_string_lossy().into_owned();
        let hit = mime_guess::from_path(&name).iter().any(|m| m.type_().as_str() == kind);
        if hit { out.push(format!("{sub}/{name}")); }
    }
    out.sort();
    Ok(out)
}
