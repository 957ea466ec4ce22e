use std::sync::Arc;

use axum::{Extension, Router};
use tower_http::services::ServeDir;

use crate::{config::Config, hub::Hub, session::SessionHandle};

pub mod media;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .merge(ws::router())
        .nest("/api", media::router())
}

/// Routes plus static overlay assets, with shared state attached.
pub fn app(cfg: Arc<Config>, hub: Arc<Hub>, sessions: SessionHandle) -> Router {
    router()
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(Extension(hub))
        .layer(Extension(sessions))
        .layer(Extension(cfg))
}
