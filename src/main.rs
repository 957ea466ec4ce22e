mod codec;
mod config;
mod error;
mod hub;
mod routes;
mod session;
mod upstream;
mod utils {
    pub mod greet;
    pub mod sound;
}

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    codec::Pacing,
    config::Config,
    hub::Hub,
    upstream::BridgeConnector,
};
use error::AppErr;

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Arc::new(Config::from_env()?);
    let hub = Hub::new();
    let connector = Arc::new(BridgeConnector::new(&cfg.bridge_url)?);
    let pacing = Pacing { like_interval: cfg.like_interval, like_burst_max: cfg.like_burst_max };
    let sessions = session::spawn(connector, hub.clone(), pacing);

    let app = routes::app(cfg.clone(), hub, sessions);

    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    info!(static_dir = %cfg.static_dir.display(), bridge = %cfg.bridge_url, "listening on http://{}", cfg.addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
