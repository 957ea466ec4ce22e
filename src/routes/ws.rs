use std::{path::Path, sync::Arc};

use axum::{
    Router, routing::get,
    extract::{ws::{WebSocketUpgrade, WebSocket, Message}, Extension},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{codec::OutboundMessage, config::Config, hub::{ClientId, Hub}, session::SessionHandle};

pub fn router() -> Router {
    Router::new()
        .route("/",   get(root))
        .route("/ws", get(ws_handler))
}

/* 同一路徑：升級請求走 WebSocket，否則給 index.html */
async fn root(
    ws: Option<WebSocketUpgrade>,
    Extension(cfg):      Extension<Arc<Config>>,
    Extension(hub):      Extension<Arc<Hub>>,
    Extension(sessions): Extension<SessionHandle>,
) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |s| viewer_ws(s, hub, sessions)),
        None     => index(&cfg.static_dir).await,
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(hub):      Extension<Arc<Hub>>,
    Extension(sessions): Extension<SessionHandle>,
) -> Response {
    ws.on_upgrade(move |s| viewer_ws(s, hub, sessions))
}

async fn index(dir: &Path) -> Response {
    match tokio::fs::read_to_string(dir.join("index.html")).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            warn!(error = %e, "index.html unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/* ---------------- per viewer ---------------- */
async fn viewer_ws(sock: WebSocket, hub: Arc<Hub>, sessions: SessionHandle) {
    let (id, mut outbox) = hub.register().await;
    info!(%id, clients = hub.client_count(), "viewer connected");

    let (mut sink, mut stream) = sock.split();
    let writer = tokio::spawn(async move {
        while let Some(json) = outbox.recv().await {
            if sink.send(Message::Text(json.to_string())).await.is_err() { break; }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(raw)) => apply(&raw, id, &hub, &sessions).await,
            Ok(Message::Close(_))  => break,
            Ok(_)                  => {}
            Err(e) => {
                warn!(%id, error = %e, "viewer socket error");
                break;
            }
        }
    }

    hub.unregister(id).await;
    writer.abort();
    info!(%id, clients = hub.client_count(), "viewer disconnected");
}

async fn apply(raw: &str, id: ClientId, hub: &Hub, sessions: &SessionHandle) {
    match control(raw) {
        Action::Connect(username) => {
            info!(%id, %username, "connect requested");
            if !sessions.connect(username) {
                warn!("session manager is gone");
            }
        }
        Action::Reply(msg) => { hub.send_to(id, &msg).await; }
        Action::Ignore => {}
    }
}

/* ---------------- 控制訊息 ---------------- */
#[derive(Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind:     String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Action {
    Connect(String),
    Reply(OutboundMessage),
    Ignore,
}

fn control(raw: &str) -> Action {
    let frame: ControlFrame = match serde_json::from_str(raw) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, raw, "malformed control frame dropped");
            return Action::Ignore;
        }
    };
    match frame.kind.as_str() {
        "connect" => {
            let name = frame.username.as_deref().unwrap_or("").trim();
            let name = name.strip_prefix('@').unwrap_or(name).trim();
            if name.is_empty() {
                Action::Reply(OutboundMessage::connect_rejected("Nama pengguna wajib diisi"))
            } else {
                Action::Connect(name.to_string())
            }
        }
        other => Action::Reply(OutboundMessage::unknown_type(other)),
    }
}
