use axum::{http::StatusCode, response::IntoResponse};
use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;

/* ── HTTP / 啟動錯誤 ── */
#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config: {0}")]
    Config(String),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let code = match &self {
            AppErr::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, self.to_string()).into_response()
    }
}

pub fn config<E: Display>(key: &str, e: E) -> AppErr {
    AppErr::Config(format!("{key}: {e}"))
}

/* ── 上游訂閱邊界 ── */
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    /// The broadcast refused the subscription (offline, unknown user, bridge said no).
    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol: {0}")]
    Protocol(String),
}

/* ── 單一事件欄位不足 ── */
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("{kind} event without {field}")]
    Incomplete { kind: &'static str, field: &'static str },
}
