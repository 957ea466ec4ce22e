pub mod bridge;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::UpstreamError;

pub use bridge::BridgeConnector;

#[async_trait]
pub trait LiveConnector: Send + Sync + 'static {
    /// Subscribe to `unique_id` and wait for the handshake. Resolves exactly once.
    async fn connect(&self, unique_id: &str) -> Result<LiveFeed, UpstreamError>;
}

pub type FeedSender = mpsc::Sender<LiveEvent>;

pub struct LiveFeed {
    room_id: Option<String>,
    events:  mpsc::Receiver<LiveEvent>,
}

impl LiveFeed {
    const CAPACITY: usize = 256;

    pub fn channel(room_id: Option<String>) -> (FeedSender, Self) {
        let (tx, events) = mpsc::channel(Self::CAPACITY);
        (tx, Self { room_id, events })
    }

    pub fn room_id(&self) -> Option<&str> { self.room_id.as_deref() }

    /// `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<LiveEvent> { self.events.recv().await }
}

/* ------------ 上游事件（欄位皆可缺，由 codec 驗證） ------------ */

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub unique_id:           Option<String>,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftEvent {
    pub unique_id:           Option<String>,
    pub profile_picture_url: Option<String>,
    pub gift_name:           Option<String>,
    /// `1` marks a streakable (combo) gift.
    pub gift_type:           Option<i64>,
    pub repeat_count:        Option<u32>,
    #[serde(default)]
    pub repeat_end:          bool,
    pub gift_picture_url:    Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeEvent {
    pub unique_id:           Option<String>,
    pub profile_picture_url: Option<String>,
    pub like_count:          Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub unique_id:           Option<String>,
    pub profile_picture_url: Option<String>,
    pub comment:             Option<String>,
}

#[derive(Debug, Clone)]
pub enum LiveEvent {
    Member(UserEvent),
    Gift(GiftEvent),
    Like(LikeEvent),
    Share(UserEvent),
    Chat(ChatEvent),
    Follow(UserEvent),
    Envelope(Value),
    StreamEnd { action_id: Option<i64> },
    Disconnected,
    Error { message: String },
}

impl LiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::Member(_)        => "member",
            LiveEvent::Gift(_)          => "gift",
            LiveEvent::Like(_)          => "like",
            LiveEvent::Share(_)         => "share",
            LiveEvent::Chat(_)          => "chat",
            LiveEvent::Follow(_)        => "follow",
            LiveEvent::Envelope(_)      => "envelope",
            LiveEvent::StreamEnd { .. } => "streamEnd",
            LiveEvent::Disconnected     => "disconnected",
            LiveEvent::Error { .. }     => "error",
        }
    }

    /// Decode one `{event, data}` pair. `Ok(None)` for kinds this relay ignores.
    pub fn from_parts(event: &str, data: Value) -> Result<Option<Self>, serde_json::Error> {
        let data = if data.is_null() { Value::Object(Default::default()) } else { data };
        let ev = match event {
            "member"       => LiveEvent::Member(serde_json::from_value(data)?),
            "gift"         => LiveEvent::Gift(serde_json::from_value(data)?),
            "like"         => LiveEvent::Like(serde_json::from_value(data)?),
            "share"        => LiveEvent::Share(serde_json::from_value(data)?),
            "chat"         => LiveEvent::Chat(serde_json::from_value(data)?),
            "follow"       => LiveEvent::Follow(serde_json::from_value(data)?),
            "envelope"     => LiveEvent::Envelope(data),
            "streamEnd"    => LiveEvent::StreamEnd {
                action_id: data.get("actionId").and_then(Value::as_i64),
            },
            "disconnected" => LiveEvent::Disconnected,
            "error"        => LiveEvent::Error {
                message: data.get("message").and_then(Value::as_str)
                    .unwrap_or("unknown upstream error").to_string(),
            },
            _ => return Ok(None),
        };
        Ok(Some(ev))
    }
}
