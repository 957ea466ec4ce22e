use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::CodecError,
    upstream::{ChatEvent, GiftEvent, LikeEvent, LiveEvent, UserEvent},
    utils::{greet, sound::{self, Cue}},
};

/// giftType for gifts that can be sent as a combo.
const STREAKABLE_GIFT: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    FloatingPhoto { profile_picture_url: String, user_name: String },
    #[serde(rename_all = "camelCase")]
    BigPhoto { profile_picture_url: String, user_name: String },
    PlaySound { sound: String },
    StopSound,
    TtsGreeting { greeting: String },
    #[serde(rename_all = "camelCase")]
    Chat {
        user_name: String,
        comment:   String,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_picture_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Gift {
        unique_id:    String,
        gift_name:    String,
        repeat_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        gift_picture_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Like {
        unique_id:  String,
        like_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_picture_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Follow {
        unique_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_picture_url: Option<String>,
    },
    Envelope { data: Value },
    StreamEnd,
    ConnectionStatus { status: Status, message: String },
    ConnectionFailed { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

impl OutboundMessage {
    pub fn to_json(&self) -> serde_json::Result<String> { serde_json::to_string(self) }

    pub fn connected(unique_id: &str) -> Self {
        OutboundMessage::ConnectionStatus {
            status:  Status::Success,
            message: format!("Terhubung ke @{unique_id}"),
        }
    }

    pub fn connect_failed(unique_id: &str) -> Self {
        OutboundMessage::ConnectionFailed {
            message: format!("Gagal terhubung ke @{unique_id}. Pastikan nama pengguna benar dan sedang live."),
        }
    }

    pub fn connect_rejected(reason: &str) -> Self {
        OutboundMessage::ConnectionStatus { status: Status::Error, message: reason.into() }
    }

    pub fn unknown_type(kind: &str) -> Self {
        OutboundMessage::Error { message: format!("Tipe pesan tidak dikenal: '{kind}'") }
    }
}

/// One outbound message, optionally deferred.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: OutboundMessage,
    pub delay:   Option<Duration>,
}

impl Frame {
    fn now(message: OutboundMessage) -> Self { Self { message, delay: None } }
}

#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub like_interval:  Duration,
    pub like_burst_max: u32,
}

impl Default for Pacing {
    fn default() -> Self {
        Self { like_interval: Duration::from_millis(100), like_burst_max: 100 }
    }
}

/// Interaction events only; lifecycle events (`streamEnd`, `disconnected`,
/// `error`) belong to the session and translate to nothing here.
pub fn translate<R: Rng + ?Sized>(
    event: &LiveEvent,
    rng:   &mut R,
    pacing: Pacing,
) -> Result<Vec<Frame>, CodecError> {
    match event {
        LiveEvent::Member(e)   => member(e, rng),
        LiveEvent::Gift(e)     => gift(e),
        LiveEvent::Like(e)     => like(e, pacing),
        LiveEvent::Share(e)    => share(e),
        LiveEvent::Chat(e)     => chat(e),
        LiveEvent::Follow(e)   => follow(e),
        LiveEvent::Envelope(v) => Ok(vec![Frame::now(OutboundMessage::Envelope { data: v.clone() })]),
        LiveEvent::StreamEnd { .. } | LiveEvent::Disconnected | LiveEvent::Error { .. } => Ok(Vec::new()),
    }
}

// empty strings count as missing, same as upstream payloads with blank ids
fn need<'a>(v: &'a Option<String>, kind: &'static str, field: &'static str) -> Result<&'a str, CodecError> {
    match v.as_deref() {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(CodecError::Incomplete { kind, field }),
    }
}

fn member<R: Rng + ?Sized>(e: &UserEvent, rng: &mut R) -> Result<Vec<Frame>, CodecError> {
    let id  = need(&e.unique_id, "member", "uniqueId")?;
    let pic = need(&e.profile_picture_url, "member", "profilePictureUrl")?;
    Ok(vec![
        Frame::now(OutboundMessage::FloatingPhoto { profile_picture_url: pic.into(), user_name: id.into() }),
        Frame::now(OutboundMessage::TtsGreeting { greeting: greet::greeting(rng, id) }),
    ])
}

fn gift(e: &GiftEvent) -> Result<Vec<Frame>, CodecError> {
    let id  = need(&e.unique_id, "gift", "uniqueId")?;
    let pic = need(&e.profile_picture_url, "gift", "profilePictureUrl")?;

    // combo ticks are swallowed until the streak ends
    if e.gift_type == Some(STREAKABLE_GIFT) && !e.repeat_end {
        return Ok(Vec::new());
    }
    Ok(vec![
        Frame::now(OutboundMessage::BigPhoto { profile_picture_url: pic.into(), user_name: id.into() }),
        Frame::now(OutboundMessage::Gift {
            unique_id:        id.into(),
            gift_name:        e.gift_name.clone().unwrap_or_else(|| "tidak dikenal".into()),
            repeat_count:     e.repeat_count.unwrap_or(1),
            gift_picture_url: e.gift_picture_url.clone(),
        }),
    ])
}

fn like(e: &LikeEvent, pacing: Pacing) -> Result<Vec<Frame>, CodecError> {
    let id = need(&e.unique_id, "like", "uniqueId")?;
    let count = e.like_count.unwrap_or(1);
    let burst = count.min(pacing.like_burst_max);
    if burst < count {
        debug!(unique_id = id, count, burst, "like burst clamped");
    }
    Ok((0..burst)
        .map(|i| Frame {
            message: OutboundMessage::Like {
                unique_id:           id.into(),
                like_count:          count,
                profile_picture_url: e.profile_picture_url.clone(),
            },
            delay: Some(pacing.like_interval * i),
        })
        .collect())
}

fn share(e: &UserEvent) -> Result<Vec<Frame>, CodecError> {
    let id  = need(&e.unique_id, "share", "uniqueId")?;
    let pic = need(&e.profile_picture_url, "share", "profilePictureUrl")?;
    Ok(vec![Frame::now(OutboundMessage::FloatingPhoto { profile_picture_url: pic.into(), user_name: id.into() })])
}

fn chat(e: &ChatEvent) -> Result<Vec<Frame>, CodecError> {
    let id = need(&e.unique_id, "chat", "uniqueId")?;
    let comment = e.comment.as_deref().ok_or(CodecError::Incomplete { kind: "chat", field: "comment" })?;

    let mut out = vec![Frame::now(OutboundMessage::Chat {
        user_name:           id.into(),
        comment:             comment.into(),
        profile_picture_url: e.profile_picture_url.clone(),
    })];
    match sound::resolve(comment) {
        Some(Cue::Play(path)) => out.push(Frame::now(OutboundMessage::PlaySound { sound: path.into() })),
        Some(Cue::Stop)       => out.push(Frame::now(OutboundMessage::StopSound)),
        None => {}
    }
    Ok(out)
}

fn follow(e: &UserEvent) -> Result<Vec<Frame>, CodecError> {
    let id = need(&e.unique_id, "follow", "uniqueId")?;
    Ok(vec![Frame::now(OutboundMessage::Follow {
        unique_id:           id.into(),
        profile_picture_url: e.profile_picture_url.clone(),
    })])
}
