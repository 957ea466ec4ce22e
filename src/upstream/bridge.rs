use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{FeedSender, LiveConnector, LiveEvent, LiveFeed};
use crate::error::{config, AppErr, UpstreamError};

type BridgeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct BridgeConnector {
    base: Url,
}

impl BridgeConnector {
    pub fn new(raw: &str) -> Result<Self, AppErr> {
        let base = Url::parse(raw).map_err(|e| config("BRIDGE_URL", e))?;
        match base.scheme() {
            "ws" | "wss" => Ok(Self { base }),
            other => Err(config("BRIDGE_URL", format!("unsupported scheme {other}"))),
        }
    }

    fn url_for(&self, unique_id: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("uniqueId", unique_id);
        url
    }
}

#[async_trait]
impl LiveConnector for BridgeConnector {
    async fn connect(&self, unique_id: &str) -> Result<LiveFeed, UpstreamError> {
        let url = self.url_for(unique_id);
        debug!(%url, "dialing bridge");
        let (mut ws, _) = connect_async(url.as_str()).await?;

        let room_id = loop {
            match ws.next().await {
                Some(Ok(Message::Text(raw))) => match decode(&raw) {
                    Ok(Frame::Connected { room_id }) => break room_id,
                    Ok(Frame::Event(LiveEvent::Error { message })) => {
                        return Err(UpstreamError::Handshake(message))
                    }
                    Ok(Frame::Event(LiveEvent::Disconnected | LiveEvent::StreamEnd { .. })) => {
                        return Err(UpstreamError::Handshake(format!("@{unique_id} is not live")))
                    }
                    Err(e) => {
                        warn!(error = %e, "undecodable bridge frame during handshake");
                        continue;
                    }
                    // Nothing else is meaningful before the room is joined.
                    Ok(_) => continue,
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(UpstreamError::Handshake("bridge closed before connecting".into()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };

        info!(unique_id, room_id = room_id.as_deref().unwrap_or("?"), "bridge connected");
        let (tx, feed) = LiveFeed::channel(room_id);
        tokio::spawn(pump(ws, tx));
        Ok(feed)
    }
}

/* ------------ 讀取迴圈：直到 feed 被丟棄或橋接關閉 ------------ */
async fn pump(mut ws: BridgeSocket, tx: FeedSender) {
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("feed released, closing bridge socket");
                let _ = ws.close(None).await;
                return;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(raw))) => match decode(&raw) {
                    Ok(Frame::Event(ev)) => {
                        if tx.send(ev).await.is_err() {
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                    Ok(Frame::Connected { .. }) => {}
                    Ok(Frame::Ignored(kind)) => debug!(kind = %kind, "ignoring bridge event"),
                    Err(e) => warn!(error = %e, "undecodable bridge frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = tx.send(LiveEvent::Disconnected).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "bridge transport failed");
                    let _ = tx.send(LiveEvent::Disconnected).await;
                    return;
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct Wire {
    event: String,
    #[serde(default)]
    data:  Value,
}

#[derive(Debug)]
enum Frame {
    Connected { room_id: Option<String> },
    Event(LiveEvent),
    Ignored(String),
}

fn decode(raw: &str) -> Result<Frame, UpstreamError> {
    let wire: Wire = serde_json::from_str(raw).map_err(|e| UpstreamError::Protocol(e.to_string()))?;
    if wire.event == "connected" {
        let room_id = wire.data.get("roomId").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        return Ok(Frame::Connected { room_id });
    }
    match LiveEvent::from_parts(&wire.event, wire.data) {
        Ok(Some(ev)) => Ok(Frame::Event(ev)),
        Ok(None)     => Ok(Frame::Ignored(wire.event)),
        Err(e)       => Err(UpstreamError::Protocol(format!("{}: {e}", wire.event))),
    }
}
