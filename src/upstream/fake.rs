//! In-process connector for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{FeedSender, LiveConnector, LiveFeed};
use crate::error::UpstreamError;

/// `offline*` fails, `slow*` waits for [`FakeConnector::release`], anything else connects.
#[derive(Default)]
pub struct FakeConnector {
    feeds:    Mutex<HashMap<String, FeedSender>>,
    gate:     Notify,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn feed(&self, name: &str) -> Option<FeedSender> {
        self.feeds.lock().unwrap().get(name).cloned()
    }

    /// Drops the producer side, as if the upstream went away.
    pub fn vanish(&self, name: &str) {
        self.feeds.lock().unwrap().remove(name);
    }

    pub fn release(&self) { self.gate.notify_one(); }

    pub fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, unique_id: &str) -> Result<LiveFeed, UpstreamError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if unique_id.starts_with("offline") {
            return Err(UpstreamError::Handshake("not live".into()));
        }
        if unique_id.starts_with("slow") {
            self.gate.notified().await;
        }
        let (tx, feed) = LiveFeed::channel(Some(format!("room-{unique_id}")));
        self.feeds.lock().unwrap().insert(unique_id.to_string(), tx);
        Ok(feed)
    }
}
