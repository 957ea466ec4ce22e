use std::{
    collections::HashMap,
    sync::{atomic::{AtomicUsize, Ordering}, Arc},
};

use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::OutboundMessage;

pub type ClientId = Uuid;
pub type ClientRx = mpsc::Receiver<Arc<str>>;

const CLIENT_QUEUE: usize = 256;

pub struct Hub {
    clients: RwLock<HashMap<ClientId, mpsc::Sender<Arc<str>>>>,
    count:   AtomicUsize,
    /* 每次人數歸零就 +1，不會被後續加入蓋掉 */
    emptied: watch::Sender<u64>,
}

impl Default for Hub {
    fn default() -> Self {
        let (emptied, _) = watch::channel(0);
        Self { clients: RwLock::default(), count: AtomicUsize::new(0), emptied }
    }
}

impl Hub {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub async fn register(&self) -> (ClientId, ClientRx) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        let id = Uuid::new_v4();
        let mut m = self.clients.write().await;
        m.insert(id, tx);
        self.count.store(m.len(), Ordering::Relaxed);
        debug!(%id, clients = m.len(), "client registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: ClientId) {
        let mut m = self.clients.write().await;
        if m.remove(&id).is_some() {
            debug!(%id, clients = m.len(), "client unregistered");
            self.settle(m.len());
        }
    }

    pub fn client_count(&self) -> usize { self.count.load(Ordering::Relaxed) }

    /// Changes once per drop to zero clients, even if someone joins right after.
    pub fn watch_emptied(&self) -> watch::Receiver<u64> { self.emptied.subscribe() }

    // caller holds the write lock
    fn settle(&self, len: usize) {
        self.count.store(len, Ordering::Relaxed);
        if len == 0 {
            self.emptied.send_modify(|n| *n += 1);
        }
    }

    /// Fan out to every open client. Returns how many queues accepted it.
    pub async fn broadcast(&self, msg: &OutboundMessage) -> usize {
        let Some(json) = encode(msg) else { return 0 };

        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let m = self.clients.read().await;
            for (id, tx) in m.iter() {
                match tx.try_send(Arc::clone(&json)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(%id, "client queue full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut m = self.clients.write().await;
            let mut pruned = false;
            for id in &dead {
                if m.remove(id).is_some() {
                    warn!(%id, "pruned closed client");
                    pruned = true;
                }
            }
            if pruned {
                self.settle(m.len());
            }
        }
        delivered
    }

    /// Unicast, for replies that concern one connection only.
    pub async fn send_to(&self, id: ClientId, msg: &OutboundMessage) -> bool {
        let Some(json) = encode(msg) else { return false };
        let m = self.clients.read().await;
        match m.get(&id) {
            Some(tx) => tx.try_send(json).is_ok(),
            None => false,
        }
    }
}

fn encode(msg: &OutboundMessage) -> Option<Arc<str>> {
    match msg.to_json() {
        Ok(s) => Some(Arc::from(s)),
        Err(e) => {
            warn!(error = %e, "failed to serialize outbound message");
            None
        }
    }
}
