use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    codec::{self, OutboundMessage, Pacing},
    error::UpstreamError,
    hub::Hub,
    upstream::{LiveConnector, LiveEvent, LiveFeed},
};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Live,
}

/// Why a session left the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Ended,
    Failed,
    Replaced,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id:        SessionId,
    pub unique_id: String,
    pub state:     SessionState,
}

enum Command {
    Connect  { username: String },
    Snapshot { resp: oneshot::Sender<Option<Snapshot>> },
}

struct Handshake {
    id:     SessionId,
    result: Result<LiveFeed, UpstreamError>,
}

enum Link {
    Connecting(JoinHandle<()>),
    Live(LiveFeed),
}

struct UpstreamSession {
    id:        SessionId,
    unique_id: String,
    state:     SessionState,
    link:      Link,
}

impl UpstreamSession {
    async fn release(self, why: Exit) {
        info!(session = self.id, unique_id = %self.unique_id, ?why, "upstream session released");
        match self.link {
            Link::Connecting(task) => {
                task.abort();
                // wait for the aborted handshake to be dropped before anything new starts
                let _ = task.await;
            }
            Link::Live(feed) => drop(feed),
        }
    }
}

/* ------------ 對外把手 ------------ */
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Last request wins. `false` only if the manager is gone.
    pub fn connect(&self, username: impl Into<String>) -> bool {
        self.tx.send(Command::Connect { username: username.into() }).is_ok()
    }

    pub async fn snapshot(&self) -> Option<Snapshot> {
        let (resp, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot { resp }).ok()?;
        rx.await.ok().flatten()
    }
}

pub fn spawn(connector: Arc<dyn LiveConnector>, hub: Arc<Hub>, pacing: Pacing) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (hs_tx, hs_rx) = mpsc::unbounded_channel();
    let mgr = SessionManager {
        connector, hub, pacing,
        slot:    None,
        next_id: 0,
        rng:     StdRng::from_entropy(),
        hs_tx,
    };
    // subscribe before returning so no drop to zero can slip past the actor
    let emptied = mgr.hub.watch_emptied();
    tokio::spawn(mgr.run(rx, hs_rx, emptied));
    SessionHandle { tx }
}

struct SessionManager {
    connector: Arc<dyn LiveConnector>,
    hub:       Arc<Hub>,
    pacing:    Pacing,
    slot:      Option<UpstreamSession>,
    next_id:   SessionId,
    rng:       StdRng,
    hs_tx:     mpsc::UnboundedSender<Handshake>,
}

impl SessionManager {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut hs_rx:  mpsc::UnboundedReceiver<Handshake>,
        mut emptied: watch::Receiver<u64>,
    ) {
        debug!("session manager start");
        let mut watching = true;

        loop {
            tokio::select! {
                // idle first: a connect sent after the drop to zero must not be torn down
                biased;
                changed = emptied.changed(), if watching => match changed {
                    Ok(()) => self.on_no_viewers().await,
                    Err(_) => watching = false,
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect { username }) => self.request_session(username).await,
                    Some(Command::Snapshot { resp }) => { let _ = resp.send(self.snapshot()); }
                    None => break,
                },
                Some(hs) = hs_rx.recv() => self.on_handshake(hs).await,
                ev = next_event(&mut self.slot) => self.on_upstream(ev).await,
            }
        }

        if let Some(s) = self.slot.take() {
            s.release(Exit::Abandoned).await;
        }
        debug!("session manager end");
    }

    fn snapshot(&self) -> Option<Snapshot> {
        self.slot.as_ref().map(|s| Snapshot { id: s.id, unique_id: s.unique_id.clone(), state: s.state })
    }

    async fn request_session(&mut self, username: String) {
        if self.hub.client_count() == 0 {
            debug!(unique_id = %username, "connect request from a viewer who already left");
            return;
        }
        if let Some(old) = self.slot.take() {
            info!(from = %old.unique_id, to = %username, "replacing upstream session");
            old.release(Exit::Replaced).await;
        }

        self.next_id += 1;
        let id = self.next_id;
        let connector = Arc::clone(&self.connector);
        let hs_tx = self.hs_tx.clone();
        let name = username.clone();
        let task = tokio::spawn(async move {
            let result = connector.connect(&name).await;
            let _ = hs_tx.send(Handshake { id, result });
        });

        info!(session = id, unique_id = %username, "connecting upstream");
        self.slot = Some(UpstreamSession {
            id,
            unique_id: username,
            state:     SessionState::Connecting,
            link:      Link::Connecting(task),
        });
    }

    async fn on_handshake(&mut self, Handshake { id, result }: Handshake) {
        let current = matches!(&self.slot, Some(s) if s.id == id && s.state == SessionState::Connecting);
        if !current {
            debug!(session = id, "stale handshake result dropped");
            return;
        }

        match result {
            Ok(feed) => {
                let Some(s) = self.slot.as_mut() else { return };
                info!(session = id, unique_id = %s.unique_id, room = feed.room_id().unwrap_or("?"), "upstream live");
                s.state = SessionState::Live;
                s.link  = Link::Live(feed);
                let msg = OutboundMessage::connected(&s.unique_id);
                self.hub.broadcast(&msg).await;
            }
            Err(e) => {
                let Some(s) = self.slot.take() else { return };
                error!(session = id, unique_id = %s.unique_id, error = %e, "upstream handshake failed");
                let msg = OutboundMessage::connect_failed(&s.unique_id);
                s.release(Exit::Failed).await;
                self.hub.broadcast(&msg).await;
            }
        }
    }

    async fn on_no_viewers(&mut self) {
        if let Some(s) = self.slot.take() {
            info!(unique_id = %s.unique_id, "no viewers left");
            s.release(Exit::Abandoned).await;
        }
    }

    /// `None` means the feed closed under us.
    async fn on_upstream(&mut self, ev: Option<LiveEvent>) {
        match ev {
            None | Some(LiveEvent::Disconnected) => self.end_stream(None).await,
            Some(LiveEvent::StreamEnd { action_id }) => self.end_stream(action_id).await,
            Some(LiveEvent::Error { message }) => {
                warn!(error = %message, "upstream reported an error");
                self.hub.broadcast(&OutboundMessage::Error { message }).await;
            }
            Some(ev) => self.dispatch(&ev).await,
        }
    }

    async fn end_stream(&mut self, action_id: Option<i64>) {
        if let Some(s) = self.slot.take() {
            info!(unique_id = %s.unique_id, ?action_id, "stream ended");
            s.release(Exit::Ended).await;
            self.hub.broadcast(&OutboundMessage::StreamEnd).await;
        }
    }

    async fn dispatch(&mut self, ev: &LiveEvent) {
        let frames = match codec::translate(ev, &mut self.rng, self.pacing) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "dropping incomplete upstream event");
                return;
            }
        };
        debug!(kind = ev.kind(), frames = frames.len(), "upstream event");

        let mut deferred = Vec::new();
        for f in frames {
            match f.delay {
                None        => { self.hub.broadcast(&f.message).await; }
                Some(delay) => deferred.push((delay, f.message)),
            }
        }
        if !deferred.is_empty() {
            schedule(Arc::clone(&self.hub), deferred);
        }
    }
}

async fn next_event(slot: &mut Option<UpstreamSession>) -> Option<LiveEvent> {
    match slot {
        Some(UpstreamSession { link: Link::Live(feed), .. }) => feed.next().await,
        _ => std::future::pending().await,
    }
}

/// Fire-and-forget paced sends. Holds only the hub, never session state.
fn schedule(hub: Arc<Hub>, frames: Vec<(Duration, OutboundMessage)>) {
    let start = Instant::now();
    tokio::spawn(async move {
        for (delay, msg) in frames {
            sleep_until(start + delay).await;
            hub.broadcast(&msg).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hub::ClientRx,
        upstream::{fake::FakeConnector, ChatEvent, LikeEvent, UserEvent},
    };
    use serde_json::{json, Value};
    use tokio::time::timeout;

    struct Rig {
        conn:   Arc<FakeConnector>,
        hub:    Arc<Hub>,
        handle: SessionHandle,
    }

    fn rig() -> Rig {
        let conn = Arc::new(FakeConnector::default());
        let hub = Hub::new();
        let handle = spawn(conn.clone(), hub.clone(), Pacing::default());
        Rig { conn, hub, handle }
    }

    async fn wait_for(h: &SessionHandle, want: Option<(&str, SessionState)>) {
        timeout(Duration::from_secs(5), async {
            loop {
                let s = h.snapshot().await;
                if s.as_ref().map(|s| (s.unique_id.as_str(), s.state)) == want { return; }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session state not reached");
    }

    async fn next_msg(rx: &mut ClientRx) -> Value {
        let raw = timeout(Duration::from_secs(5), rx.recv()).await.expect("no message").expect("hub gone");
        serde_json::from_str(&raw).unwrap()
    }

    fn chat(comment: &str) -> LiveEvent {
        LiveEvent::Chat(ChatEvent { unique_id: Some("viewer".into()), comment: Some(comment.into()), ..Default::default() })
    }

    #[tokio::test]
    async fn connect_goes_live_and_relays_events() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;

        assert!(r.handle.connect("alice"));
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
        assert_eq!(next_msg(&mut rx).await, json!({
            "type": "connection-status", "status": "success", "message": "Terhubung ke @alice",
        }));

        r.conn.feed("alice").unwrap().send(chat("5")).await.unwrap();
        assert_eq!(next_msg(&mut rx).await["type"], "chat");
        assert_eq!(next_msg(&mut rx).await, json!({"type": "play-sound", "sound": "sounds/5.mp3"}));
    }

    #[tokio::test]
    async fn failed_handshake_broadcasts_and_goes_idle() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;

        r.handle.connect("offline_user");
        let msg = next_msg(&mut rx).await;
        assert_eq!(msg["type"], "connection-failed");
        assert!(msg["message"].as_str().unwrap().contains("@offline_user"));
        wait_for(&r.handle, None).await;
    }

    #[tokio::test]
    async fn replacing_a_live_session_detaches_it_first() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;

        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
        let _ = next_msg(&mut rx).await;
        let alice = r.conn.feed("alice").unwrap();

        r.handle.connect("slow_bob");
        wait_for(&r.handle, Some(("slow_bob", SessionState::Connecting))).await;
        assert!(alice.is_closed());
        assert!(alice.send(chat("from alice")).await.is_err());

        r.conn.release();
        wait_for(&r.handle, Some(("slow_bob", SessionState::Live))).await;
        let msg = next_msg(&mut rx).await;
        assert_eq!(msg["message"], "Terhubung ke @slow_bob");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_request_wins_while_connecting() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;

        r.handle.connect("slow_a");
        wait_for(&r.handle, Some(("slow_a", SessionState::Connecting))).await;
        r.handle.connect("carol");
        wait_for(&r.handle, Some(("carol", SessionState::Live))).await;

        // the abandoned handshake never produced a feed
        r.conn.release();
        tokio::task::yield_now().await;
        assert!(r.conn.feed("slow_a").is_none());
        assert_eq!(next_msg(&mut rx).await["message"], "Terhubung ke @carol");
        wait_for(&r.handle, Some(("carol", SessionState::Live))).await;
    }

    #[tokio::test]
    async fn at_most_one_session_across_many_requests() {
        let r = rig();
        let (_id, _rx) = r.hub.register().await;
        for name in ["a", "b", "offline_c", "d", "e"] {
            r.handle.connect(name);
        }
        wait_for(&r.handle, Some(("e", SessionState::Live))).await;
        let open: Vec<_> = ["a", "b", "d", "e"].iter()
            .filter_map(|n| r.conn.feed(n))
            .filter(|tx| !tx.is_closed())
            .collect();
        assert_eq!(open.len(), 1);
        assert!(!r.conn.feed("e").unwrap().is_closed());
    }

    #[tokio::test]
    async fn last_viewer_leaving_tears_down() {
        let r = rig();
        let (id, _rx) = r.hub.register().await;
        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;

        r.hub.unregister(id).await;
        wait_for(&r.handle, None).await;
        assert!(r.conn.feed("alice").unwrap().is_closed());
    }

    #[tokio::test]
    async fn overlay_refresh_still_tears_down() {
        let r = rig();
        let (first, _rx) = r.hub.register().await;
        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;

        // leave and rejoin before the manager gets a turn
        r.hub.unregister(first).await;
        let (_second, _rx2) = r.hub.register().await;
        wait_for(&r.handle, None).await;
        assert!(r.conn.feed("alice").unwrap().is_closed());
    }

    #[tokio::test]
    async fn last_viewer_leaving_aborts_a_pending_handshake() {
        let r = rig();
        let (id, _rx) = r.hub.register().await;
        r.handle.connect("slow_x");
        wait_for(&r.handle, Some(("slow_x", SessionState::Connecting))).await;

        r.hub.unregister(id).await;
        wait_for(&r.handle, None).await;
        r.conn.release();
        tokio::task::yield_now().await;
        assert!(r.conn.feed("slow_x").is_none());
        assert!(r.handle.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn connect_without_viewers_is_dropped() {
        let r = rig();
        r.handle.connect("alice");
        assert!(r.handle.snapshot().await.is_none());
        assert_eq!(r.conn.attempts(), 0);
    }

    #[tokio::test]
    async fn stream_end_broadcasts_and_goes_idle() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;
        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
        let _ = next_msg(&mut rx).await;

        r.conn.feed("alice").unwrap().send(LiveEvent::StreamEnd { action_id: Some(3) }).await.unwrap();
        assert_eq!(next_msg(&mut rx).await, json!({"type": "stream-end"}));
        wait_for(&r.handle, None).await;
    }

    #[tokio::test]
    async fn producer_vanishing_counts_as_disconnect() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;
        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
        let _ = next_msg(&mut rx).await;

        r.conn.vanish("alice");
        assert_eq!(next_msg(&mut rx).await, json!({"type": "stream-end"}));
        wait_for(&r.handle, None).await;
    }

    #[tokio::test]
    async fn upstream_error_is_advisory() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;
        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
        let _ = next_msg(&mut rx).await;

        let feed = r.conn.feed("alice").unwrap();
        feed.send(LiveEvent::Error { message: "rate limited".into() }).await.unwrap();
        assert_eq!(next_msg(&mut rx).await, json!({"type": "error", "message": "rate limited"}));
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
    }

    #[tokio::test]
    async fn incomplete_event_is_skipped_not_fatal() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;
        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
        let _ = next_msg(&mut rx).await;

        let feed = r.conn.feed("alice").unwrap();
        feed.send(LiveEvent::Member(UserEvent { unique_id: Some("x".into()), ..Default::default() })).await.unwrap();
        feed.send(chat("hello")).await.unwrap();
        assert_eq!(next_msg(&mut rx).await["comment"], "hello");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn like_burst_is_sent_over_time() {
        let r = rig();
        let (_id, mut rx) = r.hub.register().await;
        r.handle.connect("alice");
        wait_for(&r.handle, Some(("alice", SessionState::Live))).await;
        let _ = next_msg(&mut rx).await;

        r.conn.feed("alice").unwrap().send(LiveEvent::Like(LikeEvent {
            unique_id: Some("dan".into()), like_count: Some(3), profile_picture_url: None,
        })).await.unwrap();

        let mut at = Vec::new();
        for _ in 0..3 {
            let msg = next_msg(&mut rx).await;
            assert_eq!(msg["type"], "like");
            assert_eq!(msg["likeCount"], 3);
            at.push(Instant::now());
        }
        assert!(at.windows(2).all(|w| w[1] - w[0] >= Duration::from_millis(100)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_attempts_are_not_queued() {
        let r = rig();
        let (_id, _rx) = r.hub.register().await;
        r.handle.connect("slow_1");
        r.handle.connect("slow_2");
        r.handle.connect("zed");
        wait_for(&r.handle, Some(("zed", SessionState::Live))).await;
        assert!(r.conn.attempts() <= 3);
        assert!(r.conn.feed("slow_1").is_none() && r.conn.feed("slow_2").is_none());
    }
}
