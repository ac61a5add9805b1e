use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use isk_proto::{display_channel, OutboundFrame};
use isk_server::auth::TokenAuthority;
use isk_server::catalog::Catalog;
use isk_server::registry::{Display, DisplayRegistry};
use isk_server::slide::{ImageSlide, SlideContent};
use isk_server::store::{DisplayStore, MemoryStore};
use isk_server::{AppState, ConnectionState, Session, SyncService};

struct Client {
    session: Session,
    rx: mpsc::Receiver<OutboundFrame>,
    pending: Vec<OutboundFrame>,
    next_id: u64,
}

impl Client {
    fn connect(sync: &SyncService) -> Self {
        let connection = sync.channel.connect();
        Self {
            session: Session::new(connection.id, None),
            rx: connection.receiver,
            pending: Vec::new(),
            next_id: 1,
        }
    }

    /// Send an event and return its reply; everything else received in the
    /// meantime is left in the queue.
    async fn request(&mut self, sync: &SyncService, event: &str, data: Value) -> OutboundFrame {
        let id = self.next_id;
        self.next_id += 1;
        let text = json!({ "event": event, "id": id, "data": data }).to_string();
        sync.handle_text(&mut self.session, &text).await;
        let mut others = Vec::new();
        let mut reply = None;
        while let Ok(frame) = self.rx.try_recv() {
            if frame.id == Some(id) && frame.channel.is_none() {
                reply = Some(frame);
            } else {
                others.push(frame);
            }
        }
        self.pending.extend(others);
        reply.expect("no reply for request")
    }

    fn broadcasts(&mut self) -> Vec<OutboundFrame> {
        while let Ok(frame) = self.rx.try_recv() {
            self.pending.push(frame);
        }
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|frame| frame.channel.is_some())
            .collect()
    }
}

/// Let the timer and override pump tasks run.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn state() -> AppState {
    let catalog = Catalog::new();
    catalog.create_event("Assembly");
    AppState::new(
        DisplayRegistry::new(Arc::new(MemoryStore::new())),
        catalog,
        32,
        TokenAuthority::default(),
    )
}

async fn hello(sync: &SyncService, client: &mut Client, name: &str) -> u64 {
    let reply = client
        .request(sync, "iskdpy.hello", json!({ "display_name": name }))
        .await;
    assert_eq!(reply.success, Some(true));
    reply.data["display_id"].as_u64().unwrap()
}

#[tokio::test]
async fn hello_returns_roster_with_the_caller() {
    let state = state();
    let sync = &state.sync;
    let mut lobby = Client::connect(sync);
    let mut stage = Client::connect(sync);

    let lobby_id = hello(sync, &mut lobby, "lobby").await;
    let reply = stage
        .request(sync, "iskdpy.hello", json!({ "display_name": "stage" }))
        .await;
    let displays = reply.data["displays"].as_array().unwrap();
    assert_eq!(displays.len(), 2);
    assert!(displays
        .iter()
        .any(|d| d["id"] == lobby_id && d["connected"] == true && d["name"] == "lobby"));
    assert_eq!(stage.session.state, ConnectionState::Synced(reply.data["display_id"].as_u64().unwrap()));

    // same identity, no duplicate
    let mut again = Client::connect(sync);
    assert_eq!(hello(sync, &mut again, "lobby").await, lobby_id);
    assert_eq!(sync.registry.len(), 2);
}

#[tokio::test]
async fn goto_and_current_slide_fan_out() {
    let state = state();
    let sync = &state.sync;
    let mut display = Client::connect(sync);
    let mut ui = Client::connect(sync);
    let id = hello(sync, &mut display, "lobby").await;
    ui.request(sync, "subscribe", json!({ "channel": display_channel(id) }))
        .await;

    let reply = ui
        .request(sync, "iskdpy.goto_slide", json!({ "display_id": id, "slide_id": 7 }))
        .await;
    assert_eq!(reply.success, Some(true));
    let received = display.broadcasts();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event, "goto_slide");
    assert_eq!(received[0].data, json!({ "display_id": id, "slide_id": 7 }));
    ui.broadcasts();

    let payload = json!({ "display_id": id, "group_id": 2, "slide_id": 7 });
    let reply = display
        .request(sync, "iskdpy.current_slide", payload.clone())
        .await;
    assert_eq!(reply.success, Some(true));
    let stored = sync.registry.get(id).unwrap();
    assert_eq!(stored.current_group_id, Some(2));
    assert_eq!(stored.current_slide_id, Some(7));

    let seen = ui.broadcasts();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event, "current_slide");
    assert_eq!(seen[0].channel.as_deref(), Some(display_channel(id).as_str()));
    assert_eq!(seen[0].data, payload);
}

#[tokio::test]
async fn override_report_keeps_last_normal_slide() {
    let state = state();
    let sync = &state.sync;
    let mut display = Client::connect(sync);
    let id = hello(sync, &mut display, "lobby").await;

    display
        .request(
            sync,
            "iskdpy.current_slide",
            json!({ "display_id": id, "group_id": 2, "slide_id": 7 }),
        )
        .await;
    display
        .request(
            sync,
            "iskdpy.current_slide",
            json!({ "display_id": id, "override_queue_id": 99 }),
        )
        .await;
    let stored = sync.registry.get(id).unwrap();
    assert_eq!(stored.override_queue_id, Some(99));
    assert_eq!(stored.current_slide_id, Some(7));

    display
        .request(
            sync,
            "iskdpy.current_slide",
            json!({ "display_id": id, "group_id": 3, "slide_id": 8 }),
        )
        .await;
    let stored = sync.registry.get(id).unwrap();
    assert_eq!(stored.override_queue_id, None);
    assert_eq!(stored.current_group_id, Some(3));
}

#[tokio::test(start_paused = true)]
async fn goto_is_rejected_while_an_override_runs() {
    let state = state();
    let sync = &state.sync;
    let mut display = Client::connect(sync);
    let mut ui = Client::connect(sync);
    let id = hello(sync, &mut display, "lobby").await;

    let slide = sync
        .catalog
        .create_slide(
            "sponsor",
            SlideContent::Image(ImageSlide {
                filename: "sponsor.png".into(),
            }),
        )
        .unwrap();
    sync.catalog.mark_ready(slide.id).unwrap();
    let entry = sync
        .enqueue_override(id, slide.id, Duration::from_secs(5))
        .unwrap();
    settle().await;

    let started = display.broadcasts();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].event, "override");
    assert_eq!(started[0].data["override_queue_id"], entry.id);
    assert_eq!(started[0].data["slide"]["filename"], "sponsor.png");

    let reply = ui
        .request(sync, "iskdpy.goto_slide", json!({ "display_id": id, "slide_id": 7 }))
        .await;
    assert_eq!(reply.success, Some(false));
    assert_eq!(reply.data["kind"], "override_active");
    assert!(display.broadcasts().is_empty());

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    settle().await;
    let ended = display.broadcasts();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].event, "override_ended");
    assert!(sync.overrides.current(id).is_none());

    let reply = ui
        .request(sync, "iskdpy.goto_slide", json!({ "display_id": id, "slide_id": 7 }))
        .await;
    assert_eq!(reply.success, Some(true));
    assert_eq!(display.broadcasts()[0].event, "goto_slide");
}

#[tokio::test]
async fn disconnect_and_reconnect_keep_history() {
    let store = Arc::new(MemoryStore::new());
    let catalog = Catalog::new();
    let state = AppState::new(
        DisplayRegistry::new(store.clone()),
        catalog,
        32,
        TokenAuthority::default(),
    );
    let sync = &state.sync;
    let mut display = Client::connect(sync);
    let mut ui = Client::connect(sync);
    let id = hello(sync, &mut display, "lobby").await;
    display
        .request(
            sync,
            "iskdpy.current_slide",
            json!({ "display_id": id, "group_id": 2, "slide_id": 7 }),
        )
        .await;
    ui.request(sync, "subscribe", json!({ "channel": display_channel(id) }))
        .await;

    sync.disconnect(&display.session).await;
    assert!(!sync.registry.get(id).unwrap().connected);
    assert!(!sync.channel.is_connected(display.session.connection));
    let notices = ui.broadcasts();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].event, "display_disconnected");
    assert_eq!(notices[0].data["connected"], false);

    let mut reconnected = Client::connect(sync);
    assert_eq!(hello(sync, &mut reconnected, "lobby").await, id);
    let stored = sync.registry.get(id).unwrap();
    assert!(stored.connected);
    assert_eq!(stored.current_slide_id, Some(7));
    assert_eq!(stored.current_group_id, Some(2));

    // the store saw the latest record
    let persisted = store.load_all().await.unwrap();
    assert_eq!(persisted[0].current_slide_id, Some(7));
}

#[tokio::test]
async fn registry_reload_starts_displays_offline() {
    let store = Arc::new(MemoryStore::new());
    {
        let registry = DisplayRegistry::new(store.clone());
        registry.register("lobby", Uuid::new_v4()).await;
        registry.register("stage", Uuid::new_v4()).await;
    }
    let registry = DisplayRegistry::load(store).await.unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.roster().iter().all(|d| !d.connected));
    let (third, _) = registry.register("bar", Uuid::new_v4()).await;
    assert_eq!(third.id, 3);
}

#[tokio::test]
async fn protocol_errors_reach_only_the_sender() {
    let state = state();
    let sync = &state.sync;
    let mut display = Client::connect(sync);
    let mut other = Client::connect(sync);
    let id = hello(sync, &mut display, "lobby").await;
    other
        .request(sync, "subscribe", json!({ "channel": display_channel(id) }))
        .await;

    let reply = display
        .request(sync, "svg.simple", json!({ "slide_id": 1 }))
        .await;
    assert_eq!(reply.success, Some(false));
    assert_eq!(reply.data["kind"], "protocol");
    assert!(reply.data["message"].as_str().unwrap().contains("svg.simple"));

    let reply = display
        .request(sync, "iskdpy.display_data", json!({ "display_id": 404 }))
        .await;
    assert_eq!(reply.data["kind"], "not_found");

    let reply = display.request(sync, "ping", json!({})).await;
    assert_eq!(reply.success, Some(true));

    assert!(other.broadcasts().is_empty());
}

#[tokio::test]
async fn unparseable_frames_get_an_anonymous_error() {
    let state = state();
    let sync = &state.sync;
    let mut display = Client::connect(sync);
    let mut other = Client::connect(sync);
    let id = hello(sync, &mut display, "lobby").await;
    other
        .request(sync, "subscribe", json!({ "channel": display_channel(id) }))
        .await;

    sync.handle_text(&mut display.session, "{not json").await;
    let reply = display.rx.try_recv().unwrap();
    assert_eq!(reply.event, "error");
    assert_eq!(reply.id, None);
    assert_eq!(reply.channel, None);
    assert_eq!(reply.success, Some(false));
    assert_eq!(reply.data["kind"], "protocol");
    assert!(display.rx.try_recv().is_err());

    assert!(other.rx.try_recv().is_err());
    assert!(other.broadcasts().is_empty());
}

#[tokio::test]
async fn events_for_unknown_displays_are_not_broadcast() {
    let state = state();
    let sync = &state.sync;
    let mut display = Client::connect(sync);
    let mut ui = Client::connect(sync);
    let id = hello(sync, &mut display, "lobby").await;
    ui.request(sync, "subscribe", json!({ "channel": display_channel(404) }))
        .await;
    ui.request(sync, "subscribe", json!({ "channel": display_channel(id) }))
        .await;

    let reply = ui
        .request(sync, "iskdpy.goto_slide", json!({ "display_id": 404, "slide_id": 7 }))
        .await;
    assert_eq!(reply.success, Some(false));
    assert_eq!(reply.data["kind"], "not_found");

    let reply = ui
        .request(
            sync,
            "iskdpy.current_slide",
            json!({ "display_id": 404, "group_id": 2, "slide_id": 7 }),
        )
        .await;
    assert_eq!(reply.success, Some(false));
    assert_eq!(reply.data["kind"], "not_found");

    let reply = ui
        .request(
            sync,
            "iskdpy.current_slide",
            json!({ "display_id": 404, "override_queue_id": 3 }),
        )
        .await;
    assert_eq!(reply.data["kind"], "not_found");

    assert!(ui.broadcasts().is_empty());
    assert!(display.broadcasts().is_empty());
    assert!(!sync.registry.contains(404));
}

/// Store whose next save, once armed, waits until the gate opens.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    parked: Notify,
    gate: Notify,
}

#[async_trait]
impl DisplayStore for GatedStore {
    async fn load_all(&self) -> Result<Vec<Display>> {
        self.inner.load_all().await
    }

    async fn save(&self, display: &Display) -> Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.gate.notified().await;
        }
        self.inner.save(display).await
    }
}

#[tokio::test]
async fn disconnect_during_a_slow_hello_keeps_the_display_online() {
    let store = Arc::new(GatedStore::default());
    let state = AppState::new(
        DisplayRegistry::new(store.clone()),
        Catalog::new(),
        32,
        TokenAuthority::default(),
    );
    let sync = state.sync.clone();
    let mut first = Client::connect(&sync);
    let id = hello(&sync, &mut first, "lobby").await;

    let second = sync.channel.connect();
    let session = Session::new(second.id, None);
    store.armed.store(true, Ordering::SeqCst);
    let pending = tokio::spawn({
        let sync = sync.clone();
        async move {
            let mut session = session;
            sync.hello(&mut session, "lobby").await;
            session
        }
    });

    // second hello is registered but still persisting
    store.parked.notified().await;
    sync.disconnect(&first.session).await;
    assert!(sync.registry.get(id).unwrap().connected);

    store.gate.notify_one();
    let session = pending.await.unwrap();
    assert_eq!(session.state, ConnectionState::Synced(id));
    assert!(sync.registry.get(id).unwrap().connected);
    assert_eq!(sync.registry.connection_count(id), 1);

    sync.disconnect(&session).await;
    assert!(!sync.registry.get(id).unwrap().connected);
}
