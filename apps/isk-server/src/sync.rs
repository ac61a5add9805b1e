use metrics::{counter, histogram};
use serde_json::json;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::channel::{ConnectionId, EventChannel};
use crate::display_log::{self, DisplayEvent};
use crate::error::{EntityKind, SyncError, SyncResult};
use crate::override_queue::{OverrideEntry, OverrideQueues, QueueTransition};
use crate::protocol::{decode_frame, ClientEvent, Envelope, SlideReport};
use crate::registry::DisplayRegistry;
use crate::slide::Slide;
use isk_proto::{
    display_channel, DisplayId, DisplayView, GroupId, HelloReply, OutboundFrame, RosterReply,
    SlideId,
};

/// Where a connection is in the display handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Synced(DisplayId),
}

/// Per-connection state owned by that connection's reader task.
#[derive(Debug)]
pub struct Session {
    pub connection: ConnectionId,
    pub remote_addr: Option<SocketAddr>,
    pub state: ConnectionState,
}

impl Session {
    pub fn new(connection: ConnectionId, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            connection,
            remote_addr,
            state: ConnectionState::Uninitialized,
        }
    }

    pub fn display_id(&self) -> Option<DisplayId> {
        match self.state {
            ConnectionState::Synced(id) => Some(id),
            ConnectionState::Uninitialized => None,
        }
    }
}

/// The display sync core: registry, channel, override queues and catalog,
/// passed around as one explicit handle.
#[derive(Clone)]
pub struct SyncService {
    pub registry: DisplayRegistry,
    pub channel: EventChannel,
    pub overrides: OverrideQueues,
    pub catalog: Catalog,
}

impl SyncService {
    pub fn new(
        registry: DisplayRegistry,
        channel: EventChannel,
        overrides: OverrideQueues,
        catalog: Catalog,
    ) -> Self {
        Self {
            registry,
            channel,
            overrides,
            catalog,
        }
    }

    /// Handle one text frame from `session`. The reply, if any, goes to the
    /// session's own connection; failures never reach other connections.
    pub async fn handle_text(&self, session: &mut Session, text: &str) {
        let started = Instant::now();
        let envelope = match decode_frame(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(connection_id = %session.connection, error = %err, "dropping malformed frame");
                counter!("isk_sync_events_total", 1, "action" => "malformed", "result" => "error");
                self.channel
                    .send(session.connection, err.to_frame("error", None));
                return;
            }
        };

        let result = match ClientEvent::from_envelope(&envelope) {
            Ok(event) => self.dispatch(session, &envelope, event).await,
            Err(err) => Err(err),
        };

        let elapsed = started.elapsed();
        display_log::record(
            &DisplayEvent {
                action: envelope.action(),
                connection: session.connection,
                remote_addr: session.remote_addr,
                elapsed,
                data: &envelope.data,
            },
            result.as_ref().map(|_| ()),
        );
        record_event_metrics(&envelope, &result, elapsed);

        let frame = match result {
            Ok(data) => OutboundFrame::reply(envelope.event.clone(), envelope.id, data),
            Err(err) => err.to_frame(&envelope.event, envelope.id),
        };
        self.channel.send(session.connection, frame);
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        envelope: &Envelope,
        event: ClientEvent,
    ) -> SyncResult<serde_json::Value> {
        debug!(connection_id = %session.connection, event = %envelope.event, "dispatching");
        match event {
            ClientEvent::Hello(hello) => {
                let reply = self.hello(session, &hello.display_name).await;
                Ok(json!(reply))
            }
            ClientEvent::CurrentSlide { report, raw } => {
                self.current_slide(report, raw).await?;
                Ok(json!({ "display_id": report.display_id() }))
            }
            ClientEvent::GotoSlide { display_id, raw } => {
                self.goto_slide(display_id, raw)?;
                Ok(json!({ "display_id": display_id }))
            }
            ClientEvent::DisplayData(target) => {
                self.registry.get(target.display_id)?;
                Ok(json!(RosterReply {
                    displays: self.roster()
                }))
            }
            ClientEvent::Subscribe(target) => {
                if !self.channel.subscribe(session.connection, &target.channel) {
                    return Err(SyncError::Protocol("connection is closed".into()));
                }
                Ok(json!({ "channel": target.channel }))
            }
            ClientEvent::Unsubscribe(target) => {
                self.channel.unsubscribe(session.connection, &target.channel);
                Ok(json!({ "channel": target.channel }))
            }
            ClientEvent::Ping => Ok(json!({ "pong": true })),
        }
    }

    /// Register the display, listen on its channel and return the roster.
    pub async fn hello(&self, session: &mut Session, display_name: &str) -> HelloReply {
        let (record, _) = self
            .registry
            .register(display_name, session.connection)
            .await;

        if let ConnectionState::Synced(previous) = session.state {
            if previous != record.id {
                self.channel
                    .unsubscribe(session.connection, &display_channel(previous));
                self.release_connection(previous, session.connection).await;
            }
        }

        self.channel
            .subscribe(session.connection, &display_channel(record.id));
        session.state = ConnectionState::Synced(record.id);

        info!(
            display_id = record.id,
            connection_id = %session.connection,
            "display synced"
        );
        HelloReply {
            display_id: record.id,
            displays: self.roster(),
        }
    }

    pub async fn current_slide(&self, report: SlideReport, raw: serde_json::Value) -> SyncResult<()> {
        let record = match report {
            SlideReport::Normal {
                display_id,
                group_id,
                slide_id,
            } => {
                self.registry
                    .update_state(display_id, group_id, slide_id)
                    .await?
            }
            SlideReport::Override {
                display_id,
                override_queue_id,
            } => {
                self.registry
                    .update_override_state(display_id, override_queue_id)
                    .await?
            }
        };
        self.channel
            .publish(&display_channel(record.id), "current_slide", raw);
        Ok(())
    }

    /// Forward a remote-control command to the display, unless an override
    /// owns the display right now. The check and the publish happen under
    /// the override queue lock, so an activation lands either before the
    /// check or after the `goto_slide` frame.
    pub fn goto_slide(&self, display_id: DisplayId, raw: serde_json::Value) -> SyncResult<()> {
        if !self.registry.contains(display_id) {
            return Err(SyncError::not_found(EntityKind::Display, display_id));
        }
        self.overrides.unless_active(display_id, || {
            self.channel
                .publish(&display_channel(display_id), "goto_slide", raw)
        })?;
        Ok(())
    }

    /// Tear down a connection. The display goes offline once its last
    /// connection is gone; its overrides keep running.
    pub async fn disconnect(&self, session: &Session) {
        self.channel.disconnect(session.connection);
        if let Some(display_id) = session.display_id() {
            self.release_connection(display_id, session.connection).await;
        }
    }

    async fn release_connection(&self, display_id: DisplayId, connection: ConnectionId) {
        match self.registry.release(display_id, connection).await {
            Ok(Some(record)) => {
                info!(display_id, "display disconnected");
                self.channel.publish(
                    &display_channel(display_id),
                    "display_disconnected",
                    json!(self.view(record.view())),
                );
            }
            Ok(None) => {
                debug!(display_id, connection_id = %connection, "display still has connections");
            }
            Err(err) => warn!(display_id, error = %err, "disconnect for unknown display"),
        }
    }

    /// Roster with each display's active override filled in.
    pub fn roster(&self) -> Vec<DisplayView> {
        self.registry
            .roster()
            .into_iter()
            .map(|record| self.view(record.view()))
            .collect()
    }

    fn view(&self, mut view: DisplayView) -> DisplayView {
        view.active_override = self.overrides.view(view.id);
        view
    }

    /// Queue a ready slide as an override on a known display.
    pub fn enqueue_override(
        &self,
        display_id: DisplayId,
        slide_id: SlideId,
        duration: Duration,
    ) -> SyncResult<OverrideEntry> {
        self.registry.get(display_id)?;
        let slide = self.eligible_slide(slide_id)?;
        self.overrides.enqueue(display_id, slide.id, duration)
    }

    /// Queue every ready slide of a group, in group order. Slides still
    /// waiting for content are skipped.
    pub fn enqueue_group_override(
        &self,
        group_id: GroupId,
        display_id: DisplayId,
        duration: Duration,
    ) -> SyncResult<Vec<OverrideEntry>> {
        self.registry.get(display_id)?;
        let slides = self.catalog.group_slides(group_id)?;
        let mut entries = Vec::with_capacity(slides.len());
        for slide in slides.into_iter().filter(Slide::is_ready) {
            entries.push(self.overrides.enqueue(display_id, slide.id, duration)?);
        }
        info!(group_id, display_id, added = entries.len(), "group added to override");
        Ok(entries)
    }

    pub fn skip_override(&self, display_id: DisplayId) -> SyncResult<Option<OverrideEntry>> {
        self.registry.get(display_id)?;
        Ok(self.overrides.skip(display_id))
    }

    fn eligible_slide(&self, slide_id: SlideId) -> SyncResult<Slide> {
        let slide = self.catalog.slide(slide_id)?;
        if !slide.is_ready() {
            return Err(SyncError::Validation(format!(
                "slide {} is not ready",
                slide_id
            )));
        }
        Ok(slide)
    }

    fn publish_transition(&self, transition: QueueTransition) {
        match transition {
            QueueTransition::Activated(entry) => {
                let slide = self
                    .catalog
                    .slide(entry.slide_id)
                    .map(|slide| slide.render_payload())
                    .unwrap_or(serde_json::Value::Null);
                self.channel.publish(
                    &display_channel(entry.display_id),
                    "override",
                    json!({
                        "display_id": entry.display_id,
                        "override_queue_id": entry.id,
                        "slide_id": entry.slide_id,
                        "duration_secs": entry.duration.as_secs(),
                        "slide": slide,
                    }),
                );
            }
            QueueTransition::Idle {
                display_id,
                finished,
            } => {
                self.channel.publish(
                    &display_channel(display_id),
                    "override_ended",
                    json!({ "display_id": display_id, "override_queue_id": finished }),
                );
            }
        }
    }

    /// Forward override queue transitions to the displays' channels.
    pub fn spawn_override_pump(
        &self,
        mut transitions: mpsc::UnboundedReceiver<QueueTransition>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(transition) = transitions.recv().await {
                debug!(display_id = transition.display_id(), "override transition");
                service.publish_transition(transition);
            }
        })
    }
}

fn record_event_metrics(
    envelope: &Envelope,
    result: &SyncResult<serde_json::Value>,
    elapsed: Duration,
) {
    let action = envelope.action().to_string();
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    counter!("isk_sync_events_total", 1, "action" => action.clone(), "result" => outcome);
    histogram!(
        "isk_sync_event_duration_ms",
        elapsed.as_secs_f64() * 1000.0,
        "action" => action
    );
}
