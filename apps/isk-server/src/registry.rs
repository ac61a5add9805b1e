use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channel::ConnectionId;
use crate::error::{EntityKind, SyncError, SyncResult};
use crate::store::DisplayStore;
use isk_proto::{DisplayId, DisplayView, GroupId, OverrideId, SlideId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Display {
    pub id: DisplayId,
    pub name: String,
    pub current_group_id: Option<GroupId>,
    pub current_slide_id: Option<SlideId>,
    pub override_queue_id: Option<OverrideId>,
    #[serde(default)]
    pub connected: bool,
    pub last_contact_at: Option<DateTime<Utc>>,
}

impl Display {
    pub fn new(id: DisplayId, name: String) -> Self {
        Self {
            id,
            name,
            current_group_id: None,
            current_slide_id: None,
            override_queue_id: None,
            connected: false,
            last_contact_at: None,
        }
    }

    pub fn view(&self) -> DisplayView {
        DisplayView {
            id: self.id,
            name: self.name.clone(),
            connected: self.connected,
            current_group_id: self.current_group_id,
            current_slide_id: self.current_slide_id,
            override_queue_id: self.override_queue_id,
            last_contact_at: self.last_contact_at,
            active_override: None,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    displays: BTreeMap<DisplayId, Display>,
    by_name: HashMap<String, DisplayId>,
    /// Live connections that said `hello` for each display.
    connections: HashMap<DisplayId, HashSet<ConnectionId>>,
    next_id: DisplayId,
}

impl RegistryInner {
    fn get_mut(&mut self, id: DisplayId) -> SyncResult<&mut Display> {
        self.displays
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found(EntityKind::Display, id))
    }
}

/// Every known display and its last reported state.
///
/// All mutation goes through one lock so updates for a display are
/// linearized and [`DisplayRegistry::roster`] never sees a half-applied write.
/// The `connected` flag and the set of live connections change together
/// under that lock. Changes are written through to the [`DisplayStore`]
/// after the lock is released.
#[derive(Clone)]
pub struct DisplayRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    store: Arc<dyn DisplayStore>,
}

impl DisplayRegistry {
    pub fn new(store: Arc<dyn DisplayStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                next_id: 1,
                ..Default::default()
            })),
            store,
        }
    }

    /// Rebuild the registry from the store. Loaded displays start disconnected.
    pub async fn load(store: Arc<dyn DisplayStore>) -> anyhow::Result<Self> {
        let records = store.load_all().await?;
        let registry = Self::new(store);
        {
            let mut inner = registry.inner.write();
            for mut record in records {
                record.connected = false;
                inner.next_id = inner.next_id.max(record.id + 1);
                inner.by_name.insert(record.name.clone(), record.id);
                inner.displays.insert(record.id, record);
            }
            info!(displays = inner.displays.len(), "display registry loaded");
        }
        Ok(registry)
    }

    /// Look up or create the display called `display_name`, attach
    /// `connection` to it and mark it connected.
    ///
    /// Returns the display together with a roster snapshot taken under the
    /// same lock, so the handshake reply always contains the caller.
    pub async fn register(
        &self,
        display_name: &str,
        connection: ConnectionId,
    ) -> (Display, Vec<Display>) {
        let (record, roster, created) = {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            let id = match inner.by_name.get(display_name) {
                Some(id) => *id,
                None => {
                    let id = inner.next_id;
                    inner.next_id += 1;
                    inner.by_name.insert(display_name.to_string(), id);
                    id
                }
            };
            inner.connections.entry(id).or_default().insert(connection);
            let created = !inner.displays.contains_key(&id);
            let entry = inner
                .displays
                .entry(id)
                .or_insert_with(|| Display::new(id, display_name.to_string()));
            entry.connected = true;
            entry.last_contact_at = Some(Utc::now());
            let record = entry.clone();
            let roster = inner.displays.values().cloned().collect::<Vec<_>>();
            (record, roster, created)
        };

        if created {
            info!(display_id = record.id, name = %record.name, "registered new display");
        } else {
            debug!(display_id = record.id, name = %record.name, "display reconnected");
        }
        self.persist(&record).await;
        (record, roster)
    }

    /// Record the group and slide a display reports in normal playback.
    pub async fn update_state(
        &self,
        display_id: DisplayId,
        group_id: GroupId,
        slide_id: SlideId,
    ) -> SyncResult<Display> {
        let record = self.mutate(display_id, |record| {
            record.current_group_id = Some(group_id);
            record.current_slide_id = Some(slide_id);
            record.override_queue_id = None;
        })?;
        self.persist(&record).await;
        Ok(record)
    }

    /// Record that a display is rendering an override entry.
    pub async fn update_override_state(
        &self,
        display_id: DisplayId,
        override_queue_id: OverrideId,
    ) -> SyncResult<Display> {
        let record = self.mutate(display_id, |record| {
            record.override_queue_id = Some(override_queue_id);
        })?;
        self.persist(&record).await;
        Ok(record)
    }

    /// Detach `connection` from the display. Returns the display once its
    /// last connection is gone and it has been marked disconnected; `None`
    /// while other connections keep it online.
    pub async fn release(
        &self,
        display_id: DisplayId,
        connection: ConnectionId,
    ) -> SyncResult<Option<Display>> {
        let offline = {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            if let Some(live) = inner.connections.get_mut(&display_id) {
                live.remove(&connection);
                if !live.is_empty() {
                    return Ok(None);
                }
                inner.connections.remove(&display_id);
            }
            let record = inner.get_mut(display_id)?;
            record.connected = false;
            record.clone()
        };
        self.persist(&offline).await;
        Ok(Some(offline))
    }

    /// Number of live connections attached to a display.
    pub fn connection_count(&self, display_id: DisplayId) -> usize {
        self.inner
            .read()
            .connections
            .get(&display_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn get(&self, display_id: DisplayId) -> SyncResult<Display> {
        self.inner
            .read()
            .displays
            .get(&display_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(EntityKind::Display, display_id))
    }

    pub fn contains(&self, display_id: DisplayId) -> bool {
        self.inner.read().displays.contains_key(&display_id)
    }

    /// Consistent snapshot of all displays ordered by id.
    pub fn roster(&self) -> Vec<Display> {
        self.inner.read().displays.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().displays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate<F>(&self, display_id: DisplayId, apply: F) -> SyncResult<Display>
    where
        F: FnOnce(&mut Display),
    {
        let mut inner = self.inner.write();
        let record = inner.get_mut(display_id)?;
        apply(record);
        record.last_contact_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn persist(&self, record: &Display) {
        if let Err(err) = self.store.save(record).await {
            warn!(display_id = record.id, error = %err, "failed to persist display");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn conn() -> ConnectionId {
        uuid::Uuid::new_v4()
    }

    fn registry() -> (DisplayRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (DisplayRegistry::new(store.clone()), store)
    }

    #[tokio::test]
    async fn register_is_idempotent_per_name() {
        let (registry, _) = registry();
        let (first, _) = registry.register("lobby", conn()).await;
        registry.update_state(first.id, 2, 7).await.unwrap();

        let (second, roster) = registry.register("lobby", conn()).await;
        assert_eq!(first.id, second.id);
        assert_eq!(roster.len(), 1);
        assert_eq!(second.current_slide_id, Some(7));
        assert_eq!(second.current_group_id, Some(2));
    }

    #[tokio::test]
    async fn roster_contains_caller_as_connected() {
        let (registry, _) = registry();
        registry.register("hall", conn()).await;
        let (lobby, roster) = registry.register("lobby", conn()).await;

        assert_eq!(roster.len(), registry.len());
        let entry = roster.iter().find(|d| d.id == lobby.id).unwrap();
        assert!(entry.connected);
        assert_eq!(entry.name, "lobby");
    }

    #[tokio::test]
    async fn updates_for_unknown_display_fail() {
        let (registry, _) = registry();
        let err = registry.update_state(42, 1, 1).await.unwrap_err();
        assert_eq!(err, SyncError::not_found(EntityKind::Display, 42));
        assert!(registry.update_override_state(42, 1).await.is_err());
    }

    #[tokio::test]
    async fn override_state_leaves_position_alone() {
        let (registry, _) = registry();
        let (display, _) = registry.register("lobby", conn()).await;
        registry.update_state(display.id, 2, 7).await.unwrap();

        let overridden = registry.update_override_state(display.id, 99).await.unwrap();
        assert_eq!(overridden.override_queue_id, Some(99));
        assert_eq!(overridden.current_slide_id, Some(7));

        let normal = registry.update_state(display.id, 3, 8).await.unwrap();
        assert_eq!(normal.override_queue_id, None);
        assert_eq!(normal.current_group_id, Some(3));
    }

    #[tokio::test]
    async fn disconnect_keeps_history() {
        let (registry, _) = registry();
        let first = conn();
        let (display, _) = registry.register("lobby", first).await;
        registry.update_state(display.id, 2, 7).await.unwrap();

        let gone = registry.release(display.id, first).await.unwrap().unwrap();
        assert!(!gone.connected);
        assert_eq!(registry.connection_count(display.id), 0);

        let (back, _) = registry.register("lobby", conn()).await;
        assert!(back.connected);
        assert_eq!(back.current_slide_id, Some(7));
    }

    #[tokio::test]
    async fn display_stays_online_until_last_connection_leaves() {
        let (registry, _) = registry();
        let (a, b) = (conn(), conn());
        let (display, _) = registry.register("lobby", a).await;
        registry.register("lobby", b).await;
        assert_eq!(registry.connection_count(display.id), 2);

        assert_eq!(registry.release(display.id, a).await.unwrap(), None);
        assert!(registry.get(display.id).unwrap().connected);
        let offline = registry.release(display.id, b).await.unwrap().unwrap();
        assert!(!offline.connected);
        assert!(registry.release(99, a).await.is_err());
    }

    #[tokio::test]
    async fn load_resumes_ids_and_starts_disconnected() {
        let (registry, store) = registry();
        registry.register("lobby", conn()).await;
        registry.register("hall", conn()).await;

        let reloaded = DisplayRegistry::load(store).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.roster().iter().all(|d| !d.connected));

        let (stage, _) = reloaded.register("stage", conn()).await;
        assert_eq!(stage.id, 3);
        let (lobby, _) = reloaded.register("lobby", conn()).await;
        assert_eq!(lobby.id, 1);
    }

    #[tokio::test]
    async fn writes_go_through_to_store() {
        let (registry, store) = registry();
        let (display, _) = registry.register("lobby", conn()).await;
        registry.update_state(display.id, 5, 6).await.unwrap();
        assert_eq!(store.get(display.id).unwrap().current_slide_id, Some(6));
    }
}
