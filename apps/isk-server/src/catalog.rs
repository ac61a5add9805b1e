use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EntityKind, SyncError, SyncResult};
use crate::slide::{Slide, SlideContent};
use isk_proto::{GroupId, SlideId};

pub type EventId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowEvent {
    pub id: EventId,
    pub name: String,
    pub ungrouped_id: GroupId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeAward {
    pub award: String,
    pub winners: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupKind {
    Normal,
    /// Holding pen for slides without a group, one per event.
    UnGroup,
    Prize { awards: Vec<PrizeAward> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterGroup {
    pub id: GroupId,
    pub event_id: EventId,
    pub name: String,
    pub kind: GroupKind,
    /// Slide ids in display order.
    pub slides: Vec<SlideId>,
}

impl MasterGroup {
    pub fn internal(&self) -> bool {
        matches!(self.kind, GroupKind::UnGroup)
    }
}

#[derive(Default)]
struct CatalogInner {
    events: BTreeMap<EventId, ShowEvent>,
    groups: BTreeMap<GroupId, MasterGroup>,
    slides: BTreeMap<SlideId, Slide>,
    current_event: Option<EventId>,
    next_id: u64,
}

impl CatalogInner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn current(&self) -> SyncResult<&ShowEvent> {
        self.current_event
            .and_then(|id| self.events.get(&id))
            .ok_or_else(|| SyncError::not_found(EntityKind::Event, 0))
    }

    fn group(&self, id: GroupId) -> SyncResult<&MasterGroup> {
        self.groups
            .get(&id)
            .ok_or_else(|| SyncError::not_found(EntityKind::Group, id))
    }

    fn group_mut(&mut self, id: GroupId) -> SyncResult<&mut MasterGroup> {
        self.groups
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found(EntityKind::Group, id))
    }

    fn slide_mut(&mut self, id: SlideId) -> SyncResult<&mut Slide> {
        self.slides
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found(EntityKind::Slide, id))
    }

    fn editable_group(&self, id: GroupId) -> SyncResult<&MasterGroup> {
        let group = self.group(id)?;
        if group.internal() {
            return Err(SyncError::Validation("Can't edit internal groups".into()));
        }
        Ok(group)
    }

    fn detach(&mut self, slide_id: SlideId, group_id: GroupId) {
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.slides.retain(|id| *id != slide_id);
        }
    }

    fn attach(&mut self, slide_id: SlideId, group_id: GroupId) -> SyncResult<()> {
        self.group_mut(group_id)?.slides.push(slide_id);
        self.slide_mut(slide_id)?.group_id = group_id;
        Ok(())
    }
}

/// Events, groups and slides. Stands in for the persistence collaborator of
/// the admin side; the sync core only reads slides and readiness from it.
#[derive(Clone, Default)]
pub struct Catalog {
    inner: Arc<RwLock<CatalogInner>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event together with its ungrouped holding pen. The first
    /// event created becomes current.
    pub fn create_event(&self, name: &str) -> ShowEvent {
        let mut inner = self.inner.write();
        let event_id = inner.next_id();
        let ungrouped_id = inner.next_id();
        inner.groups.insert(
            ungrouped_id,
            MasterGroup {
                id: ungrouped_id,
                event_id,
                name: format!("Ungrouped slides for {}", name),
                kind: GroupKind::UnGroup,
                slides: Vec::new(),
            },
        );
        let event = ShowEvent {
            id: event_id,
            name: name.to_string(),
            ungrouped_id,
        };
        inner.events.insert(event_id, event.clone());
        if inner.current_event.is_none() {
            inner.current_event = Some(event_id);
        }
        info!(event_id, name, "event created");
        event
    }

    pub fn set_current_event(&self, event_id: EventId) -> SyncResult<()> {
        let mut inner = self.inner.write();
        if !inner.events.contains_key(&event_id) {
            return Err(SyncError::not_found(EntityKind::Event, event_id));
        }
        inner.current_event = Some(event_id);
        Ok(())
    }

    pub fn current_event(&self) -> SyncResult<ShowEvent> {
        self.inner.read().current().cloned()
    }

    pub fn create_group(&self, name: &str, kind: GroupKind) -> SyncResult<MasterGroup> {
        if matches!(kind, GroupKind::UnGroup) {
            return Err(SyncError::Validation(
                "ungrouped holding pen is created with its event".into(),
            ));
        }
        let mut inner = self.inner.write();
        let event_id = inner.current()?.id;
        let id = inner.next_id();
        let group = MasterGroup {
            id,
            event_id,
            name: name.to_string(),
            kind,
            slides: Vec::new(),
        };
        inner.groups.insert(id, group.clone());
        Ok(group)
    }

    /// Remove a group. Its slides move to the event's ungrouped pen.
    pub fn destroy_group(&self, group_id: GroupId) -> SyncResult<Vec<SlideId>> {
        let mut inner = self.inner.write();
        inner.editable_group(group_id)?;
        let group = inner
            .groups
            .remove(&group_id)
            .ok_or_else(|| SyncError::not_found(EntityKind::Group, group_id))?;
        let ungrouped = inner
            .events
            .get(&group.event_id)
            .map(|event| event.ungrouped_id)
            .ok_or_else(|| SyncError::not_found(EntityKind::Event, group.event_id))?;
        for slide_id in &group.slides {
            inner.attach(*slide_id, ungrouped)?;
        }
        info!(group_id, moved = group.slides.len(), "group destroyed");
        Ok(group.slides)
    }

    /// Add a slide to the current event's ungrouped pen. Slides are never
    /// ready on creation.
    pub fn create_slide(&self, name: &str, content: SlideContent) -> SyncResult<Slide> {
        content.validate()?;
        let mut inner = self.inner.write();
        let ungrouped = inner.current()?.ungrouped_id;
        let id = inner.next_id();
        let slide = Slide {
            id,
            name: name.to_string(),
            group_id: ungrouped,
            ready: false,
            public: false,
            content,
        };
        inner.slides.insert(id, slide.clone());
        inner.group_mut(ungrouped)?.slides.push(id);
        debug!(slide_id = id, kind = slide.content.type_str(), "slide created");
        Ok(slide)
    }

    /// Readiness callback from the asset collaborator.
    pub fn mark_ready(&self, slide_id: SlideId) -> SyncResult<Slide> {
        let mut inner = self.inner.write();
        let slide = inner.slide_mut(slide_id)?;
        slide.ready = true;
        info!(slide_id, "slide ready");
        Ok(slide.clone())
    }

    /// Content is being regenerated; the slide is not eligible until ready again.
    pub fn mark_stale(&self, slide_id: SlideId) -> SyncResult<Slide> {
        let mut inner = self.inner.write();
        let slide = inner.slide_mut(slide_id)?;
        slide.ready = false;
        Ok(slide.clone())
    }

    /// Copy a slide into the same group. The copy needs its own renditions.
    pub fn clone_slide(&self, slide_id: SlideId) -> SyncResult<Slide> {
        let mut inner = self.inner.write();
        let source = inner
            .slides
            .get(&slide_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(EntityKind::Slide, slide_id))?;
        let id = inner.next_id();
        let slide = Slide {
            id,
            name: format!("{} (clone)", source.name),
            group_id: source.group_id,
            ready: false,
            public: source.public,
            content: source.content.clone_content(),
        };
        inner.slides.insert(id, slide.clone());
        inner.group_mut(source.group_id)?.slides.push(id);
        Ok(slide)
    }

    /// Move ungrouped slides into `group_id`. Returns the names of moved slides.
    pub fn adopt_slides(&self, group_id: GroupId, slide_ids: &[SlideId]) -> SyncResult<Vec<String>> {
        let mut inner = self.inner.write();
        inner.editable_group(group_id)?;
        let ungrouped = inner.current()?.ungrouped_id;
        let mut added = Vec::with_capacity(slide_ids.len());
        for slide_id in slide_ids {
            let slide = inner
                .slides
                .get(slide_id)
                .ok_or_else(|| SyncError::not_found(EntityKind::Slide, *slide_id))?;
            if slide.group_id != ungrouped {
                return Err(SyncError::not_found(EntityKind::Slide, *slide_id));
            }
            added.push(slide.name.clone());
            inner.detach(*slide_id, ungrouped);
            inner.attach(*slide_id, group_id)?;
        }
        Ok(added)
    }

    /// Move a slide to `position` within its group, clamped to the end.
    pub fn sort_slide(&self, group_id: GroupId, slide_id: SlideId, position: usize) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let group = inner.group_mut(group_id)?;
        let index = group
            .slides
            .iter()
            .position(|id| *id == slide_id)
            .ok_or_else(|| SyncError::not_found(EntityKind::Slide, slide_id))?;
        let id = group.slides.remove(index);
        let position = position.min(group.slides.len());
        group.slides.insert(position, id);
        Ok(())
    }

    pub fn publish_slides(&self, group_id: GroupId) -> SyncResult<usize> {
        self.set_visibility(group_id, true)
    }

    pub fn hide_slides(&self, group_id: GroupId) -> SyncResult<usize> {
        self.set_visibility(group_id, false)
    }

    pub fn group(&self, group_id: GroupId) -> SyncResult<MasterGroup> {
        self.inner.read().group(group_id).cloned()
    }

    pub fn slide(&self, slide_id: SlideId) -> SyncResult<Slide> {
        self.inner
            .read()
            .slides
            .get(&slide_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(EntityKind::Slide, slide_id))
    }

    /// Slides of a group in display order.
    pub fn group_slides(&self, group_id: GroupId) -> SyncResult<Vec<Slide>> {
        let inner = self.inner.read();
        let group = inner.group(group_id)?;
        Ok(group
            .slides
            .iter()
            .filter_map(|id| inner.slides.get(id).cloned())
            .collect())
    }

    fn set_visibility(&self, group_id: GroupId, public: bool) -> SyncResult<usize> {
        let mut inner = self.inner.write();
        let ids = inner.group(group_id)?.slides.clone();
        for id in &ids {
            inner.slide_mut(*id)?.public = public;
        }
        Ok(ids.len())
    }
}
