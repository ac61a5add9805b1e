use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use isk_proto::{DisplayId, OverrideId, OverrideView, SlideId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideEntry {
    pub id: OverrideId,
    pub display_id: DisplayId,
    pub slide_id: SlideId,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
    pub enqueued_at: DateTime<Utc>,
}

fn as_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

/// State changes of a display's queue, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueTransition {
    Activated(OverrideEntry),
    Idle {
        display_id: DisplayId,
        finished: OverrideId,
    },
}

impl QueueTransition {
    pub fn display_id(&self) -> DisplayId {
        match self {
            QueueTransition::Activated(entry) => entry.display_id,
            QueueTransition::Idle { display_id, .. } => *display_id,
        }
    }
}

struct ActiveEntry {
    entry: OverrideEntry,
    started: Instant,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct DisplayQueue {
    active: Option<ActiveEntry>,
    pending: VecDeque<OverrideEntry>,
}

struct QueuesInner {
    queues: HashMap<DisplayId, DisplayQueue>,
    next_id: OverrideId,
}

/// Per-display FIFO of temporary slides.
///
/// Each display with an active entry owns exactly one timer task. Timer
/// expiry and caller driven mutations share one mutex, and a timer only
/// advances the queue if the entry it was armed for is still active.
#[derive(Clone)]
pub struct OverrideQueues {
    inner: Arc<Mutex<QueuesInner>>,
    transitions: mpsc::UnboundedSender<QueueTransition>,
}

impl OverrideQueues {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QueueTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queues = Self {
            inner: Arc::new(Mutex::new(QueuesInner {
                queues: HashMap::new(),
                next_id: 1,
            })),
            transitions: tx,
        };
        (queues, rx)
    }

    /// Append an entry. An idle display starts showing it right away; an
    /// active entry keeps its remaining time.
    pub fn enqueue(
        &self,
        display_id: DisplayId,
        slide_id: SlideId,
        duration: Duration,
    ) -> SyncResult<OverrideEntry> {
        if duration.is_zero() {
            return Err(SyncError::Validation(
                "override duration must be positive".into(),
            ));
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = OverrideEntry {
            id: inner.next_id,
            display_id,
            slide_id,
            duration,
            enqueued_at: Utc::now(),
        };
        inner.next_id += 1;

        let queue = inner.queues.entry(display_id).or_default();
        if queue.active.is_none() {
            self.activate(queue, entry.clone());
        } else {
            queue.pending.push_back(entry.clone());
            debug!(
                display_id,
                override_id = entry.id,
                queued = queue.pending.len(),
                "override queued"
            );
        }
        counter!("isk_overrides_enqueued_total", 1);
        Ok(entry)
    }

    /// Entry the display should be showing, `None` meaning normal playback.
    pub fn current(&self, display_id: DisplayId) -> Option<OverrideEntry> {
        self.inner
            .lock()
            .queues
            .get(&display_id)
            .and_then(|queue| queue.active.as_ref())
            .map(|active| active.entry.clone())
    }

    pub fn is_active(&self, display_id: DisplayId) -> bool {
        self.current(display_id).is_some()
    }

    /// Run `action` only while `display_id` has no active entry. The queue
    /// lock is held for the check and the action, so no activation can land
    /// in between; `action` must not block.
    pub fn unless_active<T>(
        &self,
        display_id: DisplayId,
        action: impl FnOnce() -> T,
    ) -> SyncResult<T> {
        let guard = self.inner.lock();
        if let Some(active) = guard
            .queues
            .get(&display_id)
            .and_then(|queue| queue.active.as_ref())
        {
            debug!(display_id, override_id = active.entry.id, "display busy with override");
            return Err(SyncError::OverrideActive(display_id));
        }
        Ok(action())
    }

    /// Active entry first, then the waiting ones in order.
    pub fn entries(&self, display_id: DisplayId) -> Vec<OverrideEntry> {
        let guard = self.inner.lock();
        let Some(queue) = guard.queues.get(&display_id) else {
            return Vec::new();
        };
        queue
            .active
            .iter()
            .map(|active| active.entry.clone())
            .chain(queue.pending.iter().cloned())
            .collect()
    }

    pub fn view(&self, display_id: DisplayId) -> Option<OverrideView> {
        let guard = self.inner.lock();
        let queue = guard.queues.get(&display_id)?;
        let active = queue.active.as_ref()?;
        let remaining = active
            .entry
            .duration
            .saturating_sub(active.started.elapsed());
        Some(OverrideView {
            id: active.entry.id,
            slide_id: active.entry.slide_id,
            duration_secs: active.entry.duration.as_secs(),
            remaining_secs: remaining.as_secs(),
            queued: queue.pending.len(),
        })
    }

    /// End the active entry early. Returns the skipped entry.
    pub fn skip(&self, display_id: DisplayId) -> Option<OverrideEntry> {
        let mut guard = self.inner.lock();
        let queue = guard.queues.get_mut(&display_id)?;
        let active = queue.active.as_ref()?;
        active.timer.abort();
        let skipped = active.entry.clone();
        info!(display_id, override_id = skipped.id, "override skipped");
        self.advance(&mut guard, display_id);
        Some(skipped)
    }

    fn expire(&self, display_id: DisplayId, override_id: OverrideId) {
        let mut guard = self.inner.lock();
        let still_active = guard
            .queues
            .get(&display_id)
            .and_then(|queue| queue.active.as_ref())
            .map(|active| active.entry.id == override_id)
            .unwrap_or(false);
        if !still_active {
            return;
        }
        debug!(display_id, override_id, "override expired");
        self.advance(&mut guard, display_id);
    }

    /// Pop the active entry and promote the next one, or go idle.
    fn advance(&self, inner: &mut QueuesInner, display_id: DisplayId) {
        let Some(queue) = inner.queues.get_mut(&display_id) else {
            return;
        };
        let Some(finished) = queue.active.take() else {
            return;
        };
        match queue.pending.pop_front() {
            Some(next) => self.activate(queue, next),
            None => {
                inner.queues.remove(&display_id);
                let _ = self.transitions.send(QueueTransition::Idle {
                    display_id,
                    finished: finished.entry.id,
                });
                info!(display_id, "override queue empty, resuming normal playback");
            }
        }
    }

    fn activate(&self, queue: &mut DisplayQueue, entry: OverrideEntry) {
        let queues = self.clone();
        let display_id = entry.display_id;
        let override_id = entry.id;
        let duration = entry.duration;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            queues.expire(display_id, override_id);
        });
        info!(
            display_id,
            override_id,
            slide_id = entry.slide_id,
            duration_secs = duration.as_secs(),
            "override active"
        );
        queue.active = Some(ActiveEntry {
            entry: entry.clone(),
            started: Instant::now(),
            timer,
        });
        let _ = self.transitions.send(QueueTransition::Activated(entry));
    }
}
