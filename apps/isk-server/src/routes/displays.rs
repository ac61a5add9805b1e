use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{ApiResult, Authenticated};
use crate::auth::Capability;
use crate::override_queue::OverrideEntry;
use crate::state::AppState;
use isk_proto::{DisplayId, GroupId, OverrideView, RosterReply, SlideId};

#[derive(Debug, Deserialize)]
pub struct EnqueueOverrideRequest {
    pub slide_id: SlideId,
    pub duration_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct GroupOverrideRequest {
    pub display_id: DisplayId,
    pub duration_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct OverrideQueueSnapshot {
    pub display_id: DisplayId,
    pub active: Option<OverrideView>,
    /// Active entry first, then the waiting ones.
    pub entries: Vec<OverrideEntry>,
}

#[derive(Debug, Serialize)]
pub struct GroupOverrideResponse {
    pub added: usize,
    pub entries: Vec<OverrideEntry>,
}

#[derive(Debug, Serialize)]
pub struct SkipResponse {
    pub skipped: Option<OverrideEntry>,
}

pub async fn list_displays(State(state): State<AppState>) -> Json<RosterReply> {
    Json(RosterReply {
        displays: state.sync.roster(),
    })
}

pub async fn get_override_queue(
    State(state): State<AppState>,
    Path(display_id): Path<DisplayId>,
) -> ApiResult<OverrideQueueSnapshot> {
    state.sync.registry.get(display_id)?;
    Ok(Json(OverrideQueueSnapshot {
        display_id,
        active: state.sync.overrides.view(display_id),
        entries: state.sync.overrides.entries(display_id),
    }))
}

pub async fn enqueue_override(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(display_id): Path<DisplayId>,
    Json(body): Json<EnqueueOverrideRequest>,
) -> ApiResult<OverrideEntry> {
    let principal = auth.require(Capability::Override)?;
    let entry = state.sync.enqueue_override(
        display_id,
        body.slide_id,
        Duration::from_secs(body.duration_secs),
    )?;
    info!(
        display_id,
        slide_id = body.slide_id,
        user_id = %principal.user_id,
        "override enqueued"
    );
    Ok(Json(entry))
}

pub async fn skip_override(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(display_id): Path<DisplayId>,
) -> ApiResult<SkipResponse> {
    auth.require(Capability::Override)?;
    let skipped = state.sync.skip_override(display_id)?;
    Ok(Json(SkipResponse { skipped }))
}

pub async fn enqueue_group_override(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(group_id): Path<GroupId>,
    Json(body): Json<GroupOverrideRequest>,
) -> ApiResult<GroupOverrideResponse> {
    auth.require(Capability::Override)?;
    let entries = state.sync.enqueue_group_override(
        group_id,
        body.display_id,
        Duration::from_secs(body.duration_secs),
    )?;
    Ok(Json(GroupOverrideResponse {
        added: entries.len(),
        entries,
    }))
}

/// Readiness callback from the asset pipeline.
pub async fn mark_slide_ready(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(slide_id): Path<SlideId>,
) -> ApiResult<serde_json::Value> {
    auth.require(Capability::ManageSlides)?;
    let slide = state.sync.catalog.mark_ready(slide_id)?;
    Ok(Json(slide.render_payload()))
}
