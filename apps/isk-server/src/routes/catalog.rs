use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{ApiResult, Authenticated};
use crate::auth::Capability;
use crate::catalog::{EventId, GroupKind, MasterGroup, ShowEvent};
use crate::error::SyncError;
use crate::slide::SlideContent;
use crate::state::AppState;
use isk_proto::{GroupId, SlideId};

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
}

/// `{"name": "...", "kind": "normal"}`, prize groups add `awards`.
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(flatten)]
    pub kind: GroupKind,
}

#[derive(Debug, Deserialize)]
pub struct CreateSlideRequest {
    pub name: String,
    pub content: SlideContent,
}

#[derive(Debug, Deserialize)]
pub struct AdoptSlidesRequest {
    pub slide_ids: Vec<SlideId>,
}

#[derive(Debug, Deserialize)]
pub struct SortSlideRequest {
    pub slide_id: SlideId,
    pub position: usize,
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub group: MasterGroup,
    /// Slide payloads in display order.
    pub slides: Vec<serde_json::Value>,
}

fn group_response(state: &AppState, group_id: GroupId) -> ApiResult<GroupResponse> {
    let group = state.sync.catalog.group(group_id)?;
    let slides = state
        .sync
        .catalog
        .group_slides(group_id)?
        .iter()
        .map(|slide| slide.render_payload())
        .collect();
    Ok(Json(GroupResponse { group, slides }))
}

pub async fn create_event(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<CreateEventRequest>,
) -> ApiResult<ShowEvent> {
    let principal = auth.require(Capability::ManageSlides)?;
    if body.name.trim().is_empty() {
        return Err(SyncError::Validation("event name can't be blank".into()).into());
    }
    let event = state.sync.catalog.create_event(body.name.trim());
    info!(event_id = event.id, user_id = %principal.user_id, "event created over api");
    Ok(Json(event))
}

pub async fn set_current_event(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(event_id): Path<EventId>,
) -> ApiResult<ShowEvent> {
    auth.require(Capability::ManageSlides)?;
    state.sync.catalog.set_current_event(event_id)?;
    Ok(Json(state.sync.catalog.current_event()?))
}

pub async fn create_group(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<CreateGroupRequest>,
) -> ApiResult<MasterGroup> {
    auth.require(Capability::ManageSlides)?;
    let group = state.sync.catalog.create_group(&body.name, body.kind)?;
    Ok(Json(group))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> ApiResult<GroupResponse> {
    group_response(&state, group_id)
}

pub async fn destroy_group(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(group_id): Path<GroupId>,
) -> ApiResult<serde_json::Value> {
    let principal = auth.require(Capability::ManageSlides)?;
    let moved = state.sync.catalog.destroy_group(group_id)?;
    info!(group_id, user_id = %principal.user_id, "group deleted over api");
    Ok(Json(json!({ "moved_to_ungrouped": moved })))
}

pub async fn adopt_slides(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(group_id): Path<GroupId>,
    Json(body): Json<AdoptSlidesRequest>,
) -> ApiResult<serde_json::Value> {
    auth.require(Capability::ManageSlides)?;
    let added = state.sync.catalog.adopt_slides(group_id, &body.slide_ids)?;
    Ok(Json(json!({ "added": added })))
}

pub async fn sort_slide(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(group_id): Path<GroupId>,
    Json(body): Json<SortSlideRequest>,
) -> ApiResult<GroupResponse> {
    auth.require(Capability::ManageSlides)?;
    state
        .sync
        .catalog
        .sort_slide(group_id, body.slide_id, body.position)?;
    group_response(&state, group_id)
}

pub async fn publish_slides(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(group_id): Path<GroupId>,
) -> ApiResult<serde_json::Value> {
    auth.require(Capability::ManageSlides)?;
    let updated = state.sync.catalog.publish_slides(group_id)?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn hide_slides(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(group_id): Path<GroupId>,
) -> ApiResult<serde_json::Value> {
    auth.require(Capability::ManageSlides)?;
    let updated = state.sync.catalog.hide_slides(group_id)?;
    Ok(Json(json!({ "updated": updated })))
}

/// New slides land in the current event's ungrouped pen, not ready.
pub async fn create_slide(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<CreateSlideRequest>,
) -> ApiResult<serde_json::Value> {
    let principal = auth.require(Capability::ManageSlides)?;
    let slide = state.sync.catalog.create_slide(&body.name, body.content)?;
    info!(
        slide_id = slide.id,
        kind = slide.content.type_str(),
        user_id = %principal.user_id,
        "slide created over api"
    );
    Ok(Json(slide.render_payload()))
}

pub async fn get_slide(
    State(state): State<AppState>,
    Path(slide_id): Path<SlideId>,
) -> ApiResult<serde_json::Value> {
    let slide = state.sync.catalog.slide(slide_id)?;
    Ok(Json(slide.render_payload()))
}

pub async fn clone_slide(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(slide_id): Path<SlideId>,
) -> ApiResult<serde_json::Value> {
    auth.require(Capability::ManageSlides)?;
    let slide = state.sync.catalog.clone_slide(slide_id)?;
    Ok(Json(slide.render_payload()))
}

/// Ask for remote content to be fetched again. The slide is not eligible
/// for overrides until the ready callback arrives.
pub async fn refetch_slide(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(slide_id): Path<SlideId>,
) -> ApiResult<serde_json::Value> {
    auth.require(Capability::ManageSlides)?;
    let slide = state.sync.catalog.slide(slide_id)?;
    if !slide.content.needs_fetch() {
        return Err(SyncError::Validation(format!(
            "{} slides have no remote content",
            slide.content.type_str()
        ))
        .into());
    }
    let slide = state.sync.catalog.mark_stale(slide_id)?;
    info!(slide_id, "slide queued for fetch");
    Ok(Json(slide.render_payload()))
}
