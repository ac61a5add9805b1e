//! Wire definitions for the display sync channel.
//! Shared by the server and the remote-control client so both sides agree
//! on event names, frame envelopes and the roster serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type DisplayId = u64;
pub type GroupId = u64;
pub type SlideId = u64;
pub type OverrideId = u64;

/// Namespace of the display protocol events.
pub const NAMESPACE: &str = "iskdpy";

/// Channel every subscriber of a single display listens on.
pub fn display_channel(display_id: DisplayId) -> String {
    format!("display_{}", display_id)
}

/// Events understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Hello,
    CurrentSlide,
    GotoSlide,
    DisplayData,
    Subscribe,
    Unsubscribe,
    Ping,
}

impl EventName {
    pub const ALL: [EventName; 7] = [
        EventName::Hello,
        EventName::CurrentSlide,
        EventName::GotoSlide,
        EventName::DisplayData,
        EventName::Subscribe,
        EventName::Unsubscribe,
        EventName::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Hello => "iskdpy.hello",
            EventName::CurrentSlide => "iskdpy.current_slide",
            EventName::GotoSlide => "iskdpy.goto_slide",
            EventName::DisplayData => "iskdpy.display_data",
            EventName::Subscribe => "subscribe",
            EventName::Unsubscribe => "unsubscribe",
            EventName::Ping => "ping",
        }
    }

    /// Event name without its namespace, as used for broadcasts.
    pub fn action(&self) -> &'static str {
        let full = self.as_str();
        full.rsplit('.').next().unwrap_or(full)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl fmt::Display for UnknownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event `{}`", self.0)
    }
}

impl std::error::Error for UnknownEvent {}

impl FromStr for EventName {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Frame sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    /// Correlation id echoed on the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundFrame {
    pub fn new(event: EventName, id: Option<u64>, data: serde_json::Value) -> Self {
        Self {
            event: event.as_str().to_string(),
            id,
            data,
        }
    }
}

/// Frame sent by the server, either a reply to one connection or a channel broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl OutboundFrame {
    pub fn reply(event: impl Into<String>, id: Option<u64>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            id,
            channel: None,
            success: Some(true),
            data,
        }
    }

    pub fn failure(
        event: impl Into<String>,
        id: Option<u64>,
        kind: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            id,
            channel: None,
            success: Some(false),
            data: serde_json::to_value(FailureBody {
                success: false,
                kind: kind.to_string(),
                message: message.into(),
            })
            .unwrap_or_default(),
        }
    }

    pub fn broadcast(channel: impl Into<String>, event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            id: None,
            channel: Some(channel.into()),
            success: None,
            data,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.success == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureBody {
    pub success: bool,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub display_name: String,
}

/// `current_slide` accepts a normal shape (`group_id` + `slide_id`) or an
/// override shape (`override_queue_id`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentSlidePayload {
    pub display_id: DisplayId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_id: Option<SlideId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_queue_id: Option<OverrideId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayRef {
    pub display_id: DisplayId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideView {
    pub id: OverrideId,
    pub slide_id: SlideId,
    pub duration_secs: u64,
    pub remaining_secs: u64,
    /// Entries waiting behind the active one.
    pub queued: usize,
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayView {
    pub id: DisplayId,
    pub name: String,
    pub connected: bool,
    pub current_group_id: Option<GroupId>,
    pub current_slide_id: Option<SlideId>,
    pub override_queue_id: Option<OverrideId>,
    pub last_contact_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_override: Option<OverrideView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloReply {
    pub display_id: DisplayId,
    pub displays: Vec<DisplayView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterReply {
    pub displays: Vec<DisplayView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_names_parse_back() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>(), Ok(name));
        }
        assert_eq!(EventName::GotoSlide.action(), "goto_slide");
        assert_eq!(EventName::Ping.action(), "ping");
    }

    #[test]
    fn svg_namespace_is_not_an_event() {
        let err = "svg.simple".parse::<EventName>().unwrap_err();
        assert_eq!(err, UnknownEvent("svg.simple".into()));
    }

    #[test]
    fn inbound_frame_defaults_missing_data() {
        let frame: InboundFrame = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame.id, None);
        assert!(frame.data.is_null());
    }

    #[test]
    fn broadcast_frame_omits_reply_fields() {
        let frame = OutboundFrame::broadcast(display_channel(4), "goto_slide", json!({"display_id": 4}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event": "goto_slide", "channel": "display_4", "data": {"display_id": 4}})
        );
    }

    #[test]
    fn failure_frame_carries_kind_and_message() {
        let frame = OutboundFrame::failure("iskdpy.goto_slide", Some(9), "not_found", "display 3 not found");
        assert!(frame.is_failure());
        let body: FailureBody = serde_json::from_value(frame.data).unwrap();
        assert_eq!(body.kind, "not_found");
        assert!(!body.success);
    }

    #[test]
    fn current_slide_shapes_deserialize() {
        let normal: CurrentSlidePayload =
            serde_json::from_value(json!({"display_id": 1, "group_id": 2, "slide_id": 7})).unwrap();
        assert_eq!(normal.slide_id, Some(7));
        assert_eq!(normal.override_queue_id, None);

        let overridden: CurrentSlidePayload =
            serde_json::from_value(json!({"display_id": 1, "override_queue_id": 99})).unwrap();
        assert_eq!(overridden.override_queue_id, Some(99));
        assert_eq!(overridden.group_id, None);
    }
}
