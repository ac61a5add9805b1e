use serde::de::DeserializeOwned;

use crate::error::{SyncError, SyncResult};
use isk_proto::{
    ChannelPayload, CurrentSlidePayload, DisplayId, DisplayRef, EventName, GroupId, HelloPayload,
    InboundFrame, OverrideId, SlideId,
};

/// A decoded client event. Matching on this is exhaustive, so a new event
/// name cannot be added without a handler.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Hello(HelloPayload),
    CurrentSlide {
        report: SlideReport,
        /// Forwarded unchanged to `display_<id>` subscribers.
        raw: serde_json::Value,
    },
    GotoSlide {
        display_id: DisplayId,
        raw: serde_json::Value,
    },
    DisplayData(DisplayRef),
    Subscribe(ChannelPayload),
    Unsubscribe(ChannelPayload),
    Ping,
}

/// What a display says it is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideReport {
    Normal {
        display_id: DisplayId,
        group_id: GroupId,
        slide_id: SlideId,
    },
    Override {
        display_id: DisplayId,
        override_queue_id: OverrideId,
    },
}

impl SlideReport {
    pub fn display_id(&self) -> DisplayId {
        match self {
            SlideReport::Normal { display_id, .. } | SlideReport::Override { display_id, .. } => {
                *display_id
            }
        }
    }

    /// The override shape wins when a payload carries both.
    pub fn from_payload(payload: CurrentSlidePayload) -> SyncResult<Self> {
        match payload {
            CurrentSlidePayload {
                display_id,
                override_queue_id: Some(override_queue_id),
                ..
            } => Ok(SlideReport::Override {
                display_id,
                override_queue_id,
            }),
            CurrentSlidePayload {
                display_id,
                group_id: Some(group_id),
                slide_id: Some(slide_id),
                ..
            } => Ok(SlideReport::Normal {
                display_id,
                group_id,
                slide_id,
            }),
            _ => Err(SyncError::Validation(
                "current_slide needs group_id and slide_id, or override_queue_id".into(),
            )),
        }
    }
}

/// An inbound frame that was parsed far enough to reply to.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: String,
    pub id: Option<u64>,
    pub name: Option<EventName>,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn action(&self) -> &str {
        self.name.map(|name| name.action()).unwrap_or(self.event.as_str())
    }
}

/// Parse the frame envelope. Fails only when the text is not a frame at all.
pub fn decode_frame(text: &str) -> SyncResult<Envelope> {
    let frame: InboundFrame = serde_json::from_str(text)
        .map_err(|err| SyncError::Protocol(format!("unparseable frame: {}", err)))?;
    Ok(Envelope {
        name: frame.event.parse().ok(),
        event: frame.event,
        id: frame.id,
        data: frame.data,
    })
}

impl ClientEvent {
    pub fn from_envelope(envelope: &Envelope) -> SyncResult<Self> {
        let Some(name) = envelope.name else {
            return Err(SyncError::Protocol(format!(
                "unsupported event `{}`",
                envelope.event
            )));
        };
        let data = &envelope.data;
        let event = match name {
            EventName::Hello => ClientEvent::Hello(payload(data)?),
            EventName::CurrentSlide => ClientEvent::CurrentSlide {
                report: SlideReport::from_payload(payload(data)?)?,
                raw: data.clone(),
            },
            EventName::GotoSlide => {
                let target: DisplayRef = payload(data)?;
                ClientEvent::GotoSlide {
                    display_id: target.display_id,
                    raw: data.clone(),
                }
            }
            EventName::DisplayData => ClientEvent::DisplayData(payload(data)?),
            EventName::Subscribe => ClientEvent::Subscribe(payload(data)?),
            EventName::Unsubscribe => ClientEvent::Unsubscribe(payload(data)?),
            EventName::Ping => ClientEvent::Ping,
        };
        Ok(event)
    }
}

fn payload<T: DeserializeOwned>(data: &serde_json::Value) -> SyncResult<T> {
    serde_json::from_value(data.clone()).map_err(|err| SyncError::Validation(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(text: &str) -> SyncResult<ClientEvent> {
        ClientEvent::from_envelope(&decode_frame(text)?)
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(decode_frame("{not json"), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn unknown_event_is_a_protocol_error() {
        let err = event(r#"{"event":"svg.simple","data":{}}"#).unwrap_err();
        assert_eq!(err.kind(), "protocol");
        assert!(err.to_string().contains("svg.simple"));
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let err = event(r#"{"event":"iskdpy.hello","data":{}}"#).unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = event(r#"{"event":"iskdpy.current_slide","data":{"display_id":1,"slide_id":2}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn current_slide_prefers_override_shape() {
        let report = SlideReport::from_payload(CurrentSlidePayload {
            display_id: 1,
            group_id: Some(2),
            slide_id: Some(3),
            override_queue_id: Some(4),
        })
        .unwrap();
        assert_eq!(
            report,
            SlideReport::Override {
                display_id: 1,
                override_queue_id: 4
            }
        );
    }

    #[test]
    fn goto_slide_keeps_the_raw_payload() {
        let parsed = event(
            r#"{"event":"iskdpy.goto_slide","id":5,"data":{"display_id":3,"slide_id":7,"group_id":1}}"#,
        )
        .unwrap();
        match parsed {
            ClientEvent::GotoSlide { display_id, raw } => {
                assert_eq!(display_id, 3);
                assert_eq!(raw, json!({"display_id": 3, "slide_id": 7, "group_id": 1}));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn envelope_action_strips_namespace() {
        let envelope = decode_frame(r#"{"event":"iskdpy.display_data","data":{"display_id":1}}"#).unwrap();
        assert_eq!(envelope.action(), "display_data");
        let unknown = decode_frame(r#"{"event":"svg.simple"}"#).unwrap();
        assert_eq!(unknown.action(), "svg.simple");
    }
}
