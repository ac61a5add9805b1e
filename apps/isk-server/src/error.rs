use isk_proto::{DisplayId, OutboundFrame};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Display,
    Group,
    Slide,
    Event,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Display => "display",
            EntityKind::Group => "group",
            EntityKind::Slide => "slide",
            EntityKind::Event => "event",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recoverable failures of the sync core. None of them are fatal; they are
/// reported back to the caller that triggered them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: u64 },
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("display {0} is showing an override, try again when it ends")]
    OverrideActive(DisplayId),
}

impl SyncError {
    pub fn not_found(kind: EntityKind, id: u64) -> Self {
        SyncError::NotFound { kind, id }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotFound { .. } => "not_found",
            SyncError::Validation(_) => "validation",
            SyncError::PermissionDenied => "permission_denied",
            SyncError::Protocol(_) => "protocol",
            SyncError::OverrideActive(_) => "override_active",
        }
    }

    pub fn to_frame(&self, event: &str, id: Option<u64>) -> OutboundFrame {
        OutboundFrame::failure(event, id, self.kind(), self.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
