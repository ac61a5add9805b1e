//! Real-time sync server for ISK slideshow displays.

pub mod auth;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod display_log;
pub mod error;
pub mod override_queue;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod routes;
pub mod slide;
pub mod state;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod websocket;

pub use error::{SyncError, SyncResult};
pub use state::AppState;
pub use sync::{ConnectionState, Session, SyncService};
