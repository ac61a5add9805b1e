//! Separate log stream for the display protocol.
//!
//! Every handled event produces one line on the `isk_server::display_log`
//! target, so operators can route it to its own file with an `EnvFilter`
//! directive such as `isk_server::display_log=info`.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};

use crate::channel::ConnectionId;
use crate::error::SyncError;

pub const TARGET: &str = "isk_server::display_log";

pub struct DisplayEvent<'a> {
    pub action: &'a str,
    pub connection: ConnectionId,
    pub remote_addr: Option<SocketAddr>,
    pub elapsed: Duration,
    pub data: &'a serde_json::Value,
}

/// Parameters worth logging for an action. `hello` only logs the name.
pub fn parameters(action: &str, data: &serde_json::Value) -> String {
    match action {
        "hello" => format!(
            "display_name: {}",
            data.get("display_name")
                .and_then(|v| v.as_str())
                .unwrap_or("<missing>")
        ),
        _ => data.to_string(),
    }
}

pub fn record(event: &DisplayEvent<'_>, result: Result<(), &SyncError>) {
    let remote = event
        .remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".into());
    let params = parameters(event.action, event.data);
    let elapsed_ms = event.elapsed.as_secs_f64() * 1000.0;
    match result {
        Ok(()) => info!(
            target: TARGET,
            action = event.action,
            client = %event.connection,
            ip = %remote,
            elapsed_ms,
            params = %params,
            "display event handled"
        ),
        Err(err) => error!(
            target: TARGET,
            action = event.action,
            client = %event.connection,
            ip = %remote,
            elapsed_ms,
            params = %params,
            error = %err,
            "display event failed"
        ),
    }
}
