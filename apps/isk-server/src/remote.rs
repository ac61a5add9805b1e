//! `isk-server remote`: a minimal remote-control client for poking at a
//! running server from the terminal.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::config::RemoteCommand;
use isk_proto::{EventName, InboundFrame, OutboundFrame};

const REQUEST_ID: u64 = 1;
const TIMEOUT: Duration = Duration::from_secs(5);

pub fn build_frame(command: &RemoteCommand) -> InboundFrame {
    match command {
        RemoteCommand::Roster { display_id } => InboundFrame::new(
            EventName::DisplayData,
            Some(REQUEST_ID),
            json!({ "display_id": display_id }),
        ),
        RemoteCommand::Goto {
            display_id,
            group_id,
            slide_id,
        } => InboundFrame::new(
            EventName::GotoSlide,
            Some(REQUEST_ID),
            json!({ "display_id": display_id, "group_id": group_id, "slide_id": slide_id }),
        ),
        RemoteCommand::Current {
            display_id,
            group_id,
            slide_id,
        } => InboundFrame::new(
            EventName::CurrentSlide,
            Some(REQUEST_ID),
            json!({ "display_id": display_id, "group_id": group_id, "slide_id": slide_id }),
        ),
    }
}

/// Send one event and wait for its reply. Broadcasts arriving in between are
/// skipped.
pub async fn run(url: &str, command: RemoteCommand) -> Result<OutboundFrame> {
    debug!(url, ?command, "connecting");
    let (stream, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .map_err(|_| anyhow!("connection timeout - is the server running at {}?", url))?
        .with_context(|| format!("failed to connect to {}", url))?;
    let (mut write, mut read) = stream.split();

    let frame = build_frame(&command);
    write
        .send(Message::Text(serde_json::to_string(&frame)?.into()))
        .await?;

    let reply = timeout(TIMEOUT, async {
        while let Some(message) = read.next().await {
            if let Message::Text(text) = message? {
                let frame: OutboundFrame = serde_json::from_str(&text)?;
                if frame.id == Some(REQUEST_ID) {
                    return Ok::<_, anyhow::Error>(frame);
                }
                debug!(event = %frame.event, "skipping broadcast");
            }
        }
        Err(anyhow!("server closed the connection before replying"))
    })
    .await
    .map_err(|_| anyhow!("no reply within {} seconds", TIMEOUT.as_secs()))??;

    let _ = write.close().await;
    Ok(reply)
}
