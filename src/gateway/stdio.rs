//! JSON-lines transport between the bridge and a gateway over stdio.
//!
//! Every line written is one [`GatewayMessage`] observed on the remote platform; every line
//! read is one gateway-originated send request.

use std::{io::BufRead, thread};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, error, instrument, warn};

use crate::base::types::Void;

use super::GatewayMessage;

/// Writes every event received on `events` as a JSON line to `out`, until the channel closes.
#[instrument(skip_all)]
pub async fn write_events<W>(mut events: mpsc::Receiver<GatewayMessage>, mut out: W) -> Void
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = events.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        out.write_all(&line).await?;
        out.flush().await?;
    }

    debug!("Gateway event channel closed.");

    Ok(())
}

/// Reads send requests from `input`, one JSON document per line, and forwards them to `requests`.
///
/// Blocks the calling thread; malformed lines are logged and skipped.
pub fn read_requests<R>(input: R, requests: mpsc::Sender<GatewayMessage>) -> Void
where
    R: BufRead,
{
    for line in input.lines() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<GatewayMessage>(&line) {
            Ok(message) => {
                if requests.blocking_send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Ignoring malformed gateway request: {}", e),
        }
    }

    debug!("Gateway request stream ended.");

    Ok(())
}

/// Reads send requests from stdin on a dedicated thread.
///
/// A read from stdin cannot be interrupted, so the thread is detached and simply dies with
/// the process instead of holding up shutdown.
pub fn spawn_stdin_reader(requests: mpsc::Sender<GatewayMessage>) -> Void {
    thread::Builder::new().name("gateway-stdin".to_string()).spawn(move || {
        if let Err(e) = read_requests(std::io::stdin().lock(), requests) {
            error!("Reading gateway requests failed: {}", e);
        }
    })?;

    Ok(())
}

// Tests.
