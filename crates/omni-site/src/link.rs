//! The site side of the command link: dial the hub, say hello, and
//! execute pushed frames. Poll fallback runs regardless; push only
//! shortens the latency.

use std::sync::Arc;
use std::time::Duration;

use omni_proto::LinkFrame;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commands::Executor;

/// Keep-alive ping cadence.
const PING_PERIOD: Duration = Duration::from_secs(30);
/// Reconnect backoff bounds.
const BACKOFF_MIN: Duration = Duration::from_secs(2);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Spawn the link client loop: connect, serve, back off, reconnect.
pub fn spawn_link_client(
    hub_host: String,
    link_port: u16,
    server_id: Uuid,
    mac: String,
    executor: Arc<Executor>,
    cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = BACKOFF_MIN;
        loop {
            if *cancel.borrow() {
                break;
            }
            let addr = format!("{hub_host}:{link_port}");
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    info!(addr = %addr, "command link connected");
                    backoff = BACKOFF_MIN;
                    if let Err(err) =
                        serve_link(stream, server_id, &mac, &executor, cancel.clone()).await
                    {
                        debug!(error = %err, "command link dropped");
                    }
                }
                Err(err) => {
                    debug!(addr = %addr, error = %err, "command link connect failed");
                }
            }

            // Jittered backoff so a hub restart does not see a stampede.
            let jitter = rand::rng().random_range(0..=backoff.as_millis() as u64 / 4);
            tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    })
}

async fn serve_link(
    stream: TcpStream,
    server_id: Uuid,
    mac: &str,
    executor: &Arc<Executor>,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut hello = serde_json::to_vec(&LinkFrame::Hello {
        server_id,
        mac: mac.to_string(),
    })?;
    hello.push(b'\n');
    write_half.write_all(&hello).await?;

    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.tick().await; // The first tick fires immediately; skip it.

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if *cancel.borrow() {
                    return Ok(());
                }
                let mut frame = serde_json::to_vec(&LinkFrame::Ping)?;
                frame.push(b'\n');
                write_half.write_all(&frame).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    anyhow::bail!("link closed by hub");
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LinkFrame>(&line) {
                    Ok(frame) => dispatch(frame, executor).await,
                    Err(err) => warn!(error = %err, "malformed frame from hub"),
                }
            }
        }
    }
}

async fn dispatch(frame: LinkFrame, executor: &Arc<Executor>) {
    match frame {
        LinkFrame::TransferCommand { command } => {
            if let Err(err) = executor.handle_transfer_command(command).await {
                warn!(error = %err, "pushed transfer command failed to ack");
            }
        }
        LinkFrame::ContentCommand { command } => {
            if let Err(err) = executor.handle_content_command(command).await {
                warn!(error = %err, "pushed content command failed to ack");
            }
        }
        LinkFrame::ServerAction { action } => {
            if let Err(err) = executor.handle_action(action).await {
                warn!(error = %err, "pushed action failed to report");
            }
        }
        LinkFrame::Ping | LinkFrame::Pong => {}
        LinkFrame::Hello { .. } => {
            debug!("unexpected hello from hub; ignored");
        }
    }
}
