//! The hub side of the command link: push substrate plus the unified
//! command channel.
//!
//! Sites dial a TCP socket to the hub and speak newline-delimited JSON
//! [`LinkFrame`]s. The hub keeps a registry of live connections; a command
//! is pushed when the target is connected and otherwise left in the
//! poll-backed tables, which the site drains on its next poll. Delivery is
//! therefore at-least-once and sites execute idempotently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use omni_data::Store;
use omni_proto::{ContentCommand, DeliveryRoute, LinkFrame, ServerAction, TransferCommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound frame capacity per connected site.
const LINK_SEND_BUFFER: usize = 64;

/// Registry of live site links.
#[derive(Default)]
pub struct LinkRegistry {
    inner: RwLock<HashMap<Uuid, mpsc::Sender<LinkFrame>>>,
}

impl LinkRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, server_id: Uuid, sender: mpsc::Sender<LinkFrame>) {
        let mut inner = self.inner.write().await;
        if inner.insert(server_id, sender).is_some() {
            debug!(server_id = %server_id, "replacing existing link connection");
        }
    }

    async fn unregister(&self, server_id: Uuid) {
        self.inner.write().await.remove(&server_id);
    }

    /// Whether a site currently holds a live link.
    pub async fn is_connected(&self, server_id: Uuid) -> bool {
        self.inner.read().await.contains_key(&server_id)
    }

    /// Try to push a frame; `false` means the site is not connected (or
    /// its buffer is full) and the poll tables must carry the command.
    pub async fn push(&self, server_id: Uuid, frame: LinkFrame) -> bool {
        let sender = {
            let inner = self.inner.read().await;
            inner.get(&server_id).cloned()
        };
        match sender {
            Some(sender) => sender.try_send(frame).is_ok(),
            None => false,
        }
    }
}

/// Unified hub→site command delivery: push preferred, poll fallback.
///
/// The caller persists the command to its poll table FIRST, then offers it
/// here; a successful push only accelerates delivery, it never replaces
/// the durable row.
#[derive(Clone)]
pub struct CommandChannel {
    links: Arc<LinkRegistry>,
}

impl CommandChannel {
    /// Wrap the link registry.
    #[must_use]
    pub const fn new(links: Arc<LinkRegistry>) -> Self {
        Self { links }
    }

    /// Offer a transfer command.
    pub async fn send_transfer_command(
        &self,
        server_id: Uuid,
        command: TransferCommand,
    ) -> DeliveryRoute {
        if self
            .links
            .push(server_id, LinkFrame::TransferCommand { command })
            .await
        {
            DeliveryRoute::Push
        } else {
            DeliveryRoute::Poll
        }
    }

    /// Offer a content command.
    pub async fn send_content_command(
        &self,
        server_id: Uuid,
        command: ContentCommand,
    ) -> DeliveryRoute {
        if self
            .links
            .push(server_id, LinkFrame::ContentCommand { command })
            .await
        {
            DeliveryRoute::Push
        } else {
            DeliveryRoute::Poll
        }
    }

    /// Offer a server action.
    pub async fn send_action(&self, server_id: Uuid, action: ServerAction) -> DeliveryRoute {
        if self
            .links
            .push(server_id, LinkFrame::ServerAction { action })
            .await
        {
            DeliveryRoute::Push
        } else {
            DeliveryRoute::Poll
        }
    }
}

/// Accept site link connections on `addr`.
///
/// # Errors
///
/// Returns an error when the listener cannot bind.
pub async fn spawn_link_listener(
    addr: SocketAddr,
    links: Arc<LinkRegistry>,
    store: Store,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "command link listening");
    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let links = Arc::clone(&links);
                    let store = store.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(socket, peer, links, store).await {
                            debug!(peer = %peer, error = %err, "link connection closed");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "link accept failed");
                }
            }
        }
    }))
}

async fn serve_connection(
    socket: TcpStream,
    peer: SocketAddr,
    links: Arc<LinkRegistry>,
    store: Store,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // First frame must be the hello.
    let Some(first) = lines.next_line().await? else {
        anyhow::bail!("link closed before hello");
    };
    let LinkFrame::Hello { server_id, mac } = serde_json::from_str(&first)? else {
        anyhow::bail!("first link frame was not a hello");
    };

    let Some(server) = store.servers().find_by_id(server_id).await? else {
        anyhow::bail!("unknown server on link");
    };
    if server.mac != mac {
        anyhow::bail!("link hello MAC does not match the server row");
    }
    if !server.is_authorized {
        anyhow::bail!("unauthorized server on link");
    }

    let (sender, mut outbound) = mpsc::channel(LINK_SEND_BUFFER);
    links.register(server_id, sender).await;
    info!(server_id = %server_id, peer = %peer, "site link established");

    let result: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    let mut payload = serde_json::to_vec(&frame)?;
                    payload.push(b'\n');
                    write_half.write_all(&payload).await?;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LinkFrame>(&line) {
                        Ok(LinkFrame::Ping) => {
                            let mut payload = serde_json::to_vec(&LinkFrame::Pong)?;
                            payload.push(b'\n');
                            write_half.write_all(&payload).await?;
                        }
                        Ok(LinkFrame::Pong) => {}
                        Ok(other) => {
                            debug!(server_id = %server_id, frame = ?other, "unexpected inbound link frame");
                        }
                        Err(err) => {
                            warn!(server_id = %server_id, error = %err, "malformed link frame");
                        }
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    links.unregister(server_id).await;
    info!(server_id = %server_id, "site link closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_to_disconnected_site_falls_back_to_poll() {
        let links = Arc::new(LinkRegistry::new());
        let channel = CommandChannel::new(Arc::clone(&links));
        let route = channel
            .send_action(Uuid::new_v4(), ServerAction::Restart)
            .await;
        assert_eq!(route, DeliveryRoute::Poll);
    }

    #[tokio::test]
    async fn push_reaches_a_registered_site() {
        let links = Arc::new(LinkRegistry::new());
        let server_id = Uuid::new_v4();
        let (sender, mut receiver) = mpsc::channel(4);
        links.register(server_id, sender).await;

        let channel = CommandChannel::new(Arc::clone(&links));
        let route = channel.send_action(server_id, ServerAction::Rescan).await;
        assert_eq!(route, DeliveryRoute::Push);
        assert!(matches!(
            receiver.recv().await,
            Some(LinkFrame::ServerAction {
                action: ServerAction::Rescan
            })
        ));

        links.unregister(server_id).await;
        assert!(!links.is_connected(server_id).await);
    }
}
