use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock as SyncRwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{RwLock, mpsc};
use tracing::{error, info, warn};

use crate::utils::format_size;

/// Result type for event operations
pub type EventResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Lifecycle events emitted by the transfer engine.
///
/// The GUI layer (out of scope here) consumes these through a subscribed
/// handler; `LoggingEventHandler` renders them as timestamped log lines.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    ServerStarted { addr: SocketAddr },
    ServerStopped,
    PeerConnected { peer: SocketAddr },
    ReceiveStarted {
        transfer_id: String,
        peer: SocketAddr,
        filename: String,
        size: u64,
    },
    ReceiveProgress {
        transfer_id: String,
        filename: String,
        received: u64,
        total: u64,
    },
    ReceiveCompleted {
        transfer_id: String,
        filename: String,
        path: PathBuf,
        bytes: u64,
        elapsed: Duration,
    },
    ReceiveIncomplete {
        transfer_id: String,
        filename: String,
        received: u64,
        expected: u64,
    },
    ReceiveFailed { peer: SocketAddr, reason: String },
    SendStarted {
        filename: String,
        target: SocketAddr,
        size: u64,
    },
    SendProgress {
        filename: String,
        sent: u64,
        total: u64,
    },
    SendCompleted {
        filename: String,
        bytes: u64,
        elapsed: Duration,
    },
    SendFailed {
        filename: String,
        target: SocketAddr,
        reason: String,
    },
    FileQueued { filename: String, staged_to: PathBuf },
    WatcherStarted { dir: PathBuf, target: SocketAddr },
    WatcherStopped,
}

/// Handler trait for transfer events
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: TransferEvent) -> EventResult<()>;
}

/// Publisher trait for emitting transfer events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: TransferEvent) -> EventResult<()>;
    fn subscribe(&self, handler: Box<dyn EventHandler>) -> EventResult<()>;
}

type HandlerList = Arc<SyncRwLock<Vec<Arc<dyn EventHandler>>>>;

fn snapshot(handlers: &HandlerList) -> Vec<Arc<dyn EventHandler>> {
    handlers.read().expect("handler list lock poisoned").clone()
}

async fn dispatch(handlers: Vec<Arc<dyn EventHandler>>, event: TransferEvent) {
    let futures = handlers.into_iter().map(|h| {
        let ev = event.clone();
        async move { h.handle_event(ev).await }
    });
    for res in join_all(futures).await {
        if let Err(e) = res {
            error!("Error in event handler: {}", e);
        }
    }
}

/// In-memory event publisher for testing and development
pub struct InMemoryEventPublisher {
    handlers: HandlerList,
    event_log: Arc<RwLock<Vec<TransferEvent>>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(SyncRwLock::new(Vec::new())),
            event_log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get all events that have been published (for testing)
    pub async fn get_events(&self) -> Vec<TransferEvent> {
        self.event_log.read().await.clone()
    }

    /// Clear the event log
    pub async fn clear_events(&self) {
        self.event_log.write().await.clear();
    }
}

impl Default for InMemoryEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: TransferEvent) -> EventResult<()> {
        self.event_log.write().await.push(event.clone());
        dispatch(snapshot(&self.handlers), event).await;
        Ok(())
    }

    fn subscribe(&self, handler: Box<dyn EventHandler>) -> EventResult<()> {
        self.handlers
            .write()
            .expect("handler list lock poisoned")
            .push(Arc::from(handler));
        Ok(())
    }
}

/// Async event publisher using a channel so emitters never wait on handlers
pub struct ChannelEventPublisher {
    event_tx: mpsc::UnboundedSender<TransferEvent>,
    handlers: HandlerList,
}

impl ChannelEventPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let publisher = Self {
            event_tx,
            handlers: Arc::new(SyncRwLock::new(Vec::new())),
        };

        (publisher, event_rx)
    }

    /// The handler list, for handing to `start_processing`
    pub fn handlers(&self) -> HandlerList {
        self.handlers.clone()
    }

    /// Drain the event channel, fanning each event out to all handlers.
    /// Runs until every sender is dropped.
    pub async fn start_processing(
        mut event_rx: mpsc::UnboundedReceiver<TransferEvent>,
        handlers: HandlerList,
    ) {
        while let Some(event) = event_rx.recv().await {
            dispatch(snapshot(&handlers), event).await;
        }
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: TransferEvent) -> EventResult<()> {
        self.event_tx
            .send(event)
            .map_err(|e| format!("Failed to publish event: {}", e).into())
    }

    fn subscribe(&self, handler: Box<dyn EventHandler>) -> EventResult<()> {
        self.handlers
            .write()
            .expect("handler list lock poisoned")
            .push(Arc::from(handler));
        Ok(())
    }
}

fn rate_kb_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    bytes as f64 / if secs > 0.0 { secs } else { 1.0 } / 1024.0
}

/// Event handler that renders transfer events as log lines
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: TransferEvent) -> EventResult<()> {
        match &event {
            TransferEvent::ServerStarted { addr } => {
                info!("Server started on {}", addr);
            }
            TransferEvent::ServerStopped => {
                info!("Server stopped");
            }
            TransferEvent::PeerConnected { peer } => {
                info!("New connection from {}", peer);
            }
            TransferEvent::ReceiveStarted {
                transfer_id,
                peer,
                filename,
                size,
            } => {
                info!(
                    "[{}] Receiving file {} ({}) from {}",
                    transfer_id,
                    filename,
                    format_size(*size),
                    peer
                );
            }
            TransferEvent::ReceiveProgress {
                transfer_id,
                received,
                total,
                ..
            } => {
                info!("[{}] Received {}/{} bytes", transfer_id, received, total);
            }
            TransferEvent::ReceiveCompleted {
                transfer_id,
                filename,
                bytes,
                elapsed,
                ..
            } => {
                info!(
                    "[{}] File {} received successfully ({:.1} KB/s)",
                    transfer_id,
                    filename,
                    rate_kb_per_sec(*bytes, *elapsed)
                );
            }
            TransferEvent::ReceiveIncomplete {
                transfer_id,
                filename,
                received,
                expected,
            } => {
                warn!(
                    "[{}] Incomplete file {} - got {}/{} bytes",
                    transfer_id, filename, received, expected
                );
            }
            TransferEvent::ReceiveFailed { peer, reason } => {
                error!("Error handling client {}: {}", peer, reason);
            }
            TransferEvent::SendStarted {
                filename,
                target,
                size,
            } => {
                info!(
                    "Sending file: {} ({}) to {}",
                    filename,
                    format_size(*size),
                    target
                );
            }
            TransferEvent::SendProgress {
                filename,
                sent,
                total,
            } => {
                info!("Sent {}/{} bytes of {}", sent, total, filename);
            }
            TransferEvent::SendCompleted {
                filename,
                bytes,
                elapsed,
            } => {
                info!(
                    "File {} sent successfully ({:.1} KB/s)",
                    filename,
                    rate_kb_per_sec(*bytes, *elapsed)
                );
            }
            TransferEvent::SendFailed {
                filename,
                target,
                reason,
            } => {
                error!("Failed to send {} to {}: {}", filename, target, reason);
            }
            TransferEvent::FileQueued {
                filename,
                staged_to,
            } => {
                info!("Moved {} to {}", filename, staged_to.display());
            }
            TransferEvent::WatcherStarted { dir, target } => {
                info!(
                    "Watching {} for files to send to {}",
                    dir.display(),
                    target
                );
            }
            TransferEvent::WatcherStopped => {
                info!("Watcher stopped");
            }
        }
        Ok(())
    }
}
