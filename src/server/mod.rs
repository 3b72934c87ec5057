use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::error;

use crate::config::AppConfig;
use crate::events::{EventPublisher, TransferEvent};
use crate::transfer::{ReceiveHook, serve_connection};
use crate::utils::ensure_dir;

/// Errors surfaced synchronously by `FileServer::start`
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create destination directory {}: {source}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running")]
    AlreadyRunning,
}

struct ServerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The inbound side: binds a listening socket and dispatches every accepted
/// connection to its own receiver task. One instance owns one listener;
/// `start`/`stop` may be called repeatedly in sequence.
pub struct FileServer {
    config: Arc<AppConfig>,
    events: Arc<dyn EventPublisher>,
    hook: Option<Arc<dyn ReceiveHook>>,
    running: Arc<AtomicBool>,
    inner: Mutex<Option<ServerHandle>>,
}

impl FileServer {
    pub fn new(config: Arc<AppConfig>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            config,
            events,
            hook: None,
            running: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(None),
        }
    }

    /// Install a post-receive hook (e.g. the print integration)
    pub fn with_hook(mut self, hook: Arc<dyn ReceiveHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Bind and start accepting. Returns the bound address, which is the
    /// way to learn the port when binding to port 0.
    pub async fn start(&self, ip: IpAddr, port: u16) -> Result<SocketAddr, ServerError> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let dest = self.config.received_dir_path();
        ensure_dir(&dest)
            .await
            .map_err(|source| ServerError::Destination { path: dest, source })?;

        let addr = SocketAddr::new(ip, port);
        let listener = bind_reusable(addr)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.running.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .publish(TransferEvent::ServerStarted { addr: local_addr })
            .await;

        let task = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.events.clone(),
            self.hook.clone(),
            self.running.clone(),
            shutdown_rx,
        ));

        *guard = Some(ServerHandle {
            shutdown: shutdown_tx,
            task,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Close the listening socket and wait for the accept loop to exit.
    /// In-flight receiver tasks are not cancelled; they run to completion
    /// or natural socket error.
    pub async fn stop(&self) {
        let handle = self.inner.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
            self.running.store(false, Ordering::SeqCst);
            let _ = self.events.publish(TransferEvent::ServerStopped).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The address currently bound, if the server is running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().await.as_ref().map(|h| h.local_addr)
    }
}

/// Bind with address reuse so a stop/start cycle can grab the port back
/// immediately.
fn bind_reusable(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let bind_err = |source| ServerError::Bind { addr, source };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(128).map_err(bind_err)
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<AppConfig>,
    events: Arc<dyn EventPublisher>,
    hook: Option<Arc<dyn ReceiveHook>>,
    running: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    // Each connection gets its own task; the accept loop
                    // never waits on a transfer.
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        config.clone(),
                        events.clone(),
                        hook.clone(),
                    ));
                }
                Err(err) => {
                    if running.load(Ordering::SeqCst) {
                        error!("Error accepting connection: {}", err);
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
