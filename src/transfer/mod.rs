pub mod receiver;
pub mod sender;

// Re-exports for easier access from crate::transfer::{...}
pub use receiver::{ReceiveOutcome, ReceivedFile, serve_connection};
pub use sender::{SendReport, send_file};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{EncodingError, FrameError};

/// Failures of a single transfer, caught and logged at the task boundary -
/// one bad transfer never takes down the listener or the watcher.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("header field overflow: {0}")]
    Encoding(#[from] EncodingError),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out after {seconds}s")]
    ConnectTimeout { addr: SocketAddr, seconds: u64 },

    #[error("timed out waiting for data from {peer}")]
    ReadTimeout { peer: SocketAddr },

    #[error("{context}: {source}")]
    Stream {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("incomplete transfer of {filename}: sent {sent} of {expected} bytes")]
    Incomplete {
        filename: String,
        sent: u64,
        expected: u64,
    },
}

impl TransferError {
    pub(crate) fn filesystem(path: &Path, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Capability invoked after a file lands completely, selected by extension.
/// The printer integration of the GUI layer implements this; the receiver
/// only calls it.
#[async_trait]
pub trait ReceiveHook: Send + Sync {
    async fn on_file_received(&self, path: &Path, extension: &str);
}
