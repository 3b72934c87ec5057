use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::config::AppConfig;
use crate::events::{EventPublisher, TransferEvent};
use crate::protocol::{
    FILE_SIZE_FIELD, NAME_LEN_FIELD, PROGRESS_INTERVAL, decode_file_size, decode_filename,
    decode_name_len, read_field, sanitize_filename,
};
use crate::transfer::{ReceiveHook, TransferError};
use crate::utils::generate_id;

/// A file fully materialized on disk
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// How a connection ended
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Peer connected and closed without sending a header byte
    Disconnected,
    /// Full payload landed on disk
    Complete(ReceivedFile),
    /// Connection dropped mid-payload; the partial file is left on disk
    /// for inspection, never promoted as a success
    Truncated {
        filename: String,
        path: PathBuf,
        received: u64,
        expected: u64,
    },
}

/// Task entry point for one accepted connection. Runs the receive state
/// machine, invokes the post-receive hook on success, and logs failures -
/// errors never propagate past this boundary.
pub async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: Arc<AppConfig>,
    events: Arc<dyn EventPublisher>,
    hook: Option<Arc<dyn ReceiveHook>>,
) {
    match receive_file(&mut stream, peer, &config, events.as_ref()).await {
        Ok(ReceiveOutcome::Complete(file)) => {
            if let Some(hook) = hook {
                let extension = file
                    .path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if config
                    .print_extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&extension))
                {
                    hook.on_file_received(&file.path, &extension).await;
                }
            }
        }
        Ok(ReceiveOutcome::Disconnected) => {
            debug!("Client {} disconnected before sending a header", peer);
        }
        Ok(ReceiveOutcome::Truncated { .. }) => {}
        Err(err) => {
            error!("Error handling client {}: {}", peer, err);
            let _ = events
                .publish(TransferEvent::ReceiveFailed {
                    peer,
                    reason: err.to_string(),
                })
                .await;
        }
    }
}

/// Receive one framed file transfer from the stream.
///
/// State machine: name length -> name -> size -> payload. Any decode
/// failure or short header read aborts the transfer; an empty first read is
/// a clean disconnect, not an error.
pub async fn receive_file(
    stream: &mut TcpStream,
    peer: SocketAddr,
    config: &AppConfig,
    events: &dyn EventPublisher,
) -> Result<ReceiveOutcome, TransferError> {
    let transfer_id = generate_id();
    let read_timeout = config.read_timeout();

    let _ = events.publish(TransferEvent::PeerConnected { peer }).await;

    // AWAIT_NAME_LEN
    let mut len_buf = [0u8; NAME_LEN_FIELD];
    let got = timed_read(stream, &mut len_buf, read_timeout, peer).await?;
    if got == 0 {
        return Ok(ReceiveOutcome::Disconnected);
    }
    let name_len = decode_name_len(&len_buf[..got])?;

    // AWAIT_NAME
    let mut name_buf = vec![0u8; name_len];
    let got = timed_read(stream, &mut name_buf, read_timeout, peer).await?;
    let filename = decode_filename(&name_buf[..got], name_len)?;
    sanitize_filename(&filename)?;

    // AWAIT_SIZE
    let mut size_buf = [0u8; FILE_SIZE_FIELD];
    let got = timed_read(stream, &mut size_buf, read_timeout, peer).await?;
    // A size of zero is a legal empty file; only a short or non-numeric
    // field is malformed.
    let file_size = decode_file_size(&size_buf[..got])?;

    let _ = events
        .publish(TransferEvent::ReceiveStarted {
            transfer_id: transfer_id.clone(),
            peer,
            filename: filename.clone(),
            size: file_size,
        })
        .await;

    // AWAIT_PAYLOAD
    let dest = resolve_destination(&config.received_dir_path(), &filename).await;
    let mut file = File::create(&dest)
        .await
        .map_err(|source| TransferError::filesystem(&dest, source))?;

    let started = Instant::now();
    let mut buf = vec![0u8; config.chunk_size];
    let mut received: u64 = 0;
    let mut next_progress = PROGRESS_INTERVAL;

    while received < file_size {
        let want = std::cmp::min(buf.len() as u64, file_size - received) as usize;
        let n = timed_read(stream, &mut buf[..want], read_timeout, peer).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|source| TransferError::filesystem(&dest, source))?;
        received += n as u64;
        if received >= next_progress {
            let _ = events
                .publish(TransferEvent::ReceiveProgress {
                    transfer_id: transfer_id.clone(),
                    filename: filename.clone(),
                    received,
                    total: file_size,
                })
                .await;
            next_progress += PROGRESS_INTERVAL;
        }
    }

    file.flush()
        .await
        .map_err(|source| TransferError::filesystem(&dest, source))?;

    if received < file_size {
        let _ = events
            .publish(TransferEvent::ReceiveIncomplete {
                transfer_id,
                filename: filename.clone(),
                received,
                expected: file_size,
            })
            .await;
        return Ok(ReceiveOutcome::Truncated {
            filename,
            path: dest,
            received,
            expected: file_size,
        });
    }

    let _ = events
        .publish(TransferEvent::ReceiveCompleted {
            transfer_id,
            filename: filename.clone(),
            path: dest.clone(),
            bytes: received,
            elapsed: started.elapsed(),
        })
        .await;

    Ok(ReceiveOutcome::Complete(ReceivedFile {
        filename,
        path: dest,
        bytes: received,
    }))
}

/// Pick a destination path that does not clobber an existing file: `x.txt`
/// becomes `x_1.txt`, then `x_2.txt`, until a free name is found.
async fn resolve_destination(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    };

    let mut n = 1u32;
    loop {
        let name = match extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

async fn timed_read<R>(
    stream: &mut R,
    buf: &mut [u8],
    timeout: Duration,
    peer: SocketAddr,
) -> Result<usize, TransferError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_field(stream, buf)).await {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(source)) => Err(TransferError::Stream {
            context: "reading from peer",
            source,
        }),
        Err(_) => Err(TransferError::ReadTimeout { peer }),
    }
}
