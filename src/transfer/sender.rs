use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::AppConfig;
use crate::events::{EventPublisher, TransferEvent};
use crate::protocol::{PROGRESS_INTERVAL, encode_header};
use crate::transfer::TransferError;
use crate::utils::{check_file, get_filename};

/// Outcome of a completed send
#[derive(Debug, Clone)]
pub struct SendReport {
    pub filename: String,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Send one file to `target`: connect with a bounded timeout, write the
/// header, stream the payload in chunks. The connection is closed whether
/// the transfer succeeds or fails, and nothing is retried - the caller
/// decides what happens to the file afterwards.
pub async fn send_file(
    path: &Path,
    target: SocketAddr,
    config: &AppConfig,
    events: &dyn EventPublisher,
) -> Result<SendReport, TransferError> {
    let filename = get_filename(path).ok_or_else(|| {
        TransferError::filesystem(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no filename"),
        )
    })?;

    let result = send_inner(path, &filename, target, config, events).await;
    match &result {
        Ok(report) => {
            let _ = events
                .publish(TransferEvent::SendCompleted {
                    filename: filename.clone(),
                    bytes: report.bytes,
                    elapsed: report.elapsed,
                })
                .await;
        }
        Err(err) => {
            let _ = events
                .publish(TransferEvent::SendFailed {
                    filename: filename.clone(),
                    target,
                    reason: err.to_string(),
                })
                .await;
        }
    }
    result
}

async fn send_inner(
    path: &Path,
    filename: &str,
    target: SocketAddr,
    config: &AppConfig,
    events: &dyn EventPublisher,
) -> Result<SendReport, TransferError> {
    // The file may have vanished between discovery and send (another
    // process, or the user, grabbed it first).
    let file_size = check_file(path)
        .await
        .map_err(|source| TransferError::filesystem(path, source))?;

    let _ = events
        .publish(TransferEvent::SendStarted {
            filename: filename.to_string(),
            target,
            size: file_size,
        })
        .await;

    let header = encode_header(filename, file_size)?;

    let mut stream = match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(target))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransferError::Connect { addr: target, source }),
        Err(_) => {
            return Err(TransferError::ConnectTimeout {
                addr: target,
                seconds: config.connect_timeout_seconds,
            });
        }
    };

    stream
        .write_all(&header)
        .await
        .map_err(|source| TransferError::Stream {
            context: "sending header",
            source,
        })?;

    let mut file = File::open(path)
        .await
        .map_err(|source| TransferError::filesystem(path, source))?;

    let started = Instant::now();
    let mut buf = vec![0u8; config.chunk_size];
    let mut sent: u64 = 0;
    let mut next_progress = PROGRESS_INTERVAL;

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|source| TransferError::filesystem(path, source))?;
        if n == 0 {
            break;
        }
        stream
            .write_all(&buf[..n])
            .await
            .map_err(|source| TransferError::Stream {
                context: "sending payload",
                source,
            })?;
        sent += n as u64;
        if sent >= next_progress {
            let _ = events
                .publish(TransferEvent::SendProgress {
                    filename: filename.to_string(),
                    sent,
                    total: file_size,
                })
                .await;
            next_progress += PROGRESS_INTERVAL;
        }
    }

    // A file truncated underneath us leaves the receiver waiting for bytes
    // that will never come; fail loudly instead of pretending.
    if sent != file_size {
        return Err(TransferError::Incomplete {
            filename: filename.to_string(),
            sent,
            expected: file_size,
        });
    }

    stream
        .shutdown()
        .await
        .map_err(|source| TransferError::Stream {
            context: "closing connection",
            source,
        })?;

    Ok(SendReport {
        filename: filename.to_string(),
        bytes: sent,
        elapsed: started.elapsed(),
    })
}
