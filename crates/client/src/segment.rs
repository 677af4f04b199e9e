//! Uploading one segment over its own connection.

use std::io::SeekFrom;
use std::path::Path;

use splitup_protocol::wire::{read_message, write_message};
use splitup_protocol::{BUFFER_SIZE, Command, OffsetReply, reply};
use splitup_transfer::{ProgressMeter, SplitPlan, TransferError};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::ClientError;
use crate::connect::open_session;
use crate::uploader::ClientConfig;

/// Uploads segment `index` of `path`, resuming where the server left off.
///
/// Returns the number of bytes of the segment the server now holds, as far
/// as this task knows. After the last byte the write side is shut down and
/// the task waits for the server to close, so the data is on disk when
/// this returns.
pub async fn upload_segment(
    config: &ClientConfig,
    path: &Path,
    uid: &str,
    plan: SplitPlan,
    index: u64,
    meter: &ProgressMeter,
) -> Result<u64, ClientError> {
    let range = plan.segment_range(index).ok_or_else(|| {
        TransferError::InvalidPlan(format!(
            "segment {index} out of range (count {})",
            plan.segment_count()
        ))
    })?;
    let quota = range.end - range.start;

    let mut stream = open_session(config).await?;
    let command = Command::Split {
        uid: uid.to_string(),
        index,
    };
    write_message(&mut stream, command.encode()?.as_bytes(), config.write_timeout).await?;

    let message = read_message(&mut stream, config.read_timeout)
        .await?
        .ok_or(ClientError::ServerClosed)?;
    let offset = match OffsetReply::parse(reply::reply_text(&message)?)? {
        OffsetReply::Offset(offset) => offset.min(quota),
        OffsetReply::ServerException => return Err(ClientError::ServerException),
    };
    meter.record(index as usize, offset);
    debug!(uid, index, offset, quota, "segment resume offset");

    let mut sent = 0u64;
    if offset < quota {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(range.start + offset)).await?;

        let mut buf = vec![0u8; BUFFER_SIZE];
        while offset + sent < quota {
            let want = (quota - offset - sent).min(BUFFER_SIZE as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                warn!(uid, index, "local file ended before segment was complete");
                break;
            }
            write_message(&mut stream, &buf[..n], config.write_timeout).await?;
            sent += n as u64;
            meter.record(index as usize, offset + sent);
        }
    }

    stream.shutdown().await?;
    wait_for_close(&mut stream, config).await;

    info!(uid, index, offset, sent, "segment uploaded");
    Ok(offset + sent)
}

/// Waits until the server closes its side, meaning the segment is flushed.
async fn wait_for_close(stream: &mut tokio::net::TcpStream, config: &ClientConfig) {
    loop {
        match read_message(stream, config.close_timeout).await {
            Ok(None) => return,
            Ok(Some(unexpected)) => {
                debug!(len = unexpected.len(), "ignoring data after segment upload");
            }
            Err(e) => {
                warn!("server did not close segment connection: {e}");
                return;
            }
        }
    }
}
