//! Receiving side of one `split` connection.

use std::sync::{Arc, Weak};
use std::time::Duration;

use splitup_protocol::wire::{read_into, write_message};
use splitup_protocol::{BUFFER_SIZE, OffsetReply, WireError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::ServerError;
use crate::session::{SegmentClaim, UploadSession};
use crate::storage::SegmentStore;

/// Streams one segment into its partial file.
///
/// The partial file's length is replied as the resume offset, then bytes
/// are appended until the segment is full, the peer closes, a read times
/// out, or the claim is cancelled. The slot is released before the caller
/// drops the connection.
pub struct SegmentTransfer {
    session: Weak<UploadSession>,
    uid: String,
    store: SegmentStore,
    claim: SegmentClaim,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SegmentTransfer {
    pub fn new(
        session: &Arc<UploadSession>,
        claim: SegmentClaim,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            session: Arc::downgrade(session),
            uid: session.uid().to_string(),
            store: session.store().clone(),
            claim,
            read_timeout,
            write_timeout,
        }
    }

    pub fn index(&self) -> u64 {
        self.claim.index
    }

    /// Runs the transfer. Returns the segment's stored size on exit.
    pub async fn run<S>(self, stream: &mut S) -> Result<u64, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.receive(stream).await;
        self.release().await;
        result
    }

    async fn receive<S>(&self, stream: &mut S) -> Result<u64, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let index = self.claim.index;
        let expected = self.claim.expected_size;

        let opened = async {
            let offset = self.store.segment_len(&self.uid, index).await?;
            let file = self.store.open_append(&self.uid, index).await?;
            Ok::<_, std::io::Error>((offset, file))
        };
        let (offset, mut file) = match opened.await {
            Ok(v) => v,
            Err(e) => {
                warn!(uid = %self.uid, index, "cannot open segment: {e}");
                let reply = OffsetReply::ServerException.encode();
                let _ = write_message(stream, reply.as_bytes(), self.write_timeout).await;
                return Err(e.into());
            }
        };

        write_message(
            stream,
            OffsetReply::Offset(offset).encode().as_bytes(),
            self.write_timeout,
        )
        .await?;
        info!(uid = %self.uid, index, offset, expected, "segment transfer started");

        let mut size = offset;
        let mut buf = vec![0u8; BUFFER_SIZE];
        let outcome = loop {
            if size >= expected {
                break Ok(());
            }
            let want = (expected - size).min(BUFFER_SIZE as u64) as usize;

            let n = tokio::select! {
                biased;
                _ = self.claim.cancel.cancelled() => {
                    debug!(uid = %self.uid, index, "segment cancelled");
                    break Ok(());
                }
                result = read_into(stream, &mut buf[..want], self.read_timeout) => match result {
                    Ok(0) => break Ok(()),
                    Ok(n) => n,
                    Err(WireError::Timeout) => {
                        warn!(uid = %self.uid, index, size, "segment read timed out");
                        break Ok(());
                    }
                    Err(e) => break Err(ServerError::from(e)),
                },
            };

            if let Err(e) = file.write_all(&buf[..n]).await {
                warn!(uid = %self.uid, index, "segment write failed: {e}");
                let reply = OffsetReply::ServerException.encode();
                let _ = write_message(stream, reply.as_bytes(), self.write_timeout).await;
                break Err(e.into());
            }
            size += n as u64;
        };

        file.flush().await?;
        info!(uid = %self.uid, index, size, expected, "segment transfer ended");
        outcome.map(|()| size)
    }

    async fn release(&self) {
        if let Some(session) = self.session.upgrade() {
            session
                .release_segment(self.claim.index, self.claim.claim_id)
                .await;
        }
    }
}
