//! Per-upload state machine.
//!
//! ```text
//! Created -> PlanSent -> Receiving -> Assembling -> Completed
//!                                              \-> Failed
//! ```
//!
//! `Failed` is also reached from any earlier state by [`UploadSession::stop_all`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use splitup_protocol::wire::write_message;
use splitup_protocol::{EndReply, PlanReply, upload_uid};
use splitup_transfer::{SplitPlan, calculate_file_checksum};
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ServerError;
use crate::auth::Identity;
use crate::registry::SessionRegistry;
use crate::storage::SegmentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    PlanSent,
    Receiving,
    Assembling,
    Completed,
    Failed,
}

impl SessionState {
    fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a `split` could not claim a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("segment {index} out of range (count {count})")]
    OutOfRange { index: u64, count: u64 },

    #[error("segment {0} already has a transfer")]
    Occupied(u64),

    #[error("session is {0:?}")]
    NotReceiving(SessionState),
}

/// Handle for one claimed segment slot.
#[derive(Debug, Clone)]
pub struct SegmentClaim {
    pub index: u64,
    pub claim_id: u64,
    pub expected_size: u64,
    /// Child of the session token: cancelled by `stop`, `stop_all` and shutdown.
    pub cancel: CancellationToken,
}

struct Slot {
    claim_id: u64,
    cancel: CancellationToken,
}

struct Inner {
    state: SessionState,
    slots: Vec<Option<Slot>>,
}

/// One upload (`big`) and its segment slots.
pub struct UploadSession {
    uid: String,
    owner: Identity,
    plan: SplitPlan,
    store: SegmentStore,
    cancel: CancellationToken,
    next_claim: AtomicU64,
    inner: Mutex<Inner>,
}

impl UploadSession {
    /// Creates a session for `file_name`. Its token is a child of `parent`.
    pub fn new(
        owner: Identity,
        file_name: &str,
        plan: SplitPlan,
        store: SegmentStore,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let count = plan.segment_count() as usize;
        Arc::new(Self {
            uid: upload_uid(owner.as_str(), file_name),
            owner,
            plan,
            store,
            cancel: parent.child_token(),
            next_claim: AtomicU64::new(1),
            inner: Mutex::new(Inner {
                state: SessionState::Created,
                slots: (0..count).map(|_| None).collect(),
            }),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn plan(&self) -> SplitPlan {
        self.plan
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Number of slots currently held by a transfer.
    pub async fn active_segments(&self) -> usize {
        self.inner.lock().await.slots.iter().flatten().count()
    }

    /// Replies `"<segment_size> <uid>"`. A failed write tears the session down.
    pub async fn send_plan<W: AsyncWrite + Unpin>(
        self: &Arc<Self>,
        writer: &mut W,
        timeout: Duration,
        registry: &dyn SessionRegistry,
    ) -> Result<(), ServerError> {
        let reply = PlanReply {
            segment_size: self.plan.segment_size(),
            uid: self.uid.clone(),
        };
        if let Err(e) = write_message(writer, reply.encode().as_bytes(), timeout).await {
            warn!(uid = %self.uid, "failed to send split plan: {e}");
            self.stop_all(registry).await;
            return Err(e.into());
        }

        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Created {
            inner.state = SessionState::PlanSent;
        }
        info!(
            uid = %self.uid,
            total = self.plan.total_size(),
            segment_size = self.plan.segment_size(),
            segments = self.plan.segment_count(),
            "split plan sent"
        );
        Ok(())
    }

    /// Reserves slot `index` for a new segment transfer.
    pub async fn claim_segment(&self, index: u64) -> Result<SegmentClaim, ClaimError> {
        let mut inner = self.inner.lock().await;
        if self.cancel.is_cancelled() && !inner.state.is_finished() {
            inner.state = SessionState::Failed;
        }
        match inner.state {
            SessionState::Created | SessionState::PlanSent | SessionState::Receiving => {}
            other => return Err(ClaimError::NotReceiving(other)),
        }

        let count = self.plan.segment_count();
        let expected_size = self
            .plan
            .expected_size(index)
            .ok_or(ClaimError::OutOfRange { index, count })?;
        let slot = &mut inner.slots[index as usize];
        if slot.is_some() {
            return Err(ClaimError::Occupied(index));
        }

        let claim_id = self.next_claim.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        *slot = Some(Slot {
            claim_id,
            cancel: cancel.clone(),
        });
        inner.state = SessionState::Receiving;
        debug!(uid = %self.uid, index, claim_id, "segment claimed");

        Ok(SegmentClaim {
            index,
            claim_id,
            expected_size,
            cancel,
        })
    }

    /// Frees slot `index` if it is still held by `claim_id`.
    pub async fn release_segment(&self, index: u64, claim_id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.slots.get_mut(index as usize) {
            Some(slot) if slot.as_ref().is_some_and(|s| s.claim_id == claim_id) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Cancels and clears slot `index`. Returns `false` if the index is out of range.
    pub async fn stop_segment(&self, index: u64) -> bool {
        let mut inner = self.inner.lock().await;
        self.clear_slot(&mut inner, index)
    }

    fn clear_slot(&self, inner: &mut Inner, index: u64) -> bool {
        let Some(slot) = inner.slots.get_mut(index as usize) else {
            return false;
        };
        if let Some(occupant) = slot.take() {
            occupant.cancel.cancel();
            info!(uid = %self.uid, index, "segment stopped");
        }
        true
    }

    /// Tears the session down: unregisters it and cancels every transfer.
    pub async fn stop_all(self: &Arc<Self>, registry: &dyn SessionRegistry) {
        let mut inner = self.inner.lock().await;
        registry.remove_session(self);
        self.cancel.cancel();
        for occupant in inner.slots.iter_mut().filter_map(Option::take) {
            occupant.cancel.cancel();
        }
        if !inner.state.is_finished() {
            inner.state = SessionState::Failed;
        }
        info!(uid = %self.uid, state = ?inner.state, "session stopped");
    }

    /// True iff the stored segments add up to the total size.
    pub async fn check_complete(&self) -> bool {
        let stored = self
            .store
            .stored_bytes(&self.uid, self.plan.segment_count())
            .await;
        debug!(uid = %self.uid, stored, total = self.plan.total_size(), "completeness check");
        stored == self.plan.total_size()
    }

    /// Handles `end <uid> <index>`.
    ///
    /// Clears slot `index`, then checks completeness. An incomplete upload
    /// answers [`EndReply::Fail`] and stays live; otherwise the file is
    /// assembled and the session finishes either way.
    ///
    /// The check and the move to `Assembling` happen under the session lock,
    /// so no `split` can claim a slot in between.
    pub async fn end_upload(
        self: &Arc<Self>,
        index: u64,
        registry: &dyn SessionRegistry,
    ) -> EndReply {
        {
            let mut inner = self.inner.lock().await;
            self.clear_slot(&mut inner, index);
            if !self.check_complete().await {
                info!(uid = %self.uid, "end requested but upload incomplete");
                return EndReply::Fail;
            }
            inner.state = SessionState::Assembling;
        }
        let outcome = self.assemble().await;

        let mut inner = self.inner.lock().await;
        registry.remove_session(self);
        self.cancel.cancel();
        match outcome {
            Ok(()) => {
                inner.state = SessionState::Completed;
                EndReply::Success
            }
            Err(e) => {
                warn!(uid = %self.uid, "assembly failed: {e}");
                inner.state = SessionState::Failed;
                EndReply::AssemblyFail
            }
        }
    }

    /// Concatenates all segments, verifies the result and removes the parts.
    pub async fn assemble(&self) -> Result<(), ServerError> {
        let count = self.plan.segment_count();
        let written = self.store.assemble(&self.uid, count).await?;
        if written != self.plan.total_size() {
            return Err(ServerError::Completeness {
                expected: self.plan.total_size(),
                actual: written,
            });
        }

        let path = self.store.assembled_path(&self.uid);
        let actual = tokio::fs::metadata(&path).await?.len();
        if actual != self.plan.total_size() {
            return Err(ServerError::Completeness {
                expected: self.plan.total_size(),
                actual,
            });
        }

        let sha256 = calculate_file_checksum(&path).await?;
        info!(uid = %self.uid, size = actual, %sha256, "upload assembled");

        self.store.remove_segments(&self.uid, count).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use splitup_protocol::wire::read_message;
    use tempfile::TempDir;

    const T: Duration = Duration::from_secs(1);

    fn new_session(dir: &TempDir, total: u64, segment: u64) -> Arc<UploadSession> {
        UploadSession::new(
            Identity::new("client"),
            "data.bin",
            SplitPlan::new(total, segment).unwrap(),
            SegmentStore::new(dir.path()),
            &CancellationToken::new(),
        )
    }

    fn write_segment(session: &UploadSession, index: u64, data: &[u8]) {
        std::fs::write(session.store().segment_path(session.uid(), index), data).unwrap();
    }

    #[tokio::test]
    async fn slots_match_segment_count() {
        let dir = TempDir::new().unwrap();
        let session = new_session(&dir, 2500, 1024);
        assert_eq!(session.uid(), "client_data.bin");
        assert_eq!(session.state().await, SessionState::Created);

        let last = session.claim_segment(2).await.unwrap();
        assert_eq!(last.expected_size, 452);
        assert_eq!(
            session.claim_segment(3).await.unwrap_err(),
            ClaimError::OutOfRange { index: 3, count: 3 }
        );
        assert_eq!(session.state().await, SessionState::Receiving);
    }

    #[tokio::test]
    async fn occupied_slot_rejects_second_claim() {
        let dir = TempDir::new().unwrap();
        let session = new_session(&dir, 3000, 1000);
        let claim = session.claim_segment(1).await.unwrap();
        assert_eq!(
            session.claim_segment(1).await.unwrap_err(),
            ClaimError::Occupied(1)
        );

        // A stale claim id cannot free the slot.
        assert!(!session.release_segment(1, claim.claim_id + 100).await);
        assert!(session.release_segment(1, claim.claim_id).await);
        assert!(session.claim_segment(1).await.is_ok());
    }

    #[tokio::test]
    async fn stop_segment_cancels_occupant() {
        let dir = TempDir::new().unwrap();
        let session = new_session(&dir, 3000, 1000);
        let claim = session.claim_segment(0).await.unwrap();

        assert!(session.stop_segment(0).await);
        assert!(claim.cancel.is_cancelled());
        assert_eq!(session.active_segments().await, 0);
        assert!(!session.stop_segment(9).await);
        // Stopping an empty slot is harmless.
        assert!(session.stop_segment(0).await);
    }

    #[tokio::test]
    async fn stop_all_unregisters_and_cancels() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let session = new_session(&dir, 3000, 1000);
        assert!(registry.register(Arc::clone(&session)));
        let a = session.claim_segment(0).await.unwrap();
        let b = session.claim_segment(2).await.unwrap();

        session.stop_all(&registry).await;

        assert!(registry.is_empty());
        assert!(a.cancel.is_cancelled() && b.cancel.is_cancelled());
        assert_eq!(session.state().await, SessionState::Failed);
        assert_eq!(
            session.claim_segment(1).await.unwrap_err(),
            ClaimError::NotReceiving(SessionState::Failed)
        );
    }

    #[tokio::test]
    async fn send_plan_replies_segment_size_and_uid() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let session = new_session(&dir, 3000, 1000);
        registry.register(Arc::clone(&session));

        let (mut server, mut client) = tokio::io::duplex(1024);
        session.send_plan(&mut server, T, &registry).await.unwrap();
        let reply = read_message(&mut client, T).await.unwrap().unwrap();
        assert_eq!(reply, b"1000 client_data.bin");
        assert_eq!(session.state().await, SessionState::PlanSent);
    }

    #[tokio::test]
    async fn failed_plan_write_discards_session() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let session = new_session(&dir, 3000, 1000);
        registry.register(Arc::clone(&session));

        let (mut server, client) = tokio::io::duplex(1024);
        drop(client);
        assert!(session.send_plan(&mut server, T, &registry).await.is_err());
        assert!(registry.is_empty());
        assert_eq!(session.state().await, SessionState::Failed);
    }

    #[tokio::test]
    async fn check_complete_needs_every_byte() {
        let dir = TempDir::new().unwrap();
        let session = new_session(&dir, 3000, 1000);
        assert!(!session.check_complete().await);

        write_segment(&session, 0, &[0u8; 1000]);
        write_segment(&session, 2, &[0u8; 1000]);
        assert!(!session.check_complete().await);

        write_segment(&session, 1, &[0u8; 999]);
        assert!(!session.check_complete().await);

        write_segment(&session, 1, &[0u8; 1000]);
        assert!(session.check_complete().await);
    }

    #[tokio::test]
    async fn end_on_incomplete_upload_keeps_session() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let session = new_session(&dir, 3000, 1000);
        registry.register(Arc::clone(&session));
        write_segment(&session, 0, &[0u8; 1000]);

        assert_eq!(session.end_upload(0, &registry).await, EndReply::Fail);
        assert_eq!(registry.len(), 1);
        assert!(!session.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn end_assembles_and_finishes() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let session = new_session(&dir, 2500, 1024);
        registry.register(Arc::clone(&session));

        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        write_segment(&session, 0, &data[..1024]);
        write_segment(&session, 1, &data[1024..2048]);
        write_segment(&session, 2, &data[2048..]);

        assert_eq!(session.end_upload(0, &registry).await, EndReply::Success);
        assert_eq!(session.state().await, SessionState::Completed);
        assert!(registry.is_empty());

        let assembled = std::fs::read(session.store().assembled_path(session.uid())).unwrap();
        assert_eq!(assembled, data);
        for index in 0..3 {
            assert!(!session.store().segment_path(session.uid(), index).exists());
        }
    }

    #[tokio::test]
    async fn claim_racing_end_never_lands_after_completeness_check() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let session = new_session(&dir, 2000, 1000);
        registry.register(Arc::clone(&session));
        write_segment(&session, 0, &[1u8; 1000]);
        write_segment(&session, 1, &[2u8; 1000]);

        let (reply, claim) = tokio::join!(session.end_upload(0, &registry), async {
            tokio::task::yield_now().await;
            session.claim_segment(1).await
        });

        assert_eq!(reply, EndReply::Success);
        assert!(matches!(
            claim,
            Err(ClaimError::NotReceiving(SessionState::Assembling | SessionState::Completed))
        ));
        assert_eq!(session.active_segments().await, 0);
    }

    #[tokio::test]
    async fn missing_segment_with_padded_sibling_fails_assembly() {
        let dir = TempDir::new().unwrap();
        let registry = InMemoryRegistry::new();
        let session = new_session(&dir, 2000, 1000);
        registry.register(Arc::clone(&session));

        // Sizes add up, but segment 1 is absent.
        write_segment(&session, 0, &[0u8; 2000]);

        assert_eq!(session.end_upload(0, &registry).await, EndReply::AssemblyFail);
        assert_eq!(session.state().await, SessionState::Failed);
        assert!(registry.is_empty());
    }
}
