//! Per-connection command routing.
//!
//! Every connection starts with `login`, then sends exactly one of:
//! - `big`: becomes the control connection of a new [`UploadSession`]
//! - `split`: becomes the data connection of one segment

use std::net::SocketAddr;
use std::sync::Arc;

use splitup_protocol::wire::{read_message, write_message};
use splitup_protocol::{Command, EndReply, LoginReply, MAX_PROTOCOL_ERRORS, uid_belongs_to};
use splitup_transfer::{SplitPlan, validate_file_name};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ServerError;
use crate::auth::{Authenticator, Identity};
use crate::registry::SessionRegistry;
use crate::segment::SegmentTransfer;
use crate::server::ServerConfig;
use crate::session::UploadSession;
use crate::storage::SegmentStore;

pub(crate) struct Dispatcher {
    config: ServerConfig,
    store: SegmentStore,
    auth: Arc<dyn Authenticator>,
    registry: Arc<dyn SessionRegistry>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        config: ServerConfig,
        auth: Arc<dyn Authenticator>,
        registry: Arc<dyn SessionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let store = SegmentStore::new(config.storage_dir.clone());
        Self {
            config,
            store,
            auth,
            registry,
            cancel,
        }
    }

    pub(crate) fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    /// Serves one accepted connection until it is done with.
    pub(crate) async fn handle<S>(&self, mut stream: S, peer: SocketAddr) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(identity) = self.login(&mut stream, peer).await? else {
            return Ok(());
        };

        let Some(message) = read_message(&mut stream, self.config.read_timeout).await? else {
            debug!(%peer, "closed after login");
            return Ok(());
        };
        match Command::from_bytes(&message)? {
            Command::Big {
                file_name,
                total_size,
            } => {
                self.handle_big(&mut stream, identity, &file_name, total_size)
                    .await
            }
            Command::Split { uid, index } => {
                self.handle_split(&mut stream, &identity, &uid, index).await
            }
            other => Err(ServerError::UnexpectedCommand(other.verb())),
        }
    }

    async fn login<S>(&self, stream: &mut S, peer: SocketAddr) -> Result<Option<Identity>, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(message) = read_message(stream, self.config.login_timeout).await? else {
            return Ok(None);
        };
        let identity = match Command::from_bytes(&message) {
            Ok(Command::Login { user, secret }) => self
                .auth
                .authenticate(&user, &secret)
                .ok_or(ServerError::AuthFailed(user)),
            Ok(other) => Err(ServerError::UnexpectedCommand(other.verb())),
            Err(e) => Err(e.into()),
        };

        let reply = if identity.is_ok() {
            LoginReply::Accepted
        } else {
            LoginReply::Rejected
        };
        write_message(stream, reply.as_str().as_bytes(), self.config.write_timeout).await?;

        let identity = identity?;
        debug!(%peer, %identity, "login accepted");
        Ok(Some(identity))
    }

    async fn handle_big<S>(
        &self,
        stream: &mut S,
        identity: Identity,
        file_name: &str,
        total_size: u64,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        validate_file_name(file_name)?;
        let plan = SplitPlan::new(total_size, self.config.segment_size)?;
        let session = UploadSession::new(identity, file_name, plan, self.store.clone(), &self.cancel);

        if !self.registry.register(Arc::clone(&session)) {
            warn!(uid = session.uid(), "duplicate upload rejected");
            return Err(ServerError::DuplicateUpload(session.uid().to_string()));
        }
        session
            .send_plan(stream, self.config.write_timeout, self.registry.as_ref())
            .await?;
        self.control_loop(stream, &session).await
    }

    /// Serves `stop` and `end` until the upload finishes or is torn down.
    async fn control_loop<S>(&self, stream: &mut S, session: &Arc<UploadSession>) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let registry = self.registry.as_ref();
        let segment_count = session.plan().segment_count();
        let mut errors = 0u32;

        loop {
            if errors >= MAX_PROTOCOL_ERRORS {
                warn!(uid = session.uid(), errors, "too many invalid commands");
                session.stop_all(registry).await;
                return Err(ServerError::TooManyErrors);
            }

            let read = tokio::select! {
                biased;
                _ = session.cancel_token().cancelled() => {
                    session.stop_all(registry).await;
                    return Ok(());
                }
                read = read_message(stream, self.config.idle_timeout) => read,
            };
            let message = match read {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!(uid = session.uid(), "control connection closed");
                    session.stop_all(registry).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(uid = session.uid(), "control connection lost: {e}");
                    session.stop_all(registry).await;
                    return Err(e.into());
                }
            };

            let command = match Command::from_bytes(&message) {
                Ok(command) => command,
                Err(e) => {
                    warn!(uid = session.uid(), "invalid command: {e}");
                    errors += 1;
                    continue;
                }
            };

            match command {
                Command::Stop { uid, index } if uid == session.uid() && index < segment_count => {
                    session.stop_segment(index).await;
                }
                Command::End { uid, index } if uid == session.uid() && index < segment_count => {
                    let reply = session.end_upload(index, registry).await;
                    write_message(stream, reply.as_str().as_bytes(), self.config.write_timeout)
                        .await?;
                    if reply != EndReply::Fail {
                        return Ok(());
                    }
                }
                other => {
                    warn!(uid = session.uid(), command = %other, "command rejected on control connection");
                    errors += 1;
                }
            }
        }
    }

    async fn handle_split<S>(
        &self,
        stream: &mut S,
        identity: &Identity,
        uid: &str,
        index: u64,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let forbidden = || ServerError::Forbidden {
            identity: identity.to_string(),
            uid: uid.to_string(),
        };
        if !uid_belongs_to(uid, identity.as_str()) {
            return Err(forbidden());
        }
        let session = self
            .registry
            .get(uid)
            .ok_or_else(|| ServerError::UnknownSession(uid.to_string()))?;
        if session.owner() != identity {
            return Err(forbidden());
        }

        let claim = session.claim_segment(index).await?;
        SegmentTransfer::new(
            &session,
            claim,
            self.config.read_timeout,
            self.config.write_timeout,
        )
        .run(stream)
        .await
        .map(|_| ())
    }
}
