//! Server side of the splitup protocol.
//!
//! A client opens one control connection per upload (`big`) and one extra
//! connection per segment (`split`). The control connection owns an
//! [`UploadSession`] registered under its uid; every segment connection
//! claims a slot of that session and streams bytes into a partial file in
//! the [`SegmentStore`]. On `end` the session re-derives completeness from
//! disk and assembles the final file.

mod auth;
mod dispatch;
mod registry;
mod segment;
mod server;
mod session;
mod storage;

pub use auth::{Authenticator, DEFAULT_SECRET, DEFAULT_USER, Identity, StaticAuthenticator};
pub use registry::{InMemoryRegistry, SessionRegistry};
pub use segment::SegmentTransfer;
pub use server::{DEFAULT_PORT, ServerConfig, UploadServer};
pub use session::{ClaimError, SegmentClaim, SessionState, UploadSession};
pub use storage::SegmentStore;

use splitup_protocol::{ProtocolError, WireError};
use splitup_transfer::TransferError;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Transfer(#[from] TransferError),

    #[error("authentication failed for {0:?}")]
    AuthFailed(String),

    #[error("upload already in progress: {0}")]
    DuplicateUpload(String),

    #[error("no live session for {0}")]
    UnknownSession(String),

    #[error("{identity} may not access {uid}")]
    Forbidden { identity: String, uid: String },

    #[error("claim rejected: {0}")]
    Claim(#[from] ClaimError),

    #[error("unexpected command: {0}")]
    UnexpectedCommand(&'static str),

    #[error("too many invalid commands")]
    TooManyErrors,

    #[error("assembled file has {actual} bytes, expected {expected}")]
    Completeness { expected: u64, actual: u64 },
}
