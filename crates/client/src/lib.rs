//! Client side of the splitup protocol.
//!
//! [`Uploader::upload`] negotiates a split plan on a control connection,
//! uploads every segment over its own connection in parallel, and asks the
//! server to assemble. Rounds repeat until the server confirms; each
//! segment resumes from the offset the server reports, so a round only
//! resends what is missing.

mod connect;
mod policy;
mod segment;
mod uploader;

pub use connect::{dial, login, open_session};
pub use policy::{ConnectPolicy, RoundPolicy};
pub use segment::upload_segment;
pub use uploader::{ClientConfig, UploadError, UploadReport, Uploader};

use splitup_protocol::{ProtocolError, WireError};
use splitup_transfer::TransferError;

/// Errors produced by the upload client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Transfer(#[from] TransferError),

    #[error("could not connect to {addr} after {attempts} attempts")]
    Connect { addr: String, attempts: u32 },

    #[error("server rejected credentials")]
    AuthRejected,

    #[error("server closed the connection")]
    ServerClosed,

    #[error("server could not open the segment")]
    ServerException,

    #[error("invalid local file: {0}")]
    InvalidFile(String),

    #[error("server changed the split plan")]
    PlanChanged,

    #[error("server failed to assemble the upload")]
    AssemblyFailed,

    #[error("upload incomplete after {0} rounds")]
    RoundsExhausted(u32),
}
