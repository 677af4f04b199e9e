//! Wire protocol for segmented, resumable uploads.
//!
//! Every message is a single space-delimited line carried by exactly one
//! read/write call on a raw TCP stream; there is no length prefix, so a
//! message is whatever one read returns. Both peers therefore keep every
//! message (and every data buffer) within [`BUFFER_SIZE`] bytes.
//!
//! # Commands (client -> server)
//!
//! ```text
//! login <user> <secret>
//! big   <filename> <total_size>
//! split <uid> <index>
//! stop  <uid> <index>
//! end   <uid> 0
//! ```
//!
//! See [`reply`] for the server responses.

pub mod command;
pub mod error;
pub mod naming;
pub mod reply;
pub mod wire;

pub use command::Command;
pub use error::{ProtocolError, WireError};
pub use naming::{segment_file_name, uid_belongs_to, upload_uid};
pub use reply::{EndReply, LoginReply, OffsetReply, PlanReply};

use std::time::Duration;

/// Size of every read buffer, and the largest message either peer may write.
pub const BUFFER_SIZE: usize = 1024;

/// Segment size the server proposes when none is configured (1 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024;

/// Malformed or invalid commands a control session tolerates before teardown.
pub const MAX_PROTOCOL_ERRORS: u32 = 10;

/// Deadline for the `login` exchange.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for a single command read or segment data read.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a single write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a control connection may stay silent while segments upload.
pub const CONTROL_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// How long the client waits for the `end` reply (assembly runs first).
pub const END_REPLY_TIMEOUT: Duration = Duration::from_secs(300);
