//! Server replies.
//!
//! ```text
//! login -> "success" | "fail"
//! big   -> "<segment_size> <uid>"
//! split -> "<resume_offset>" | "server exception"
//! end   -> "success" | "fail" | "assemb fail"
//! ```

use crate::error::ProtocolError;

pub const SUCCESS: &str = "success";
pub const FAIL: &str = "fail";
pub const SERVER_EXCEPTION: &str = "server exception";
pub const ASSEMBLY_FAIL: &str = "assemb fail";

/// Decodes raw reply bytes to trimmed text.
pub fn reply_text(message: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(message)
        .map(str::trim)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Answer to `login`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReply {
    Accepted,
    Rejected,
}

impl LoginReply {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => SUCCESS,
            Self::Rejected => FAIL,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        match text.trim() {
            SUCCESS => Ok(Self::Accepted),
            FAIL => Ok(Self::Rejected),
            other => Err(ProtocolError::UnexpectedReply(other.to_string())),
        }
    }
}

/// Answer to `big`: the split plan chosen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanReply {
    pub segment_size: u64,
    pub uid: String,
}

impl PlanReply {
    pub fn encode(&self) -> String {
        format!("{} {}", self.segment_size, self.uid)
    }

    /// Parses `"<segment_size> <uid>"`. A zero segment size is rejected.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let [size, uid] = tokens.as_slice() else {
            return Err(ProtocolError::UnexpectedReply(text.to_string()));
        };
        let segment_size = size
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0 && size.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| ProtocolError::InvalidNumber {
                field: "segment_size",
                value: size.to_string(),
            })?;
        Ok(Self {
            segment_size,
            uid: uid.to_string(),
        })
    }
}

/// Answer to `split`: where to resume the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReply {
    /// Bytes of the segment already stored; `0` also means "nothing yet".
    Offset(u64),
    /// The server could not inspect or open its partial file.
    ServerException,
}

impl OffsetReply {
    pub fn encode(self) -> String {
        match self {
            Self::Offset(offset) => offset.to_string(),
            Self::ServerException => SERVER_EXCEPTION.to_string(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        if text == SERVER_EXCEPTION {
            return Ok(Self::ServerException);
        }
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidNumber {
                field: "offset",
                value: text.to_string(),
            });
        }
        text.parse()
            .map(Self::Offset)
            .map_err(|_| ProtocolError::InvalidNumber {
                field: "offset",
                value: text.to_string(),
            })
    }
}

/// Answer to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReply {
    /// Every segment arrived and the file was assembled.
    Success,
    /// Segments are still missing; run another round.
    Fail,
    /// Segments were complete but assembly failed on the server.
    AssemblyFail,
}

impl EndReply {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => SUCCESS,
            Self::Fail => FAIL,
            Self::AssemblyFail => ASSEMBLY_FAIL,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        match text.trim() {
            SUCCESS => Ok(Self::Success),
            FAIL => Ok(Self::Fail),
            ASSEMBLY_FAIL => Ok(Self::AssemblyFail),
            other => Err(ProtocolError::UnexpectedReply(other.to_string())),
        }
    }
}
