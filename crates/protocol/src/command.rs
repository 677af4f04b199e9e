//! Client commands.

use std::fmt;

use crate::error::ProtocolError;

/// A command sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `login <user> <secret>`
    Login { user: String, secret: String },
    /// `big <filename> <total_size>`
    Big { file_name: String, total_size: u64 },
    /// `split <uid> <index>`
    Split { uid: String, index: u64 },
    /// `stop <uid> <index>`
    Stop { uid: String, index: u64 },
    /// `end <uid> <index>`
    End { uid: String, index: u64 },
}

impl Command {
    /// Every command is a verb followed by two arguments.
    pub const ARITY: usize = 3;

    /// The leading verb token.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Big { .. } => "big",
            Self::Split { .. } => "split",
            Self::Stop { .. } => "stop",
            Self::End { .. } => "end",
        }
    }

    /// Encodes the command as a single wire message.
    ///
    /// Fails if a string argument is empty or contains whitespace, since it
    /// would not decode back into the same command.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let (first, second) = match self {
            Self::Login { user, secret } => (check_token(user)?, check_token(secret)?.to_string()),
            Self::Big {
                file_name,
                total_size,
            } => (check_token(file_name)?, total_size.to_string()),
            Self::Split { uid, index } | Self::Stop { uid, index } | Self::End { uid, index } => {
                (check_token(uid)?, index.to_string())
            }
        };
        Ok(format!("{} {first} {second}", self.verb()))
    }

    /// Decodes one wire message.
    pub fn decode(message: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = message.split_whitespace().collect();
        let verb = tokens.first().copied().unwrap_or_default();
        if !matches!(verb, "login" | "big" | "split" | "stop" | "end") {
            return Err(ProtocolError::UnknownVerb(verb.to_string()));
        }
        if tokens.len() != Self::ARITY {
            return Err(ProtocolError::Arity {
                verb: verb.to_string(),
                expected: Self::ARITY,
                got: tokens.len(),
            });
        }

        let (first, second) = (tokens[1].to_string(), tokens[2]);
        let command = match verb {
            "login" => Self::Login {
                user: first,
                secret: second.to_string(),
            },
            "big" => Self::Big {
                file_name: first,
                total_size: parse_number("total_size", second)?,
            },
            "split" => Self::Split {
                uid: first,
                index: parse_number("index", second)?,
            },
            "stop" => Self::Stop {
                uid: first,
                index: parse_number("index", second)?,
            },
            _ => Self::End {
                uid: first,
                index: parse_number("index", second)?,
            },
        };
        Ok(command)
    }

    /// Decodes raw bytes returned by one read.
    pub fn from_bytes(message: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(message).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::decode(text)
    }
}

/// Log-friendly rendering; the login secret is masked.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login { user, .. } => write!(f, "login {user} ***"),
            Self::Big {
                file_name,
                total_size,
            } => write!(f, "big {file_name} {total_size}"),
            Self::Split { uid, index } | Self::Stop { uid, index } | Self::End { uid, index } => {
                write!(f, "{} {uid} {index}", self.verb())
            }
        }
    }
}

fn check_token(token: &str) -> Result<&str, ProtocolError> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidToken(token.to_string()));
    }
    Ok(token)
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, ProtocolError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}
