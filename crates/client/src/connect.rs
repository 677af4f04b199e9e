//! Dialing and authenticating connections.

use std::time::Duration;

use splitup_protocol::wire::{read_message, write_message};
use splitup_protocol::{Command, LoginReply, reply};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::ClientError;
use crate::policy::ConnectPolicy;
use crate::uploader::ClientConfig;

/// Connects to `addr`, retrying per `policy`.
pub async fn dial(addr: &str, policy: &ConnectPolicy) -> Result<TcpStream, ClientError> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!(%addr, attempt, "connected");
                return Ok(stream);
            }
            Ok(Err(e)) => warn!(%addr, attempt, "connect failed: {e}"),
            Err(_) => warn!(%addr, attempt, "connect timed out"),
        }
        if attempt < attempts {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }
    Err(ClientError::Connect {
        addr: addr.to_string(),
        attempts,
    })
}

/// Sends `login` and waits for the verdict.
pub async fn login<S>(
    stream: &mut S,
    user: &str,
    secret: &str,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let command = Command::Login {
        user: user.to_string(),
        secret: secret.to_string(),
    };
    write_message(stream, command.encode()?.as_bytes(), write_timeout).await?;
    let message = read_message(stream, read_timeout)
        .await?
        .ok_or(ClientError::ServerClosed)?;
    match LoginReply::parse(reply::reply_text(&message)?)? {
        LoginReply::Accepted => Ok(()),
        LoginReply::Rejected => Err(ClientError::AuthRejected),
    }
}

/// Dials the configured server and logs in.
pub async fn open_session(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    let mut stream = dial(&config.server_addr, &config.connect).await?;
    login(
        &mut stream,
        &config.user,
        &config.secret,
        config.read_timeout,
        config.write_timeout,
    )
    .await?;
    Ok(stream)
}
