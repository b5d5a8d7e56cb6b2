//! Relay client: one TCP connection speaking the line protocol.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::warn;

use crate::error::{RelayError, Result};
use crate::protocol::{decode_line, encode_line, ClientMessage, ServerMessage};

/// A connected relay client.
#[derive(Debug)]
pub struct RelayClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl RelayClient {
    /// Connect to a relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the connection fails.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the write fails.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.writer
            .write_all(encode_line(message)?.as_bytes())
            .await?;
        Ok(())
    }

    /// Wait for the next message. Malformed lines are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Closed`] once the relay hangs up.
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(RelayError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(&line) {
                Ok(message) => return Ok(message),
                Err(e) => warn!(error = %e, "malformed frame from relay skipped"),
            }
        }
    }
}
