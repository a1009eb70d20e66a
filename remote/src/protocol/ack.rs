//! Acknowledgment framing for the scp sink protocol.
//!
//! The sender writes one unit (a header line, or a payload followed by a status
//! byte) and then blocks until the receiver answers with a single status byte:
//!
//! - `0x00`: success
//! - `0x01`: warning, followed by a message line
//! - `0x02`: fatal error, followed by a message line
//!
//! Every unit must be acknowledged before the next one is sent. A missed or
//! malformed acknowledgment leaves the stream in an unknown state, so all
//! errors returned here are fatal to the session.

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

use crate::error::{Error, Result, Severity};

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_WARNING: u8 = 0x01;
pub const STATUS_FATAL: u8 = 0x02;

/// Maximum length of a rejection message we are willing to buffer.
const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Write/read halves of an scp exec channel with acknowledgment handling.
///
/// `W` is the remote command's standard input, `R` its standard output.
#[derive(Debug)]
pub struct AckChannel<W, R> {
    writer: W,
    reader: R,
}

impl<W: AsyncWrite + Unpin, R: AsyncRead + Unpin> AckChannel<W, R> {
    pub fn new(writer: W, reader: R) -> Self {
        Self { writer, reader }
    }

    /// Reads the acknowledgment the receiver sends as soon as it starts,
    /// before any header has been written.
    #[instrument(level = "trace", skip(self))]
    pub async fn handshake(&mut self) -> Result<()> {
        self.await_ack().await
    }

    /// Writes a complete header line (command character, metadata, `\n`) and flushes.
    #[instrument(level = "trace", skip(self))]
    pub async fn send_header(&mut self, header: &str) -> Result<()> {
        debug_assert!(header.ends_with('\n'));
        self.writer
            .write_all(header.as_bytes())
            .await
            .context("failed writing scp header")
            .map_err(Error::connection)?;
        self.flush().await
    }

    /// Writes a single status byte, used to terminate a file payload.
    pub async fn send_status(&mut self, status: u8) -> Result<()> {
        self.writer
            .write_all(&[status])
            .await
            .context("failed writing scp status byte")
            .map_err(Error::connection)?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .context("failed flushing scp channel")
            .map_err(Error::connection)
    }

    /// Blocks until the receiver sends exactly one status byte and interprets it.
    #[instrument(level = "trace", skip(self))]
    pub async fn await_ack(&mut self) -> Result<()> {
        let status = match self.reader.read_u8().await {
            Ok(status) => status,
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::ProtocolDesync(
                    "stream closed while waiting for acknowledgment".to_string(),
                ));
            }
            Err(error) => {
                return Err(Error::connection(
                    anyhow::Error::new(error).context("failed reading acknowledgment"),
                ));
            }
        };
        let severity = match status {
            STATUS_OK => {
                tracing::trace!("ack ok");
                return Ok(());
            }
            STATUS_WARNING => Severity::Warning,
            STATUS_FATAL => Severity::Fatal,
            other => {
                return Err(Error::ProtocolDesync(format!(
                    "unexpected acknowledgment byte {other:#04x}"
                )));
            }
        };
        let message = self.read_message().await?;
        tracing::debug!("remote scp reported {}: {}", severity, message);
        Err(Error::RemoteRejection { severity, message })
    }

    /// Reads the rest of the line following a non-zero status byte.
    ///
    /// Reads one byte at a time so nothing past the newline is consumed.
    async fn read_message(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            match self.reader.read_u8().await {
                Ok(b'\n') => break,
                Ok(byte) => {
                    if line.len() < MAX_MESSAGE_LEN {
                        line.push(byte);
                    }
                }
                // some receivers exit right after the message without a trailing newline
                Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(error) => {
                    return Err(Error::connection(
                        anyhow::Error::new(error).context("failed reading rejection message"),
                    ));
                }
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Writer half, for streaming raw payload bytes.
    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    #[cfg(test)]
    pub fn into_inner(self) -> (W, R) {
        (self.writer, self.reader)
    }
}
