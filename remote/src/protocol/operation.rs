use std::os::unix::fs::PermissionsExt;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::protocol::ack::{AckChannel, STATUS_OK};

/// Mode sent for every directory the sender creates.
pub const DEFAULT_DIR_MODE: u32 = 0o755;
/// Payloads are streamed in chunks of this size unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const END_DIRECTORY: &str = "E\n";

/// One unit of work in the scp sink protocol.
///
/// Nesting is expressed only through the order of `EnterDirectory` and
/// `LeaveDirectory` in a sequence; names are always a single path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `D<mode> <mtime> <name>`: create (if needed) and descend into a directory.
    EnterDirectory { mode: u32, mtime: u64, name: String },
    /// `E`: go back up one level.
    LeaveDirectory,
    /// `C<mode> <size> <name>` followed by exactly `size` bytes and a `0x00`.
    ///
    /// The size is taken from the source file when the operation starts.
    /// `mode: None` sends the local file's permission bits.
    TransferFile {
        mode: Option<u32>,
        name: String,
        source: std::path::PathBuf,
    },
}

/// Rejects names that cannot be sent as a single header segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\n', '\r', '\0'])
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn directory_header(mode: u32, mtime: u64, name: &str) -> Result<String> {
    validate_name(name)?;
    Ok(format!("D{:04o} {} {}\n", mode & 0o7777, mtime, name))
}

pub fn file_header(mode: u32, size: u64, name: &str) -> Result<String> {
    validate_name(name)?;
    Ok(format!("C{:04o} {} {}\n", mode & 0o7777, size, name))
}

impl Operation {
    pub fn enter(name: impl Into<String>, mode: u32) -> Self {
        Operation::EnterDirectory {
            mode,
            mtime: 0,
            name: name.into(),
        }
    }

    /// Runs the full header/payload/acknowledgment exchange for this operation.
    ///
    /// Returns the number of payload bytes sent (0 for directory operations).
    #[instrument(level = "debug", skip(channel))]
    pub async fn execute<W, R>(
        &self,
        channel: &mut AckChannel<W, R>,
        chunk_size: usize,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        match self {
            Operation::EnterDirectory { mode, mtime, name } => {
                let header = directory_header(*mode, *mtime, name)?;
                channel.send_header(&header).await?;
                channel.await_ack().await?;
                Ok(0)
            }
            Operation::LeaveDirectory => {
                channel.send_header(END_DIRECTORY).await?;
                channel.await_ack().await?;
                Ok(0)
            }
            Operation::TransferFile { mode, name, source } => {
                let mut file = tokio::fs::File::open(source)
                    .await
                    .with_context(|| format!("cannot open {source:?} for reading"))
                    .map_err(Error::LocalIo)?;
                let metadata = file
                    .metadata()
                    .await
                    .with_context(|| format!("failed reading metadata from {source:?}"))
                    .map_err(Error::LocalIo)?;
                if !metadata.is_file() {
                    return Err(Error::LocalIo(anyhow::anyhow!(
                        "{source:?} is not a regular file"
                    )));
                }
                let size = metadata.len();
                let mode = mode.unwrap_or(metadata.permissions().mode() & 0o7777);
                let header = file_header(mode, size, name)?;
                channel.send_header(&header).await?;
                channel.await_ack().await?;
                send_payload(channel.writer(), &mut file, size, name, chunk_size).await?;
                channel.send_status(STATUS_OK).await?;
                channel.await_ack().await?;
                tracing::debug!("sent {:?} ({} bytes)", name, size);
                Ok(size)
            }
        }
    }
}

/// Streams exactly `size` bytes from `source` to `writer` in bounded chunks.
///
/// Fails with [`Error::SizeMismatch`] if the source runs out early or still
/// has data after `size` bytes were sent.
pub async fn send_payload<W, S>(
    writer: &mut W,
    source: &mut S,
    size: u64,
    name: &str,
    chunk_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    S: AsyncRead + Unpin,
{
    let mut chunk_len = usize::try_from(size).unwrap_or(usize::MAX);
    if chunk_size > 0 && chunk_size < chunk_len {
        chunk_len = chunk_size;
    }
    let mut limited = (&mut *source).take(size);
    let mut buf = vec![0u8; chunk_len];
    let mut sent = 0u64;
    loop {
        let n = limited
            .read(&mut buf)
            .await
            .with_context(|| format!("failed reading data for {name:?}"))
            .map_err(Error::LocalIo)?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .with_context(|| format!("failed sending data for {name:?}"))
            .map_err(Error::connection)?;
        sent += n as u64;
    }
    if sent == size {
        // anything left means the file grew after its header went out
        let extra = tokio::io::copy(source, &mut tokio::io::sink())
            .await
            .with_context(|| format!("failed reading data for {name:?}"))
            .map_err(Error::LocalIo)?;
        sent += extra;
    }
    if sent != size {
        return Err(Error::SizeMismatch {
            name: name.to_string(),
            declared: size,
            actual: sent,
        });
    }
    Ok(())
}
