//! scp sink protocol ("scp -t"), upload subset.
//!
//! Wire format, sender to receiver:
//!
//! ```text
//! D<mode> <mtime> <name>\n     enter (and create) directory
//! C<mode> <size> <name>\n      file header, followed by <size> raw bytes and 0x00
//! E\n                          leave directory
//! ```
//!
//! The receiver answers every header and every payload with one status byte,
//! see [`ack`].

pub mod ack;
pub mod builder;
pub mod operation;

pub use ack::AckChannel;
pub use builder::{FileMapping, Modes};
pub use operation::Operation;

use tokio::io::{AsyncRead, AsyncWrite};

/// Executes `ops` strictly in order, one acknowledged unit at a time.
///
/// Stops at the first error; returns the number of payload bytes sent.
pub async fn run_sequence<W, R>(
    channel: &mut AckChannel<W, R>,
    ops: &[Operation],
    chunk_size: usize,
) -> crate::Result<u64>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut bytes = 0;
    for op in ops {
        bytes += op.execute(channel, chunk_size).await?;
    }
    Ok(bytes)
}
