use tracing::instrument;

use crate::error::Result;
use crate::protocol::{self, AckChannel, Operation};
use crate::transport::{ExecChannel, RemoteShell};

/// One scp receiver invocation: opened, driven, closed.
///
/// A session is never reused; [`ScpSession::finish`] consumes it and must be
/// called on every path once [`ScpSession::open`] succeeded.
pub struct ScpSession<C: ExecChannel> {
    channel: C,
    command: String,
    chunk_size: usize,
    bytes_sent: u64,
}

impl<C: ExecChannel> std::fmt::Debug for ScpSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ScpSession")
            .field("command", &self.command)
            .field("chunk_size", &self.chunk_size)
            .field("bytes_sent", &self.bytes_sent)
            .finish()
    }
}

impl<C: ExecChannel> ScpSession<C> {
    /// Starts `command` and reads the receiver's initial acknowledgment.
    ///
    /// If the handshake fails the channel is closed before returning.
    #[instrument(level = "debug", skip(shell))]
    pub async fn open<S>(shell: &S, command: &str, chunk_size: usize) -> Result<Self>
    where
        S: RemoteShell<Channel = C>,
    {
        let mut channel = shell.exec(command).await?;
        let handshake = {
            let (writer, reader) = channel.streams();
            AckChannel::new(writer, reader).handshake().await
        };
        if let Err(error) = handshake {
            if let Err(close_error) = channel.close().await {
                tracing::warn!(
                    "failed closing {:?} after handshake error: {}",
                    command,
                    close_error
                );
            }
            return Err(error);
        }
        tracing::debug!("remote receiver ready: {:?}", command);
        Ok(Self {
            channel,
            command: command.to_string(),
            chunk_size,
            bytes_sent: 0,
        })
    }

    /// Executes a whole operation sequence; stops at the first error.
    pub async fn run(&mut self, ops: &[Operation]) -> Result<u64> {
        let (writer, reader) = self.channel.streams();
        let mut channel = AckChannel::new(writer, reader);
        let bytes = protocol::run_sequence(&mut channel, ops, self.chunk_size).await?;
        self.bytes_sent += bytes;
        Ok(bytes)
    }

    #[cfg(test)]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Closes the channel and combines the close outcome with `result`.
    ///
    /// An error from the pass wins over an error from closing.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        tracing::debug!(
            "closing {:?} after {} payload bytes",
            self.command,
            self.bytes_sent
        );
        let close_result = self.channel.close().await;
        match (result, close_result) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_error)) => Err(close_error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(close_error)) => {
                tracing::warn!("failed closing {:?}: {}", self.command, close_error);
                Err(error)
            }
        }
    }
}
