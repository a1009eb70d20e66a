//! Boundary between the protocol core and whatever runs the remote receiver.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A running remote command bound to a pair of byte streams.
pub trait ExecChannel: Send {
    /// The command's standard input.
    type Writer: AsyncWrite + Unpin + Send;
    /// The command's standard output.
    type Reader: AsyncRead + Unpin + Send;

    fn streams(&mut self) -> (&mut Self::Writer, &mut Self::Reader);

    /// Closes both streams and releases the command. Called exactly once.
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}

/// An already authenticated connection that can start remote commands.
pub trait RemoteShell: Send + Sync {
    type Channel: ExecChannel;

    fn exec(&self, command: &str) -> impl Future<Output = Result<Self::Channel>> + Send;
}

impl<S: RemoteShell> RemoteShell for std::sync::Arc<S> {
    type Channel = S::Channel;

    fn exec(&self, command: &str) -> impl Future<Output = Result<Self::Channel>> + Send {
        (**self).exec(command)
    }
}
