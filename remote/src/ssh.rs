//! Remote command channels over OpenSSH.
//!
//! Authentication is whatever the user's ssh configuration provides (agent,
//! keys, control master); by the time [`SshShell::connect`] returns, the
//! connection is usable.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::transport::{ExecChannel, RemoteShell};
use crate::SshSession;

/// Connected SSH master able to run scp receivers.
pub struct SshShell {
    session: Arc<openssh::Session>,
    host: String,
    close_timeout: std::time::Duration,
}

impl std::fmt::Debug for SshShell {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SshShell")
            .field("host", &self.host)
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

impl SshShell {
    #[instrument]
    pub async fn connect(
        session: &SshSession,
        close_timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let destination = session.destination();
        tracing::debug!("Connecting to SSH destination: {}", destination);
        let ssh = openssh::Session::connect(&destination, openssh::KnownHosts::Accept)
            .await
            .with_context(|| format!("Failed to establish SSH connection to {destination}"))?;
        Ok(Self {
            session: Arc::new(ssh),
            host: session.host.clone(),
            close_timeout,
        })
    }

    /// Closes the SSH master connection.
    #[instrument]
    pub async fn disconnect(self) -> anyhow::Result<()> {
        match Arc::try_unwrap(self.session) {
            Ok(session) => session
                .close()
                .await
                .with_context(|| format!("Failed to close SSH connection to {}", self.host)),
            Err(_) => {
                // a channel is still alive; the master goes away with the last reference
                tracing::debug!("SSH session to {} still in use, not closing", self.host);
                Ok(())
            }
        }
    }
}

/// A remote command started over SSH with piped stdin/stdout/stderr.
pub struct SshChannel {
    child: openssh::Child<Arc<openssh::Session>>,
    stdin: openssh::ChildStdin,
    stdout: openssh::ChildStdout,
    stderr: openssh::ChildStderr,
    command: String,
    close_timeout: std::time::Duration,
}

impl std::fmt::Debug for SshChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SshChannel")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl RemoteShell for SshShell {
    type Channel = SshChannel;

    #[instrument(level = "debug", skip(self), fields(host = %self.host))]
    async fn exec(&self, command: &str) -> Result<SshChannel> {
        let mut child = Arc::clone(&self.session)
            .arc_raw_command(command)
            .stdin(openssh::Stdio::piped())
            .stdout(openssh::Stdio::piped())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .with_context(|| format!("Failed to spawn {:?} on {}", command, self.host))
            .map_err(Error::connection)?;
        let stdin = child
            .stdin()
            .take()
            .context("failed to get stdin for remote command")
            .map_err(Error::connection)?;
        let stdout = child
            .stdout()
            .take()
            .context("failed to get stdout for remote command")
            .map_err(Error::connection)?;
        let stderr = child
            .stderr()
            .take()
            .context("failed to get stderr for remote command")
            .map_err(Error::connection)?;
        Ok(SshChannel {
            child,
            stdin,
            stdout,
            stderr,
            command: command.to_string(),
            close_timeout: self.close_timeout,
        })
    }
}

impl ExecChannel for SshChannel {
    type Writer = openssh::ChildStdin;
    type Reader = openssh::ChildStdout;

    fn streams(&mut self) -> (&mut Self::Writer, &mut Self::Reader) {
        (&mut self.stdin, &mut self.stdout)
    }

    #[instrument(level = "debug", skip(self), fields(command = %self.command))]
    async fn close(self) -> Result<()> {
        let SshChannel {
            child,
            mut stdin,
            stdout,
            mut stderr,
            command,
            close_timeout,
        } = self;
        // EOF on stdin tells the receiver there is nothing more to come
        if let Err(error) = stdin.shutdown().await {
            tracing::debug!("failed to shutdown stdin of {:?}: {}", command, error);
        }
        drop(stdin);
        let wait = async move {
            let mut stderr_data = Vec::new();
            let _ = stderr.read_to_end(&mut stderr_data).await;
            let status = child.wait().await;
            drop(stdout);
            (status, stderr_data)
        };
        match tokio::time::timeout(close_timeout, wait).await {
            Ok((Ok(status), stderr_data)) => {
                if !status.success() {
                    tracing::warn!(
                        "remote command {:?} exited with status {:?}: {}",
                        command,
                        status.code(),
                        String::from_utf8_lossy(&stderr_data).trim()
                    );
                }
                Ok(())
            }
            Ok((Err(error), _)) => Err(Error::connection(
                anyhow::Error::new(error)
                    .context(format!("failed to wait for remote command {command:?}")),
            )),
            Err(_) => {
                tracing::warn!(
                    "remote command {:?} did not exit within {:?}, abandoning it",
                    command,
                    close_timeout
                );
                Ok(())
            }
        }
    }
}
