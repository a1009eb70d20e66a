//! Remote side of scpup: the scp sink protocol and the channels it runs over.
//!
//! - [`protocol`]: headers, acknowledgments, operation sequences
//! - [`session`]: one receiver invocation driven from open to close
//! - [`transport`]: the traits a remote command runner has to implement
//! - [`ssh`]: the OpenSSH implementation of those traits

pub mod error;
pub mod protocol;
pub mod session;
pub mod ssh;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
pub mod transport;

pub use error::{Error, Result, Severity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSession {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl SshSession {
    /// `ssh://` destination understood by OpenSSH.
    pub fn destination(&self) -> String {
        let host = self.host.as_str();
        match (self.user.as_deref(), self.port) {
            (Some(user), Some(port)) => format!("ssh://{user}@{host}:{port}"),
            (None, Some(port)) => format!("ssh://{host}:{port}"),
            (Some(user), None) => format!("ssh://{user}@{host}"),
            (None, None) => format!("ssh://{host}"),
        }
    }
}

/// Quotes `value` for a POSIX shell, leaving plain words untouched.
pub fn shell_escape(value: &str) -> String {
    let is_plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@%,=".contains(c));
    if is_plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command that starts a recursive scp sink rooted at `directory`.
///
/// An empty directory means the remote login directory.
pub fn scp_sink_command(directory: &str) -> String {
    let directory = if directory.trim().is_empty() {
        "."
    } else {
        directory
    };
    format!("scp -rt {}", shell_escape(directory))
}
