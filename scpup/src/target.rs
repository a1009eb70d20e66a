//! Where an upload goes: `[user@]host[:path]`.

use anyhow::{Context, anyhow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub session: remote::SshSession,
    /// Normalized base directory; empty means the remote login directory.
    pub base_path: String,
}

impl RemoteTarget {
    /// Parses `[user@]host[:path]`; IPv6 hosts go in brackets (`[::1]:/srv`).
    ///
    /// `username` and `port` from the command line take precedence over a user
    /// given in the target string.
    pub fn parse(target: &str, username: Option<&str>, port: Option<u16>) -> anyhow::Result<Self> {
        let target = target.trim();
        // an '@' inside the path is not a user separator
        let at = target
            .find('@')
            .filter(|&at| !target[..at].contains([':', '[', '/']));
        let (user, rest) = match at {
            Some(0) => return Err(anyhow!("empty user name in target {:?}", target)),
            Some(at) => (Some(&target[..at]), &target[at + 1..]),
            None => (None, target),
        };
        let (host, path) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .with_context(|| format!("unterminated '[' in target {target:?}"))?;
            let path = match after {
                "" => "",
                _ => after.strip_prefix(':').with_context(|| {
                    format!("expected ':' after bracketed host in target {target:?}")
                })?,
            };
            (host, path)
        } else {
            rest.split_once(':').unwrap_or((rest, ""))
        };
        if host.is_empty() {
            return Err(anyhow!("missing host in target {:?}", target));
        }
        Ok(Self {
            session: remote::SshSession {
                user: username.or(user).map(str::to_string),
                host: host.to_string(),
                port,
            },
            base_path: normalize_base_path(path),
        })
    }

    /// `host:port` as shown in reports.
    pub fn host_port(&self) -> String {
        let port = self.session.port.unwrap_or(22);
        if self.session.host.contains(':') {
            format!("[{}]:{}", self.session.host, port)
        } else {
            format!("{}:{}", self.session.host, port)
        }
    }
}

/// Rewrites backslashes to slashes and anchors drive-absolute paths at `/`.
///
/// `C:\deploy\site` becomes `/C:/deploy/site`; relative paths stay relative
/// to the remote login directory.
pub fn normalize_base_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    if is_absolute(&path) && !path.starts_with('/') {
        format!("/{path}")
    } else {
        path
    }
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}
