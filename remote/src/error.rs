/// Severity of a non-zero acknowledgment sent by the scp receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// status byte `0x01`, the receiver would allow the sender to continue
    Warning,
    /// status byte `0x02`, the receiver gave up on the transfer
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Errors raised while driving an scp receiver.
///
/// Any of these aborts the current pass: the protocol has no way of
/// resynchronizing a stream once a header or payload went unacknowledged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure: opening the exec channel, writing to it, closing it.
    #[error("connection error: {0:#}")]
    Connection(anyhow::Error),

    /// The receiver answered with something that is not a valid status byte,
    /// or the stream ended in the middle of an exchange.
    #[error("scp protocol out of sync: {0}")]
    ProtocolDesync(String),

    /// The receiver refused a header or payload (`0x01` or `0x02`).
    #[error("remote scp reported {severity}: {message}")]
    RemoteRejection { severity: Severity, message: String },

    /// The data source did not deliver exactly the number of bytes announced in the header.
    #[error("size mismatch for {name:?}: declared {declared} bytes but {actual} were available")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    /// Reading a local data source failed.
    #[error("local file error: {0:#}")]
    LocalIo(anyhow::Error),

    /// A directory or file name that cannot be expressed in a single header line.
    #[error("invalid name in scp header: {0:?}")]
    InvalidName(String),
}

impl Error {
    pub fn connection<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Error::Connection(error.into())
    }

    /// Message text supplied by the remote peer, if this is a rejection.
    #[cfg(test)]
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Error::RemoteRejection { message, .. } => Some(message),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
