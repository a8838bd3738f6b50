//! Error types for imap-store

use thiserror::Error;

/// Errors surfaced by the mail-store API.
///
/// Connection-fatal kinds (`Io`, `Tls`, `Protocol`) mark the underlying
/// connection dead; the pool replaces it on the next acquire. Command-level
/// kinds (`CommandFailed`, `InvalidCommand`) leave the connection usable.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server completed a command with a tagged `NO`.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The server rejected a command with a tagged `BAD`.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The operation is gated on a capability the server does not advertise.
    #[error("{0} is not supported by this server")]
    Unsupported(&'static str),

    #[error("folder is not open")]
    FolderClosed,

    #[error("folder is already open")]
    FolderOpen,

    #[error("store is closed")]
    StoreClosed,

    #[error("folder is open read-only")]
    ReadOnlyFolder,

    #[error("message has been expunged")]
    MessageRemoved,

    #[error("message number {0} out of range")]
    OutOfRange(u32),

    #[error("timed out {0}")]
    Timeout(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is fatal to the connection it occurred on.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Tls(_) | Self::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
