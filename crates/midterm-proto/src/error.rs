use thiserror::Error;

/// The error taxonomy shared by the host and server. Variants name *kinds*,
/// not individual failure sites.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A PTY Host failed to start or disappeared before handshake.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Operation referenced an unknown session id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Operation on a session whose PTY has already exited.
    #[error("session not running: {0}")]
    SessionNotRunning(String),

    /// A malformed frame was received on a socket.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A client's outbound queue overflowed.
    #[error("client outbound queue overflowed")]
    Overflow,

    /// Scrollback shed frames a client had not yet seen.
    #[error("scrollback dropped {bytes} bytes for session {session_id}")]
    ScrollbackDropped { session_id: String, bytes: u64 },

    /// Read/write failure on a PTY Host's IPC stream.
    #[error("host stream error: {0}")]
    HostStreamError(String),

    /// A request argument was out of range or otherwise invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// The HTTP status code the REST surface maps this kind to.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BackendUnavailable(_) => 503,
            Error::SessionNotFound(_) => 404,
            Error::InvalidArgument(_) => 400,
            Error::SessionNotRunning(_) => 409,
            Error::ProtocolViolation(_)
            | Error::Overflow
            | Error::ScrollbackDropped { .. }
            | Error::HostStreamError(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
