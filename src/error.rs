//! Domain error types.
//!
//! Mirrors the error kinds distinguished throughout the system: not-found,
//! offline, conflict, validation, unavailable-port, persistence, transport.
//! Each component gets its own `thiserror` enum rather than one flat error,
//! and the SSH handler's associated error type bridges them all.

use thiserror::Error;

/// Errors raised by the router (C2).
#[derive(Debug, Error)]
pub enum RouterError {
    /// Name absent from the router entirely.
    #[error("{0} not found")]
    NotFound(String),

    /// Name present as a host record but with no live session.
    #[error("{0} is offline")]
    Offline(String),

    /// Alias name already owned by someone else, or the endpoint being
    /// registered collides with an alias.
    #[error("{0} is already taken")]
    Conflict(String),

    /// Dial to a port the target session never declared as forwarded.
    #[error("port {0} is not forwarded")]
    UnavailablePort(u32),

    /// Disk I/O while reading or writing alias files.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Alias file content could not be decoded, or named an unregistered
    /// metadata decoder.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RouterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RouterError::NotFound(_))
    }
}

/// Errors raised by the HTTP rewrite registry (C3).
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewrite for {0} already exists")]
    Conflict(String),

    #[error("no rewrite for {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Errors raised while driving a single SSH session (C7) or the console
/// (C10). This is also the `russh::server::Handler::Error` associated type.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("authentication rejected")]
    AuthRejected,

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("ssh protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
