use std::io;
use thiserror::Error;

/// Errors surfaced by the inbound protocol engine.
///
/// The variants follow the engine's handling rules: transport errors and
/// malformed requests terminate the connection, a local credential miss is
/// diverted to the fallback path and only becomes `FallbackDisabled` when no
/// fallback handler is installed.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure on the underlying connection. Never diverted to fallback.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Structurally invalid request (unknown command, bad address, bad frame).
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    /// The remote authentication service rejected the credential, answered
    /// with garbage, or could not be reached in time.
    #[error("remote authentication failed: {0}")]
    RemoteAuth(&'static str),

    /// Credential was not recognized and no fallback handler is installed.
    #[error("credential rejected and fallback disabled")]
    FallbackDisabled,

    /// Engine shutdown aborted the in-flight handshake.
    #[error("engine shutdown")]
    Shutdown,
}

/// Result type alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;
