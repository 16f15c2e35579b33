//! Server error types.

use thiserror::Error;

/// Errors surfaced by the connection layer and listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The shared listener could not be bound. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// Shutdown has begun; no new connections are registered.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The configured connection limit was reached.
    #[error("connection limit reached ({limit})")]
    TooManyConnections {
        /// Configured maximum.
        limit: usize,
    },

    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
