//! Error types for the request server.
//!
//! ## Error Cases
//! - `ChannelError`: An internal communication failure between tasks or
//!   workers.
//! - `ConnectionClosed`: The client connection went away before a reply could
//!   be written.
//! - `Protocol`: The client sent something that cannot be framed as a request
//!   (e.g. a line longer than the configured maximum).
//! - `Io`: Reading from or writing to the connection failed.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.
//! - `Coordinator`: The connection's reply coordinator stopped abnormally.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the request server.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The client connection is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The client sent an unframeable request.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Transport failure on the client connection.
    #[error("I/O error: {context}")]
    Io { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The reply coordinator failed.
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] reseq::Error),
}

impl From<tokio_util::codec::LinesCodecError> for Error {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => Self::Protocol {
                reason: "request line exceeds maximum length".to_string(),
            },
            tokio_util::codec::LinesCodecError::Io(e) => Self::Io {
                context: e.to_string(),
            },
        }
    }
}
