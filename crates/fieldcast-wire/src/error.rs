/// Errors that can occur while encoding, decoding or moving envelopes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The envelope header contains an invalid magic number.
    #[error("invalid envelope magic (expected 0x4643 \"FC\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A frame payload does not match the agreed grid geometry.
    #[error("frame payload is {actual} bytes, expected {expected}")]
    GeometryMismatch { expected: usize, actual: usize },

    /// A control payload is not a single 32-bit integer.
    #[error("control payload is {actual} bytes, expected {expected}")]
    ControlMismatch { expected: usize, actual: usize },

    /// Blocking envelope reads cannot start while a streamed body is
    /// partially consumed.
    #[error("stream is in the middle of a message body ({remaining} bytes left)")]
    MidMessage { remaining: usize },

    /// An I/O error occurred while reading or writing envelopes.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete envelope was received.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, WireError>;
