use std::path::PathBuf;

use fieldcast_wire::Tag;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] fieldcast_transport::TransportError),

    /// Wire-level error.
    #[error("wire error: {0}")]
    Wire(#[from] fieldcast_wire::WireError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake timed out.
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer went away without a QUIT.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The handle has no live endpoint.
    #[error("channel is not connected")]
    NotConnected,

    /// The rendezvous descriptor could not be read.
    #[error("rendezvous descriptor unavailable at {path}: {source}")]
    DescriptorUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The rendezvous descriptor could not be written.
    #[error("failed to publish rendezvous descriptor to {path}: {source}")]
    DescriptorPublish {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The descriptor file holds something other than a socket descriptor.
    #[error("invalid rendezvous descriptor '{0}'")]
    InvalidDescriptor(String),

    /// A drained message matches neither a frame nor a control payload.
    #[error("cannot resolve shape of message (tag {tag}, {len} bytes)")]
    UnresolvableShape { tag: Tag, len: usize },

    /// The quit probe could not be posted.
    #[error("failed to post quit probe: {0}")]
    LivenessProbe(Box<ChannelError>),

    /// A message arrived with a tag the streaming layer does not handle.
    #[error("unexpected message tag {0}")]
    UnexpectedTag(Tag),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
