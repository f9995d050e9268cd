//! Connection lifecycle and streaming sessions for fieldcast.
//!
//! The producer side publishes a descriptor and accepts exactly one
//! consumer; the consumer reads the descriptor and connects. Both ends then
//! drive a non-blocking [`Endpoint`] that supports posted sends and
//! receives, cancellation, and probing for pending messages.
//!
//! On top of the endpoint sit the two sessions:
//! - [`ProducerSession`] keeps at most one frame in flight and watches for
//!   QUIT with a [`LivenessMonitor`].
//! - [`ConsumerSession`] keeps at most one receive outstanding and drops
//!   stale frames in favour of newer ones.
//!
//! Either side may end the stream. Teardown always drains what the peer
//! has already sent before the socket is closed.

pub mod consumer;
pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod handle;
pub mod handshake;
mod inbox;
pub mod liveness;
pub mod producer;
pub mod rendezvous;
pub mod stats;
pub mod teardown;

pub use consumer::{ConsumerSession, PollEvents, ReceivePolicy};
pub use descriptor::{
    default_descriptor_path, publish, read_descriptor, Descriptor, PublishedDescriptor,
    DEFAULT_DESCRIPTOR_FILE, DESCRIPTOR_SCHEME,
};
pub use endpoint::{CancelOutcome, Endpoint, RecvCancel, RecvRequest, SendRequest};
pub use error::{ChannelError, Result};
pub use handle::{ConnectionHandle, LinkState};
pub use handshake::{
    handshake_client, handshake_client_with_config, handshake_server, handshake_server_with_config,
    GridSpec, HandshakeConfig, HandshakeRequest, HandshakeResponse, HandshakeResult,
};
pub use inbox::Status;
pub use liveness::{Liveness, LivenessMonitor};
pub use producer::{Offer, ProducerSession};
pub use rendezvous::{connect, open, RendezvousConfig};
pub use stats::{ConsumerStats, ProducerStats};
pub use teardown::{drain_backlog, resolve_shape, Drained, Shape};
