//! Stream a continuously recomputed 2D field from a worker group to a
//! single live consumer.
//!
//! # Crate Structure
//!
//! - [`transport`] — Unix domain socket transport with readiness polling
//! - [`wire`] — Tagged envelopes, frame payloads and non-blocking stream I/O
//! - [`channel`] — Rendezvous, endpoint and producer/consumer sessions
//! - [`compute`] — Worker group, frame aggregation and producer run loop
//!   (behind the `compute` feature)

/// Re-export transport types.
pub mod transport {
    pub use fieldcast_transport::*;
}

/// Re-export wire types.
pub mod wire {
    pub use fieldcast_wire::*;
}

/// Re-export channel types.
pub mod channel {
    pub use fieldcast_channel::*;
}

/// Re-export compute types (requires `compute` feature).
#[cfg(feature = "compute")]
pub mod compute {
    pub use fieldcast_compute::*;
}
