//! Local stream transport for fieldcast.
//!
//! Provides the byte stream that joins the producer group's root rank to
//! the visualization process:
//! - Unix domain sockets (Linux/macOS)
//! - readiness polling so higher layers can block without spinning
//!
//! This is the lowest layer of fieldcast. Everything else builds on top of
//! the [`IpcStream`] type provided here.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{Interest, IpcStream, Readiness};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
