//! Backlog draining for the bilateral close.
//!
//! Before an endpoint closes, every message that has become visible is
//! received and thrown away. The receive needs to know what it is taking,
//! and the only evidence is the header: a length that fits one frame is
//! data, four bytes is a control value. Anything else means the two sides
//! disagree about the wire and the drain gives up.

use fieldcast_wire::{tag_name, Geometry, CONTROL_PAYLOAD_BYTES};

use crate::endpoint::Endpoint;
use crate::error::{ChannelError, Result};
use crate::inbox::Status;

/// What a pending message was identified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Data,
    Control,
}

/// Identify a probed message by its length. Data is tried first.
pub fn resolve_shape(status: &Status, geometry: Geometry) -> Result<Shape> {
    if status.len == geometry.payload_len() {
        Ok(Shape::Data)
    } else if status.len == CONTROL_PAYLOAD_BYTES {
        Ok(Shape::Control)
    } else {
        Err(ChannelError::UnresolvableShape {
            tag: status.tag,
            len: status.len,
        })
    }
}

/// Messages thrown away by [`drain_backlog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Drained {
    pub data: u64,
    pub control: u64,
}

impl Drained {
    pub fn total(&self) -> u64 {
        self.data + self.control
    }
}

/// Receive and discard every message currently visible.
///
/// Stops when nothing is pending or the peer has gone. A message whose
/// shape cannot be resolved is fatal.
pub fn drain_backlog(endpoint: &mut Endpoint, geometry: Geometry) -> Result<Drained> {
    let mut drained = Drained::default();
    loop {
        let status = match endpoint.iprobe(None) {
            Ok(Some(status)) => status,
            Ok(None) | Err(ChannelError::Disconnected(_)) => break,
            Err(err) => return Err(err),
        };

        let shape = resolve_shape(&status, geometry)?;
        match endpoint.recv(status.tag) {
            Ok(_) => {}
            Err(ChannelError::Disconnected(_)) => break,
            Err(err) => return Err(err),
        }

        tracing::debug!(
            tag = tag_name(status.tag),
            len = status.len,
            ?shape,
            "drained pending message"
        );
        match shape {
            Shape::Data => drained.data += 1,
            Shape::Control => drained.control += 1,
        }
    }
    Ok(drained)
}
