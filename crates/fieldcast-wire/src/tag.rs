//! Message tags and the control payload.
//!
//! The tag is the only thing that tells a QUIT apart from frame data, so
//! receivers dispatch on it and never on arrival order.

use bytes::Bytes;

use crate::error::{Result, WireError};

/// Message tag carried in every envelope header.
pub type Tag = u16;

/// Teardown request. Payload: one `i32` sentinel.
pub const QUIT: Tag = 0;

/// Frame data. Payload: `GRID_X * GRID_Y` little-endian `i16` samples.
pub const IMAGE: Tag = 1;

/// Connect-time handshake. Payload: JSON.
pub const HELLO: Tag = 2;

/// Value carried by every QUIT message.
pub const QUIT_SENTINEL: i32 = 1;

/// Size of a control payload on the wire.
pub const CONTROL_PAYLOAD_BYTES: usize = std::mem::size_of::<i32>();

/// Returns a human-readable name for a tag.
pub fn tag_name(tag: Tag) -> &'static str {
    match tag {
        QUIT => "QUIT",
        IMAGE => "IMAGE",
        HELLO => "HELLO",
        _ => "UNKNOWN",
    }
}

/// Encode a control value as a little-endian `i32`.
pub fn encode_control(value: i32) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

/// Decode a control payload.
pub fn decode_control(payload: &[u8]) -> Result<i32> {
    let bytes: [u8; CONTROL_PAYLOAD_BYTES] =
        payload
            .try_into()
            .map_err(|_| WireError::ControlMismatch {
                expected: CONTROL_PAYLOAD_BYTES,
                actual: payload.len(),
            })?;
    Ok(i32::from_le_bytes(bytes))
}
