//! Envelope layout.
//!
//! ```text
//! offset  size  field
//! 0       2     magic "FC"
//! 2       4     payload length, u32 LE
//! 6       2     tag, u16 LE
//! 8       len   payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::tag::Tag;

pub const HEADER_SIZE: usize = 8;

pub const MAGIC: [u8; 2] = *b"FC";

/// Largest payload accepted unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A fully received message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub tag: Tag,
    pub payload: Bytes,
}

/// Tag and length of a message whose body may still be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: Tag,
    pub len: usize,
}

impl Header {
    /// Parse the first [`HEADER_SIZE`] bytes of `raw`, or `None` if fewer
    /// are available. Nothing is consumed.
    fn parse(raw: &[u8], max_payload: usize) -> Result<Option<Self>> {
        let Some(mut raw) = raw.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        if raw[..2] != MAGIC {
            return Err(WireError::InvalidMagic);
        }
        raw.advance(2);
        let len = raw.get_u32_le() as usize;
        let tag = raw.get_u16_le();
        if len > max_payload {
            return Err(WireError::PayloadTooLarge {
                size: len,
                max: max_payload,
            });
        }
        Ok(Some(Self { tag, len }))
    }
}

/// Append one envelope to `dst`.
pub fn encode_envelope(tag: Tag, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(len);
    dst.put_u16_le(tag);
    dst.put_slice(payload);
    Ok(())
}

/// Take a header off the front of `src`, leaving the body behind.
pub fn decode_header(src: &mut BytesMut, max_payload: usize) -> Result<Option<Header>> {
    let header = Header::parse(src, max_payload)?;
    if header.is_some() {
        src.advance(HEADER_SIZE);
    }
    Ok(header)
}

/// Take a whole envelope off the front of `src`. `src` is left untouched
/// until the complete body is buffered.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    match Header::parse(src, max_payload)? {
        Some(header) if src.len() >= HEADER_SIZE + header.len => {
            src.advance(HEADER_SIZE);
            Ok(Some(Envelope {
                tag: header.tag,
                payload: src.split_to(header.len).freeze(),
            }))
        }
        _ => Ok(None),
    }
}

/// Limits and socket timeouts for envelope I/O.
#[derive(Debug, Clone)]
pub struct WireConfig {
    pub max_payload_size: usize,
    pub read_timeout: Option<std::time::Duration>,
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
