//! Tagged message envelopes and frame payloads for fieldcast.
//!
//! Every message on the stream is wrapped in an envelope:
//! - A 2-byte magic number ("FC") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian tag (`QUIT`, `IMAGE`, `HELLO`)
//!
//! The reader decodes envelopes incrementally so a receiver can see a
//! message header before its body has fully arrived. The writer keeps an
//! outbox of encoded messages and drains it without blocking.

pub mod codec;
pub mod error;
pub mod grid;
pub mod reader;
pub mod tag;
pub mod writer;

pub use codec::{
    decode_envelope, decode_header, encode_envelope, Envelope, Header, WireConfig,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{Result, WireError};
pub use grid::{dequantize, quantize, Frame, Geometry, GRID_X, GRID_Y, SAMPLE_BYTES, SAMPLE_SCALE};
pub use reader::{Fill, MessageReader, Part};
pub use tag::{
    decode_control, encode_control, tag_name, Tag, CONTROL_PAYLOAD_BYTES, HELLO, IMAGE, QUIT,
    QUIT_SENTINEL,
};
pub use writer::{MessageWriter, Progress, Withdraw};
