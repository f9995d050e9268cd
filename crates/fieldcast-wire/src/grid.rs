//! The fixed-point frame carried by IMAGE messages.
//!
//! Both endpoints must agree on the geometry and the sample scale. Nothing
//! on the wire describes them; the connect-time handshake compares them
//! once and the payload length is checked on every decode.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Frame width in samples.
pub const GRID_X: usize = 512;

/// Frame height in samples.
pub const GRID_Y: usize = 512;

/// Width of one sample on the wire.
pub const SAMPLE_BYTES: usize = std::mem::size_of::<i16>();

/// Fixed-point scale: a sample `s` represents `s / SAMPLE_SCALE`.
pub const SAMPLE_SCALE: f64 = 32767.0;

/// Frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
}

impl Geometry {
    /// The geometry every fieldcast build streams.
    pub const STANDARD: Geometry = Geometry {
        width: GRID_X,
        height: GRID_Y,
    };

    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of samples in one frame.
    pub fn samples(&self) -> usize {
        self.width * self.height
    }

    /// Size of an IMAGE payload for this geometry.
    pub fn payload_len(&self) -> usize {
        self.samples() * SAMPLE_BYTES
    }

    /// Rows in each worker's band, or `None` when the rows do not divide
    /// evenly across `workers`.
    pub fn band_rows(&self, workers: usize) -> Option<usize> {
        if workers == 0 || self.height % workers != 0 {
            return None;
        }
        Some(self.height / workers)
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Convert a value in `[-1, 1]` to a fixed-point sample.
///
/// Values outside the range saturate.
pub fn quantize(value: f64) -> i16 {
    let scaled = (value * SAMPLE_SCALE).round();
    scaled.clamp(-SAMPLE_SCALE, SAMPLE_SCALE) as i16
}

/// Convert a fixed-point sample back to its value.
pub fn dequantize(sample: i16) -> f64 {
    f64::from(sample) / SAMPLE_SCALE
}

/// A full 2D grid of samples, row-major: `(x, y)` lives at `x + y * width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    geometry: Geometry,
    samples: Vec<i16>,
}

impl Frame {
    /// An all-zero frame.
    pub fn blank(geometry: Geometry) -> Self {
        Self {
            geometry,
            samples: vec![0; geometry.samples()],
        }
    }

    /// Wrap existing samples. The sample count must match the geometry.
    pub fn from_samples(geometry: Geometry, samples: Vec<i16>) -> Result<Self> {
        if samples.len() != geometry.samples() {
            return Err(WireError::GeometryMismatch {
                expected: geometry.payload_len(),
                actual: samples.len() * SAMPLE_BYTES,
            });
        }
        Ok(Self { geometry, samples })
    }

    /// Decode an IMAGE payload into a new frame.
    pub fn from_payload(geometry: Geometry, payload: &[u8]) -> Result<Self> {
        let mut frame = Self::blank(geometry);
        frame.decode_into(payload)?;
        Ok(frame)
    }

    /// Overwrite this frame's samples from an IMAGE payload.
    pub fn decode_into(&mut self, payload: &[u8]) -> Result<()> {
        let expected = self.geometry.payload_len();
        if payload.len() != expected {
            return Err(WireError::GeometryMismatch {
                expected,
                actual: payload.len(),
            });
        }
        for (sample, raw) in self
            .samples
            .iter_mut()
            .zip(payload.chunks_exact(SAMPLE_BYTES))
        {
            *sample = i16::from_le_bytes([raw[0], raw[1]]);
        }
        Ok(())
    }

    /// Encode as an IMAGE payload.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.geometry.payload_len());
        for sample in &self.samples {
            buf.put_i16_le(*sample);
        }
        buf.freeze()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Raw sample at `(x, y)`.
    pub fn sample(&self, x: usize, y: usize) -> i16 {
        self.samples[x + y * self.geometry.width]
    }

    /// Decoded value at `(x, y)`.
    pub fn value(&self, x: usize, y: usize) -> f64 {
        dequantize(self.sample(x, y))
    }

    /// Smallest and largest raw sample.
    pub fn min_max(&self) -> Option<(i16, i16)> {
        let mut iter = self.samples.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s))))
    }
}
