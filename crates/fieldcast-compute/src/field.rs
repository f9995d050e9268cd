//! The field the producer streams.
//!
//! A radial wave over `[-4, 4] x [-4, 4]`. Each worker evaluates the
//! spatial part once for its band of rows and then only rescales it by
//! `|sin(t)|` per tick.

use fieldcast_wire::{quantize, Geometry};

const EXTENT: f64 = 8.0;
const OFFSET: f64 = 4.0;

/// Value of the field at grid position `(x, y)` of the full frame.
pub fn base_value(geometry: Geometry, x: usize, y: usize) -> f64 {
    let x = x as f64 / geometry.width as f64 * EXTENT - OFFSET;
    let y = y as f64 / geometry.height as f64 * EXTENT - OFFSET;
    let r = 3.0 * (x * x + y * y).sqrt() + 1e-2;
    2.0 * x * ((r + 2.0).cos() / r - (r + 2.0).sin() / r)
}

/// Time modulation applied to the whole field.
pub fn time_factor(elapsed: f64) -> f64 {
    elapsed.sin().abs()
}

/// One worker's band of rows.
#[derive(Debug, Clone)]
pub struct FieldBand {
    base: Vec<f64>,
    samples: Vec<i16>,
}

impl FieldBand {
    /// Precompute band `band` of `rows` rows.
    pub fn new(geometry: Geometry, band: usize, rows: usize) -> Self {
        let first_row = band * rows;
        let base: Vec<f64> = (0..rows)
            .flat_map(|row| {
                (0..geometry.width).map(move |x| base_value(geometry, x, first_row + row))
            })
            .collect();
        let samples = vec![0; base.len()];
        Self { base, samples }
    }

    /// Recompute the samples for `elapsed` seconds since the start.
    pub fn update(&mut self, elapsed: f64) -> &[i16] {
        let factor = time_factor(elapsed);
        for (sample, base) in self.samples.iter_mut().zip(&self.base) {
            *sample = quantize(base * factor);
        }
        &self.samples
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
