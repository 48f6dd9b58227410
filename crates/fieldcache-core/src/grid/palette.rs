//! Diverging color scale for grid values.

use super::ValueRange;

/// ColorBrewer RdYlGn, 11 classes, reversed: low values green, high values red.
const STOPS: [[u8; 3]; 11] = [
    [0x00, 0x68, 0x37],
    [0x1a, 0x98, 0x50],
    [0x66, 0xbd, 0x63],
    [0xa6, 0xd9, 0x6a],
    [0xd9, 0xef, 0x8b],
    [0xff, 0xff, 0xbf],
    [0xfe, 0xe0, 0x8b],
    [0xfd, 0xae, 0x61],
    [0xf4, 0x6d, 0x43],
    [0xd7, 0x30, 0x27],
    [0xa5, 0x00, 0x26],
];

/// Linear RGB interpolation over the stops, spread evenly across `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    min: f64,
    max: f64,
}

impl Palette {
    pub fn new(range: ValueRange) -> Self {
        Self {
            min: range.min as f64,
            max: range.max as f64,
        }
    }

    /// Position of `value` on the scale, clamped to `[0, 1]`. An empty
    /// domain puts every value at the end of the scale.
    fn position(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span > 0.0 {
            ((value - self.min) / span).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    pub fn color(&self, value: i64) -> [u8; 3] {
        let scaled = self.position(value as f64) * (STOPS.len() - 1) as f64;
        let lower = (scaled.floor() as usize).min(STOPS.len() - 2);
        let frac = scaled - lower as f64;

        let (a, b) = (STOPS[lower], STOPS[lower + 1]);
        let mut rgb = [0u8; 3];
        for (channel, out) in rgb.iter_mut().enumerate() {
            let from = f64::from(a[channel]);
            let to = f64::from(b[channel]);
            *out = (from + (to - from) * frac).round() as u8;
        }
        rgb
    }
}
