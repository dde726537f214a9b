//! Byte frames handed to the rendering collaborator.

use serde::{Deserialize, Serialize};

use crate::image::ChannelTriple;
use crate::linalg::ChannelMatrix;

/// Rec. 601 luma weights used for colour mixing and quality metrics.
pub const LUMA_WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];

/// Interleaved RGBA pixels, row-major, `width × height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFrame {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

/// Round then clamp into `[0, 255]`; NaN maps to 0.
pub fn to_byte(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

pub fn luma(red: f64, green: f64, blue: f64) -> f64 {
    LUMA_WEIGHTS[0] * red + LUMA_WEIGHTS[1] * green + LUMA_WEIGHTS[2] * blue
}

impl DisplayFrame {
    /// Grey frame: each matrix value is replicated into R, G and B.
    pub fn from_grey(matrix: &ChannelMatrix) -> Self {
        let (height, width) = matrix.shape();
        let data = matrix.col_major();
        let mut rgba = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            for x in 0..width {
                let grey = to_byte(data[x * height + y]);
                rgba.extend_from_slice(&[grey, grey, grey, 255]);
            }
        }
        Self {
            width,
            height,
            rgba,
        }
    }

    /// Recombine three channels, pulling each towards its luma by `1 − mix`.
    ///
    /// `mix = 1` keeps the colours untouched, `mix = 0` yields pure luma.
    /// Channels must share one shape.
    pub fn blend(channels: ChannelTriple<&ChannelMatrix>, mix: f64) -> Self {
        let (height, width) = channels.red.shape();
        debug_assert_eq!(channels.green.shape(), (height, width));
        debug_assert_eq!(channels.blue.shape(), (height, width));

        let mix = if mix.is_nan() { 1.0 } else { mix.clamp(0.0, 1.0) };
        let (r, g, b) = (
            channels.red.col_major(),
            channels.green.col_major(),
            channels.blue.col_major(),
        );
        let mut rgba = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            for x in 0..width {
                let q = x * height + y;
                let lum = luma(r[q], g[q], b[q]) * (1.0 - mix);
                rgba.extend_from_slice(&[
                    to_byte(lum + r[q] * mix),
                    to_byte(lum + g[q] * mix),
                    to_byte(lum + b[q] * mix),
                    255,
                ]);
            }
        }
        Self {
            width,
            height,
            rgba,
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let offset = (y * self.width + x) * 4;
        [
            self.rgba[offset],
            self.rgba[offset + 1],
            self.rgba[offset + 2],
            self.rgba[offset + 3],
        ]
    }
}
