//! Per-channel containers shared by the session, coordinator and precompute path.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::linalg::ChannelMatrix;

/// One of the three colour channels of an RGB image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Red,
    Green,
    Blue,
}

impl Color {
    pub const ALL: [Color; 3] = [Color::Red, Color::Green, Color::Blue];

    pub fn index(self) -> usize {
        match self {
            Color::Red => 0,
            Color::Green => 1,
            Color::Blue => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Blue => "blue",
        }
    }
}

/// A value per colour channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTriple<T> {
    pub red: T,
    pub green: T,
    pub blue: T,
}

impl<T> ChannelTriple<T> {
    pub fn new(red: T, green: T, blue: T) -> Self {
        Self { red, green, blue }
    }

    pub fn from_fn(mut f: impl FnMut(Color) -> T) -> Self {
        Self {
            red: f(Color::Red),
            green: f(Color::Green),
            blue: f(Color::Blue),
        }
    }

    pub fn get(&self, color: Color) -> &T {
        match color {
            Color::Red => &self.red,
            Color::Green => &self.green,
            Color::Blue => &self.blue,
        }
    }

    pub fn get_mut(&mut self, color: Color) -> &mut T {
        match color {
            Color::Red => &mut self.red,
            Color::Green => &mut self.green,
            Color::Blue => &mut self.blue,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ChannelTriple<U> {
        ChannelTriple {
            red: f(self.red),
            green: f(self.green),
            blue: f(self.blue),
        }
    }

    pub fn each_ref(&self) -> ChannelTriple<&T> {
        ChannelTriple {
            red: &self.red,
            green: &self.green,
            blue: &self.blue,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Color, &T)> {
        [
            (Color::Red, &self.red),
            (Color::Green, &self.green),
            (Color::Blue, &self.blue),
        ]
        .into_iter()
    }
}

impl<T> ChannelTriple<Option<T>> {
    /// All three channels, or `None` while any is still missing.
    pub fn transpose(self) -> Option<ChannelTriple<T>> {
        Some(ChannelTriple {
            red: self.red?,
            green: self.green?,
            blue: self.blue?,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.red.is_some() && self.green.is_some() && self.blue.is_some()
    }
}

impl<T> Default for ChannelTriple<Option<T>> {
    fn default() -> Self {
        Self {
            red: None,
            green: None,
            blue: None,
        }
    }
}

/// Image dimensions. A channel matrix has `height` rows and `width` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDims {
    pub width: usize,
    pub height: usize,
}

impl ImageDims {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width * self.height
    }

    /// Largest rank a factorization of this image can have.
    pub fn max_rank(&self) -> usize {
        self.width.min(self.height)
    }
}

/// Three column-major channel matrices of identical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelImage {
    dims: ImageDims,
    channels: ChannelTriple<ChannelMatrix>,
}

impl ChannelImage {
    pub fn new(channels: ChannelTriple<ChannelMatrix>) -> EngineResult<Self> {
        let rows = channels.red.rows();
        let cols = channels.red.cols();
        if rows == 0 || cols == 0 {
            return Err(EngineError::shape(
                "channel image",
                format!("image is {}x{}", cols, rows),
            ));
        }
        for (color, matrix) in channels.iter() {
            if matrix.rows() != rows || matrix.cols() != cols {
                return Err(EngineError::shape(
                    "channel image",
                    format!(
                        "{} channel is {}x{}, expected {}x{}",
                        color.name(),
                        matrix.rows(),
                        matrix.cols(),
                        rows,
                        cols
                    ),
                ));
            }
        }
        Ok(Self {
            dims: ImageDims::new(cols, rows),
            channels,
        })
    }

    /// Split interleaved RGBA bytes into three column-major matrices.
    ///
    /// Pixel `(x, y)` lands at linear index `x * height + y` in every channel.
    /// Alpha is dropped.
    pub fn from_rgba(pixels: &[u8], dims: ImageDims) -> EngineResult<Self> {
        if dims.width == 0 || dims.height == 0 {
            return Err(EngineError::shape(
                "rgba image",
                format!("image is {}x{}", dims.width, dims.height),
            ));
        }
        let expected = dims.pixels() * 4;
        if pixels.len() != expected {
            return Err(EngineError::shape(
                "rgba image",
                format!("expected {} bytes, got {}", expected, pixels.len()),
            ));
        }

        let m = dims.height;
        let mut red = vec![0.0; dims.pixels()];
        let mut green = vec![0.0; dims.pixels()];
        let mut blue = vec![0.0; dims.pixels()];
        for (pixel, rgba) in pixels.chunks_exact(4).enumerate() {
            let y = pixel / dims.width;
            let x = pixel % dims.width;
            let q = x * m + y;
            red[q] = f64::from(rgba[0]);
            green[q] = f64::from(rgba[1]);
            blue[q] = f64::from(rgba[2]);
        }

        Self::new(ChannelTriple::new(
            ChannelMatrix::from_col_major(m, dims.width, red)?,
            ChannelMatrix::from_col_major(m, dims.width, green)?,
            ChannelMatrix::from_col_major(m, dims.width, blue)?,
        ))
    }

    pub fn dims(&self) -> ImageDims {
        self.dims
    }

    pub fn channels(&self) -> &ChannelTriple<ChannelMatrix> {
        &self.channels
    }

    pub fn channel(&self, color: Color) -> &ChannelMatrix {
        self.channels.get(color)
    }

    pub fn into_channels(self) -> ChannelTriple<ChannelMatrix> {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_split_is_column_major() {
        // 2 wide, 3 tall; red encodes 10*x + y
        let dims = ImageDims::new(2, 3);
        let mut pixels = Vec::new();
        for y in 0..3u8 {
            for x in 0..2u8 {
                pixels.extend_from_slice(&[10 * x + y, 100, 200, 255]);
            }
        }
        let image = ChannelImage::from_rgba(&pixels, dims).unwrap();
        let red = image.channel(Color::Red);
        assert_eq!(red.rows(), 3);
        assert_eq!(red.cols(), 2);
        assert_eq!(red.col_major(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        assert!(image.channel(Color::Blue).col_major().iter().all(|&v| v == 200.0));
    }

    #[test]
    fn rgba_length_mismatch_is_shape_error() {
        let err = ChannelImage::from_rgba(&[0u8; 7], ImageDims::new(1, 2)).unwrap_err();
        assert!(matches!(err, EngineError::Shape { .. }));
    }

    #[test]
    fn mismatched_channels_rejected() {
        let a = ChannelMatrix::zeros(2, 2);
        let b = ChannelMatrix::zeros(2, 3);
        let result = ChannelImage::new(ChannelTriple::new(a.clone(), b, a));
        assert!(result.is_err());
    }

    #[test]
    fn empty_channels_rejected() {
        for (rows, cols) in [(0, 0), (0, 4), (3, 0)] {
            let channels = ChannelTriple::from_fn(|_| ChannelMatrix::zeros(rows, cols));
            let err = ChannelImage::new(channels).unwrap_err();
            assert!(matches!(err, EngineError::Shape { .. }));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn triple_transpose_waits_for_all() {
        let mut partial: ChannelTriple<Option<u8>> = ChannelTriple::default();
        *partial.get_mut(Color::Red) = Some(1);
        *partial.get_mut(Color::Blue) = Some(3);
        assert!(!partial.is_complete());
        *partial.get_mut(Color::Green) = Some(2);
        assert_eq!(partial.transpose(), Some(ChannelTriple::new(1, 2, 3)));
    }
}
