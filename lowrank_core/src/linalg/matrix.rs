use std::fmt::{self, Display};

use ndarray::{Array2, ShapeBuilder};

use crate::error::{EngineError, EngineResult};

/// Dense real matrix stored column-major.
///
/// Element `(row, col)` lives at linear index `col * rows + row`, so a
/// channel built from pixel `(x, y)` at `x * height + y` can be decomposed
/// without a transpose. The backing array always uses Fortran layout.
///
/// # Examples
///
/// ```
/// use lowrank_core::ChannelMatrix;
///
/// let m = ChannelMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
/// assert_eq!(m.col_major(), &[1.0, 3.0, 2.0, 4.0]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelMatrix {
    data: Array2<f64>,
}

impl ChannelMatrix {
    /// All-zero matrix. Zero-sized shapes are allowed here; decomposition
    /// rejects them.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols).f()),
        }
    }

    /// Wrap a column-major buffer of length `rows * cols`.
    pub fn from_col_major(rows: usize, cols: usize, data: Vec<f64>) -> EngineResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(EngineError::shape(
                "column-major buffer",
                format!("matrix is {}x{}", rows, cols),
            ));
        }
        if data.len() != rows * cols {
            return Err(EngineError::shape(
                "column-major buffer",
                format!(
                    "expected {} values for {}x{}, got {}",
                    rows * cols,
                    rows,
                    cols,
                    data.len()
                ),
            ));
        }
        let data = Array2::from_shape_vec((rows, cols).f(), data)
            .map_err(|err| EngineError::shape("column-major buffer", err.to_string()))?;
        Ok(Self { data })
    }

    /// Build from row vectors; every row must have the same non-zero length.
    pub fn from_rows(rows: &[Vec<f64>]) -> EngineResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.is_empty() || cols == 0 {
            return Err(EngineError::shape("row input", "expected a non-empty 2D array"));
        }
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != cols) {
            return Err(EngineError::shape(
                "row input",
                format!("row {} has {} values, expected {}", idx, row.len(), cols),
            ));
        }
        Ok(Self::from_fn(rows.len(), cols, |r, c| rows[r][c]))
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            data: Array2::from_shape_fn((rows, cols).f(), |(r, c)| f(r, c)),
        }
    }

    /// Square matrix with `values` on the diagonal.
    pub fn diagonal(values: &[f64]) -> Self {
        let n = values.len();
        Self::from_fn(n, n, |r, c| if r == c { values[r] } else { 0.0 })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[[row, col]]
    }

    /// Raw column-major storage.
    pub fn col_major(&self) -> &[f64] {
        self.data
            .as_slice_memory_order()
            .expect("channel matrices use contiguous Fortran layout")
    }

    pub fn col_major_mut(&mut self) -> &mut [f64] {
        self.data
            .as_slice_memory_order_mut()
            .expect("channel matrices use contiguous Fortran layout")
    }

    pub fn into_col_major(self) -> Vec<f64> {
        self.data.into_raw_vec()
    }

    pub(crate) fn into_array(self) -> Array2<f64> {
        self.data
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.col_major().iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// `‖self − other‖_F`. Shapes must match.
    pub fn frobenius_distance(&self, other: &ChannelMatrix) -> f64 {
        assert_eq!(self.shape(), other.shape(), "matrix shapes must match");
        self.col_major()
            .iter()
            .zip(other.col_major())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    pub fn max_abs_diff(&self, other: &ChannelMatrix) -> f64 {
        assert_eq!(self.shape(), other.shape(), "matrix shapes must match");
        self.col_major()
            .iter()
            .zip(other.col_major())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl Display for ChannelMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChannelMatrix {}x{} frobenius={:.5}",
            self.rows(),
            self.cols(),
            self.frobenius_norm()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn col_major_layout_roundtrip() {
        let m = ChannelMatrix::from_col_major(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(1, 0), 2.0);
        assert_eq!(m.get(0, 2), 5.0);
        assert_eq!(m.into_col_major(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = ChannelMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, EngineError::Shape { .. }));
    }

    #[test]
    fn empty_input_rejected() {
        assert!(ChannelMatrix::from_rows(&[]).is_err());
        assert!(ChannelMatrix::from_rows(&[vec![]]).is_err());
        assert!(ChannelMatrix::from_col_major(0, 4, vec![]).is_err());
    }

    #[test]
    fn length_mismatch_rejected() {
        assert!(ChannelMatrix::from_col_major(2, 2, vec![1.0; 3]).is_err());
    }

    #[test]
    fn frobenius_distance_of_diagonals() {
        let a = ChannelMatrix::diagonal(&[3.0, 4.0]);
        let b = ChannelMatrix::zeros(2, 2);
        assert!((a.frobenius_distance(&b) - 5.0).abs() < 1e-12);
        assert!((a.max_abs_diff(&b) - 4.0).abs() < 1e-12);
    }
}
