//! Tiled multiply-accumulate over column-major slices.
//!
//! Output column blocks are independent, so they are spread across the rayon
//! pool. Every output element accumulates its terms in the same order no
//! matter how blocks are scheduled, which keeps results bit-reproducible.

use rayon::prelude::*;

/// Tile edge used when the caller has no preference.
pub const DEFAULT_BLOCK: usize = 32;

/// How the product is combined with the existing output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accumulate {
    Assign,
    Add,
    Subtract,
}

/// `out (m×n) ⟵ mode(out, lhs (m×k) · rhs (k×n))`, all column-major.
///
/// # Panics
///
/// Panics if a slice is shorter than its declared shape.
pub fn multiply_accumulate(
    lhs: &[f64],
    rhs: &[f64],
    out: &mut [f64],
    (m, k, n): (usize, usize, usize),
    block: usize,
    mode: Accumulate,
) {
    assert!(lhs.len() >= m * k, "lhs shorter than {}x{}", m, k);
    assert!(rhs.len() >= k * n, "rhs shorter than {}x{}", k, n);
    assert!(out.len() >= m * n, "out shorter than {}x{}", m, n);

    let out = &mut out[..m * n];
    if mode == Accumulate::Assign {
        out.fill(0.0);
    }
    if m == 0 || n == 0 || k == 0 {
        return;
    }

    let block = block.max(1);
    let sign = if mode == Accumulate::Subtract { -1.0 } else { 1.0 };

    out.par_chunks_mut(m * block)
        .enumerate()
        .for_each(|(col_block, out_cols)| {
            let first_col = col_block * block;
            let cols_here = out_cols.len() / m;
            for row_start in (0..m).step_by(block) {
                let row_end = (row_start + block).min(m);
                for inner_start in (0..k).step_by(block) {
                    let inner_end = (inner_start + block).min(k);
                    for local_col in 0..cols_here {
                        let col = first_col + local_col;
                        let rhs_col = &rhs[col * k..(col + 1) * k];
                        let base = local_col * m;
                        let out_tile = &mut out_cols[base + row_start..base + row_end];
                        for t in inner_start..inner_end {
                            let coeff = sign * rhs_col[t];
                            let lhs_tile = &lhs[t * m + row_start..t * m + row_end];
                            for (o, l) in out_tile.iter_mut().zip(lhs_tile) {
                                *o += coeff * l;
                            }
                        }
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(lhs: &[f64], rhs: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
        let mut out = vec![0.0; m * n];
        for j in 0..n {
            for i in 0..m {
                out[j * m + i] = (0..k).map(|t| lhs[t * m + i] * rhs[j * k + t]).sum();
            }
        }
        out
    }

    fn ramp(len: usize, scale: f64) -> Vec<f64> {
        (0..len).map(|i| ((i * 7 % 13) as f64 - 6.0) * scale).collect()
    }

    #[test]
    fn assign_matches_naive_product_across_tile_edges() {
        let (m, k, n) = (37, 5, 70);
        let lhs = ramp(m * k, 0.5);
        let rhs = ramp(k * n, 0.25);
        let mut out = vec![99.0; m * n];
        multiply_accumulate(&lhs, &rhs, &mut out, (m, k, n), 8, Accumulate::Assign);
        let expected = naive(&lhs, &rhs, m, k, n);
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn add_then_subtract_restores_buffer() {
        let (m, k, n) = (9, 3, 11);
        let lhs = ramp(m * k, 1.0);
        let rhs = ramp(k * n, 1.0);
        let original = ramp(m * n, 0.1);
        let mut out = original.clone();
        multiply_accumulate(&lhs, &rhs, &mut out, (m, k, n), DEFAULT_BLOCK, Accumulate::Add);
        multiply_accumulate(&lhs, &rhs, &mut out, (m, k, n), DEFAULT_BLOCK, Accumulate::Subtract);
        for (a, b) in out.iter().zip(&original) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_inner_dimension_assigns_zeros() {
        let mut out = vec![5.0; 6];
        multiply_accumulate(&[], &[], &mut out, (2, 0, 3), DEFAULT_BLOCK, Accumulate::Assign);
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
