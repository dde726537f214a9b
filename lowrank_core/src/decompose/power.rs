use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::{DecomposeOptions, SingularTriplets, Triplet};
use crate::error::{EngineError, EngineResult};
use crate::linalg::ChannelMatrix;

/// Vectors whose norm falls below this are left unnormalized.
pub const NORM_EPSILON: f64 = 1e-10;

/// Power iteration with deflation over a dense channel matrix.
///
/// The start vectors come from the injected generator, so two decomposers
/// built from the same seed produce identical triplets.
///
/// # Examples
///
/// ```
/// use lowrank_core::{ChannelMatrix, DecomposeOptions, PowerIterationDecomposer};
///
/// let matrix = ChannelMatrix::diagonal(&[4.0, 3.0, 2.0, 1.0]);
/// let mut decomposer = PowerIterationDecomposer::from_seed(7);
/// let triplets = decomposer
///     .decompose(matrix, 2, &DecomposeOptions::default())
///     .unwrap();
/// assert_eq!(triplets.len(), 2);
/// assert!((triplets.singular_values()[0] - 4.0).abs() < 1e-3);
/// ```
pub struct PowerIterationDecomposer<R: Rng = StdRng> {
    rng: R,
    cancel: Option<Arc<AtomicBool>>,
}

impl PowerIterationDecomposer<StdRng> {
    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> PowerIterationDecomposer<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng, cancel: None }
    }

    /// Abandon the decomposition between iterations once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Extract up to `rank` components, consuming `matrix` as the deflation
    /// workspace. The result holds `min(rank, rows, cols)` triplets.
    pub fn decompose(
        &mut self,
        matrix: ChannelMatrix,
        rank: usize,
        options: &DecomposeOptions,
    ) -> EngineResult<SingularTriplets> {
        let (rows, cols) = matrix.shape();
        if rows == 0 || cols == 0 {
            return Err(EngineError::shape(
                "decompose",
                format!("matrix is {}x{}", rows, cols),
            ));
        }

        let rank = rank.min(rows).min(cols);
        let mut work = matrix.into_array();
        let mut components = Vec::with_capacity(rank);

        for index in 0..rank {
            let component = self.extract(&work, options)?;
            trace!(
                index,
                sigma = component.sigma,
                iterations = component.iterations,
                converged = component.converged,
                "extracted component"
            );
            deflate(&mut work, &component);
            components.push(component);
        }

        Ok(SingularTriplets::new(rows, cols, components))
    }

    fn extract(&mut self, a: &Array2<f64>, options: &DecomposeOptions) -> EngineResult<Triplet> {
        let (rows, cols) = a.dim();
        let mut u = Array1::from_shape_fn(rows, |_| self.rng.gen_range(-0.5..0.5));
        let mut v = Array1::from_shape_fn(cols, |_| self.rng.gen_range(-0.5..0.5));

        let mut sigma = 0.0;
        let mut previous = 0.0;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < options.max_iterations {
            self.check_cancelled()?;

            v = a.t().dot(&u);
            normalize(&mut v);
            let av = a.dot(&v);
            u = av.clone();
            normalize(&mut u);
            sigma = u.dot(&av);
            iterations += 1;

            if (sigma - previous).abs() < options.tolerance {
                converged = true;
                break;
            }
            previous = sigma;
        }

        if sigma < 0.0 {
            sigma = -sigma;
            u.mapv_inplace(|x| -x);
        }

        Ok(Triplet {
            u,
            sigma,
            v,
            iterations,
            converged,
        })
    }

    fn check_cancelled(&self) -> EngineResult<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                Err(EngineError::cancelled("power iteration"))
            }
            _ => Ok(()),
        }
    }
}

/// Scale `v` to unit length unless its norm has collapsed.
fn normalize(v: &mut Array1<f64>) -> f64 {
    let norm = v.dot(v).sqrt();
    if norm > NORM_EPSILON {
        *v /= norm;
    }
    norm
}

/// `A ← A − σ·u·vᵗ`, one column at a time.
fn deflate(a: &mut Array2<f64>, component: &Triplet) {
    for (j, mut column) in a.axis_iter_mut(Axis(1)).enumerate() {
        column.scaled_add(-component.sigma * component.v[j], &component.u);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::Preset;

    #[test]
    fn diagonal_singular_values_recovered() {
        let matrix = ChannelMatrix::diagonal(&[4.0, 3.0, 2.0, 1.0]);
        let mut decomposer = PowerIterationDecomposer::from_seed(11);
        let triplets = decomposer
            .decompose(matrix, 4, &Preset::Precise.options())
            .unwrap();
        let values = triplets.singular_values();
        assert_eq!(values.len(), 4);
        for (found, expected) in values.iter().zip([4.0, 3.0, 2.0, 1.0]) {
            assert!((found - expected).abs() < 1e-3, "{} vs {}", found, expected);
        }
        assert!(triplets.is_ordered_within(1e-6));
    }

    #[test]
    fn same_seed_is_deterministic() {
        let build = || ChannelMatrix::from_fn(12, 9, |r, c| ((r * 3 + c * 5) % 7) as f64);
        let options = Preset::Fast.options();
        let a = PowerIterationDecomposer::from_seed(5)
            .decompose(build(), 4, &options)
            .unwrap();
        let b = PowerIterationDecomposer::from_seed(5)
            .decompose(build(), 4, &options)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rank_is_clamped_to_shape() {
        let matrix = ChannelMatrix::from_fn(3, 5, |r, c| (r + c) as f64);
        let triplets = PowerIterationDecomposer::from_seed(1)
            .decompose(matrix, 50, &DecomposeOptions::default())
            .unwrap();
        assert_eq!(triplets.len(), 3);
        assert_eq!((triplets.rows(), triplets.cols()), (3, 5));
    }

    #[test]
    fn zero_matrix_degrades_without_error() {
        let triplets = PowerIterationDecomposer::from_seed(3)
            .decompose(ChannelMatrix::zeros(4, 4), 2, &DecomposeOptions::default())
            .unwrap();
        assert!(triplets.singular_values().iter().all(|&s| s == 0.0));
        assert!(triplets
            .components()
            .iter()
            .all(|t| t.u.iter().all(|x| x.is_finite())));
    }

    #[test]
    fn empty_matrix_is_shape_error() {
        let err = PowerIterationDecomposer::from_seed(3)
            .decompose(ChannelMatrix::zeros(0, 4), 1, &DecomposeOptions::default())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn singular_values_are_non_negative() {
        let matrix = ChannelMatrix::from_fn(10, 7, |r, c| {
            if (r + c) % 2 == 0 {
                -(r as f64)
            } else {
                c as f64 * 0.5
            }
        });
        let triplets = PowerIterationDecomposer::from_seed(9)
            .decompose(matrix, 7, &Preset::Balanced.options())
            .unwrap();
        assert!(triplets.singular_values().iter().all(|&s| s >= 0.0));
    }

    #[test]
    fn cancelled_flag_aborts() {
        let flag = Arc::new(AtomicBool::new(true));
        let err = PowerIterationDecomposer::from_seed(2)
            .with_cancel_flag(flag)
            .decompose(ChannelMatrix::diagonal(&[1.0, 2.0]), 2, &DecomposeOptions::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }
}
