//! Rank-updatable factor storage.
//!
//! `FactorStore` keeps `U·Σ` and `Vᵗ` packed so that moving from rank `a` to
//! rank `b` only touches the `|a − b|` components in between. The
//! reconstruction buffer is updated in place by adding or subtracting that
//! block.

use tracing::trace;

use crate::decompose::SingularTriplets;
use crate::frame::DisplayFrame;
use crate::linalg::{multiply_accumulate, Accumulate, ChannelMatrix, DEFAULT_BLOCK};

/// Packed factors of one channel plus its current reconstruction.
#[derive(Debug, Clone)]
pub struct FactorStore {
    rows: usize,
    cols: usize,
    rank: usize,
    /// `U·Σ`, column-major `rows × rank`
    u_sigma: Vec<f64>,
    /// `Vᵗ`, row-major `rank × cols`
    vt: Vec<f64>,
    singular_values: Vec<f64>,
    current_rank: usize,
    buffer: ChannelMatrix,
    /// column-major slice of `Vᵗ` rows fed to the kernel
    scratch: Vec<f64>,
    block: usize,
}

impl Default for FactorStore {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK)
    }
}

impl FactorStore {
    pub fn new(block: usize) -> Self {
        Self {
            rows: 0,
            cols: 0,
            rank: 0,
            u_sigma: Vec::new(),
            vt: Vec::new(),
            singular_values: Vec::new(),
            current_rank: 0,
            buffer: ChannelMatrix::zeros(0, 0),
            scratch: Vec::new(),
            block: block.max(1),
        }
    }

    /// Pack `triplets` and reset the reconstruction to rank 0.
    pub fn initialize(&mut self, triplets: &SingularTriplets) {
        let (m, n, r) = (triplets.rows(), triplets.cols(), triplets.len());
        self.rows = m;
        self.cols = n;
        self.rank = r;

        self.u_sigma.clear();
        self.u_sigma.reserve(m * r);
        self.vt.clear();
        self.vt.reserve(r * n);
        for component in triplets.components() {
            self.u_sigma
                .extend(component.u.iter().map(|u| u * component.sigma));
            self.vt.extend(component.v.iter().copied());
        }

        self.singular_values = triplets.singular_values();
        self.current_rank = 0;
        self.buffer = ChannelMatrix::zeros(m, n);
        self.scratch.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.rank > 0
    }

    /// Number of stored components.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn current_rank(&self) -> usize {
        self.current_rank
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }

    pub fn buffer(&self) -> &ChannelMatrix {
        &self.buffer
    }

    /// Requested ranks below 1 or above the stored rank are pulled into range.
    pub fn clamp_rank(&self, k: usize) -> usize {
        k.clamp(1, self.rank.max(1)).min(self.rank)
    }

    /// Rebuild the buffer as `Σ_{t<k} (UΣ)[:,t] · Vᵗ[t,:]`.
    pub fn reconstruct_from_scratch(&mut self, k: usize) -> &ChannelMatrix {
        let k = self.clamp_rank(k);
        self.apply_block(0, k, Accumulate::Assign);
        self.current_rank = k;
        &self.buffer
    }

    /// Move the buffer to rank `k` by adding or subtracting only the
    /// components between the current and the target rank.
    pub fn update_rank(&mut self, k: usize) -> &ChannelMatrix {
        if self.current_rank == 0 {
            return self.reconstruct_from_scratch(k);
        }
        let target = self.clamp_rank(k);
        if target == self.current_rank {
            return &self.buffer;
        }

        let (lo, hi, mode) = if target > self.current_rank {
            (self.current_rank, target, Accumulate::Add)
        } else {
            (target, self.current_rank, Accumulate::Subtract)
        };
        trace!(from = self.current_rank, to = target, "rank delta");
        self.apply_block(lo, hi, mode);
        self.current_rank = target;
        &self.buffer
    }

    pub fn to_display_frame(&self) -> DisplayFrame {
        DisplayFrame::from_grey(&self.buffer)
    }

    fn apply_block(&mut self, lo: usize, hi: usize, mode: Accumulate) {
        let (m, n) = (self.rows, self.cols);
        let k = hi - lo;

        self.scratch.clear();
        self.scratch.resize(k * n, 0.0);
        for j in 0..n {
            for t in 0..k {
                self.scratch[j * k + t] = self.vt[(lo + t) * n + j];
            }
        }

        multiply_accumulate(
            &self.u_sigma[lo * m..hi * m],
            &self.scratch,
            self.buffer.col_major_mut(),
            (m, k, n),
            self.block,
            mode,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::{Preset, PowerIterationDecomposer};

    fn store_for(matrix: ChannelMatrix, rank: usize) -> FactorStore {
        let triplets = PowerIterationDecomposer::from_seed(21)
            .decompose(matrix, rank, &Preset::Balanced.options())
            .unwrap();
        let mut store = FactorStore::new(4);
        store.initialize(&triplets);
        store
    }

    fn sample(rows: usize, cols: usize) -> ChannelMatrix {
        ChannelMatrix::from_fn(rows, cols, |r, c| ((r * 13 + c * 7) % 17) as f64 * 10.0)
    }

    #[test]
    fn clamping() {
        let mut store = store_for(sample(9, 6), 4);
        let low = store.update_rank(0).clone();
        assert_eq!(store.current_rank(), 1);
        let one = store.reconstruct_from_scratch(1).clone();
        assert_eq!(low, one);

        let high = store.update_rank(99).clone();
        assert_eq!(store.current_rank(), 4);
        let four = store.reconstruct_from_scratch(4).clone();
        assert!(high.max_abs_diff(&four) < 1e-9);
    }

    #[test]
    fn repeated_rank_is_bit_identical() {
        let mut store = store_for(sample(8, 8), 5);
        store.update_rank(2);
        let first = store.update_rank(3).clone();
        let second = store.update_rank(3).clone();
        assert_eq!(first.col_major(), second.col_major());
    }

    #[test]
    fn incremental_matches_scratch_in_both_directions() {
        let mut store = store_for(sample(20, 15), 10);
        store.update_rank(3);
        let up = store.update_rank(9).clone();
        let down = store.update_rank(4).clone();

        let mut reference = store_for(sample(20, 15), 10);
        let scratch_up = reference.reconstruct_from_scratch(9).clone();
        let scratch_down = reference.reconstruct_from_scratch(4).clone();

        let scale = scratch_up.frobenius_norm().max(1.0);
        assert!(up.frobenius_distance(&scratch_up) / scale < 1e-6);
        assert!(down.frobenius_distance(&scratch_down) / scale < 1e-6);
    }

    #[test]
    fn frame_matches_buffer_shape() {
        let mut store = store_for(sample(3, 5), 2);
        store.update_rank(2);
        let frame = store.to_display_frame();
        assert_eq!((frame.width, frame.height), (5, 3));
        assert_eq!(frame.rgba.len(), 5 * 3 * 4);
    }

    #[test]
    fn empty_store_yields_empty_buffer() {
        let mut store = FactorStore::default();
        assert!(!store.is_initialized());
        assert_eq!(store.update_rank(3).shape(), (0, 0));
        assert_eq!(store.current_rank(), 0);
    }
}
