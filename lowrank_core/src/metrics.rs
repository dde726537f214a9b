//! Error, quality and rank-selection helpers for finished reconstructions.

use serde::{Deserialize, Serialize};

use crate::frame::{luma, DisplayFrame};
use crate::image::ChannelTriple;
use crate::linalg::ChannelMatrix;

/// PSNR (dB) that maps to a quality of 1.0.
pub const PSNR_CEILING_DB: f64 = 50.0;

/// Root-mean-square difference over every value of all three channels.
pub fn rms_error(
    original: &ChannelTriple<ChannelMatrix>,
    reconstructed: &ChannelTriple<ChannelMatrix>,
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for ((_, a), (_, b)) in original.iter().zip(reconstructed.iter()) {
        let d = a.frobenius_distance(b);
        sum += d * d;
        count += a.col_major().len();
    }
    (sum / count.max(1) as f64).sqrt()
}

/// Luma PSNR between two frames scaled into `[0, 1]`, 50 dB and above
/// counting as perfect.
pub fn psnr_quality(original: &DisplayFrame, compressed: &DisplayFrame) -> f64 {
    let mut total = 0.0;
    let mut pixels = 0usize;
    for (a, b) in original.rgba.chunks_exact(4).zip(compressed.rgba.chunks_exact(4)) {
        let la = luma(f64::from(a[0]), f64::from(a[1]), f64::from(a[2]));
        let lb = luma(f64::from(b[0]), f64::from(b[1]), f64::from(b[2]));
        total += (la - lb) * (la - lb);
        pixels += 1;
    }
    if pixels == 0 {
        return 0.0;
    }
    let mse = total / pixels as f64;
    if mse == 0.0 {
        return 1.0;
    }
    let psnr = 20.0 * (255.0 / mse.sqrt()).log10();
    (psnr / PSNR_CEILING_DB).clamp(0.0, 1.0)
}

/// Values stored by a rank-`k` factorization relative to the dense matrix:
/// `k(m + n + 1) / (m n)`.
pub fn storage_ratio(rows: usize, cols: usize, rank: usize) -> f64 {
    if rows == 0 || cols == 0 {
        return 0.0;
    }
    (rank * (rows + cols + 1)) as f64 / (rows * cols) as f64
}

/// Pick a rank for `target_quality ∈ [0, 1]` by blending a cumulative-energy
/// estimate with a magnitude cut-off.
///
/// High targets (≥ 0.9) never go below 30% of the available rank, low
/// targets (≤ 0.3) never above 10%.
pub fn estimate_optimal_rank(singular_values: &[f64], target_quality: f64) -> usize {
    let len = singular_values.len();
    if len == 0 {
        return 1;
    }
    let target = target_quality.clamp(0.0, 1.0);
    let max = singular_values.iter().copied().fold(0.0, f64::max);
    let denom = if max > 0.0 { max } else { 1.0 };

    let total_energy: f64 = singular_values.iter().map(|s| (s / denom).powi(2)).sum();
    let mut cumulative = 0.0;
    let mut energy_rank = 1;
    for (i, s) in singular_values.iter().enumerate() {
        cumulative += (s / denom).powi(2);
        if total_energy > 0.0 && cumulative / total_energy >= target {
            energy_rank = i + 1;
            break;
        }
    }

    let threshold = target * max;
    let magnitude_rank = singular_values
        .iter()
        .take_while(|&&s| s >= threshold)
        .count()
        .max(1);

    let combined =
        (energy_rank as f64 * target + magnitude_rank as f64 * (1.0 - target)).round() as usize;
    let tuned = if target >= 0.9 {
        combined.max((len as f64 * 0.3).floor() as usize)
    } else if target <= 0.3 {
        combined.min((len as f64 * 0.1).ceil() as usize)
    } else {
        combined
    };
    tuned.clamp(1, len)
}

/// Percentages describing a compressed representation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionEfficiency {
    pub size_reduction: f64,
    pub storage_efficiency: f64,
    pub quality_efficiency: f64,
}

impl CompressionEfficiency {
    pub fn compute(
        original_size: usize,
        compressed_size: usize,
        rank: usize,
        total_rank: usize,
    ) -> Self {
        let original = original_size.max(1) as f64;
        Self {
            size_reduction: (original - compressed_size as f64) / original * 100.0,
            storage_efficiency: compressed_size as f64 / original * 100.0,
            quality_efficiency: rank as f64 / total_rank.max(1) as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_estimate_follows_target() {
        let values = [10.0, 5.0, 1.0, 0.5];
        assert_eq!(estimate_optimal_rank(&values, 0.8), 2);
        assert_eq!(estimate_optimal_rank(&values, 0.95), 2);
        assert_eq!(estimate_optimal_rank(&values, 0.2), 1);
        assert_eq!(estimate_optimal_rank(&[], 0.8), 1);
        assert_eq!(estimate_optimal_rank(&[0.0, 0.0], 0.5), 2);
    }

    #[test]
    fn identical_frames_are_perfect() {
        let frame = DisplayFrame {
            width: 1,
            height: 2,
            rgba: vec![10, 20, 30, 255, 40, 50, 60, 255],
        };
        assert_eq!(psnr_quality(&frame, &frame), 1.0);

        let mut noisy = frame.clone();
        noisy.rgba[0] = 200;
        let quality = psnr_quality(&frame, &noisy);
        assert!(quality > 0.0 && quality < 1.0);
    }

    #[test]
    fn rms_of_constant_offset() {
        let a = ChannelTriple::from_fn(|_| ChannelMatrix::zeros(2, 3));
        let b = ChannelTriple::from_fn(|_| ChannelMatrix::from_fn(2, 3, |_, _| 2.0));
        assert!((rms_error(&a, &b) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn storage_and_efficiency() {
        assert!((storage_ratio(10, 10, 1) - 0.21).abs() < 1e-12);
        let eff = CompressionEfficiency::compute(300, 63, 1, 10);
        assert!((eff.size_reduction - 79.0).abs() < 1e-9);
        assert!((eff.storage_efficiency - 21.0).abs() < 1e-9);
        assert!((eff.quality_efficiency - 10.0).abs() < 1e-9);
    }
}
