//! One-shot factorization of a whole image, shared through the cache.
//!
//! Unlike a [`Session`](crate::Session) this path runs synchronously: the
//! three channels are decomposed in parallel on the rayon pool and any rank
//! can then be reconstructed from the shared factors.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::cache::{CacheKey, FactorCache};
use crate::config::TierSettings;
use crate::decompose::{PowerIterationDecomposer, Preset, SingularTriplets};
use crate::error::{EngineError, EngineResult};
use crate::frame::DisplayFrame;
use crate::image::{ChannelImage, ChannelTriple, Color, ImageDims};
use crate::linalg::{ChannelMatrix, DEFAULT_BLOCK};
use crate::metrics::{psnr_quality, rms_error, storage_ratio, CompressionEfficiency};
use crate::store::FactorStore;

/// Factors of all three channels plus the image they came from.
#[derive(Debug, Clone)]
pub struct PrecomputedFactors {
    dims: ImageDims,
    preset: Preset,
    triplets: ChannelTriple<SingularTriplets>,
    original: ChannelTriple<ChannelMatrix>,
}

/// A reconstruction at one rank and how it compares with the original.
#[derive(Debug, Clone)]
pub struct CompressionReport {
    pub rank: usize,
    pub frame: DisplayFrame,
    pub rms_error: f64,
    /// Luma PSNR mapped into `[0, 1]`
    pub quality: f64,
    pub storage_ratio: f64,
    pub efficiency: CompressionEfficiency,
    /// Leading `rank` singular values per channel
    pub singular_values: ChannelTriple<Vec<f64>>,
}

pub type SharedFactors = Arc<PrecomputedFactors>;

/// Decompose `image` or return the cached factors for `identity`.
pub fn precompute(
    image: &ChannelImage,
    identity: &str,
    settings: &TierSettings,
    seed: u64,
    cache: &mut FactorCache<SharedFactors>,
) -> EngineResult<SharedFactors> {
    let dims = image.dims();
    let rank = settings.effective_rank(dims.height, dims.width);
    let key = CacheKey::new(identity, rank, settings.preset);
    if let Some(hit) = cache.get(&key) {
        debug!(identity, rank, "precomputed factors served from cache");
        return Ok(hit);
    }

    let decomposed = Color::ALL
        .par_iter()
        .map(|&color| {
            PowerIterationDecomposer::from_seed(seed.wrapping_add(color.index() as u64)).decompose(
                image.channel(color).clone(),
                rank,
                &settings.options,
            )
        })
        .collect::<EngineResult<Vec<_>>>()?;
    let [red, green, blue]: [SingularTriplets; 3] = decomposed
        .try_into()
        .map_err(|_| EngineError::worker("precompute", "expected three channels"))?;

    let factors = Arc::new(PrecomputedFactors {
        dims,
        preset: settings.preset,
        triplets: ChannelTriple::new(red, green, blue),
        original: image.channels().clone(),
    });
    cache.set(key, Arc::clone(&factors));
    Ok(factors)
}

impl PrecomputedFactors {
    pub fn dims(&self) -> ImageDims {
        self.dims
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    /// Components stored per channel.
    pub fn max_rank(&self) -> usize {
        self.triplets.red.len()
    }

    pub fn triplets(&self) -> &ChannelTriple<SingularTriplets> {
        &self.triplets
    }

    /// Reconstruct at rank `k` (clamped to `[1, max_rank]`) and blend with
    /// `color_mix`.
    pub fn reconstruct(&self, k: usize, color_mix: f64) -> CompressionReport {
        let channels: Vec<ChannelMatrix> = Color::ALL
            .par_iter()
            .map(|&color| {
                let mut store = FactorStore::new(DEFAULT_BLOCK);
                store.initialize(self.triplets.get(color));
                store.reconstruct_from_scratch(k).clone()
            })
            .collect();
        let mut channels = channels.into_iter();
        let mut next = || channels.next().unwrap_or_else(|| ChannelMatrix::zeros(0, 0));
        let reconstructed = ChannelTriple::new(next(), next(), next());

        let rank = k.clamp(1, self.max_rank().max(1)).min(self.max_rank());
        let (m, n) = (self.dims.height, self.dims.width);
        let frame = DisplayFrame::blend(reconstructed.each_ref(), color_mix);
        let reference = DisplayFrame::blend(self.original.each_ref(), 1.0);

        CompressionReport {
            rank,
            quality: psnr_quality(&reference, &frame),
            rms_error: rms_error(&self.original, &reconstructed),
            storage_ratio: storage_ratio(m, n, rank),
            efficiency: CompressionEfficiency::compute(
                3 * m * n,
                3 * rank * (m + n + 1),
                rank,
                self.max_rank(),
            ),
            singular_values: self
                .triplets
                .each_ref()
                .map(|t| t.singular_values().into_iter().take(rank).collect()),
            frame,
        }
    }
}
