//! Top-level facade: pixels in, frames out.
//!
//! A [`Session`] converts an RGBA buffer into three column-major channel
//! matrices, hands them to a [`ComputationCoordinator`] and turns the
//! reconstructed channels it gets back into [`SessionUpdate`]s. Updates are
//! pulled by the consumer from a bounded queue; while the queue is full the
//! coordinator waits.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{EngineConfig, GrayscaleSettings};
use crate::coordinator::{ComputationCoordinator, CoordinatorUpdate, RankOutcome, RankTicket};
use crate::error::EngineResult;
use crate::frame::DisplayFrame;
use crate::image::{ChannelImage, ChannelTriple, ImageDims};
use crate::worker::Tier;

/// One rendered result, immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub tier: Tier,
    pub rank: usize,
    pub singular_values: ChannelTriple<Vec<f64>>,
    pub frame: DisplayFrame,
}

pub struct Session {
    id: Uuid,
    config: EngineConfig,
    coordinator: Option<ComputationCoordinator>,
    updates: Option<Receiver<CoordinatorUpdate>>,
    latest: Option<CoordinatorUpdate>,
    run: u64,
    color_mix: f64,
    dims: Option<ImageDims>,
    grayscale: Option<bool>,
}

impl Session {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let id = Uuid::new_v4();
        let (tx, rx) = bounded(config.engine.update_queue.max(1));
        let coordinator = ComputationCoordinator::spawn(&config, &id.to_string(), tx)?;
        info!(session = %id, "session created");
        Ok(Self {
            id,
            color_mix: config.engine.color_mix,
            config,
            coordinator: Some(coordinator),
            updates: Some(rx),
            latest: None,
            run: 0,
            dims: None,
            grayscale: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dims(&self) -> Option<ImageDims> {
        self.dims
    }

    pub fn color_mix(&self) -> f64 {
        self.color_mix
    }

    /// Outcome of the grayscale heuristic for the current image.
    pub fn is_grayscale(&self) -> Option<bool> {
        self.grayscale
    }

    pub fn is_disposed(&self) -> bool {
        self.coordinator.is_none()
    }

    /// Start from interleaved RGBA bytes. A no-op after `dispose`.
    pub fn start(
        &mut self,
        pixels: &[u8],
        dims: ImageDims,
        initial_rank: usize,
    ) -> EngineResult<()> {
        if self.is_disposed() {
            debug!(session = %self.id, "start on disposed session ignored");
            return Ok(());
        }
        let image = ChannelImage::from_rgba(pixels, dims)?;
        self.start_channels(image, initial_rank)
    }

    /// Start from channel matrices the caller already holds.
    pub fn start_channels(&mut self, image: ChannelImage, initial_rank: usize) -> EngineResult<()> {
        let Some(coordinator) = &self.coordinator else {
            debug!(session = %self.id, "start on disposed session ignored");
            return Ok(());
        };

        let grayscale = classify_grayscale(&image, &self.config.grayscale);
        let dims = image.dims();
        info!(
            session = %self.id,
            width = dims.width,
            height = dims.height,
            grayscale,
            initial_rank,
            "session started"
        );

        coordinator.compute(image, initial_rank)?;
        self.run += 1;
        self.dims = Some(dims);
        self.grayscale = Some(grayscale);
        self.latest = None;
        Ok(())
    }

    /// Request a new rank. After `dispose` the ticket settles as disposed.
    pub fn set_rank(&mut self, rank: usize) -> RankTicket {
        match self.coordinator.as_mut() {
            Some(coordinator) => coordinator.set_rank(rank),
            None => RankTicket::settled(rank, Ok(RankOutcome::Disposed)),
        }
    }

    /// Re-blend the last received channels. Never triggers computation.
    pub fn set_color_mix(&mut self, mix: f64) -> Option<SessionUpdate> {
        if self.is_disposed() {
            return None;
        }
        if !mix.is_nan() {
            self.color_mix = mix.clamp(0.0, 1.0);
        }
        self.latest.as_ref().map(|update| render(update, self.color_mix))
    }

    /// Block until the next update. `None` once the session is disposed.
    pub fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let update = self.updates.as_ref()?.recv().ok()?;
            if let Some(rendered) = self.receive(update) {
                return Some(rendered);
            }
        }
    }

    pub fn try_next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let update = match self.updates.as_ref()?.try_recv() {
                Ok(update) => update,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return None,
            };
            if let Some(rendered) = self.receive(update) {
                return Some(rendered);
            }
        }
    }

    pub fn next_update_timeout(&mut self, timeout: Duration) -> Option<SessionUpdate> {
        loop {
            let update = match self.updates.as_ref()?.recv_timeout(timeout) {
                Ok(update) => update,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            };
            if let Some(rendered) = self.receive(update) {
                return Some(rendered);
            }
        }
    }

    /// Blocking iterator over updates; ends when the session is disposed.
    pub fn updates(&mut self) -> impl Iterator<Item = SessionUpdate> + '_ {
        std::iter::from_fn(move || self.next_update())
    }

    /// Stop every worker. Idempotent; later calls on the session are no-ops.
    pub fn dispose(&mut self) {
        let Some(mut coordinator) = self.coordinator.take() else {
            return;
        };
        // unblock a driver waiting on a full queue
        self.updates = None;
        coordinator.dispose();
        self.latest = None;
        info!(session = %self.id, "session disposed");
    }

    fn receive(&mut self, update: CoordinatorUpdate) -> Option<SessionUpdate> {
        if update.run != self.run {
            debug!(
                session = %self.id,
                run = update.run,
                current = self.run,
                "stale update dropped"
            );
            return None;
        }
        let rendered = render(&update, self.color_mix);
        self.latest = Some(update);
        Some(rendered)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn render(update: &CoordinatorUpdate, mix: f64) -> SessionUpdate {
    SessionUpdate {
        tier: update.tier,
        rank: update.rank,
        singular_values: update.singular_values.clone(),
        frame: DisplayFrame::blend(update.channels.each_ref(), mix),
    }
}

/// Sample a coarse grid and call the image grayscale when almost no sample
/// has diverging channels.
pub fn classify_grayscale(image: &ChannelImage, settings: &GrayscaleSettings) -> bool {
    let ImageDims { width, height } = image.dims();
    let grid = settings.grid.max(1);
    let step_y = (height / grid).max(1);
    let step_x = (width / grid).max(1);
    let channels = image.channels();
    let (r, g, b) = (
        channels.red.col_major(),
        channels.green.col_major(),
        channels.blue.col_major(),
    );

    let mut samples = 0usize;
    let mut coloured = 0usize;
    for y in (0..height).step_by(step_y) {
        for x in (0..width).step_by(step_x) {
            let q = x * height + y;
            let divergence = (r[q] - g[q]).abs() + (r[q] - b[q]).abs() + (g[q] - b[q]).abs();
            if divergence > settings.channel_threshold {
                coloured += 1;
            }
            samples += 1;
        }
    }
    (coloured as f64) / (samples.max(1) as f64) < settings.max_fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey_pixels(dims: ImageDims) -> Vec<u8> {
        (0..dims.pixels())
            .flat_map(|i| {
                let v = (i * 7 % 256) as u8;
                [v, v, v, 255]
            })
            .collect()
    }

    #[test]
    fn grayscale_heuristic() {
        let dims = ImageDims::new(32, 20);
        let settings = GrayscaleSettings::default();
        let grey = ChannelImage::from_rgba(&grey_pixels(dims), dims).unwrap();
        assert!(classify_grayscale(&grey, &settings));

        let colour: Vec<u8> = (0..dims.pixels())
            .flat_map(|i| [(i % 200) as u8, 10, 240, 255])
            .collect();
        let colour = ChannelImage::from_rgba(&colour, dims).unwrap();
        assert!(!classify_grayscale(&colour, &settings));
    }

    #[test]
    fn zero_grid_samples_every_pixel() {
        let dims = ImageDims::new(4, 4);
        let grey = ChannelImage::from_rgba(&grey_pixels(dims), dims).unwrap();
        let settings = GrayscaleSettings {
            grid: 0,
            ..GrayscaleSettings::default()
        };
        assert!(classify_grayscale(&grey, &settings));
    }

    #[test]
    fn zero_update_queue_still_delivers() {
        let mut config = EngineConfig::default();
        config.engine.update_queue = 0;
        let mut session = Session::new(config).unwrap();
        let dims = ImageDims::new(4, 4);
        session.start(&grey_pixels(dims), dims, 1).unwrap();
        let update = session
            .next_update_timeout(Duration::from_secs(30))
            .expect("update delivered");
        assert_eq!(update.rank, 1);
    }

    #[test]
    fn disposed_session_is_inert() {
        let mut session = Session::new(EngineConfig::default()).unwrap();
        session.dispose();
        session.dispose();
        assert!(session.is_disposed());
        assert_eq!(session.set_rank(3).wait(), Ok(RankOutcome::Disposed));
        assert!(session.set_color_mix(0.5).is_none());
        assert!(session.next_update().is_none());
        let dims = ImageDims::new(2, 2);
        assert!(session.start(&grey_pixels(dims), dims, 1).is_ok());
    }

    #[test]
    fn empty_image_is_rejected_at_start() {
        let mut session = Session::new(EngineConfig::default()).unwrap();
        let err = session.start(&[], ImageDims::new(0, 0), 1).unwrap_err();
        assert!(err.is_fatal());

        let empty = ChannelTriple::from_fn(|_| crate::linalg::ChannelMatrix::zeros(0, 3));
        let err = ChannelImage::new(empty)
            .and_then(|image| session.start_channels(image, 1))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.dims(), None);
        assert!(session.try_next_update().is_none());
    }

    #[test]
    fn bad_pixel_buffer_is_rejected() {
        let mut session = Session::new(EngineConfig::default()).unwrap();
        let err = session.start(&[0u8; 5], ImageDims::new(2, 2), 1).unwrap_err();
        assert!(err.is_fatal());
    }
}
