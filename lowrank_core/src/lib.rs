//! # Low-Rank Core
//!
//! An incremental low-rank approximation engine for image channels. Each
//! colour channel is factorized by power iteration with deflation, the
//! factors are packed so that changing the displayed rank costs `O(|Δk|·m·n)`,
//! and results stream through two accuracy tiers: a fast capped estimate
//! followed by the exact factorization, which supersedes it for good.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lowrank_core::{EngineConfig, ImageDims, Session};
//!
//! let pixels = vec![128u8; 64 * 48 * 4];
//! let mut session = Session::new(EngineConfig::default())?;
//! session.start(&pixels, ImageDims::new(64, 48), 10)?;
//!
//! // the first update may come from the approximate tier
//! if let Some(update) = session.next_update() {
//!     println!("{} rank {}: {} bytes", update.tier, update.rank, update.frame.rgba.len());
//! }
//!
//! let ticket = session.set_rank(25);
//! println!("{:?}", ticket.wait());
//! session.dispose();
//! # Ok::<(), lowrank_core::EngineError>(())
//! ```
//!
//! ## Core Modules
//!
//! - [`decompose`] - Power iteration, presets and singular triplets
//! - [`store`] - Rank-updatable factor storage
//! - [`worker`] - Isolated worker threads and their message protocol
//! - [`coordinator`] - Two-tier orchestration and rank coalescing
//! - [`session`] - Pixel conversion, colour mixing and lifecycle
//! - [`config`] - Engine configuration via TOML
//! - [`logging`] - JSON line-delimited decomposition log

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod decompose;
pub mod error;
pub mod frame;
pub mod image;
pub mod linalg;
pub mod logging;
pub mod metrics;
pub mod precompute;
pub mod session;
pub mod store;
pub mod worker;

pub use cache::{CacheKey, FactorCache};
pub use config::{ConfigError, EngineConfig, TierSettings};
pub use coordinator::{ComputationCoordinator, CoordinatorUpdate, RankOutcome, RankTicket};
pub use decompose::{DecomposeOptions, PowerIterationDecomposer, Preset, SingularTriplets};
pub use error::{EngineError, EngineResult};
pub use frame::DisplayFrame;
pub use image::{ChannelImage, ChannelTriple, Color, ImageDims};
pub use linalg::ChannelMatrix;
pub use metrics::{estimate_optimal_rank, CompressionEfficiency};
pub use precompute::{precompute, CompressionReport, PrecomputedFactors};
pub use session::{Session, SessionUpdate};
pub use store::FactorStore;
pub use worker::{Tier, WorkerChannel};
