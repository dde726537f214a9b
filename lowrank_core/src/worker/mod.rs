//! Isolated decomposer + factor store pairs behind a message boundary.

mod channel;
pub mod protocol;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::decompose::DecomposeOptions;
use crate::image::Color;
use crate::logging::DecompositionLog;

pub use channel::{ChannelReply, WorkerChannel};
pub use protocol::{Generation, WorkerRequest, WorkerResponse};

/// Largest rank approximate mode ever extracts; also its default cap.
pub const MAX_APPROX_RANK: usize = 50;

/// Accuracy level of a factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Approximate,
    Exact,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Approximate, Tier::Exact];

    pub fn name(self) -> &'static str {
        match self {
            Tier::Approximate => "approximate",
            Tier::Exact => "exact",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a worker thread needs to serve one (tier, channel) slot.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub tier: Tier,
    pub color: Color,
    pub seed: u64,
    pub block_size: usize,
    /// Used for `ComputeFactors { approx: true, .. }`
    pub approximate: DecomposeOptions,
    /// Used for `ComputeFactors { approx: false, .. }`
    pub exact: DecomposeOptions,
    pub session: String,
    pub telemetry: Option<DecompositionLog>,
}

impl WorkerSpec {
    pub fn new(tier: Tier, color: Color) -> Self {
        Self {
            tier,
            color,
            seed: 0,
            block_size: crate::linalg::DEFAULT_BLOCK,
            approximate: crate::decompose::Preset::Fast.options(),
            exact: crate::decompose::Preset::Balanced.options(),
            session: String::new(),
            telemetry: None,
        }
    }

    /// `tier/color`, used for thread names and error messages.
    pub fn label(&self) -> String {
        format!("{}/{}", self.tier.name(), self.color.name())
    }
}
