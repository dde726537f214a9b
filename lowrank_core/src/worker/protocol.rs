//! Messages exchanged across the worker boundary.
//!
//! Every message carries the generation of the request it belongs to. The
//! caller bumps its generation on each request and drops replies tagged with
//! an older one.

use crate::error::EngineError;
use crate::frame::DisplayFrame;
use crate::linalg::ChannelMatrix;

pub type Generation = u64;

#[derive(Debug)]
pub enum WorkerRequest {
    /// Decompose a column-major buffer. Ownership of the buffer moves to the
    /// worker.
    ComputeFactors {
        generation: Generation,
        buffer: Vec<f64>,
        rows: usize,
        cols: usize,
        approx: bool,
        rank_cap: Option<usize>,
    },
    /// Reconstruct at `rank` from the factors of the last `ComputeFactors`.
    ComputeLowRank { generation: Generation, rank: usize },
    Shutdown,
}

impl WorkerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::ComputeFactors { .. } => "ComputeFactors",
            WorkerRequest::ComputeLowRank { .. } => "ComputeLowRank",
            WorkerRequest::Shutdown => "Shutdown",
        }
    }
}

/// A `ComputeLowRank` is answered by `LowRankMatrix` followed by
/// `DisplayFrame`; every other request by a single message.
#[derive(Debug)]
pub enum WorkerResponse {
    SingularValues {
        generation: Generation,
        values: Vec<f64>,
    },
    LowRankMatrix {
        generation: Generation,
        matrix: ChannelMatrix,
    },
    DisplayFrame {
        generation: Generation,
        frame: DisplayFrame,
    },
    Error {
        generation: Generation,
        error: EngineError,
    },
}

impl WorkerResponse {
    pub fn generation(&self) -> Generation {
        match self {
            WorkerResponse::SingularValues { generation, .. }
            | WorkerResponse::LowRankMatrix { generation, .. }
            | WorkerResponse::DisplayFrame { generation, .. }
            | WorkerResponse::Error { generation, .. } => *generation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerResponse::SingularValues { .. } => "SingularValues",
            WorkerResponse::LowRankMatrix { .. } => "LowRankMatrix",
            WorkerResponse::DisplayFrame { .. } => "DisplayFrame",
            WorkerResponse::Error { .. } => "Error",
        }
    }
}
