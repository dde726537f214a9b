use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use super::protocol::{Generation, WorkerRequest, WorkerResponse};
use super::{WorkerSpec, MAX_APPROX_RANK};
use crate::decompose::PowerIterationDecomposer;
use crate::error::{EngineError, EngineResult};
use crate::frame::DisplayFrame;
use crate::linalg::ChannelMatrix;
use crate::logging::{timestamp_ms, DecompositionLogEntry};
use crate::store::FactorStore;

/// A complete answer to the latest request.
#[derive(Debug)]
pub enum ChannelReply {
    Factors(Vec<f64>),
    LowRank {
        matrix: ChannelMatrix,
        frame: DisplayFrame,
    },
    Failed(EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expecting {
    Idle,
    Factors,
    LowRank,
    Frame,
}

impl Expecting {
    fn reply_kind(self) -> &'static str {
        match self {
            Expecting::Idle => "no",
            Expecting::Factors => "SingularValues",
            Expecting::LowRank => "LowRankMatrix",
            Expecting::Frame => "DisplayFrame",
        }
    }
}

/// Caller-side handle of one worker thread.
///
/// Each request bumps the channel's generation. Replies to older generations
/// are dropped in [`accept`](Self::accept), so issuing a new request while one
/// is in flight never needs the thread to be torn down.
pub struct WorkerChannel {
    label: String,
    requests: Sender<WorkerRequest>,
    responses: Receiver<WorkerResponse>,
    generation: Generation,
    expecting: Expecting,
    partial: Option<ChannelMatrix>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerChannel {
    pub fn spawn(spec: WorkerSpec) -> EngineResult<Self> {
        let label = spec.label();
        let (request_tx, request_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        let worker_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(format!("lowrank-{}", label))
            .spawn(move || Worker::new(spec, worker_cancel).run(request_rx, response_tx))
            .map_err(|err| EngineError::worker(label.clone(), err.to_string()))?;

        Ok(Self {
            label,
            requests: request_tx,
            responses: response_rx,
            generation: 0,
            expecting: Expecting::Idle,
            partial: None,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether a reply to the latest request is still outstanding.
    pub fn is_busy(&self) -> bool {
        self.expecting != Expecting::Idle
    }

    /// Receiver to register with a `crossbeam_channel::Select`. Messages taken
    /// from it must be passed through [`accept`](Self::accept).
    pub fn responses(&self) -> &Receiver<WorkerResponse> {
        &self.responses
    }

    pub fn compute_factors(
        &mut self,
        matrix: ChannelMatrix,
        approx: bool,
        rank_cap: Option<usize>,
    ) -> EngineResult<Generation> {
        let (rows, cols) = matrix.shape();
        let generation = self.begin(Expecting::Factors);
        self.send(WorkerRequest::ComputeFactors {
            generation,
            buffer: matrix.into_col_major(),
            rows,
            cols,
            approx,
            rank_cap,
        })?;
        Ok(generation)
    }

    pub fn compute_low_rank(&mut self, rank: usize) -> EngineResult<Generation> {
        let generation = self.begin(Expecting::LowRank);
        self.send(WorkerRequest::ComputeLowRank { generation, rank })?;
        Ok(generation)
    }

    fn begin(&mut self, expecting: Expecting) -> Generation {
        if self.is_busy() {
            debug!(
                channel = %self.label,
                generation = self.generation,
                "superseding in-flight request"
            );
        }
        self.generation += 1;
        self.expecting = expecting;
        self.partial = None;
        self.generation
    }

    fn send(&mut self, request: WorkerRequest) -> EngineResult<()> {
        self.requests.send(request).map_err(|_| {
            self.expecting = Expecting::Idle;
            EngineError::disconnected(self.label.clone())
        })
    }

    /// Fold one raw response into the channel state.
    ///
    /// Returns `None` for stale generations and for the first half of a
    /// low-rank answer.
    pub fn accept(&mut self, response: WorkerResponse) -> Option<ChannelReply> {
        if response.generation() != self.generation {
            debug!(
                channel = %self.label,
                stale = response.generation(),
                current = self.generation,
                kind = response.kind(),
                "dropping stale reply"
            );
            return None;
        }

        let expecting = std::mem::replace(&mut self.expecting, Expecting::Idle);
        match (expecting, response) {
            (Expecting::Factors, WorkerResponse::SingularValues { values, .. }) => {
                Some(ChannelReply::Factors(values))
            }
            (Expecting::LowRank, WorkerResponse::LowRankMatrix { matrix, .. }) => {
                self.partial = Some(matrix);
                self.expecting = Expecting::Frame;
                None
            }
            (Expecting::Frame, WorkerResponse::DisplayFrame { frame, .. }) => {
                match self.partial.take() {
                    Some(matrix) => Some(ChannelReply::LowRank { matrix, frame }),
                    None => Some(ChannelReply::Failed(EngineError::protocol(
                        "LowRankMatrix",
                        "DisplayFrame",
                    ))),
                }
            }
            (_, WorkerResponse::Error { error, .. }) => {
                self.partial = None;
                Some(ChannelReply::Failed(error))
            }
            (expecting, other) => {
                self.partial = None;
                warn!(
                    channel = %self.label,
                    expected = expecting.reply_kind(),
                    got = other.kind(),
                    "protocol violation"
                );
                Some(ChannelReply::Failed(EngineError::protocol(
                    expecting.reply_kind(),
                    other.kind(),
                )))
            }
        }
    }

    /// Block until the latest request is fully answered.
    pub fn wait(&mut self) -> EngineResult<ChannelReply> {
        loop {
            let response = self
                .responses
                .recv()
                .map_err(|_| EngineError::disconnected(self.label.clone()))?;
            if let Some(reply) = self.accept(response) {
                return Ok(reply);
            }
        }
    }

    pub fn wait_factors(&mut self) -> EngineResult<Vec<f64>> {
        match self.wait()? {
            ChannelReply::Factors(values) => Ok(values),
            ChannelReply::Failed(err) => Err(err),
            ChannelReply::LowRank { .. } => {
                Err(EngineError::protocol("SingularValues", "LowRankMatrix"))
            }
        }
    }

    pub fn wait_low_rank(&mut self) -> EngineResult<(ChannelMatrix, DisplayFrame)> {
        match self.wait()? {
            ChannelReply::LowRank { matrix, frame } => Ok((matrix, frame)),
            ChannelReply::Failed(err) => Err(err),
            ChannelReply::Factors(_) => {
                Err(EngineError::protocol("LowRankMatrix", "SingularValues"))
            }
        }
    }

    /// Stop the worker thread and wait for it to exit. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.requests.send(WorkerRequest::Shutdown);
        if handle.join().is_err() {
            warn!(channel = %self.label, "worker thread panicked");
        }
        self.expecting = Expecting::Idle;
        debug!(channel = %self.label, "worker stopped");
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the worker thread.
struct Worker {
    label: String,
    spec: WorkerSpec,
    decomposer: PowerIterationDecomposer,
    store: FactorStore,
}

impl Worker {
    fn new(spec: WorkerSpec, cancel: Arc<AtomicBool>) -> Self {
        Self {
            label: spec.label(),
            decomposer: PowerIterationDecomposer::from_seed(spec.seed).with_cancel_flag(cancel),
            store: FactorStore::new(spec.block_size),
            spec,
        }
    }

    fn run(mut self, requests: Receiver<WorkerRequest>, responses: Sender<WorkerResponse>) {
        let mut backlog = VecDeque::new();
        loop {
            let request = match backlog.pop_front() {
                Some(request) => request,
                None => match requests.recv() {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };
            backlog.extend(requests.try_iter());

            let replies = match request {
                WorkerRequest::Shutdown => break,
                _ if backlog.iter().any(|r| matches!(r, WorkerRequest::Shutdown)) => break,
                WorkerRequest::ComputeFactors { generation, .. }
                    if backlog
                        .iter()
                        .any(|r| matches!(r, WorkerRequest::ComputeFactors { .. })) =>
                {
                    debug!(channel = %self.label, generation, "skipping superseded factor request");
                    continue;
                }
                WorkerRequest::ComputeFactors {
                    generation,
                    buffer,
                    rows,
                    cols,
                    approx,
                    rank_cap,
                } => match self.compute_factors(buffer, rows, cols, approx, rank_cap) {
                    Ok(values) => vec![WorkerResponse::SingularValues { generation, values }],
                    Err(EngineError::Cancelled { .. }) => break,
                    Err(error) => vec![WorkerResponse::Error { generation, error }],
                },
                WorkerRequest::ComputeLowRank { generation, rank } => {
                    match self.compute_low_rank(rank) {
                        Ok((matrix, frame)) => vec![
                            WorkerResponse::LowRankMatrix { generation, matrix },
                            WorkerResponse::DisplayFrame { generation, frame },
                        ],
                        Err(error) => vec![WorkerResponse::Error { generation, error }],
                    }
                }
            };

            for reply in replies {
                if responses.send(reply).is_err() {
                    debug!(channel = %self.label, "caller gone, worker exiting");
                    return;
                }
            }
        }
        debug!(channel = %self.label, "worker loop finished");
    }

    fn compute_factors(
        &mut self,
        buffer: Vec<f64>,
        rows: usize,
        cols: usize,
        approx: bool,
        rank_cap: Option<usize>,
    ) -> EngineResult<Vec<f64>> {
        let matrix = ChannelMatrix::from_col_major(rows, cols, buffer)?;
        let full = rows.min(cols);
        let (rank, options) = if approx {
            let cap = rank_cap.map_or(MAX_APPROX_RANK, |cap| cap.min(MAX_APPROX_RANK));
            (cap.min(full), self.spec.approximate)
        } else {
            (rank_cap.map_or(full, |cap| cap.min(full)), self.spec.exact)
        };

        let started = Instant::now();
        let triplets = self.decomposer.decompose(matrix, rank, &options)?;
        let elapsed = started.elapsed();
        self.store.initialize(&triplets);

        let values = triplets.singular_values();
        debug!(
            channel = %self.label,
            rank = triplets.len(),
            iterations = triplets.total_iterations(),
            elapsed_ms = elapsed.as_millis() as u64,
            "factors ready"
        );
        if let Some(log) = &self.spec.telemetry {
            log.record(&DecompositionLogEntry {
                session: self.spec.session.clone(),
                tier: self.spec.tier.name(),
                channel: self.spec.color.name(),
                rows,
                cols,
                rank: triplets.len(),
                iterations: triplets.total_iterations(),
                converged: triplets.converged_count(),
                elapsed_ms: elapsed.as_millis(),
                leading_sigma: values.first().copied(),
                timestamp_ms: timestamp_ms(),
            });
        }
        Ok(values)
    }

    fn compute_low_rank(&mut self, rank: usize) -> EngineResult<(ChannelMatrix, DisplayFrame)> {
        if !self.store.is_initialized() {
            return Err(EngineError::worker(
                self.label.clone(),
                "low-rank reconstruction requested before factors",
            ));
        }
        let matrix = self.store.update_rank(rank).clone();
        Ok((matrix, self.store.to_display_frame()))
    }
}
