//! Orchestration of three colour channels across two accuracy tiers.
//!
//! [`ComputationCoordinator`] owns six [`WorkerChannel`]s on a driver thread.
//! The driver multiplexes its command queue and every worker's response queue
//! with `crossbeam_channel::Select`, feeds events to [`CoordinatorState`] and
//! carries out the returned actions.

mod state;

use std::collections::{HashMap, VecDeque};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, Select, Sender, TryRecvError,
};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::image::{ChannelImage, ChannelTriple, Color};
use crate::linalg::ChannelMatrix;
use crate::logging::DecompositionLog;
use crate::worker::{ChannelReply, Tier, WorkerChannel, WorkerResponse, WorkerSpec};

pub use state::{
    Action, CoordinatorState, CoordinatorUpdate, Phase, RankOutcome, TicketId, TicketResult,
};

/// Pending result of one `set_rank` call.
///
/// A ticket always settles: when the coordinator goes away first it reports
/// [`RankOutcome::Disposed`].
#[derive(Debug)]
pub struct RankTicket {
    id: TicketId,
    rank: usize,
    outcome: Receiver<TicketResult>,
}

impl RankTicket {
    /// A ticket that has already settled with `outcome`.
    pub fn settled(rank: usize, outcome: TicketResult) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(outcome);
        Self {
            id: 0,
            rank,
            outcome: rx,
        }
    }

    pub fn id(&self) -> TicketId {
        self.id
    }

    /// Rank as requested, before clamping.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn wait(&self) -> TicketResult {
        self.outcome.recv().unwrap_or(Ok(RankOutcome::Disposed))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TicketResult> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Ok(RankOutcome::Disposed)),
        }
    }

    pub fn try_outcome(&self) -> Option<TicketResult> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Ok(RankOutcome::Disposed)),
        }
    }
}

enum Command {
    Compute {
        image: ChannelImage,
        initial_rank: usize,
    },
    SetRank {
        rank: usize,
        ticket: TicketId,
        reply: Sender<TicketResult>,
    },
    Dispose,
}

/// Handle to the driver thread of one session.
pub struct ComputationCoordinator {
    commands: Sender<Command>,
    next_ticket: TicketId,
    handle: Option<JoinHandle<()>>,
}

impl ComputationCoordinator {
    /// Spawn six workers and the driver. Updates are pushed into `updates`;
    /// a full queue blocks the driver until the consumer catches up.
    pub fn spawn(
        config: &EngineConfig,
        session: &str,
        updates: Sender<CoordinatorUpdate>,
    ) -> EngineResult<Self> {
        let telemetry = match &config.telemetry.dir {
            Some(dir) => match DecompositionLog::in_dir(dir) {
                Ok(log) => Some(log),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "telemetry disabled");
                    None
                }
            },
            None => None,
        };

        let spawn_tier = |tier: Tier| -> EngineResult<ChannelTriple<WorkerChannel>> {
            let spawn_one = |color: Color| {
                WorkerChannel::spawn(WorkerSpec {
                    tier,
                    color,
                    seed: worker_seed(config.engine.seed, tier, color),
                    block_size: config.engine.block_size,
                    approximate: config.approximate.options,
                    exact: config.exact.options,
                    session: session.to_string(),
                    telemetry: telemetry.clone(),
                })
            };
            Ok(ChannelTriple::new(
                spawn_one(Color::Red)?,
                spawn_one(Color::Green)?,
                spawn_one(Color::Blue)?,
            ))
        };
        let approximate = spawn_tier(Tier::Approximate)?;
        let exact = spawn_tier(Tier::Exact)?;

        let (commands, command_rx) = unbounded();
        let driver = Driver {
            state: CoordinatorState::new(config.approximate.rank_cap, config.exact.rank_cap),
            approximate,
            exact,
            dead: Vec::new(),
            staged_approximate: None,
            staged_exact: None,
            tickets: HashMap::new(),
            commands: command_rx,
            updates,
        };
        let handle = thread::Builder::new()
            .name(format!("lowrank-coordinator-{}", session))
            .spawn(move || driver.run())
            .map_err(|err| EngineError::worker("coordinator", err.to_string()))?;

        Ok(Self {
            commands,
            next_ticket: 0,
            handle: Some(handle),
        })
    }

    /// Start (or restart) both tiers on `image`.
    pub fn compute(&self, image: ChannelImage, initial_rank: usize) -> EngineResult<()> {
        self.commands
            .send(Command::Compute {
                image,
                initial_rank,
            })
            .map_err(|_| EngineError::disconnected("coordinator"))
    }

    pub fn set_rank(&mut self, rank: usize) -> RankTicket {
        self.next_ticket += 1;
        let id = self.next_ticket;
        let (reply, outcome) = bounded(1);
        if self
            .commands
            .send(Command::SetRank {
                rank,
                ticket: id,
                reply,
            })
            .is_err()
        {
            debug!(rank, "coordinator gone, ticket settles as disposed");
        }
        RankTicket { id, rank, outcome }
    }

    /// Stop the driver and all workers and wait for them. Idempotent.
    pub fn dispose(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.commands.send(Command::Dispose);
        if handle.join().is_err() {
            warn!("coordinator thread panicked");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for ComputationCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Distinct deterministic stream per (tier, channel) slot.
fn worker_seed(seed: u64, tier: Tier, color: Color) -> u64 {
    let slot = match tier {
        Tier::Approximate => 0,
        Tier::Exact => 3,
    } + color.index() as u64;
    seed.wrapping_add(slot.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

enum Event {
    Command(Option<Command>),
    Worker(Tier, Color, Option<WorkerResponse>),
}

struct Driver {
    state: CoordinatorState,
    approximate: ChannelTriple<WorkerChannel>,
    exact: ChannelTriple<WorkerChannel>,
    dead: Vec<(Tier, Color)>,
    staged_approximate: Option<ChannelTriple<ChannelMatrix>>,
    staged_exact: Option<ChannelTriple<ChannelMatrix>>,
    tickets: HashMap<TicketId, Sender<TicketResult>>,
    commands: Receiver<Command>,
    updates: Sender<CoordinatorUpdate>,
}

impl Driver {
    fn run(mut self) {
        loop {
            match self.next_event() {
                Event::Command(Some(Command::Compute {
                    image,
                    initial_rank,
                })) => {
                    let dims = image.dims();
                    info!(
                        width = dims.width,
                        height = dims.height,
                        initial_rank,
                        "compute requested"
                    );
                    self.staged_approximate = Some(image.channels().clone());
                    self.staged_exact = Some(image.into_channels());
                    let actions = self.state.start(initial_rank);
                    self.execute(actions);
                }
                Event::Command(Some(Command::SetRank {
                    rank,
                    ticket,
                    reply,
                })) => {
                    self.tickets.insert(ticket, reply);
                    let actions = self.state.set_rank(rank, Some(ticket));
                    self.execute(actions);
                }
                Event::Command(Some(Command::Dispose)) | Event::Command(None) => break,
                Event::Worker(tier, color, Some(response)) => {
                    let reply = self.channel_mut(tier, color).accept(response);
                    if let Some(reply) = reply {
                        let actions = self.state.on_reply(tier, color, reply);
                        self.execute(actions);
                    }
                }
                Event::Worker(tier, color, None) => {
                    warn!(%tier, channel = color.name(), "worker disconnected");
                    self.dead.push((tier, color));
                    let error =
                        EngineError::disconnected(format!("{}/{}", tier.name(), color.name()));
                    let actions = self.state.on_reply(tier, color, ChannelReply::Failed(error));
                    self.execute(actions);
                }
            }
        }

        let actions = self.state.dispose();
        self.execute(actions);
        self.tickets.clear();
        for tier in Tier::ALL {
            for color in Color::ALL {
                self.channel_mut(tier, color).shutdown();
            }
        }
        debug!("coordinator stopped");
    }

    fn next_event(&self) -> Event {
        let mut select = Select::new();
        let command_index = select.recv(&self.commands);
        let mut routes = Vec::with_capacity(6);
        for tier in Tier::ALL {
            for color in Color::ALL {
                if !self.dead.contains(&(tier, color)) {
                    let index = select.recv(self.channel(tier, color).responses());
                    routes.push((index, tier, color));
                }
            }
        }

        let operation = select.select();
        let index = operation.index();
        if index == command_index {
            return Event::Command(operation.recv(&self.commands).ok());
        }
        match routes.iter().find(|(i, _, _)| *i == index) {
            Some(&(_, tier, color)) => Event::Worker(
                tier,
                color,
                operation.recv(self.channel(tier, color).responses()).ok(),
            ),
            None => Event::Command(None),
        }
    }

    fn execute(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::ComputeFactors { tier, rank_cap } => {
                    let staged = match tier {
                        Tier::Approximate => self.staged_approximate.take(),
                        Tier::Exact => self.staged_exact.take(),
                    };
                    let Some(matrices) = staged else {
                        warn!(%tier, "no staged matrices for factor request");
                        continue;
                    };
                    let approx = tier == Tier::Approximate;
                    for (color, matrix) in [
                        (Color::Red, matrices.red),
                        (Color::Green, matrices.green),
                        (Color::Blue, matrices.blue),
                    ] {
                        if let Err(error) =
                            self.channel_mut(tier, color).compute_factors(matrix, approx, rank_cap)
                        {
                            let failed = ChannelReply::Failed(error);
                            queue.extend(self.state.on_reply(tier, color, failed));
                        }
                    }
                }
                Action::ComputeLowRank { tier, rank } => {
                    for color in Color::ALL {
                        if let Err(error) = self.channel_mut(tier, color).compute_low_rank(rank) {
                            let failed = ChannelReply::Failed(error);
                            queue.extend(self.state.on_reply(tier, color, failed));
                        }
                    }
                }
                Action::Emit(update) => {
                    if self.updates.send(update).is_err() {
                        debug!("update consumer gone");
                    }
                }
                Action::Resolve { ticket, outcome } => {
                    if let Some(reply) = self.tickets.remove(&ticket) {
                        let _ = reply.send(outcome);
                    }
                }
            }
        }
    }

    fn channel(&self, tier: Tier, color: Color) -> &WorkerChannel {
        match tier {
            Tier::Approximate => self.approximate.get(color),
            Tier::Exact => self.exact.get(color),
        }
    }

    fn channel_mut(&mut self, tier: Tier, color: Color) -> &mut WorkerChannel {
        match tier {
            Tier::Approximate => self.approximate.get_mut(color),
            Tier::Exact => self.exact.get_mut(color),
        }
    }
}
