//! Tier and rank bookkeeping without any I/O.
//!
//! [`CoordinatorState`] consumes events (start, rank requests, worker replies,
//! dispose) and answers with [`Action`]s for the driver to carry out. All
//! ordering and coalescing rules live here:
//!
//! * once exact factors are ready no approximate update is emitted again;
//! * while an exact reconstruction is in flight, rank requests collapse into a
//!   single pending value that is issued when the in-flight one completes;
//! * approximate failures are logged and otherwise ignored, exact failures
//!   only settle the ticket of the request they belong to.

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::image::{ChannelTriple, Color};
use crate::linalg::ChannelMatrix;
use crate::worker::{ChannelReply, Tier};

pub type TicketId = u64;

/// How a rank request settled.
#[derive(Debug, Clone, PartialEq)]
pub enum RankOutcome {
    /// An update at this tier and (clamped) rank was emitted for the request.
    Rendered { tier: Tier, rank: usize },
    /// A later request replaced this one before it was served.
    Superseded,
    /// The session went away first.
    Disposed,
}

pub type TicketResult = Result<RankOutcome, EngineError>;

/// Reconstructed channels of one finished rank request.
#[derive(Debug, Clone)]
pub struct CoordinatorUpdate {
    /// Incremented by every `start`
    pub run: u64,
    pub tier: Tier,
    pub rank: usize,
    pub singular_values: ChannelTriple<Vec<f64>>,
    pub channels: ChannelTriple<ChannelMatrix>,
}

#[derive(Debug)]
pub enum Action {
    /// Send every channel of `tier` its matrix. Approximate actions always
    /// precede exact ones in the returned list.
    ComputeFactors { tier: Tier, rank_cap: Option<usize> },
    ComputeLowRank { tier: Tier, rank: usize },
    Emit(CoordinatorUpdate),
    Resolve { ticket: TicketId, outcome: TicketResult },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingBoth {
        approx_pending: bool,
        exact_pending: bool,
    },
    ApproxReady,
    ExactReady,
}

#[derive(Debug)]
struct Batch {
    rank: usize,
    ticket: Option<TicketId>,
    channels: ChannelTriple<Option<ChannelMatrix>>,
}

#[derive(Debug, Default)]
struct TierState {
    collected: ChannelTriple<Option<Vec<f64>>>,
    ready: Option<ChannelTriple<Vec<f64>>>,
    failure: Option<EngineError>,
    in_flight: Option<Batch>,
}

impl TierState {
    fn factors_pending(&self) -> bool {
        self.ready.is_none() && self.failure.is_none()
    }
}

#[derive(Debug)]
pub struct CoordinatorState {
    phase: Phase,
    run: u64,
    requested_rank: usize,
    approximate_cap: Option<usize>,
    exact_cap: Option<usize>,
    approximate: TierState,
    exact: TierState,
    waiting: Option<TicketId>,
}

impl CoordinatorState {
    pub fn new(approximate_cap: Option<usize>, exact_cap: Option<usize>) -> Self {
        Self {
            phase: Phase::Idle,
            run: 0,
            requested_rank: 1,
            approximate_cap,
            exact_cap,
            approximate: TierState::default(),
            exact: TierState::default(),
            waiting: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn requested_rank(&self) -> usize {
        self.requested_rank
    }

    /// Rank of the reconstruction currently outstanding for `tier`.
    pub fn in_flight_rank(&self, tier: Tier) -> Option<usize> {
        self.tier(tier).in_flight.as_ref().map(|batch| batch.rank)
    }

    pub fn waiting_ticket(&self) -> Option<TicketId> {
        self.waiting
    }

    pub fn exact_failure(&self) -> Option<&EngineError> {
        self.exact.failure.as_ref()
    }

    /// Begin a new run. Tickets of the previous run settle as superseded.
    pub fn start(&mut self, initial_rank: usize) -> Vec<Action> {
        let mut actions = Vec::new();
        self.release_tickets(RankOutcome::Superseded, &mut actions);

        self.run += 1;
        self.approximate = TierState::default();
        self.exact = TierState::default();
        self.requested_rank = initial_rank.max(1);
        self.phase = Phase::AwaitingBoth {
            approx_pending: true,
            exact_pending: true,
        };
        info!(run = self.run, rank = self.requested_rank, "computation started");

        actions.push(Action::ComputeFactors {
            tier: Tier::Approximate,
            rank_cap: self.approximate_cap,
        });
        actions.push(Action::ComputeFactors {
            tier: Tier::Exact,
            rank_cap: self.exact_cap,
        });
        actions
    }

    pub fn set_rank(&mut self, rank: usize, ticket: Option<TicketId>) -> Vec<Action> {
        let mut actions = Vec::new();
        self.requested_rank = rank.max(1);

        match self.phase {
            Phase::ExactReady => {
                if let Some(in_flight) = self.in_flight_rank(Tier::Exact) {
                    debug!(in_flight, requested = self.requested_rank, "coalescing rank request");
                    self.park(ticket, &mut actions);
                } else {
                    self.issue(Tier::Exact, ticket, &mut actions);
                }
            }
            Phase::ApproxReady => {
                let previous = self
                    .approximate
                    .in_flight
                    .take()
                    .and_then(|batch| batch.ticket);
                for stale in previous.into_iter().chain(self.waiting.take()) {
                    actions.push(resolve(stale, Ok(RankOutcome::Superseded)));
                }
                self.issue(Tier::Approximate, ticket, &mut actions);
            }
            Phase::Idle | Phase::AwaitingBoth { .. } => {
                self.park(ticket, &mut actions);
                self.fail_stranded(&mut actions);
            }
        }
        actions
    }

    pub fn on_reply(&mut self, tier: Tier, color: Color, reply: ChannelReply) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.phase == Phase::Idle {
            debug!(%tier, channel = color.name(), "reply while idle ignored");
            return actions;
        }

        let factors_pending = self.tier(tier).factors_pending();
        match reply {
            ChannelReply::Factors(values) => {
                if !factors_pending {
                    debug!(%tier, channel = color.name(), "unexpected factors ignored");
                    return actions;
                }
                let state = self.tier_mut(tier);
                *state.collected.get_mut(color) = Some(values);
                if state.collected.is_complete() {
                    state.ready = std::mem::take(&mut state.collected).transpose();
                    self.on_factors_ready(tier, &mut actions);
                }
            }
            ChannelReply::LowRank { matrix, .. } => {
                let complete = match self.tier_mut(tier).in_flight.as_mut() {
                    Some(batch) => {
                        *batch.channels.get_mut(color) = Some(matrix);
                        batch.channels.is_complete()
                    }
                    None => {
                        debug!(
                            %tier,
                            channel = color.name(),
                            "low-rank reply without request ignored"
                        );
                        return actions;
                    }
                };
                if complete {
                    if let Some(batch) = self.tier_mut(tier).in_flight.take() {
                        self.on_low_rank_ready(tier, batch, &mut actions);
                    }
                }
            }
            ChannelReply::Failed(error) => {
                if factors_pending {
                    self.on_factor_failure(tier, color, error, &mut actions);
                } else if let Some(batch) = self.tier_mut(tier).in_flight.take() {
                    self.on_low_rank_failure(tier, color, batch, error, &mut actions);
                } else {
                    debug!(
                        %tier,
                        channel = color.name(),
                        %error,
                        "failure with nothing outstanding"
                    );
                }
            }
        }
        actions
    }

    /// Settle every outstanding ticket as disposed and go idle.
    pub fn dispose(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        self.release_tickets(RankOutcome::Disposed, &mut actions);
        self.approximate = TierState::default();
        self.exact = TierState::default();
        self.phase = Phase::Idle;
        actions
    }

    fn on_factors_ready(&mut self, tier: Tier, actions: &mut Vec<Action>) {
        match tier {
            Tier::Approximate => {
                if self.phase == Phase::ExactReady {
                    debug!(run = self.run, "approximate factors arrived after exact, discarded");
                    return;
                }
                info!(run = self.run, "approximate factors ready");
                self.phase = Phase::ApproxReady;
                let ticket = self.waiting.take();
                self.issue(Tier::Approximate, ticket, actions);
            }
            Tier::Exact => {
                info!(run = self.run, "exact factors ready");
                self.phase = Phase::ExactReady;
                let handed_over = self
                    .approximate
                    .in_flight
                    .take()
                    .and_then(|batch| batch.ticket);
                let ticket = match (self.waiting.take(), handed_over) {
                    (Some(latest), Some(older)) => {
                        actions.push(resolve(older, Ok(RankOutcome::Superseded)));
                        Some(latest)
                    }
                    (latest, older) => latest.or(older),
                };
                self.issue(Tier::Exact, ticket, actions);
            }
        }
    }

    fn on_factor_failure(
        &mut self,
        tier: Tier,
        color: Color,
        error: EngineError,
        actions: &mut Vec<Action>,
    ) {
        match tier {
            Tier::Approximate => {
                warn!(
                    channel = color.name(),
                    %error,
                    "approximate factorization failed, waiting for exact"
                );
            }
            Tier::Exact => {
                warn!(channel = color.name(), %error, "exact factorization failed");
            }
        }
        let state = self.tier_mut(tier);
        state.failure = Some(error);
        state.collected = ChannelTriple::default();

        if let Phase::AwaitingBoth {
            approx_pending,
            exact_pending,
        } = self.phase
        {
            self.phase = match tier {
                Tier::Approximate => Phase::AwaitingBoth {
                    approx_pending: false,
                    exact_pending,
                },
                Tier::Exact => Phase::AwaitingBoth {
                    approx_pending,
                    exact_pending: false,
                },
            };
        }
        self.fail_stranded(actions);
    }

    fn on_low_rank_ready(&mut self, tier: Tier, batch: Batch, actions: &mut Vec<Action>) {
        let (Some(singular_values), Some(channels)) =
            (self.tier(tier).ready.clone(), batch.channels.transpose())
        else {
            return;
        };
        let rank = batch.rank.min(singular_values.red.len().max(1));
        let update = CoordinatorUpdate {
            run: self.run,
            tier,
            rank,
            singular_values,
            channels,
        };

        match tier {
            Tier::Approximate => {
                if self.phase == Phase::ExactReady {
                    debug!(rank, "late approximate reconstruction discarded");
                    if batch.ticket.is_some() {
                        self.park(batch.ticket, actions);
                    }
                    return;
                }
                debug!(rank, "approximate update");
                actions.push(Action::Emit(update));
                if let Some(ticket) = batch.ticket {
                    actions.push(resolve(
                        ticket,
                        Ok(RankOutcome::Rendered {
                            tier: Tier::Approximate,
                            rank,
                        }),
                    ));
                }
            }
            Tier::Exact => {
                debug!(rank, "exact update");
                actions.push(Action::Emit(update));
                let rendered = Ok(RankOutcome::Rendered {
                    tier: Tier::Exact,
                    rank,
                });
                if let Some(ticket) = batch.ticket {
                    actions.push(resolve(ticket, rendered.clone()));
                }
                if batch.rank != self.requested_rank {
                    let next = self.waiting.take();
                    self.issue(Tier::Exact, next, actions);
                } else if let Some(ticket) = self.waiting.take() {
                    actions.push(resolve(ticket, rendered));
                }
            }
        }
    }

    fn on_low_rank_failure(
        &mut self,
        tier: Tier,
        color: Color,
        batch: Batch,
        error: EngineError,
        actions: &mut Vec<Action>,
    ) {
        match tier {
            Tier::Approximate => {
                warn!(
                    channel = color.name(),
                    rank = batch.rank,
                    %error,
                    "approximate reconstruction failed"
                );
                if batch.ticket.is_some() {
                    self.park(batch.ticket, actions);
                }
                self.fail_stranded(actions);
            }
            Tier::Exact => {
                warn!(
                    channel = color.name(),
                    rank = batch.rank,
                    %error,
                    "exact reconstruction failed"
                );
                if let Some(ticket) = batch.ticket {
                    actions.push(resolve(ticket, Err(error)));
                }
                if self.waiting.is_some() || batch.rank != self.requested_rank {
                    let next = self.waiting.take();
                    self.issue(Tier::Exact, next, actions);
                }
            }
        }
    }

    fn issue(&mut self, tier: Tier, ticket: Option<TicketId>, actions: &mut Vec<Action>) {
        let rank = self.requested_rank;
        self.tier_mut(tier).in_flight = Some(Batch {
            rank,
            ticket,
            channels: ChannelTriple::default(),
        });
        actions.push(Action::ComputeLowRank { tier, rank });
    }

    /// Make `ticket` the single waiting request; the one it replaces is
    /// superseded.
    fn park(&mut self, ticket: Option<TicketId>, actions: &mut Vec<Action>) {
        if let Some(previous) = std::mem::replace(&mut self.waiting, ticket) {
            actions.push(resolve(previous, Ok(RankOutcome::Superseded)));
        }
    }

    /// Fail the waiting ticket when no tier can serve it any more.
    fn fail_stranded(&mut self, actions: &mut Vec<Action>) {
        if self.phase == Phase::Idle || self.waiting.is_none() {
            return;
        }
        let exact_can_serve = self.exact.factors_pending() || self.exact.in_flight.is_some();
        let approx_can_serve = self.phase != Phase::ExactReady
            && (self.approximate.factors_pending() || self.approximate.in_flight.is_some());
        if exact_can_serve || approx_can_serve {
            return;
        }

        if let Some(ticket) = self.waiting.take() {
            let error = self
                .exact
                .failure
                .clone()
                .or_else(|| self.approximate.failure.clone())
                .unwrap_or_else(|| {
                    EngineError::worker("coordinator", "no tier can serve the request")
                });
            actions.push(resolve(ticket, Err(error)));
        }
    }

    fn release_tickets(&mut self, outcome: RankOutcome, actions: &mut Vec<Action>) {
        let approx = self.approximate.in_flight.as_mut().and_then(|b| b.ticket.take());
        let exact = self.exact.in_flight.as_mut().and_then(|b| b.ticket.take());
        for ticket in [self.waiting.take(), approx, exact].into_iter().flatten() {
            actions.push(resolve(ticket, Ok(outcome.clone())));
        }
    }

    fn tier(&self, tier: Tier) -> &TierState {
        match tier {
            Tier::Approximate => &self.approximate,
            Tier::Exact => &self.exact,
        }
    }

    fn tier_mut(&mut self, tier: Tier) -> &mut TierState {
        match tier {
            Tier::Approximate => &mut self.approximate,
            Tier::Exact => &mut self.exact,
        }
    }
}

fn resolve(ticket: TicketId, outcome: TicketResult) -> Action {
    Action::Resolve { ticket, outcome }
}
