//! The round coordinator: the global barrier state machine (spec.md §4.5).
//!
//! Pure logic, no I/O -- callers own the broker publish and the
//! per-store queue flush/drain; the coordinator only decides *when*
//! those must happen and hands back what changed. This keeps the state
//! machine directly unit-testable, the way the barrier is specified as
//! a table of transitions rather than a network protocol.
use std::collections::HashSet;
use tokio::sync::{broadcast, Mutex};

/// Returned to an agent process released from the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundInfo {
    pub cur_round: i64,
    pub start_time: i64,
    pub end_time: i64,
}

impl RoundInfo {
    /// The sentinel returned after SIMEND (spec.md §4.5).
    pub const SIMEND: RoundInfo = RoundInfo {
        cur_round: -1,
        start_time: -1,
        end_time: -1,
    };
}

/// What the caller of [`Coordinator::can_we_start_yet`] must do once
/// `num_ap_waiting` reaches `num_agentprocs`, before the caller may
/// actually park on the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalEffect {
    /// No side effect: not every local agent has arrived yet.
    None,
    /// Drain `local_outbound` to empty, then publish
    /// `controller_finished` for this node.
    PublishFinished,
}

/// Outcome of a `can_we_start_yet` call.
pub enum Arrival {
    /// The caller must park on `rx` for the round release, having first
    /// performed `effect` if it is not `None`.
    Parked {
        effect: ArrivalEffect,
        rx: broadcast::Receiver<RoundInfo>,
    },
    /// The simulation already ended; return SIMEND with no parking.
    AlreadyEnded,
}

/// What the caller of [`Coordinator::on_controller_finished`] must do
/// once every peer controller has reported in for the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundAdvance {
    /// Not every peer has finished the round yet.
    None,
    /// Flush every per-store queue, await drains, then release agents
    /// for the next round.
    Advance,
    /// Same as `Advance`, but this was the terminal round: also
    /// terminate `local_outbound` and enqueue SIMEND on every per-store
    /// queue before releasing (with the SIMEND sentinel) any
    /// still-parked callers.
    AdvanceToSimEnd,
}

struct State {
    cur_round: u32,
    num_ap_waiting: u32,
    num_cp_finished: u32,
    finished_nodes: HashSet<String>,
    simend: bool,
}

/// The barrier for one controller node.
pub struct Coordinator {
    state: Mutex<State>,
    start_event: broadcast::Sender<RoundInfo>,
    num_agentprocs: u32,
    num_controllers: u32,
    num_rounds: u32,
    base_start: i64,
    round_time: i64,
}

impl Coordinator {
    pub fn new(
        num_agentprocs: u32,
        num_controllers: u32,
        num_rounds: u32,
        base_start: i64,
        round_time: i64,
    ) -> Self {
        let (start_event, _) = broadcast::channel(16);
        Coordinator {
            state: Mutex::new(State {
                cur_round: 0,
                num_ap_waiting: 0,
                num_cp_finished: 0,
                finished_nodes: HashSet::new(),
                simend: false,
            }),
            start_event,
            num_agentprocs,
            num_controllers,
            num_rounds,
            base_start,
            round_time,
        }
    }

    pub async fn cur_round(&self) -> u32 {
        self.state.lock().await.cur_round
    }

    fn round_info(&self, cur_round: u32) -> RoundInfo {
        if cur_round == self.num_rounds + 1 {
            return RoundInfo::SIMEND;
        }
        RoundInfo {
            cur_round: cur_round as i64,
            start_time: self.base_start + self.round_time * (cur_round as i64 - 1),
            end_time: self.base_start + self.round_time * cur_round as i64,
        }
    }

    /// Phase (A): an agent process calls `can_we_start_yet`. Returns the
    /// effect the caller must perform before parking (publishing
    /// `controller_finished` requires the caller's broker handle), plus
    /// a receiver the caller awaits for the round release. If the round
    /// has already advanced past SIMEND when called, returns the SIMEND
    /// info immediately with no parking required.
    pub async fn can_we_start_yet(&self) -> Arrival {
        let mut state = self.state.lock().await;
        if state.simend {
            return Arrival::AlreadyEnded;
        }
        let rx = self.start_event.subscribe();
        state.num_ap_waiting += 1;
        let effect = if state.num_ap_waiting == self.num_agentprocs {
            ArrivalEffect::PublishFinished
        } else {
            ArrivalEffect::None
        };
        Arrival::Parked { effect, rx }
    }

    /// A node with zero local agent processes never receives a
    /// `can_we_start_yet` call, so it must trip its own local condition
    /// at round start instead (spec.md §8: "num_agentprocs[node] = 0
    /// causes the node to trip its local condition immediately"). The
    /// driver calls this once at startup and once after each release
    /// when `num_agentprocs == 0`; it is a no-op otherwise.
    pub async fn trip_if_no_agents(&self) -> ArrivalEffect {
        if self.num_agentprocs != 0 {
            return ArrivalEffect::None;
        }
        let state = self.state.lock().await;
        if state.simend {
            return ArrivalEffect::None;
        }
        ArrivalEffect::PublishFinished
    }

    /// Phase (B): an inbound `controller_finished` notification for
    /// `node` arrived. Returns `RoundAdvance::None` if duplicate (the
    /// core must detect and reject repeats within a round -- spec.md
    /// §4.5's tie-break) or if not every peer has finished yet.
    pub async fn on_controller_finished(&self, node: &str) -> RoundAdvance {
        let mut state = self.state.lock().await;
        if !state.finished_nodes.insert(node.to_string()) {
            tracing::warn!(node, round = state.cur_round, "duplicate controller_finished rejected");
            return RoundAdvance::None;
        }
        state.num_cp_finished += 1;
        if state.num_cp_finished != self.num_controllers {
            return RoundAdvance::None;
        }
        state.cur_round += 1;
        state.num_ap_waiting = 0;
        state.num_cp_finished = 0;
        state.finished_nodes.clear();
        if state.cur_round == self.num_rounds + 1 {
            state.simend = true;
            RoundAdvance::AdvanceToSimEnd
        } else {
            RoundAdvance::Advance
        }
    }

    /// Release parked agents for the round that was just entered (or
    /// SIMEND). Called by the caller after it has performed the queue
    /// flush/drain side effects implied by the `RoundAdvance` result.
    pub async fn release(&self) {
        let cur_round = self.cur_round().await;
        let info = self.round_info(cur_round);
        let _ = self.start_event.send(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(num_agentprocs: u32, num_controllers: u32, num_rounds: u32) -> Coordinator {
        Coordinator::new(num_agentprocs, num_controllers, num_rounds, 1_000, 60)
    }

    fn unwrap_parked(arrival: Arrival) -> (ArrivalEffect, broadcast::Receiver<RoundInfo>) {
        match arrival {
            Arrival::Parked { effect, rx } => (effect, rx),
            Arrival::AlreadyEnded => panic!("expected Parked, got AlreadyEnded"),
        }
    }

    #[tokio::test]
    async fn single_node_single_round_releases_round_one() {
        let c = coordinator(1, 1, 1);
        let (effect, mut rx) = unwrap_parked(c.can_we_start_yet().await);
        assert_eq!(effect, ArrivalEffect::PublishFinished);
        let advance = c.on_controller_finished("n0").await;
        assert_eq!(advance, RoundAdvance::Advance);
        c.release().await;
        let info = rx.recv().await.unwrap();
        assert_eq!(info.cur_round, 1);
    }

    #[tokio::test]
    async fn terminal_round_returns_simend() {
        let c = coordinator(1, 1, 1);
        let (_, mut rx) = unwrap_parked(c.can_we_start_yet().await);
        c.on_controller_finished("n0").await;
        c.release().await;
        rx.recv().await.unwrap(); // round 1

        let (_, mut rx2) = unwrap_parked(c.can_we_start_yet().await);
        let advance = c.on_controller_finished("n0").await;
        assert_eq!(advance, RoundAdvance::AdvanceToSimEnd);
        c.release().await;
        let info = rx2.recv().await.unwrap();
        assert_eq!(info, RoundInfo::SIMEND);
    }

    #[tokio::test]
    async fn duplicate_controller_finished_is_rejected() {
        let c = coordinator(1, 2, 1);
        let advance1 = c.on_controller_finished("n0").await;
        assert_eq!(advance1, RoundAdvance::None);
        let advance_dup = c.on_controller_finished("n0").await;
        assert_eq!(advance_dup, RoundAdvance::None);
        // still waiting on n1, since n0's duplicate did not count twice
        assert_eq!(c.state.lock().await.num_cp_finished, 1);
    }

    #[tokio::test]
    async fn waiting_count_resets_on_round_advance() {
        let c = coordinator(2, 1, 2);
        c.can_we_start_yet().await;
        let (effect, _rx) = unwrap_parked(c.can_we_start_yet().await);
        assert_eq!(effect, ArrivalEffect::PublishFinished);
        c.on_controller_finished("n0").await;
        c.release().await;
        assert_eq!(c.state.lock().await.num_ap_waiting, 0);
    }

    #[tokio::test]
    async fn zero_agentprocs_trips_immediately() {
        let c = coordinator(0, 1, 1);
        assert_eq!(c.trip_if_no_agents().await, ArrivalEffect::PublishFinished);
    }

    #[tokio::test]
    async fn zero_rounds_terminates_on_first_crossing() {
        let c = coordinator(1, 1, 0);
        let (_, mut rx) = unwrap_parked(c.can_we_start_yet().await);
        let advance = c.on_controller_finished("n0").await;
        assert_eq!(advance, RoundAdvance::AdvanceToSimEnd);
        c.release().await;
        assert_eq!(rx.recv().await.unwrap(), RoundInfo::SIMEND);
    }
}
