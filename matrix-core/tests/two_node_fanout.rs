//! Two-node in-process integration test (spec.md §8 scenario S2): a
//! fanout exchange delivers every `controller_finished`/`store_events`
//! notification to every node, including its own publisher. Rather
//! than standing up a real broker, this test plays that role itself --
//! a `relay` closure that hands each published notification to both
//! nodes' `Coordinator`/`PerStoreQueues`, exactly as the AMQP fanout
//! exchange would.
use matrix_core::coordinator::{ArrivalEffect, Coordinator, RoundAdvance};
use matrix_core::pipeline::PerStoreQueues;
use serde_json::{json, Value};

struct Node {
    name: &'static str,
    coordinator: Coordinator,
    queues: PerStoreQueues,
}

fn node(name: &'static str) -> (Node, Vec<matrix_core::pipeline::PerStoreQueueReceiver>) {
    let coordinator = Coordinator::new(1, 2, 2, 1_000, 60);
    let (queues, receivers) = PerStoreQueues::new(1);
    (Node { name, coordinator, queues }, receivers)
}

/// Simulate one node publishing `controller_finished`: the fanout
/// exchange hands it to both nodes' coordinators, including the
/// publisher's own.
async fn relay_controller_finished(nodes: &[&Node], origin: &str) -> Vec<RoundAdvance> {
    let mut advances = Vec::new();
    for n in nodes {
        advances.push(n.coordinator.on_controller_finished(origin).await);
    }
    advances
}

/// Simulate one node's `register_events`: applied to its own queues
/// immediately, then replicated to every peer via the fanout relay.
fn relay_events(nodes: &[&Node], events: Vec<Value>) {
    for n in nodes {
        n.queues.broadcast_events(events.clone());
    }
}

#[tokio::test]
async fn fanout_delivers_identical_event_order_and_advances_both_barriers_together() {
    let (n0, mut n0_store) = node("n0");
    let (n1, mut n1_store) = node("n1");
    let nodes = [&n0, &n1];

    // Round 1: each node's one local agent arrives.
    let (effect0, mut rx0) = match n0.coordinator.can_we_start_yet().await {
        matrix_core::coordinator::Arrival::Parked { effect, rx } => (effect, rx),
        _ => panic!("expected Parked"),
    };
    let (effect1, mut rx1) = match n1.coordinator.can_we_start_yet().await {
        matrix_core::coordinator::Arrival::Parked { effect, rx } => (effect, rx),
        _ => panic!("expected Parked"),
    };
    assert_eq!(effect0, ArrivalEffect::PublishFinished);
    assert_eq!(effect1, ArrivalEffect::PublishFinished);

    // n0 registers two events before announcing it finished the round;
    // the fanout exchange replicates them to n1's store queue too.
    relay_events(&nodes, vec![json!({"agentproc_id": 0, "round": 1, "move": "rock"})]);

    // n0 finishes first: every node sees it, but only n0 has arrived so far.
    let advances = relay_controller_finished(&nodes, "n0").await;
    assert_eq!(advances, vec![RoundAdvance::None, RoundAdvance::None]);

    // n1 finishes: the second and last controller for this round, so
    // both coordinators cross the barrier on the very same notification.
    let advances = relay_controller_finished(&nodes, "n1").await;
    assert_eq!(advances, vec![RoundAdvance::Advance, RoundAdvance::Advance]);

    n0.coordinator.release().await;
    n1.coordinator.release().await;

    let info0 = rx0.recv().await.unwrap();
    let info1 = rx1.recv().await.unwrap();
    assert_eq!(info0, info1);
    assert_eq!(info0.cur_round, 1);

    // Every store queue -- on both nodes -- sees n0's round-1 events,
    // in the same order, because the fanout exchange is unordered
    // across nodes but FIFO within one publisher's stream.
    for rx in n0_store.iter_mut().chain(n1_store.iter_mut()) {
        match rx.recv().await {
            Some(matrix_core::pipeline::PerStoreItem::Events(events)) => {
                assert_eq!(events, vec![json!({"agentproc_id": 0, "round": 1, "move": "rock"})]);
            }
            other => panic!("expected Events, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn final_round_crossing_is_seen_identically_by_every_node() {
    let (n0, _n0_store) = node("n0");
    let (n1, _n1_store) = node("n1");
    let nodes = [&n0, &n1];

    for round in 1..=2u32 {
        let (_, mut rx0) = match n0.coordinator.can_we_start_yet().await {
            matrix_core::coordinator::Arrival::Parked { effect, rx } => (effect, rx),
            _ => panic!("expected Parked"),
        };
        let (_, mut rx1) = match n1.coordinator.can_we_start_yet().await {
            matrix_core::coordinator::Arrival::Parked { effect, rx } => (effect, rx),
            _ => panic!("expected Parked"),
        };

        relay_controller_finished(&nodes, "n0").await;
        let advances = relay_controller_finished(&nodes, "n1").await;

        n0.coordinator.release().await;
        n1.coordinator.release().await;

        let info0 = rx0.recv().await.unwrap();
        let info1 = rx1.recv().await.unwrap();
        assert_eq!(info0, info1);

        if round == 2 {
            assert_eq!(advances, vec![RoundAdvance::AdvanceToSimEnd, RoundAdvance::AdvanceToSimEnd]);
            assert_eq!(info0, matrix_core::coordinator::RoundInfo::SIMEND);
        } else {
            assert_eq!(advances, vec![RoundAdvance::Advance, RoundAdvance::Advance]);
        }
    }
}
