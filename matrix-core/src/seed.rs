//! Deterministic seed stream (spec.md §4.5, §9).
//!
//! Two stages, both drawn from a `ChaCha8Rng` seeded with
//! `seed_from_u64`: `root_seed` yields one `u32` per controller (indexed
//! by a node's position in `sim_nodes`), and each controller seed in
//! turn yields one `u32` per local agent process. ChaCha8 is a
//! specified, bit-exact stream cipher-derived generator, so two
//! independent re-implementations seeding it the same way produce the
//! same sequence -- see DESIGN.md for why this was chosen over a
//! hand-rolled Mersenne Twister port.
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Draw `num_controllers` per-controller seeds from `root_seed`.
pub fn controller_seeds(root_seed: u64, num_controllers: usize) -> Vec<u32> {
    let mut rng = ChaCha8Rng::seed_from_u64(root_seed);
    (0..num_controllers).map(|_| rng.next_u32()).collect()
}

/// Draw `num_agentprocs` per-agent seeds from one controller's seed.
pub fn agent_seeds(controller_seed: u32, num_agentprocs: usize) -> Vec<u32> {
    let mut rng = ChaCha8Rng::seed_from_u64(controller_seed as u64);
    (0..num_agentprocs).map(|_| rng.next_u32()).collect()
}

/// Seed for a single agent process, given the full cluster context.
/// A pure function of `(root_seed, sim_nodes_order, num_agentprocs[node],
/// agent_index)` as required by spec.md §3's invariants.
pub fn agentproc_seed(
    root_seed: u64,
    num_controllers: usize,
    node_index: usize,
    num_agentprocs: usize,
    agentproc_id: usize,
) -> u32 {
    let controller_seed = controller_seeds(root_seed, num_controllers)[node_index];
    agent_seeds(controller_seed, num_agentprocs)[agentproc_id]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = agentproc_seed(42, 3, 1, 10, 4);
        let b = agentproc_seed(42, 3, 1, 10, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_node_index() {
        let n0 = agentproc_seed(42, 3, 0, 10, 0);
        let n1 = agentproc_seed(42, 3, 1, 10, 0);
        assert_ne!(n0, n1);
    }

    #[test]
    fn differs_by_agent_index() {
        let a0 = agentproc_seed(42, 1, 0, 10, 0);
        let a1 = agentproc_seed(42, 1, 0, 10, 1);
        assert_ne!(a0, a1);
    }
}
