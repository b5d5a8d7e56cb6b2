//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Both peers of a match predict the same battle independently, so the
//! simulation must be 100% deterministic. Sources of non-determinism
//! include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`royale_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   We always iterate in sorted entity ID order.
//!
//! - **Frame pacing**: Peers render at different rates. Frame deltas only
//!   feed an accumulator; logic runs in whole ticks.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual behaviour determinism (targeting, movement)
//! 2. **Property tests**: Random deploy plans must still produce deterministic outputs
//! 3. **Integration tests**: Full battles are reproducible
//! 4. **Parallel tests**: Running N simulations on separate threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use royale_core::simulation::Simulation;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one tick
/// * `hash` - Function to compute state hash
///
/// # Example
///
/// ```
/// use royale_test_utils::determinism::verify_determinism;
/// use royale_test_utils::fixtures::standard_match;
///
/// let result = verify_determinism(
///     3,   // Run 3 times
///     100, // 100 ticks each
///     standard_match,
///     |sim| sim.step(),
///     |sim| sim.state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Simplified determinism verification for [`Simulation`].
///
/// Runs the simulation twice with identical setup and verifies the final
/// state hashes match exactly.
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    verify_determinism(2, num_ticks, &setup_fn, Simulation::step, Simulation::state_hash)
        .is_deterministic
}

/// Run two peers of the same match with different frame pacing.
///
/// Peer A feeds `frame_a` millisecond frames, peer B `frame_b`, until
/// both reach `logical_ms` of match time. Returns both final hashes.
pub fn run_peers<F>(setup_fn: F, logical_ms: u64, frame_a: u64, frame_b: u64) -> (u64, u64)
where
    F: Fn() -> Simulation,
{
    let drive = |frame: u64| {
        let mut sim = setup_fn();
        let mut now = 0;
        while now < logical_ms {
            let delta = frame.min(logical_ms - now);
            now += delta;
            sim.update(now, delta);
        }
        sim.state_hash()
    };
    (drive(frame_a.max(1)), drive(frame_b.max(1)))
}

/// Run N simulations on separate threads and collect final hashes.
///
/// Catches non-determinism that only manifests under thread scheduling
/// variations or memory layout differences.
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> DeterminismResult
where
    F: Fn() -> Simulation + Sync,
{
    let hashes: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    for _ in 0..num_ticks {
                        sim.step();
                    }
                    sim.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect()
    });

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks: num_ticks,
    }
}

/// Compare two simulation runs tick-by-tick, finding first divergence.
///
/// Useful for debugging non-determinism by finding exactly when
/// simulations start to differ.
///
/// # Returns
///
/// `None` if simulations are deterministic, `Some(tick)` if they diverge
/// at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Simulation,
{
    let mut sim1 = setup_fn();
    let mut sim2 = setup_fn();

    // Check initial state
    if sim1.state_hash() != sim2.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        sim1.step();
        sim2.step();

        if sim1.state_hash() != sim2.state_hash() {
            return Some(tick);
        }
    }

    None
}

/// Verify that a snapshot round-trip preserves simulation state exactly,
/// and that the restored copy keeps stepping in lockstep with the
/// original.
///
/// This is what rejoin reseeding relies on.
pub fn verify_serialization_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let mut sim = setup_fn();

    for _ in 0..num_ticks {
        sim.step();
    }

    let Ok(bytes) = sim.serialize() else {
        return false;
    };
    let Ok(mut restored) = Simulation::deserialize(&bytes) else {
        return false;
    };

    if sim.state_hash() != restored.state_hash() {
        return false;
    }

    for _ in 0..num_ticks {
        sim.step();
        restored.step();
    }
    sim.state_hash() == restored.state_hash()
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{own_half_point, px, sandbox_match, standard_match};
    use royale_core::cards::{ARCHERS, ARROWS, BABY_DRAGON, GIANT, VALKYRIE, WIZARD};

    // =========================================================================
    // Basic determinism tests
    // =========================================================================

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_empty_match_determinism() {
        assert!(verify_simulation_determinism(standard_match, 100));
    }

    fn skirmish() -> Simulation {
        let mut sim = sandbox_match();
        sim.deploy_card(GIANT, px(143, 560), 0).unwrap();
        sim.deploy_card(VALKYRIE, px(150, 430), 1).unwrap();
        sim.deploy_card(BABY_DRAGON, px(380, 600), 0).unwrap();
        sim.deploy_card(WIZARD, px(380, 300), 1).unwrap();
        sim.deploy_card(ARCHERS, own_half_point(0), 0).unwrap();
        sim.deploy_card(ARROWS, px(150, 430), 0).unwrap();
        sim
    }

    #[test]
    fn test_skirmish_determinism() {
        assert!(verify_simulation_determinism(skirmish, 600));
    }

    #[test]
    fn test_find_divergence_on_deterministic_sim() {
        assert!(find_first_divergence(skirmish, 300).is_none());
    }

    #[test]
    fn test_find_divergence_reports_tick() {
        use std::cell::Cell;

        // The second setup call deploys one extra troop after tick 0.
        let calls = Cell::new(0);
        let divergence = find_first_divergence(
            || {
                calls.set(calls.get() + 1);
                let mut sim = sandbox_match();
                if calls.get() == 2 {
                    sim.deploy_card(GIANT, px(143, 560), 0).unwrap();
                }
                sim
            },
            10,
        );
        assert_eq!(divergence, Some(0));
    }

    #[test]
    fn test_peers_with_different_frame_rates_agree() {
        let (a, b) = run_peers(skirmish, 12_000, 16, 33);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parallel_runs_agree() {
        run_parallel_simulations(skirmish, 4, 300).assert_deterministic();
    }

    // =========================================================================
    // Serialization round-trip tests
    // =========================================================================

    #[test]
    fn test_serialization_preserves_fresh_match() {
        assert!(verify_serialization_determinism(standard_match, 0));
    }

    #[test]
    fn test_serialization_preserves_battle_in_progress() {
        assert!(verify_serialization_determinism(skirmish, 200));
    }

    #[test]
    fn test_compute_hash_stable() {
        assert_eq!(compute_hash(&[1u8, 2, 3]), compute_hash(&[1u8, 2, 3]));
        assert_ne!(compute_hash(&1u64), compute_hash(&2u64));
    }
}
