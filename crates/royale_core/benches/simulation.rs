//! Simulation benchmarks for royale_core.
//!
//! Run with: `cargo bench -p royale_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use royale_core::cards::{
    CardCatalog, ARCHERS, ARROWS, BABY_DRAGON, BARBARIANS, GIANT, MINI_PEKKA, VALKYRIE, WIZARD,
};
use royale_core::config::{DebugOverrides, MatchConfig};
use royale_core::math::Vec2Fixed;
use royale_core::simulation::Simulation;

fn crowded_arena() -> Simulation {
    let config = MatchConfig {
        debug: DebugOverrides {
            infinite_elixir: true,
            free_placement: false,
        },
        ..MatchConfig::default()
    };
    let mut sim = Simulation::new(config, CardCatalog::standard()).unwrap();
    sim.start();

    let south = [GIANT, VALKYRIE, MINI_PEKKA, BABY_DRAGON, ARCHERS, WIZARD, BARBARIANS];
    for (i, card) in (0i32..).zip(south.iter().cycle().take(24)) {
        let x = 40 + (i % 12) * 40;
        let _ = sim.deploy_card(*card, Vec2Fixed::from_px(x, 560 + (i / 12) * 60), 0);
        let _ = sim.deploy_card(*card, Vec2Fixed::from_px(x, 430 - (i / 12) * 60), 1);
    }
    let _ = sim.deploy_card(ARROWS, Vec2Fixed::from_px(264, 440), 0);
    sim
}

/// Runs simulation benchmarks for the royale_core crate.
pub fn simulation_benchmark(c: &mut Criterion) {
    c.bench_function("step_crowded_arena", |b| {
        b.iter_batched(
            crowded_arena,
            |mut sim| {
                sim.step();
                black_box(sim.state_hash())
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("full_battle_3600_ticks", |b| {
        b.iter_batched(
            crowded_arena,
            |mut sim| {
                for _ in 0..3600 {
                    sim.step();
                }
                black_box(sim.result())
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("state_hash", |b| {
        let sim = crowded_arena();
        b.iter(|| black_box(sim.state_hash()));
    });
}

criterion_group!(benches, simulation_benchmark);
criterion_main!(benches);
