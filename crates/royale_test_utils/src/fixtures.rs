//! Test fixtures and helpers.
//!
//! Pre-built matches, deploy scripts and arena points for consistent
//! testing.

use fixed::types::I32F32;
use royale_core::cards::{CardCatalog, CardId};
use royale_core::config::{DebugOverrides, MatchConfig};
use royale_core::math::Vec2Fixed;
use royale_core::simulation::{MatchPhase, Simulation};

/// Config text accepted by [`MatchConfig::from_ron_str`], with the
/// standard rules.
pub const STANDARD_CONFIG_RON: &str = r"MatchConfig(
    starting_elixir: 5,
    max_elixir: 10,
    elixir_regen_ms: 2800,
    match_duration_ms: 180000,
    logic_tick_ms: 50,
    tiebreak: Draw,
    format: OneVsOne,
    max_entities: 64,
)";

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Arena point from whole pixels.
#[must_use]
pub fn px(x: i32, y: i32) -> Vec2Fixed {
    Vec2Fixed::from_px(x, y)
}

/// A legal troop deploy point on `side`'s half, in front of the left
/// princess tower.
#[must_use]
pub fn own_half_point(side: u8) -> Vec2Fixed {
    if side == 0 {
        px(143, 700)
    } else {
        px(143, 290)
    }
}

/// Standard rules with both debug switches on.
#[must_use]
pub fn sandbox_config() -> MatchConfig {
    MatchConfig {
        debug: DebugOverrides {
            infinite_elixir: true,
            free_placement: true,
        },
        ..MatchConfig::default()
    }
}

/// A started match with the standard catalog.
///
/// # Panics
///
/// Panics if `config` is invalid.
#[must_use]
pub fn started_with(config: MatchConfig) -> Simulation {
    let mut sim = Simulation::new(config, CardCatalog::standard())
        .unwrap_or_else(|e| panic!("fixture config rejected: {e}"));
    sim.start();
    sim.drain_events();
    sim
}

/// A started match with standard rules.
#[must_use]
pub fn standard_match() -> Simulation {
    started_with(MatchConfig::default())
}

/// A started match with free elixir and free placement.
#[must_use]
pub fn sandbox_match() -> Simulation {
    started_with(sandbox_config())
}

/// One scripted deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedDeploy {
    /// Logic ticks completed before the deploy is attempted.
    pub tick: u64,
    /// Deploying player.
    pub owner: u8,
    /// Card.
    pub card: CardId,
    /// Deploy point.
    pub position: Vec2Fixed,
}

/// Run `ticks` logic ticks, attempting each deploy once its tick is
/// reached. Rejected deploys are skipped. Returns how many were accepted.
///
/// `script` must be sorted by tick.
pub fn run_script(sim: &mut Simulation, script: &[ScriptedDeploy], ticks: u64) -> usize {
    let mut accepted = 0;
    let mut pending = script.iter().peekable();
    for _ in 0..ticks {
        while let Some(deploy) = pending.next_if(|d| d.tick <= sim.tick()) {
            if sim
                .deploy_card(deploy.card, deploy.position, deploy.owner)
                .is_ok()
            {
                accepted += 1;
            }
        }
        sim.step();
    }
    accepted
}

/// Step until `done` holds or `max_ticks` pass. Returns whether `done`
/// held.
pub fn step_until<F>(sim: &mut Simulation, max_ticks: u64, mut done: F) -> bool
where
    F: FnMut(&Simulation) -> bool,
{
    for _ in 0..max_ticks {
        if done(sim) {
            return true;
        }
        if sim.phase() != MatchPhase::Active {
            return done(sim);
        }
        sim.step();
    }
    done(sim)
}
