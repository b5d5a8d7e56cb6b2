//! End-to-end battle scenarios driven through the public scheduler API.

use royale_core::cards::{ARROWS, GIANT, MINI_PEKKA};
use royale_core::error::DeployRejection;
use royale_core::events::{EndReason, MatchEvent, MatchOutcome, MatchResult};
use royale_core::simulation::{MatchPhase, Simulation};
use royale_test_utils::fixtures::{own_half_point, px, sandbox_match, standard_match, step_until};

fn tower_destroyed_events(events: &[MatchEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            MatchEvent::TowerDestroyed { tower, .. } => Some(*tower),
            _ => None,
        })
        .collect()
}

/// Three side-1 Giants parked on each side-0 princess tower.
fn siege_south_princesses(sim: &mut Simulation) {
    for x in [137, 143, 149] {
        sim.deploy_card(GIANT, px(x, 760), 1).unwrap();
        sim.deploy_card(GIANT, px(x + 242, 760), 1).unwrap();
    }
}

// =============================================================================
// Elixir and intake
// =============================================================================

#[test]
fn elixir_regenerates_one_per_period() {
    let mut sim = standard_match();
    assert_eq!(sim.elixir(0), Some(5));

    sim.update(2800, 2800);
    assert_eq!(sim.elixir(0), Some(6));

    sim.update(60_000, 57_200);
    assert_eq!(sim.elixir(0), Some(10));
}

#[test]
fn five_cost_deploy_at_five_elixir_succeeds() {
    let mut sim = standard_match();
    let before = sim.entities().len();

    let id = sim.deploy_card(GIANT, own_half_point(0), 0).unwrap();

    assert_eq!(sim.elixir(0), Some(0));
    assert_eq!(sim.entities().len(), before + 1);
    assert!(sim.entity(id).is_some());
    assert_eq!(sim.snapshot().iter().filter(|s| s.id == id).count(), 1);
}

#[test]
fn five_cost_deploy_at_four_elixir_is_rejected() {
    let mut sim = standard_match();
    sim.deploy_card(MINI_PEKKA, own_half_point(0), 0).unwrap();
    sim.update(2800 * 3, 2800 * 3);
    assert_eq!(sim.elixir(0), Some(4));
    let entities = sim.entities().len();
    let hash = sim.state_hash();

    assert_eq!(
        sim.deploy_card(GIANT, own_half_point(0), 0),
        Err(DeployRejection::InsufficientElixir {
            required: 5,
            available: 4
        })
    );
    assert_eq!(sim.elixir(0), Some(4));
    assert_eq!(sim.entities().len(), entities);
    assert_eq!(sim.state_hash(), hash);
}

// =============================================================================
// Towers
// =============================================================================

#[test]
fn tower_reaches_121_px_but_not_150() {
    let mut sim = sandbox_match();
    // Side-0 left princess stands at (143, 781).
    let near = sim.deploy_card(MINI_PEKKA, px(143, 681), 1).unwrap();
    sim.step();
    assert_eq!(sim.entity(near).map(|e| e.health.current), Some(1392 - 90));

    let mut sim = sandbox_match();
    let far = sim.deploy_card(MINI_PEKKA, px(143, 631), 1).unwrap();
    sim.step();
    assert_eq!(sim.entity(far).map(|e| e.health.current), Some(1392));
}

#[test]
fn fallen_tower_reports_once() {
    let mut sim = sandbox_match();
    siege_south_princesses(&mut sim);

    let mut destroyed = Vec::new();
    for _ in 0..400 {
        sim.step();
        destroyed.extend(tower_destroyed_events(&sim.drain_events()));
    }

    destroyed.sort_unstable();
    let mut unique = destroyed.clone();
    unique.dedup();
    assert_eq!(destroyed, unique);
    assert!(destroyed.len() >= 2);
    assert!(sim.crowns()[1] >= 2);
}

#[test]
fn king_falls_ends_match_even_when_behind_on_crowns() {
    let mut sim = sandbox_match();
    siege_south_princesses(&mut sim);

    assert!(step_until(&mut sim, 400, |s| s.crowns()[1] == 2));
    assert_eq!(sim.phase(), MatchPhase::Active);
    assert_eq!(sim.crowns(), [0, 2]);

    // Side-1 king stands at (264, 77).
    for x in [258, 264, 270] {
        sim.deploy_card(GIANT, px(x, 100), 0).unwrap();
    }
    assert!(step_until(&mut sim, 400, |s| s.phase() == MatchPhase::Ended));

    assert_eq!(
        sim.result(),
        Some(MatchResult {
            outcome: MatchOutcome::Winner(0),
            reason: EndReason::KingDestroyed
        })
    );
    assert_eq!(sim.crowns(), [1, 2]);
    assert!(sim.remaining_ms() > 0);
    assert_eq!(
        sim.deploy_card(ARROWS, px(264, 100), 0),
        Err(DeployRejection::MatchEnded)
    );
    assert!(sim.drain_events().iter().any(|e| matches!(
        e,
        MatchEvent::GameEnd {
            outcome: MatchOutcome::Winner(0),
            reason: EndReason::KingDestroyed
        }
    )));
}

// =============================================================================
// Timer
// =============================================================================

#[test]
fn timer_expiry_with_crown_lead_wins() {
    let mut sim = sandbox_match();
    siege_south_princesses(&mut sim);
    assert!(step_until(&mut sim, 400, |s| s.crowns()[1] >= 1));
    sim.force_end();

    assert_eq!(
        sim.result(),
        Some(MatchResult {
            outcome: MatchOutcome::Winner(1),
            reason: EndReason::Timer
        })
    );
}

#[test]
fn full_length_quiet_match_is_a_draw() {
    let mut sim = standard_match();
    let mut now = 0;
    while sim.phase() == MatchPhase::Active {
        now += 16;
        sim.update(now, 16);
    }
    assert_eq!(sim.now_ms(), 180_000);
    assert_eq!(sim.result().map(|r| r.outcome), Some(MatchOutcome::Draw));
}
