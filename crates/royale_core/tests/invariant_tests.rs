//! Property tests for the scheduler's invariants under random deploy plans.

use proptest::prelude::*;
use royale_core::events::MatchEvent;
use royale_core::simulation::{MatchPhase, Simulation};
use royale_test_utils::determinism::run_peers;
use royale_test_utils::fixtures::{
    run_script, sandbox_config, standard_match, started_with, ScriptedDeploy,
};
use royale_test_utils::strategies::{arb_deploy_plan, arb_frame_ms};

/// Step `sim` for `ticks`, applying `plan` along the way, and check every
/// invariant after each tick.
fn check_invariants(sim: &mut Simulation, plan: &[ScriptedDeploy], ticks: u64) {
    let mut crowns = sim.crowns();
    let mut destroyed: Vec<u32> = Vec::new();
    let mut pending = plan.iter().peekable();

    for _ in 0..ticks {
        while let Some(deploy) = pending.next_if(|d| d.tick <= sim.tick()) {
            let before = sim.elixir(deploy.owner);
            let entities = sim.entities().len();
            if sim
                .deploy_card(deploy.card, deploy.position, deploy.owner)
                .is_err()
            {
                assert_eq!(sim.elixir(deploy.owner), before);
                assert_eq!(sim.entities().len(), entities);
            }
        }
        let was_active = sim.phase() == MatchPhase::Active;
        sim.step();

        for player in 0..2 {
            let elixir = sim.elixir(player).unwrap_or_default();
            assert!(elixir <= 10, "elixir {elixir} over cap");
        }
        for entity in sim.entities().sorted() {
            assert!(entity.health.current <= entity.health.max);
        }
        let now = sim.crowns();
        assert!(now[0] >= crowns[0] && now[1] >= crowns[1], "crowns went down");
        assert!(now[0] <= 3 && now[1] <= 3);
        crowns = now;

        for event in sim.drain_events() {
            match event {
                MatchEvent::TowerDestroyed { tower, is_king, .. } => {
                    assert!(!destroyed.contains(&tower), "tower {tower} reported twice");
                    destroyed.push(tower);
                    if is_king {
                        assert!(was_active);
                        assert_eq!(sim.phase(), MatchPhase::Ended);
                    }
                }
                MatchEvent::CrownUpdate { crowns: reported } => {
                    assert!(reported[0] <= now[0] && reported[1] <= now[1]);
                }
                _ => {}
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn invariants_hold_under_standard_rules(plan in arb_deploy_plan(30, 1200)) {
        let mut sim = standard_match();
        check_invariants(&mut sim, &plan, 1500);
    }

    #[test]
    fn invariants_hold_in_sandbox(plan in arb_deploy_plan(40, 800)) {
        let mut sim = started_with(sandbox_config());
        check_invariants(&mut sim, &plan, 1000);
    }

    #[test]
    fn peers_agree_regardless_of_frame_rate(
        plan in arb_deploy_plan(12, 1),
        frame_a in arb_frame_ms(),
        frame_b in arb_frame_ms(),
    ) {
        let setup = || {
            let mut sim = standard_match();
            for deploy in &plan {
                let _ = sim.deploy_card(deploy.card, deploy.position, deploy.owner);
            }
            sim
        };
        let (a, b) = run_peers(setup, 20_000, frame_a, frame_b);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn scripted_battles_replay_identically(plan in arb_deploy_plan(20, 600)) {
        let run = || {
            let mut sim = started_with(sandbox_config());
            run_script(&mut sim, &plan, 800);
            sim.state_hash()
        };
        prop_assert_eq!(run(), run());
    }
}
