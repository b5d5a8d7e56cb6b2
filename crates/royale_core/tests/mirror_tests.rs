//! Reconciling a predicted battle against the ledger mirror.

use royale_core::arena::ArenaLayout;
use royale_core::cards::{CardCatalog, GIANT};
use royale_core::config::MatchFormat;
use royale_core::mirror::{BattleState, BattleStatus, Divergence};
use royale_core::reconcile::{ActionStatus, LedgerLog, PendingActions, Resolution};
use royale_test_utils::fixtures::{px, sandbox_match, step_until};

fn ledger() -> BattleState {
    let mut state =
        BattleState::create(42, "host", MatchFormat::OneVsOne, &ArenaLayout::default(), 0);
    state.join("guest", 0).unwrap();
    state
}

fn seats() -> Vec<Option<String>> {
    vec![Some("host".into()), Some("guest".into())]
}

#[test]
fn prediction_agrees_once_ledger_records_the_same_towers() {
    let mut sim = sandbox_match();
    for x in [137, 143, 149] {
        sim.deploy_card(GIANT, px(x, 760), 1).unwrap();
    }
    assert!(step_until(&mut sim, 400, |s| s.crowns()[1] == 1));

    let predicted = BattleState::from_simulation(&sim, 42, seats());
    assert_eq!(predicted.towers_destroyed, [0, 1]);
    assert_eq!(predicted.towers[1].health, 0);

    let mut confirmed = ledger();
    let before = predicted.divergence(&confirmed);
    assert!(before.contains(&Divergence::TowersDestroyed {
        side: 1,
        predicted: 1,
        confirmed: 0
    }));

    // The ledger settles the same princess and the chip damage on it.
    for (index, tower) in predicted.towers.iter().enumerate() {
        let lost = tower.initial_health() - tower.health;
        confirmed
            .apply_tower_damage(index, u32::try_from(lost).unwrap())
            .unwrap();
    }
    assert!(predicted.divergence(&confirmed).is_empty());
    assert_eq!(confirmed.damage_dealt, predicted.damage_dealt);
}

#[test]
fn king_on_ledger_settles_before_prediction() {
    let sim = sandbox_match();
    let predicted = BattleState::from_simulation(&sim, 42, seats());

    let mut confirmed = ledger();
    confirmed.apply_tower_damage(0, 4000).unwrap();

    let found = predicted.divergence(&confirmed);
    assert!(found.contains(&Divergence::Winner {
        predicted: None,
        confirmed: Some(1)
    }));
    assert!(found.contains(&Divergence::Status {
        predicted: BattleStatus::Active,
        confirmed: BattleStatus::Completed
    }));
}

#[test]
fn ledger_deploys_resolve_pending_markers() {
    let catalog = CardCatalog::standard();
    let giant = catalog.get(GIANT).unwrap();
    let mut confirmed = ledger();

    // Local player 0 submits with an action id; the opponent's deploy only
    // shows up as an unlabelled log.
    let mut pending = PendingActions::new(0);
    let mine = pending.register(0, GIANT);
    let theirs = pending.register(1, GIANT);

    confirmed.deploy_troop("host", giant, 143, 700, 1).unwrap();
    let ok = pending
        .apply(&LedgerLog {
            signature: "tx-1".into(),
            action_id: Some(mine),
            ..LedgerLog::default()
        })
        .unwrap();
    assert_eq!(ok.via, Resolution::ById);

    // One ledger second in, the guest holds six elixir.
    confirmed.deploy_troop("guest", giant, 143, 290, 1).unwrap();
    assert_eq!(confirmed.elixir, vec![100, 100]);

    let guessed = pending
        .apply(&LedgerLog {
            signature: "tx-2".into(),
            ..LedgerLog::default()
        })
        .unwrap();
    assert_eq!(guessed.id, theirs);
    assert_eq!(guessed.via, Resolution::Fifo);
    assert_eq!(pending.status(theirs), Some(ActionStatus::Success));
    assert_eq!(confirmed.entities.len(), 2);
}
