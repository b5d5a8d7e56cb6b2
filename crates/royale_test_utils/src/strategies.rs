//! Proptest strategies for the battle simulation.
//!
//! These strategies generate random but reproducible deploy plans for
//! property-based testing of invariants and determinism.

use proptest::prelude::*;
use royale_core::cards::{CardId, ARROWS, BARBARIANS, GIANT};
use royale_core::math::Vec2Fixed;

use crate::fixtures::ScriptedDeploy;

/// Generate any card id from the standard catalog.
pub fn arb_card() -> impl Strategy<Value = CardId> {
    GIANT..=BARBARIANS
}

/// Generate a troop card id (never the Arrows spell).
pub fn arb_troop_card() -> impl Strategy<Value = CardId> {
    arb_card().prop_filter("troops only", |card| *card != ARROWS)
}

/// Generate a point on `side`'s half of the default arena.
///
/// Side 0 owns rows 23..45, side 1 rows 0..22.
pub fn arb_own_half_point(side: u8) -> impl Strategy<Value = Vec2Fixed> {
    let ys = if side == 0 { 506i32..990 } else { 0i32..484 };
    (0i32..528, ys).prop_map(|(x, y)| Vec2Fixed::from_px(x, y))
}

/// Generate a point anywhere inside the default arena.
pub fn arb_arena_point() -> impl Strategy<Value = Vec2Fixed> {
    (0i32..528, 0i32..990).prop_map(|(x, y)| Vec2Fixed::from_px(x, y))
}

/// Generate one 1v1 deployment, legal by placement, at a tick below
/// `max_tick`.
pub fn arb_deploy(max_tick: u64) -> impl Strategy<Value = ScriptedDeploy> {
    (0..max_tick, 0u8..2, arb_card()).prop_flat_map(|(tick, owner, card)| {
        arb_own_half_point(owner).prop_map(move |position| ScriptedDeploy {
            tick,
            owner,
            card,
            position,
        })
    })
}

/// Generate a deploy plan sorted by tick.
pub fn arb_deploy_plan(
    max_len: usize,
    max_tick: u64,
) -> impl Strategy<Value = Vec<ScriptedDeploy>> {
    proptest::collection::vec(arb_deploy(max_tick), 0..max_len).prop_map(|mut plan| {
        plan.sort_by_key(|deploy| deploy.tick);
        plan
    })
}

/// Generate a frame delta in milliseconds, as a renderer would feed it.
pub fn arb_frame_ms() -> impl Strategy<Value = u64> {
    1u64..120
}

#[cfg(test)]
mod tests {
    use super::*;
    use royale_core::arena::ArenaLayout;

    proptest! {
        #[test]
        fn own_half_points_are_legal(
            (side, point) in (0u8..2).prop_flat_map(|side| (Just(side), arb_own_half_point(side)))
        ) {
            prop_assert!(ArenaLayout::default().is_on_half(side, point));
        }

        #[test]
        fn plans_are_sorted(plan in arb_deploy_plan(20, 500)) {
            prop_assert!(plan.windows(2).all(|w| w[0].tick <= w[1].tick));
        }
    }
}
