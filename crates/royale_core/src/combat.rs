//! Targeting, attacks and movement for every entity variant.
//!
//! Each variant implements the same contract: given the logical time, the
//! step length and a snapshot of possible targets, decide what to hit and
//! where to move. Damage is never applied here. Updates return
//! [`SideEffects`] and the scheduler applies the strikes.
//!
//! # Targeting
//!
//! Candidates are filtered to living enemies, then the nearest one wins.
//! Candidates arrive in ascending id order and a later candidate must be
//! strictly closer to replace the current pick, so equal distances resolve
//! to the lowest entity id.

use serde::{Deserialize, Serialize};

use crate::arena::ArenaLayout;
use crate::cards::MovementLayer;
use crate::components::{Entity, EntityId, EntityKind, EntityState};
use crate::math::{Fixed, Vec2Fixed};

/// A possible target as seen at the start of a logic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Entity id.
    pub id: EntityId,
    /// Side the candidate fights for.
    pub side: u8,
    /// Centre in arena pixels.
    pub position: Vec2Fixed,
    /// Collision radius.
    pub radius: Fixed,
    /// Remaining health; zero means no longer targetable.
    pub health: u32,
    /// Whether the candidate is a tower.
    pub is_building: bool,
    /// Movement layer.
    pub layer: MovementLayer,
}

impl Candidate {
    /// Snapshot an entity. Spells and destroyed entities yield `None`.
    #[must_use]
    pub fn of(entity: &Entity) -> Option<Self> {
        if matches!(entity.kind, EntityKind::Spell(_)) || entity.health.is_dead() {
            return None;
        }
        Some(Self {
            id: entity.id,
            side: entity.side,
            position: entity.position,
            radius: entity.radius,
            health: entity.health.current,
            is_building: entity.is_building(),
            layer: entity.layer(),
        })
    }

    /// Whether this candidate is a living enemy of `side`.
    #[must_use]
    pub const fn is_enemy_of(&self, side: u8) -> bool {
        self.side != side && self.health > 0
    }
}

/// One hit against one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Strike {
    /// Entity dealing the damage.
    pub attacker: EntityId,
    /// Entity receiving the damage.
    pub target: EntityId,
    /// Damage before clamping to the target's health.
    pub damage: u32,
}

/// What an update asks the scheduler to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    /// Hits to apply, in order.
    pub strikes: Vec<Strike>,
}

impl SideEffects {
    fn strike(attacker: EntityId, target: EntityId, damage: u32) -> Self {
        Self {
            strikes: vec![Strike {
                attacker,
                target,
                damage,
            }],
        }
    }
}

/// Time and geometry for one update.
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext<'a> {
    /// Logical time in milliseconds.
    pub now_ms: u64,
    /// Length of this step in milliseconds.
    pub delta_ms: u32,
    /// Arena geometry.
    pub layout: &'a ArenaLayout,
}

/// Capability set shared by every battlefield object.
pub trait Combatant {
    /// Advance one step: pick a target, attack when the cooldown allows and
    /// otherwise move. Dead entities do nothing.
    fn update(&mut self, ctx: &UpdateContext<'_>, candidates: &[Candidate]) -> SideEffects;

    /// Apply damage, clamped to remaining health. Returns damage dealt.
    fn take_damage(&mut self, amount: u32) -> u32;

    /// Whether health is above zero.
    fn is_alive(&self) -> bool;
}

impl Combatant for Entity {
    fn update(&mut self, ctx: &UpdateContext<'_>, candidates: &[Candidate]) -> SideEffects {
        if !self.is_alive() {
            self.state = EntityState::Dead;
            self.target = None;
            return SideEffects::default();
        }
        match self.kind {
            EntityKind::Building(_) => update_tower(self, ctx, candidates),
            EntityKind::Unit(_) => update_troop(self, ctx, candidates),
            EntityKind::Spell(_) => update_spell(self, ctx, candidates),
        }
    }

    fn take_damage(&mut self, amount: u32) -> u32 {
        let dealt = self.health.apply_damage(amount);
        if self.health.is_dead() {
            self.state = EntityState::Dead;
        }
        dealt
    }

    fn is_alive(&self) -> bool {
        !self.health.is_dead()
    }
}

/// Nearest candidate accepted by `eligible`, lowest id on ties.
///
/// `eligible` receives the candidate and its squared distance to `origin`.
pub fn nearest_enemy<'a, F>(
    origin: Vec2Fixed,
    side: u8,
    candidates: &'a [Candidate],
    mut eligible: F,
) -> Option<&'a Candidate>
where
    F: FnMut(&Candidate, Fixed) -> bool,
{
    let mut best: Option<(&Candidate, Fixed)> = None;
    for candidate in candidates.iter().filter(|c| c.is_enemy_of(side)) {
        let dist_sq = origin.distance_squared(candidate.position);
        if !eligible(candidate, dist_sq) {
            continue;
        }
        match best {
            Some((_, best_sq)) if dist_sq >= best_sq => {}
            _ => best = Some((candidate, dist_sq)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn update_tower(
    entity: &mut Entity,
    ctx: &UpdateContext<'_>,
    candidates: &[Candidate],
) -> SideEffects {
    if let EntityKind::Building(tower) = &mut entity.kind {
        tower.shooting.expire(ctx.now_ms);
    }

    let reach_sq = entity.attack.range * entity.attack.range;
    let target = nearest_enemy(entity.position, entity.side, candidates, |_, dist_sq| {
        dist_sq <= reach_sq
    })
    .map(|c| c.id);

    entity.target = target;
    let Some(target) = target else {
        entity.state = EntityState::Idle;
        return SideEffects::default();
    };
    entity.state = EntityState::Attacking;

    if !entity.attack.is_ready(ctx.now_ms) {
        return SideEffects::default();
    }
    entity.attack.last_attack_ms = Some(ctx.now_ms);
    if let EntityKind::Building(tower) = &mut entity.kind {
        tower.shooting.trigger(ctx.now_ms);
    }
    SideEffects::strike(entity.id, target, entity.attack.damage)
}

fn update_troop(
    entity: &mut Entity,
    ctx: &UpdateContext<'_>,
    candidates: &[Candidate],
) -> SideEffects {
    let EntityKind::Unit(troop) = entity.kind else {
        return SideEffects::default();
    };

    let target = nearest_enemy(entity.position, entity.side, candidates, |c, dist_sq| {
        if !troop.targets.allows(c.is_building, c.layer) {
            return false;
        }
        troop.sight.map_or(true, |sight| {
            let seen = sight + c.radius;
            dist_sq <= seen * seen
        })
    })
    .copied();

    let goal = if let Some(target) = target {
        let reach = entity.attack.range + target.radius;
        if entity.position.distance_squared(target.position) <= reach * reach {
            entity.target = Some(target.id);
            entity.state = EntityState::Attacking;
            if !entity.attack.is_ready(ctx.now_ms) {
                return SideEffects::default();
            }
            entity.attack.last_attack_ms = Some(ctx.now_ms);
            return SideEffects::strike(entity.id, target.id, entity.attack.damage);
        }
        entity.target = Some(target.id);
        target.position
    } else {
        entity.target = None;
        objective(entity, ctx.layout, candidates)
    };

    let waypoint = if troop.layer == MovementLayer::Ground {
        bridge_waypoint(ctx.layout, entity.position, goal)
    } else {
        goal
    };
    let step = troop.speed * Fixed::from_num(ctx.delta_ms) / Fixed::from_num(1000);
    entity.position = entity.position.step_towards(waypoint, step);
    entity.state = EntityState::Moving;
    SideEffects::default()
}

fn update_spell(
    entity: &mut Entity,
    ctx: &UpdateContext<'_>,
    candidates: &[Candidate],
) -> SideEffects {
    let EntityKind::Spell(spell) = &mut entity.kind else {
        return SideEffects::default();
    };

    match spell.cast_at_ms {
        None => {
            spell.cast_at_ms = Some(ctx.now_ms);
            entity.attack.last_attack_ms = Some(ctx.now_ms);
            entity.state = EntityState::Attacking;
            let strikes = candidates
                .iter()
                .filter(|c| c.is_enemy_of(entity.side))
                .filter(|c| {
                    let reach = entity.attack.range + c.radius;
                    entity.position.distance_squared(c.position) <= reach * reach
                })
                .map(|c| Strike {
                    attacker: entity.id,
                    target: c.id,
                    damage: entity.attack.damage,
                })
                .collect();
            SideEffects { strikes }
        }
        Some(cast_at) => {
            if ctx.now_ms.saturating_sub(cast_at) > u64::from(spell.duration_ms) {
                entity.health.current = 0;
                entity.state = EntityState::Dead;
            }
            SideEffects::default()
        }
    }
}

/// Where a troop heads when nothing is in sight: the nearest enemy tower,
/// or the enemy baseline once every tower has fallen.
fn objective(entity: &Entity, layout: &ArenaLayout, candidates: &[Candidate]) -> Vec2Fixed {
    nearest_enemy(entity.position, entity.side, candidates, |c, _| c.is_building).map_or_else(
        || Vec2Fixed::new(entity.position.x, layout.enemy_baseline(entity.side)),
        |tower| tower.position,
    )
}

/// Ground troops cross the river on the nearest bridge.
fn bridge_waypoint(layout: &ArenaLayout, from: Vec2Fixed, goal: Vec2Fixed) -> Vec2Fixed {
    if !layout.crosses_river(from, goal) {
        return goal;
    }

    let [left, right] = layout.bridge_xs();
    let dist_left = (from.x - left).abs();
    let dist_right = (from.x - right).abs();
    let bridge_x = if dist_left <= dist_right { left } else { right };
    let tolerance = layout.tile() * Fixed::from_num(3) / Fixed::from_num(2);

    if (from.x - bridge_x).abs() > tolerance {
        return Vec2Fixed::new(bridge_x, layout.river_y());
    }

    // On the bridge: walk straight across to the first dry row.
    let exit_row = if goal.y < from.y {
        layout.river_row - 1
    } else {
        layout.river_row + 1
    };
    Vec2Fixed::new(bridge_x, layout.tile_center(0, exit_row).y)
}
