//! Entity model.
//!
//! Every battlefield object is one [`Entity`] record: identity, owner,
//! position, health and attack stats shared by all variants, plus an
//! [`EntityKind`] payload for what only towers, troops or spells carry.
//! Behaviour lives in [`crate::combat`].

use serde::{Deserialize, Serialize};

use crate::arena::{
    ArenaLayout, TowerSlot, KING_TOWER_HEALTH, PRINCESS_TOWER_HEALTH, TOWER_DAMAGE,
    TOWER_HIT_SPEED_MS, TOWER_RANGE_TILES,
};
use crate::cards::{CardId, MovementLayer, SpellCard, TargetFilter, TroopCard};
use crate::math::{fixed_serde, option_fixed_serde, Fixed, Vec2Fixed};

/// Unique identifier for live entities within one simulation.
pub type EntityId = u32;

/// How long a tower shows as shooting after each shot.
pub const SHOOTING_WINDOW_MS: u64 = 500;

// ============================================================================
// Shared state
// ============================================================================

/// Coarse behaviour state, exposed for rendering and the ledger mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityState {
    /// Nothing to do.
    #[default]
    Idle,
    /// Walking or flying toward an objective.
    Moving,
    /// Engaged with a target in reach.
    Attacking,
    /// Health reached zero; waiting for the sweep.
    Dead,
}

/// Health component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Health {
    /// Current health points.
    pub current: u32,
    /// Maximum health points.
    pub max: u32,
}

impl Health {
    /// Create new health component at full health.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    /// Check if entity is dead (health == 0).
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.current == 0
    }

    /// Apply damage, returning actual damage dealt.
    /// Uses saturating subtraction to prevent underflow.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        let actual = amount.min(self.current);
        self.current = self.current.saturating_sub(actual);
        actual
    }
}

/// Attack stats and cooldown bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttackStats {
    /// Damage per hit.
    pub damage: u32,
    /// Reach in arena pixels.
    #[serde(with = "fixed_serde")]
    pub range: Fixed,
    /// Milliseconds between hits.
    pub hit_speed_ms: u32,
    /// Logical time of the last hit; `None` until the first one.
    pub last_attack_ms: Option<u64>,
}

impl AttackStats {
    /// Whether the cooldown has elapsed at `now_ms`.
    #[must_use]
    pub fn is_ready(&self, now_ms: u64) -> bool {
        self.last_attack_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= u64::from(self.hit_speed_ms))
    }
}

/// Animation flag raised by a tower shot.
///
/// Clocked on its own timestamp so it can never influence attack timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ShootingFlag {
    /// Whether the tower is currently shown shooting.
    pub active: bool,
    /// Logical time the flag was last raised.
    pub since_ms: u64,
}

impl ShootingFlag {
    /// Raise the flag at `now_ms`.
    pub fn trigger(&mut self, now_ms: u64) {
        self.active = true;
        self.since_ms = now_ms;
    }

    /// Clear the flag once its window has passed.
    pub fn expire(&mut self, now_ms: u64) {
        if self.active && now_ms.saturating_sub(self.since_ms) > SHOOTING_WINDOW_MS {
            self.active = false;
        }
    }
}

// ============================================================================
// Variants
// ============================================================================

/// Tower payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TowerData {
    /// King tower; its destruction ends the match.
    pub is_king: bool,
    /// Set once, by the sweep that reports the destruction.
    pub destroyed: bool,
    /// Shooting animation flag.
    pub shooting: ShootingFlag,
}

/// Troop payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TroopData {
    /// Card the troop was deployed from.
    pub card: CardId,
    /// Speed in arena pixels per second.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,
    /// Movement layer.
    pub layer: MovementLayer,
    /// Targeting filter.
    pub targets: TargetFilter,
    /// Sight in arena pixels; `None` sees the whole arena.
    #[serde(with = "option_fixed_serde")]
    pub sight: Option<Fixed>,
}

/// Spell payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpellData {
    /// Card the spell was cast from.
    pub card: CardId,
    /// Logical time of the strike; `None` before the first update.
    pub cast_at_ms: Option<u64>,
    /// Milliseconds the spell lingers after striking.
    pub duration_ms: u32,
}

/// Variant payload of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// King or princess tower.
    Building(TowerData),
    /// Deployed troop.
    Unit(TroopData),
    /// Area spell.
    Spell(SpellData),
}

/// Payload-free tag of an [`EntityKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityTag {
    /// Tower.
    Building,
    /// Troop.
    Unit,
    /// Spell.
    Spell,
}

// ============================================================================
// Entity
// ============================================================================

/// One battlefield object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id among live entities.
    pub id: EntityId,
    /// Owning player index. Towers carry the first player of their side.
    pub owner: u8,
    /// Side (0 or 1) the entity fights for.
    pub side: u8,
    /// Variant payload.
    pub kind: EntityKind,
    /// Centre in arena pixels.
    pub position: Vec2Fixed,
    /// Collision radius in arena pixels.
    #[serde(with = "fixed_serde")]
    pub radius: Fixed,
    /// Hit points.
    pub health: Health,
    /// Attack stats.
    pub attack: AttackStats,
    /// Behaviour state.
    pub state: EntityState,
    /// Currently engaged enemy. Lookup only.
    pub target: Option<EntityId>,
}

impl Entity {
    /// Build the tower standing in `slot`.
    #[must_use]
    pub fn tower(id: EntityId, owner: u8, slot: &TowerSlot, layout: &ArenaLayout) -> Self {
        let max = if slot.is_king {
            KING_TOWER_HEALTH
        } else {
            PRINCESS_TOWER_HEALTH
        };
        Self {
            id,
            owner,
            side: slot.side,
            kind: EntityKind::Building(TowerData {
                is_king: slot.is_king,
                destroyed: false,
                shooting: ShootingFlag::default(),
            }),
            position: slot.position,
            radius: layout.tile(),
            health: Health::new(max),
            attack: AttackStats {
                damage: TOWER_DAMAGE,
                range: layout.tiles_to_px(TOWER_RANGE_TILES),
                hit_speed_ms: TOWER_HIT_SPEED_MS,
                last_attack_ms: None,
            },
            state: EntityState::Idle,
            target: None,
        }
    }

    /// Build one troop from card stats.
    #[must_use]
    pub fn troop(
        id: EntityId,
        owner: u8,
        side: u8,
        card: CardId,
        stats: &TroopCard,
        position: Vec2Fixed,
        layout: &ArenaLayout,
    ) -> Self {
        Self {
            id,
            owner,
            side,
            kind: EntityKind::Unit(TroopData {
                card,
                speed: layout.scale_px(stats.speed_px_per_s),
                layer: stats.layer,
                targets: stats.targets,
                sight: stats.sight_px.map(|px| layout.scale_px(px)),
            }),
            position,
            radius: layout.scale_px(stats.radius_px),
            health: Health::new(stats.health),
            attack: AttackStats {
                damage: stats.damage,
                range: layout.scale_px(stats.range_px),
                hit_speed_ms: stats.hit_speed_ms,
                last_attack_ms: None,
            },
            state: EntityState::Moving,
            target: None,
        }
    }

    /// Build a spell from card stats.
    #[must_use]
    pub fn spell(
        id: EntityId,
        owner: u8,
        side: u8,
        card: CardId,
        stats: &SpellCard,
        position: Vec2Fixed,
        layout: &ArenaLayout,
    ) -> Self {
        Self {
            id,
            owner,
            side,
            kind: EntityKind::Spell(SpellData {
                card,
                cast_at_ms: None,
                duration_ms: stats.duration_ms,
            }),
            position,
            radius: Fixed::ZERO,
            health: Health::new(1),
            attack: AttackStats {
                damage: stats.damage,
                range: layout.scale_px(stats.radius_px),
                hit_speed_ms: stats.duration_ms,
                last_attack_ms: None,
            },
            state: EntityState::Idle,
            target: None,
        }
    }

    /// Variant tag.
    #[must_use]
    pub const fn tag(&self) -> EntityTag {
        match self.kind {
            EntityKind::Building(_) => EntityTag::Building,
            EntityKind::Unit(_) => EntityTag::Unit,
            EntityKind::Spell(_) => EntityTag::Spell,
        }
    }

    /// Whether this entity is a tower.
    #[must_use]
    pub const fn is_building(&self) -> bool {
        matches!(self.kind, EntityKind::Building(_))
    }

    /// Whether this is a king tower.
    #[must_use]
    pub const fn is_king(&self) -> bool {
        matches!(self.kind, EntityKind::Building(TowerData { is_king: true, .. }))
    }

    /// Movement layer; towers and spells count as ground.
    #[must_use]
    pub const fn layer(&self) -> MovementLayer {
        match self.kind {
            EntityKind::Unit(troop) => troop.layer,
            EntityKind::Building(_) | EntityKind::Spell(_) => MovementLayer::Ground,
        }
    }

    /// Card this entity was deployed from; `None` for towers.
    #[must_use]
    pub const fn card(&self) -> Option<CardId> {
        match self.kind {
            EntityKind::Unit(troop) => Some(troop.card),
            EntityKind::Spell(spell) => Some(spell.card),
            EntityKind::Building(_) => None,
        }
    }

    /// Whether the tower shooting flag is up.
    #[must_use]
    pub const fn is_shooting(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Building(TowerData {
                shooting: ShootingFlag { active: true, .. },
                ..
            })
        )
    }
}
