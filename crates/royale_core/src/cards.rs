//! Card catalog.
//!
//! Cards are data: cost plus the stats of the troop or spell they put on
//! the arena. Distances and speeds are in pixels at the reference tile
//! size of 22 px and are rescaled by the [`ArenaLayout`](crate::arena::ArenaLayout)
//! when an entity is spawned.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

/// Card identifier shared by clients, relay and ledger.
pub type CardId = u8;

/// Card id of the Giant.
pub const GIANT: CardId = 1;
/// Card id of the Valkyrie.
pub const VALKYRIE: CardId = 2;
/// Card id of the Mini P.E.K.K.A.
pub const MINI_PEKKA: CardId = 3;
/// Card id of the Baby Dragon.
pub const BABY_DRAGON: CardId = 4;
/// Card id of the Archers.
pub const ARCHERS: CardId = 5;
/// Card id of the Arrows spell.
pub const ARROWS: CardId = 6;
/// Card id of the Wizard.
pub const WIZARD: CardId = 7;
/// Card id of the Barbarians.
pub const BARBARIANS: CardId = 8;

/// Which layer a troop moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementLayer {
    /// Walks; must cross the river on a bridge.
    #[default]
    Ground,
    /// Flies straight over the river.
    Air,
}

/// Which enemies an attacker may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TargetFilter {
    /// Ground troops and buildings.
    #[default]
    Ground,
    /// Everything.
    AirAndGround,
    /// Towers only.
    Buildings,
}

impl TargetFilter {
    /// Whether an enemy with these traits is a legal target.
    #[must_use]
    pub const fn allows(self, is_building: bool, layer: MovementLayer) -> bool {
        match self {
            Self::AirAndGround => true,
            Self::Buildings => is_building,
            Self::Ground => is_building || matches!(layer, MovementLayer::Ground),
        }
    }
}

/// Stats of a troop card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroopCard {
    /// Hit points of each spawned troop.
    pub health: u32,
    /// Damage per attack.
    pub damage: u32,
    /// Milliseconds between attacks.
    pub hit_speed_ms: u32,
    /// Attack range in reference pixels, measured to the target's edge.
    pub range_px: u32,
    /// Distance at which enemies are noticed. `None` sees the whole arena.
    #[serde(default)]
    pub sight_px: Option<u32>,
    /// Walk speed in reference pixels per second.
    pub speed_px_per_s: u32,
    /// Movement layer.
    #[serde(default)]
    pub layer: MovementLayer,
    /// Targeting filter.
    #[serde(default)]
    pub targets: TargetFilter,
    /// Collision radius in reference pixels.
    pub radius_px: u32,
    /// Troops spawned per deployment.
    pub count: u8,
}

/// Stats of a spell card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellCard {
    /// Damage dealt to each enemy in the blast.
    pub damage: u32,
    /// Blast radius in reference pixels.
    pub radius_px: u32,
    /// Milliseconds the spell lingers after striking.
    pub duration_ms: u32,
}

/// What a card puts on the arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardKind {
    /// One or more troops.
    Troop(TroopCard),
    /// An area strike.
    Spell(SpellCard),
}

/// One card definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDef {
    /// Shared card id.
    pub id: CardId,
    /// Display name.
    pub name: String,
    /// Elixir cost.
    pub cost: u32,
    /// Troop or spell payload.
    pub kind: CardKind,
}

impl CardDef {
    /// Whether deploying this card is subject to half-arena placement.
    #[must_use]
    pub const fn is_spell(&self) -> bool {
        matches!(self.kind, CardKind::Spell(_))
    }
}

/// Lookup table of every playable card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCatalog {
    cards: Vec<CardDef>,
}

impl CardCatalog {
    /// Build a catalog, refusing duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] when two cards share an id.
    pub fn new(cards: Vec<CardDef>) -> Result<Self> {
        let mut seen = HashSet::new();
        for card in &cards {
            if !seen.insert(card.id) {
                return Err(GameError::InvalidState(format!(
                    "duplicate card id {}",
                    card.id
                )));
            }
        }
        Ok(Self { cards })
    }

    /// Parse a catalog from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] for malformed text and
    /// [`GameError::InvalidState`] for duplicate ids.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct CatalogFile {
            cards: Vec<CardDef>,
        }

        let file: CatalogFile = ron::from_str(text).map_err(|e| GameError::DataParseError {
            path: "card catalog".to_string(),
            message: e.to_string(),
        })?;
        Self::new(file.cards)
    }

    /// Look up a card by id.
    #[must_use]
    pub fn get(&self, id: CardId) -> Option<&CardDef> {
        self.cards.iter().find(|card| card.id == id)
    }

    /// All cards in catalog order.
    #[must_use]
    pub fn cards(&self) -> &[CardDef] {
        &self.cards
    }

    /// The eight-card set both clients and the ledger agree on.
    #[must_use]
    pub fn standard() -> Self {
        let troop = |id, name: &str, cost, stats| CardDef {
            id,
            name: name.to_string(),
            cost,
            kind: CardKind::Troop(stats),
        };

        let cards = vec![
            troop(
                GIANT,
                "Giant",
                5,
                TroopCard {
                    health: 3000,
                    damage: 253,
                    hit_speed_ms: 1000,
                    range_px: 5,
                    sight_px: None,
                    speed_px_per_s: 20,
                    layer: MovementLayer::Ground,
                    targets: TargetFilter::Buildings,
                    radius_px: 20,
                    count: 1,
                },
            ),
            troop(
                VALKYRIE,
                "Valkyrie",
                4,
                TroopCard {
                    health: 1907,
                    damage: 266,
                    hit_speed_ms: 2000,
                    range_px: 5,
                    sight_px: Some(121),
                    speed_px_per_s: 28,
                    layer: MovementLayer::Ground,
                    targets: TargetFilter::Ground,
                    radius_px: 20,
                    count: 1,
                },
            ),
            troop(
                MINI_PEKKA,
                "Mini P.E.K.K.A",
                4,
                TroopCard {
                    health: 1392,
                    damage: 500,
                    hit_speed_ms: 1000,
                    range_px: 5,
                    sight_px: Some(121),
                    speed_px_per_s: 30,
                    layer: MovementLayer::Ground,
                    targets: TargetFilter::Ground,
                    radius_px: 20,
                    count: 1,
                },
            ),
            troop(
                BABY_DRAGON,
                "Baby Dragon",
                4,
                TroopCard {
                    health: 1152,
                    damage: 161,
                    hit_speed_ms: 1000,
                    range_px: 35,
                    sight_px: Some(121),
                    speed_px_per_s: 35,
                    layer: MovementLayer::Air,
                    targets: TargetFilter::AirAndGround,
                    radius_px: 20,
                    count: 1,
                },
            ),
            troop(
                ARCHERS,
                "Archers",
                3,
                TroopCard {
                    health: 304,
                    damage: 112,
                    hit_speed_ms: 1000,
                    range_px: 50,
                    sight_px: Some(121),
                    speed_px_per_s: 9,
                    layer: MovementLayer::Ground,
                    targets: TargetFilter::AirAndGround,
                    radius_px: 20,
                    count: 2,
                },
            ),
            CardDef {
                id: ARROWS,
                name: "Arrows".to_string(),
                cost: 3,
                kind: CardKind::Spell(SpellCard {
                    damage: 144,
                    radius_px: 88,
                    duration_ms: 1000,
                }),
            },
            troop(
                WIZARD,
                "Wizard",
                5,
                TroopCard {
                    health: 755,
                    damage: 281,
                    hit_speed_ms: 2000,
                    range_px: 30,
                    sight_px: Some(121),
                    speed_px_per_s: 27,
                    layer: MovementLayer::Ground,
                    targets: TargetFilter::AirAndGround,
                    radius_px: 20,
                    count: 1,
                },
            ),
            troop(
                BARBARIANS,
                "Barbarians",
                5,
                TroopCard {
                    health: 2500,
                    damage: 192,
                    hit_speed_ms: 1000,
                    range_px: 5,
                    sight_px: Some(121),
                    speed_px_per_s: 18,
                    layer: MovementLayer::Ground,
                    targets: TargetFilter::Ground,
                    radius_px: 20,
                    count: 1,
                },
            ),
        ];

        Self { cards }
    }
}

impl Default for CardCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
