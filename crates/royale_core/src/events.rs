//! Events the scheduler reports to whoever owns the match.
//!
//! The [`Simulation`](crate::simulation::Simulation) queues events in its
//! own outbox; the owning session drains them after each update. Nothing
//! is global, so any number of matches can run side by side.

use serde::{Deserialize, Serialize};

use crate::cards::CardId;
use crate::components::EntityId;

/// Final result of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// This side (0 or 1) won.
    Winner(u8),
    /// Nobody won.
    Draw,
}

impl MatchOutcome {
    /// Winning side, if any.
    #[must_use]
    pub const fn winner(self) -> Option<u8> {
        match self {
            Self::Winner(side) => Some(side),
            Self::Draw => None,
        }
    }
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    /// A king tower fell.
    KingDestroyed,
    /// The match clock ran out, or the server called time.
    Timer,
    /// A side left or disconnected.
    Conceded,
}

/// Outcome plus reason, fixed once the match ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchResult {
    /// Who won.
    pub outcome: MatchOutcome,
    /// How the match ended.
    pub reason: EndReason,
}

/// Something the presentation layer or a session may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchEvent {
    /// The battle clock started.
    BattleStarted,
    /// A player's whole elixir changed.
    ElixirUpdate {
        /// Player index.
        player: u8,
        /// Whole elixir now held.
        elixir: u32,
    },
    /// A card was deployed.
    CardPlayed {
        /// Player index.
        player: u8,
        /// Card deployed.
        card: CardId,
        /// First entity spawned by the deployment.
        entity: EntityId,
    },
    /// A tower was destroyed. Reported once per tower.
    TowerDestroyed {
        /// Tower entity id.
        tower: EntityId,
        /// Side that lost the tower.
        side: u8,
        /// Whether it was the king.
        is_king: bool,
    },
    /// Crown totals changed.
    CrownUpdate {
        /// Crowns per side.
        crowns: [u8; 2],
    },
    /// A troop died and left the arena.
    UnitDied {
        /// Troop entity id.
        entity: EntityId,
    },
    /// The match ended.
    GameEnd {
        /// Who won.
        outcome: MatchOutcome,
        /// How it ended.
        reason: EndReason,
    },
}
