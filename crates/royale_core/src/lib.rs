//! # Royale Core
//!
//! Deterministic battle simulation for an elixir-gated tower battle.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO beyond replay files
//! - No randomness
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - Two peers predicting the same battle from the same deployments
//! - Reconciliation against the authoritative ledger mirror
//! - Replays and determinism testing
//!
//! ## Crate Structure
//!
//! - [`components`] - Entity model: towers, troops, spells
//! - [`combat`] - Targeting, attacks and movement
//! - [`simulation`] - Scheduler, elixir, win conditions
//! - [`cards`] - Card catalog
//! - [`arena`] - Arena geometry and placement rules
//! - [`mirror`] - Ledger battle account
//! - [`reconcile`] - Pending actions against ledger logs
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod arena;
pub mod cards;
pub mod combat;
pub mod components;
pub mod config;
pub mod economy;
pub mod error;
pub mod events;
pub mod math;
pub mod mirror;
pub mod reconcile;
pub mod replay;
pub mod simulation;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::arena::ArenaLayout;
    pub use crate::cards::{CardCatalog, CardDef, CardId, CardKind};
    pub use crate::components::{Entity, EntityId, EntityKind, EntityState, EntityTag};
    pub use crate::config::{DebugOverrides, MatchConfig, MatchFormat, Tiebreak};
    pub use crate::error::{DeployRejection, GameError, LedgerError, Result};
    pub use crate::events::{EndReason, MatchEvent, MatchOutcome, MatchResult};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::mirror::{BattleState, BattleStatus, Divergence};
    pub use crate::reconcile::{ActionId, ActionStatus, LedgerLog, PendingActions, Resolution};
    pub use crate::replay::Replay;
    pub use crate::simulation::{EntitySnapshot, HostSync, MatchPhase, Simulation};
}
