//! Authoritative mirror of the ledger battle account.
//!
//! [`BattleState`] reproduces the settlement account field by field and
//! models the instructions that mutate it, so a client can compare what it
//! predicted locally against what the ledger will settle. The ledger does
//! not run combat: it tracks deployments, a coarse per-second elixir
//! clock, tower health and the winner.
//!
//! Units follow the ledger, not the simulation. Elixir is counted in
//! hundredths and regenerates one whole elixir per elapsed second of
//! ledger time; the ledger never removes entities.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arena::{ArenaLayout, KING_TOWER_HEALTH, PRINCESS_TOWER_HEALTH};
use crate::cards::{CardDef, CardId, CardKind};
use crate::components::{EntityState, EntityTag};
use crate::config::MatchFormat;
use crate::error::LedgerError;
use crate::simulation::{MatchPhase, Simulation};

/// Hundredths per whole elixir.
pub const ELIXIR_SCALE: u64 = 100;

/// Elixir every seat holds when the account is created, in hundredths.
pub const LEDGER_START_ELIXIR: u64 = 500;

/// Elixir cap, in hundredths.
pub const LEDGER_MAX_ELIXIR: u64 = 1000;

/// Entities the account can hold.
pub const LEDGER_MAX_ENTITIES: usize = 64;

/// `end_game` winner marker for a draw.
pub const DRAW_MARKER: u8 = 255;

/// Settlement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BattleStatus {
    /// Created, seats still open.
    #[default]
    Waiting,
    /// Every seat taken; deployments accepted.
    Active,
    /// Winner settled.
    Completed,
}

/// One of the six fixed tower slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerTower {
    /// Remaining health.
    pub health: i32,
    /// Centre, whole pixels.
    pub x: i32,
    /// Centre, whole pixels.
    pub y: i32,
    /// Side owning the tower.
    pub owner_idx: u8,
    /// Whether this is the king.
    pub is_king: bool,
}

impl LedgerTower {
    /// Health the tower starts with.
    #[must_use]
    pub fn initial_health(&self) -> i32 {
        let max = if self.is_king {
            KING_TOWER_HEALTH
        } else {
            PRINCESS_TOWER_HEALTH
        };
        i32::try_from(max).unwrap_or(i32::MAX)
    }

    /// Health lost so far.
    #[must_use]
    pub fn damage_taken(&self) -> u64 {
        u64::try_from(self.initial_health() - self.health.max(0)).unwrap_or(0)
    }

    /// Whether the tower is down.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.health <= 0
    }
}

/// A deployed troop or spell as the ledger records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntity {
    /// `tick_count * 100 + index` at deploy time.
    pub id: u32,
    /// Deploying player.
    pub owner_idx: u8,
    /// Card deployed.
    pub card_id: CardId,
    /// Deploy point, whole pixels.
    pub x: i32,
    /// Deploy point, whole pixels.
    pub y: i32,
    /// Health at deploy time.
    pub health: i32,
    /// Damage per hit.
    pub damage: i32,
    /// Behaviour state.
    pub state: EntityState,
    /// Engaged enemy.
    pub target_id: Option<u32>,
}

/// Ledger battle account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleState {
    /// Room and account key.
    pub game_id: u64,
    /// Team format; decides seat count and seat sides.
    pub format: MatchFormat,
    /// Seated identities; `None` is an open seat.
    pub players: Vec<Option<String>>,
    /// Settlement status.
    pub status: BattleStatus,
    /// Elixir per seat, in hundredths.
    pub elixir: Vec<u64>,
    /// Side 0 king, left, right, then side 1 king, left, right.
    pub towers: [LedgerTower; 6],
    /// Every deployment, never removed.
    pub entities: Vec<LedgerEntity>,
    /// Winning side once settled; `None` while running or on a draw.
    pub winner: Option<u8>,
    /// Enemy princess towers each side has destroyed.
    pub towers_destroyed: [u8; 2],
    /// Damage each side has dealt to enemy towers.
    pub damage_dealt: [u64; 2],
    /// Deploy instructions processed.
    pub tick_count: u64,
    /// Ledger clock at the last elixir settlement, unix seconds.
    pub last_update_time: i64,
}

impl BattleState {
    /// Create the account with `host` in seat 0.
    #[must_use]
    pub fn create(
        game_id: u64,
        host: impl Into<String>,
        format: MatchFormat,
        layout: &ArenaLayout,
        now: i64,
    ) -> Self {
        let seats = usize::from(format.player_count());
        let mut players = vec![None; seats];
        players[0] = Some(host.into());
        Self {
            game_id,
            format,
            players,
            status: BattleStatus::Waiting,
            elixir: vec![LEDGER_START_ELIXIR; seats],
            towers: Self::initial_towers(layout),
            entities: Vec::new(),
            winner: None,
            towers_destroyed: [0, 0],
            damage_dealt: [0, 0],
            tick_count: 0,
            last_update_time: now,
        }
    }

    fn initial_towers(layout: &ArenaLayout) -> [LedgerTower; 6] {
        let [a, b, c] = layout.tower_slots(0);
        let [d, e, f] = layout.tower_slots(1);
        [a, b, c, d, e, f].map(|slot| {
            let (x, y) = slot.position.to_px();
            let health = if slot.is_king {
                KING_TOWER_HEALTH
            } else {
                PRINCESS_TOWER_HEALTH
            };
            LedgerTower {
                health: i32::try_from(health).unwrap_or(i32::MAX),
                x,
                y,
                owner_idx: slot.side,
                is_king: slot.is_king,
            }
        })
    }

    /// Take the next open seat. The battle goes active once every seat is
    /// taken.
    ///
    /// # Errors
    ///
    /// [`LedgerError::GameNotWaiting`] once the battle left the lobby,
    /// [`LedgerError::InvalidPlayer`] if `player` is already seated,
    /// [`LedgerError::GameAlreadyFull`] if no seat is open.
    pub fn join(&mut self, player: impl Into<String>, now: i64) -> Result<u8, LedgerError> {
        if self.status != BattleStatus::Waiting {
            return Err(LedgerError::GameNotWaiting);
        }
        let player = player.into();
        if self.seat_of(&player).is_some() {
            return Err(LedgerError::InvalidPlayer);
        }
        let seat = self
            .players
            .iter()
            .position(Option::is_none)
            .ok_or(LedgerError::GameAlreadyFull)?;
        self.players[seat] = Some(player);

        if self.players.iter().all(Option::is_some) {
            self.status = BattleStatus::Active;
            self.last_update_time = now;
            info!(game_id = self.game_id, "ledger battle active");
        }
        u8::try_from(seat).map_err(|_| LedgerError::GameAlreadyFull)
    }

    /// Seat held by `identity`.
    #[must_use]
    pub fn seat_of(&self, identity: &str) -> Option<u8> {
        self.players
            .iter()
            .position(|seat| seat.as_deref() == Some(identity))
            .and_then(|seat| u8::try_from(seat).ok())
    }

    /// Elixir of `player` in whole units, rounded down.
    #[must_use]
    pub fn whole_elixir(&self, player: u8) -> Option<u64> {
        self.elixir
            .get(usize::from(player))
            .map(|hundredths| hundredths / ELIXIR_SCALE)
    }

    fn regenerate(&mut self, now: i64) {
        let elapsed = u64::try_from(now.saturating_sub(self.last_update_time)).unwrap_or(0);
        if elapsed == 0 {
            return;
        }
        for pool in &mut self.elixir {
            *pool = pool
                .saturating_add(elapsed.saturating_mul(ELIXIR_SCALE))
                .min(LEDGER_MAX_ELIXIR);
        }
        self.last_update_time = now;
    }

    /// Record a deployment by `signer` at ledger time `now`.
    ///
    /// Elixir is settled for the elapsed seconds first, then the cost is
    /// checked before the entity cap. Returns the new entity id.
    ///
    /// # Errors
    ///
    /// Returns the ledger's refusal; the account is unchanged on error
    /// apart from the elixir settlement.
    pub fn deploy_troop(
        &mut self,
        signer: &str,
        card: &CardDef,
        x: i32,
        y: i32,
        now: i64,
    ) -> Result<u32, LedgerError> {
        if self.status != BattleStatus::Active {
            return Err(LedgerError::GameNotActive);
        }
        self.regenerate(now);

        let player = self.seat_of(signer).ok_or(LedgerError::NotAPlayer)?;
        let (health, damage) = match &card.kind {
            CardKind::Troop(stats) => (stats.health, stats.damage),
            CardKind::Spell(stats) => (0, stats.damage),
        };

        let cost = u64::from(card.cost) * ELIXIR_SCALE;
        let available = self.elixir[usize::from(player)];
        if available < cost {
            return Err(LedgerError::NotEnoughElixir {
                required: cost,
                available,
            });
        }
        if self.entities.len() >= LEDGER_MAX_ENTITIES {
            return Err(LedgerError::TooManyEntities);
        }
        self.elixir[usize::from(player)] -= cost;

        let index = u64::try_from(self.entities.len()).unwrap_or(u64::MAX);
        let id = u32::try_from(self.tick_count * 100 + index).unwrap_or(u32::MAX);
        self.entities.push(LedgerEntity {
            id,
            owner_idx: player,
            card_id: card.id,
            x,
            y,
            health: i32::try_from(health).unwrap_or(i32::MAX),
            damage: i32::try_from(damage).unwrap_or(i32::MAX),
            state: EntityState::Moving,
            target_id: None,
        });
        self.tick_count += 1;
        debug!(game_id = self.game_id, player, card = card.id, id, "ledger deploy");

        self.settle_towers();
        Ok(id)
    }

    /// Lower a tower's health, flooring at zero, and settle the result.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidTower`] for an index outside `0..6`.
    pub fn apply_tower_damage(&mut self, index: usize, amount: u32) -> Result<(), LedgerError> {
        let tower = self
            .towers
            .get_mut(index)
            .ok_or(LedgerError::InvalidTower(index))?;
        let amount = i32::try_from(amount).unwrap_or(i32::MAX);
        tower.health = tower.health.saturating_sub(amount).max(0);
        self.settle_towers();
        Ok(())
    }

    /// Winner, princess tallies and damage totals from current tower health.
    ///
    /// A fallen king settles the battle for the other side at once.
    /// Nothing changes once a winner is set.
    fn settle_towers(&mut self) {
        if self.winner.is_some() {
            return;
        }

        let mut princesses_lost = [0u8; 2];
        for tower in &self.towers {
            if !tower.is_destroyed() {
                continue;
            }
            let attacker = u8::from(tower.owner_idx == 0);
            if tower.is_king {
                self.winner = Some(attacker);
                self.status = BattleStatus::Completed;
                info!(game_id = self.game_id, winner = attacker, "ledger king destroyed");
                break;
            }
            princesses_lost[usize::from(tower.owner_idx)] += 1;
        }

        self.towers_destroyed = [princesses_lost[1], princesses_lost[0]];
        let taken = |side: u8| -> u64 {
            self.towers
                .iter()
                .filter(|tower| tower.owner_idx == side)
                .map(LedgerTower::damage_taken)
                .sum()
        };
        self.damage_dealt = [taken(1), taken(0)];
    }

    /// Settle the battle. `winner_idx` of [`DRAW_MARKER`] records a draw.
    ///
    /// # Errors
    ///
    /// [`LedgerError::GameNotActive`] unless the battle is running,
    /// [`LedgerError::NotAPlayer`] if `signer` holds no seat.
    pub fn end_game(&mut self, signer: &str, winner_idx: u8) -> Result<(), LedgerError> {
        if self.status != BattleStatus::Active {
            return Err(LedgerError::GameNotActive);
        }
        if self.seat_of(signer).is_none() {
            return Err(LedgerError::NotAPlayer);
        }
        self.winner = (winner_idx != DRAW_MARKER).then_some(winner_idx);
        self.status = BattleStatus::Completed;
        info!(game_id = self.game_id, winner = ?self.winner, "ledger battle completed");
        Ok(())
    }

    /// Project a local simulation onto the account layout.
    ///
    /// Elixir keeps its fraction, so this is what the ledger would hold if
    /// it regenerated as smoothly as the simulation. `tick_count` carries
    /// logic ticks and `last_update_time` logical seconds.
    #[must_use]
    pub fn from_simulation(sim: &Simulation, game_id: u64, players: Vec<Option<String>>) -> Self {
        let format = sim.config().format;
        let elixir = (0..format.player_count())
            .map(|player| {
                sim.elixir_pool(player)
                    .map_or(0, |pool| u64::from(pool.hundredths()))
            })
            .collect();

        let mut towers = Self::initial_towers(sim.layout());
        for (slot, tower) in towers
            .iter_mut()
            .zip(sim.towers(0).into_iter().chain(sim.towers(1)))
        {
            slot.health = i32::try_from(tower.health.current).unwrap_or(i32::MAX);
        }

        let entities = sim
            .entities()
            .sorted()
            .filter(|entity| entity.tag() != EntityTag::Building)
            .map(|entity| {
                let (x, y) = entity.position.to_px();
                LedgerEntity {
                    id: entity.id,
                    owner_idx: entity.owner,
                    card_id: entity.card().unwrap_or_default(),
                    x,
                    y,
                    health: i32::try_from(entity.health.current).unwrap_or(i32::MAX),
                    damage: i32::try_from(entity.attack.damage).unwrap_or(i32::MAX),
                    state: entity.state,
                    target_id: entity.target,
                }
            })
            .collect();

        let status = match sim.phase() {
            MatchPhase::Waiting => BattleStatus::Waiting,
            MatchPhase::Active => BattleStatus::Active,
            MatchPhase::Ended => BattleStatus::Completed,
        };

        let mut state = Self {
            game_id,
            format,
            players,
            status,
            elixir,
            towers,
            entities,
            winner: None,
            towers_destroyed: [0, 0],
            damage_dealt: [0, 0],
            tick_count: sim.tick(),
            last_update_time: i64::try_from(sim.now_ms() / 1000).unwrap_or(i64::MAX),
        };
        state.settle_towers();
        state.winner = sim.result().and_then(|result| result.outcome.winner());
        state
    }

    /// Settlement-relevant fields where `self` (the prediction) disagrees
    /// with `confirmed`.
    ///
    /// Elixir and entities are not compared: the ledger's coarse clock and
    /// append-only entity list differ from any live simulation by
    /// construction.
    #[must_use]
    pub fn divergence(&self, confirmed: &Self) -> Vec<Divergence> {
        let mut found = Vec::new();
        if self.status != confirmed.status {
            found.push(Divergence::Status {
                predicted: self.status,
                confirmed: confirmed.status,
            });
        }
        if self.winner != confirmed.winner {
            found.push(Divergence::Winner {
                predicted: self.winner,
                confirmed: confirmed.winner,
            });
        }
        for (index, (mine, theirs)) in self.towers.iter().zip(&confirmed.towers).enumerate() {
            if mine.health != theirs.health {
                found.push(Divergence::TowerHealth {
                    index,
                    predicted: mine.health,
                    confirmed: theirs.health,
                });
            }
        }
        for side in 0..2u8 {
            let (mine, theirs) = (
                self.towers_destroyed[usize::from(side)],
                confirmed.towers_destroyed[usize::from(side)],
            );
            if mine != theirs {
                found.push(Divergence::TowersDestroyed {
                    side,
                    predicted: mine,
                    confirmed: theirs,
                });
            }
        }
        found
    }
}

/// One disagreement between prediction and ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Divergence {
    /// Settlement status differs.
    Status {
        /// Local projection.
        predicted: BattleStatus,
        /// Ledger account.
        confirmed: BattleStatus,
    },
    /// Winner differs.
    Winner {
        /// Local projection.
        predicted: Option<u8>,
        /// Ledger account.
        confirmed: Option<u8>,
    },
    /// A tower's health differs.
    TowerHealth {
        /// Tower slot.
        index: usize,
        /// Local projection.
        predicted: i32,
        /// Ledger account.
        confirmed: i32,
    },
    /// A side's princess tally differs.
    TowersDestroyed {
        /// Attacking side.
        side: u8,
        /// Local projection.
        predicted: u8,
        /// Ledger account.
        confirmed: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{CardCatalog, ARROWS, GIANT};
    use crate::config::MatchConfig;
    use crate::math::Vec2Fixed;

    fn active() -> BattleState {
        let mut state =
            BattleState::create(7, "alice", MatchFormat::OneVsOne, &ArenaLayout::default(), 100);
        state.join("bob", 100).unwrap();
        state
    }

    fn card(id: CardId) -> CardDef {
        CardCatalog::standard().get(id).cloned().unwrap()
    }

    #[test]
    fn test_create_and_join() {
        let mut state =
            BattleState::create(7, "alice", MatchFormat::OneVsOne, &ArenaLayout::default(), 0);
        assert_eq!(state.status, BattleStatus::Waiting);
        assert_eq!(state.elixir, vec![500, 500]);
        assert_eq!(state.towers[0].health, 4000);
        assert_eq!(state.towers[4].health, 2500);
        assert_eq!(state.towers[3].owner_idx, 1);

        assert_eq!(state.join("alice", 5), Err(LedgerError::InvalidPlayer));
        assert_eq!(state.join("bob", 5), Ok(1));
        assert_eq!(state.status, BattleStatus::Active);
        assert_eq!(state.last_update_time, 5);
        assert_eq!(state.join("carol", 5), Err(LedgerError::GameNotWaiting));
    }

    #[test]
    fn test_deploy_debits_hundredths_and_assigns_ids() {
        let mut state = active();
        let first = state.deploy_troop("alice", &card(ARROWS), 10, 10, 100).unwrap();
        assert_eq!(first, 0);
        assert_eq!(state.elixir[0], 200);

        // Two seconds later both seats regained two elixir.
        let second = state.deploy_troop("bob", &card(ARROWS), 10, 10, 102).unwrap();
        assert_eq!(second, 101);
        assert_eq!(state.elixir, vec![400, 400]);
        assert_eq!(state.tick_count, 2);
        assert_eq!(state.entities[1].owner_idx, 1);
        assert_eq!(state.entities[1].state, EntityState::Moving);
    }

    #[test]
    fn test_deploy_rejections() {
        let mut state = active();
        assert_eq!(
            state.deploy_troop("mallory", &card(GIANT), 0, 0, 100),
            Err(LedgerError::NotAPlayer)
        );
        state.deploy_troop("alice", &card(GIANT), 0, 0, 100).unwrap();
        assert_eq!(
            state.deploy_troop("alice", &card(GIANT), 0, 0, 100),
            Err(LedgerError::NotEnoughElixir {
                required: 500,
                available: 0
            })
        );
    }

    #[test]
    fn test_elixir_regen_caps() {
        let mut state = active();
        state.deploy_troop("alice", &card(ARROWS), 0, 0, 1_000).unwrap();
        assert_eq!(state.elixir, vec![700, 1000]);
    }

    #[test]
    fn test_far_future_timestamp_fills_elixir() {
        let mut state = active();
        state.deploy_troop("alice", &card(ARROWS), 0, 0, i64::MAX).unwrap();
        assert_eq!(state.elixir, vec![700, 1000]);
        assert_eq!(state.last_update_time, i64::MAX);
    }

    #[test]
    fn test_entity_cap() {
        let mut state = active();
        for _ in 0..LEDGER_MAX_ENTITIES {
            state.elixir[0] = LEDGER_MAX_ELIXIR;
            state.deploy_troop("alice", &card(ARROWS), 0, 0, 100).unwrap();
        }
        state.elixir[0] = LEDGER_MAX_ELIXIR;
        assert_eq!(
            state.deploy_troop("alice", &card(ARROWS), 0, 0, 100),
            Err(LedgerError::TooManyEntities)
        );
    }

    #[test]
    fn test_princess_then_king() {
        let mut state = active();
        state.apply_tower_damage(1, 9_999).unwrap();
        assert_eq!(state.towers_destroyed, [0, 1]);
        assert_eq!(state.damage_dealt, [0, 2500]);
        assert_eq!(state.winner, None);

        state.apply_tower_damage(3, 4000).unwrap();
        assert_eq!(state.winner, Some(0));
        assert_eq!(state.status, BattleStatus::Completed);
        assert_eq!(state.towers[3].health, 0);
        assert_eq!(
            state.deploy_troop("alice", &card(ARROWS), 0, 0, 100),
            Err(LedgerError::GameNotActive)
        );
        assert_eq!(state.apply_tower_damage(6, 1), Err(LedgerError::InvalidTower(6)));
    }

    #[test]
    fn test_end_game_draw_marker() {
        let mut state = active();
        state.end_game("bob", DRAW_MARKER).unwrap();
        assert_eq!(state.winner, None);
        assert_eq!(state.status, BattleStatus::Completed);
        assert_eq!(state.end_game("bob", 0), Err(LedgerError::GameNotActive));

        let mut state = active();
        assert_eq!(state.end_game("eve", 1), Err(LedgerError::NotAPlayer));
        state.end_game("alice", 1).unwrap();
        assert_eq!(state.winner, Some(1));
    }

    #[test]
    fn test_projection_matches_untouched_ledger() {
        let mut sim = Simulation::new(MatchConfig::default(), CardCatalog::standard()).unwrap();
        sim.start();
        sim.deploy_card(GIANT, Vec2Fixed::from_px(143, 700), 0)
            .unwrap();

        let players = vec![Some("alice".to_string()), Some("bob".to_string())];
        let predicted = BattleState::from_simulation(&sim, 7, players);
        assert_eq!(predicted.status, BattleStatus::Active);
        assert_eq!(predicted.elixir, vec![0, 500]);
        assert_eq!(predicted.entities.len(), 1);
        assert_eq!(predicted.entities[0].card_id, GIANT);

        let confirmed = active();
        assert!(predicted.divergence(&confirmed).is_empty());
    }

    #[test]
    fn test_divergence_reports_tower_and_winner() {
        let predicted = active();
        let mut confirmed = active();
        confirmed.apply_tower_damage(5, 2500).unwrap();

        let found = predicted.divergence(&confirmed);
        assert!(found.contains(&Divergence::TowerHealth {
            index: 5,
            predicted: 2500,
            confirmed: 0
        }));
        assert!(found.contains(&Divergence::TowersDestroyed {
            side: 0,
            predicted: 0,
            confirmed: 1
        }));
        assert!(!found
            .iter()
            .any(|d| matches!(d, Divergence::Winner { .. })));
    }
}
