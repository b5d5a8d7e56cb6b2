//! Match scheduler.
//!
//! [`Simulation`] owns everything one peer needs to run a battle: the
//! entity set, every player's elixir, crowns, the match clock and the
//! win-condition state machine. Deployments enter through
//! [`Simulation::deploy_card`]; time enters through
//! [`Simulation::update`].
//!
//! # Determinism
//!
//! Frame deltas only feed an accumulator. Logic always advances in whole
//! `logic_tick_ms` steps on logical time (`tick * logic_tick_ms`), so two
//! peers rendering at different frame rates run the same logic ticks and
//! reach the same [`Simulation::state_hash`].
//! - No floating-point math (uses fixed-point via [`Fixed`])
//! - No randomness
//! - Consistent iteration order (sorted entity IDs)
//!
//! # Tick order
//!
//! 1. Elixir accrual
//! 2. Entity updates in ascending id order; strikes land immediately
//! 3. Sweep: fallen towers are reported once, dead troops and spent spells leave
//! 4. Timer check
//!
//! # Example
//!
//! ```
//! use royale_core::cards::GIANT;
//! use royale_core::math::Vec2Fixed;
//! use royale_core::simulation::Simulation;
//!
//! let mut sim = Simulation::default();
//! sim.start();
//!
//! let giant = sim.deploy_card(GIANT, Vec2Fixed::from_px(143, 700), 0).unwrap();
//! assert_eq!(sim.elixir(0), Some(0));
//!
//! sim.update(16, 16);
//! sim.update(66, 50);
//! assert_eq!(sim.tick(), 1);
//! assert!(sim.entity(giant).is_some());
//! ```

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::arena::ArenaLayout;
use crate::cards::{CardCatalog, CardId, CardKind};
use crate::combat::{Candidate, Combatant, UpdateContext};
use crate::components::{Entity, EntityId, EntityKind, EntityState, EntityTag};
use crate::config::{MatchConfig, Tiebreak};
use crate::economy::ElixirPool;
use crate::error::{DeployRejection, GameError, Result};
use crate::events::{EndReason, MatchEvent, MatchOutcome, MatchResult};
use crate::math::{Fixed, Vec2Fixed};

/// Crowns a side can hold.
pub const MAX_CROWNS: u8 = 3;

/// Storage for all entities in the simulation.
///
/// Uses a `HashMap` for O(1) entity lookup by ID, with deterministic
/// iteration via sorted keys when processing ticks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStorage {
    /// Map of entity ID to entity data.
    entities: HashMap<EntityId, Entity>,
    /// Next entity ID to assign.
    next_id: EntityId,
}

impl EntityStorage {
    /// Create empty entity storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert a new entity and return its ID.
    pub fn insert(&mut self, mut entity: Entity) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        entity.id = id;
        self.entities.insert(id, entity);
        id
    }

    /// Insert an entity under the id it already carries, replacing any
    /// entity holding that id. Later inserts are numbered past it.
    pub fn insert_with_id(&mut self, entity: Entity) {
        self.next_id = self.next_id.max(entity.id + 1);
        self.entities.insert(entity.id, entity);
    }

    /// Remove an entity by ID.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Get an entity by ID.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Get the number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get sorted entity IDs for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Entities in ascending id order.
    pub fn sorted(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.sorted_ids()
            .into_iter()
            .filter_map(move |id| self.entities.get(&id))
    }

    /// Iterate mutably over all entities (not in deterministic order).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&EntityId, &mut Entity)> {
        self.entities.iter_mut()
    }
}

/// Lifecycle of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Seats filled, clock not running. Deployments are refused.
    #[default]
    Waiting,
    /// Battle in progress.
    Active,
    /// Terminal.
    Ended,
}

/// Render-ready view of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity id.
    pub id: EntityId,
    /// Owning player.
    pub owner: u8,
    /// Side.
    pub side: u8,
    /// Variant tag.
    pub tag: EntityTag,
    /// Card for troops and spells.
    pub card: Option<CardId>,
    /// Whether this is a king tower.
    pub is_king: bool,
    /// Centre, whole pixels.
    pub x: i32,
    /// Centre, whole pixels.
    pub y: i32,
    /// Current health.
    pub health: u32,
    /// Maximum health.
    pub max_health: u32,
    /// Behaviour state.
    pub state: EntityState,
    /// Engaged enemy.
    pub target: Option<EntityId>,
    /// Tower shooting animation flag.
    pub is_shooting: bool,
}

impl From<&Entity> for EntitySnapshot {
    fn from(entity: &Entity) -> Self {
        let (x, y) = entity.position.to_px();
        Self {
            id: entity.id,
            owner: entity.owner,
            side: entity.side,
            tag: entity.tag(),
            card: entity.card(),
            is_king: entity.is_king(),
            x,
            y,
            health: entity.health.current,
            max_health: entity.health.max,
            state: entity.state,
            target: entity.target,
            is_shooting: entity.is_shooting(),
        }
    }
}

/// Authoritative picture of a battle taken by the host seat.
///
/// Guests apply it with [`Simulation::apply_host_sync`] to pull drifted
/// troops and towers back in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSync {
    /// Host logic tick the picture was taken at.
    pub tick: u64,
    /// Towers and troops in id order. Spells are left out.
    pub units: Vec<EntitySnapshot>,
    /// Crowns per side.
    pub crowns: [u8; 2],
    /// Result once the host's match ended.
    pub result: Option<MatchResult>,
}

/// Where a deploy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intake {
    /// Played on this peer; fully checked.
    Local,
    /// Relayed from the peer that played it.
    Mirror,
}

/// The battle scheduler for one peer.
///
/// See the [module documentation](self) for the tick order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    config: MatchConfig,
    catalog: CardCatalog,
    layout: ArenaLayout,
    /// Logic ticks run so far.
    tick: u64,
    /// Frame time not yet consumed by a logic tick.
    accumulator_ms: u64,
    /// Wall-clock stamp of the last `update` call.
    last_update_ms: u64,
    phase: MatchPhase,
    result: Option<MatchResult>,
    entities: EntityStorage,
    elixir: Vec<ElixirPool>,
    crowns: [u8; 2],
    /// Server countdown, display only.
    advisory_remaining_ms: Option<u64>,
    #[serde(skip)]
    events: Vec<MatchEvent>,
}

impl Simulation {
    /// Create a match with the default arena.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if the config is unusable.
    pub fn new(config: MatchConfig, catalog: CardCatalog) -> Result<Self> {
        Self::with_layout(config, catalog, ArenaLayout::default())
    }

    /// Create a match on a specific arena layout.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] if the config is unusable.
    pub fn with_layout(
        config: MatchConfig,
        catalog: CardCatalog,
        layout: ArenaLayout,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, catalog, layout))
    }

    fn build(config: MatchConfig, catalog: CardCatalog, layout: ArenaLayout) -> Self {
        let elixir = (0..config.format.player_count())
            .map(|_| {
                ElixirPool::new(
                    config.starting_elixir,
                    config.max_elixir,
                    config.elixir_regen_ms,
                )
                .with_infinite(config.debug.infinite_elixir)
            })
            .collect();

        let mut entities = EntityStorage::new();
        for side in 0..2 {
            let owner = config.format.first_player_of(side);
            for slot in layout.tower_slots(side) {
                entities.insert(Entity::tower(0, owner, &slot, &layout));
            }
        }

        Self {
            config,
            catalog,
            layout,
            tick: 0,
            accumulator_ms: 0,
            last_update_ms: 0,
            phase: MatchPhase::Waiting,
            result: None,
            entities,
            elixir,
            crowns: [0, 0],
            advisory_remaining_ms: None,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the battle clock. Only the first call has an effect.
    pub fn start(&mut self) {
        if self.phase != MatchPhase::Waiting {
            return;
        }
        self.phase = MatchPhase::Active;
        info!(format = ?self.config.format, "battle started");
        self.events.push(MatchEvent::BattleStarted);
        for player in 0..self.config.format.player_count() {
            let elixir = self.elixir[usize::from(player)].whole();
            self.events.push(MatchEvent::ElixirUpdate { player, elixir });
        }
    }

    /// Deploy a card for `owner` at `position`.
    ///
    /// Returns the id of the first entity spawned. Multi-troop cards spawn
    /// their troops side by side around `position`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeployRejection`] and leaves all state untouched when the
    /// match is not running, the owner or card is unknown, the position is
    /// illegal, the arena is full or the owner cannot afford the card.
    pub fn deploy_card(
        &mut self,
        card_id: CardId,
        position: Vec2Fixed,
        owner: u8,
    ) -> std::result::Result<EntityId, DeployRejection> {
        self.admit(card_id, position, owner, Intake::Local)
    }

    /// Apply a deploy another peer already accepted.
    ///
    /// The elixir gate is skipped: the cost is debited with a floor at zero
    /// so a prediction running slightly behind the sender still spawns the
    /// same troops. Placement only has to lie inside the arena.
    ///
    /// # Errors
    ///
    /// Returns a [`DeployRejection`] and leaves all state untouched when the
    /// match is not running, the owner or card is unknown, the position is
    /// outside the arena or the arena is full.
    pub fn mirror_card(
        &mut self,
        card_id: CardId,
        position: Vec2Fixed,
        owner: u8,
    ) -> std::result::Result<EntityId, DeployRejection> {
        self.admit(card_id, position, owner, Intake::Mirror)
    }

    fn admit(
        &mut self,
        card_id: CardId,
        position: Vec2Fixed,
        owner: u8,
        intake: Intake,
    ) -> std::result::Result<EntityId, DeployRejection> {
        match self.phase {
            MatchPhase::Waiting => return Err(DeployRejection::MatchNotStarted),
            MatchPhase::Ended => return Err(DeployRejection::MatchEnded),
            MatchPhase::Active => {}
        }
        if owner >= self.config.format.player_count() {
            return Err(DeployRejection::InvalidOwner(owner));
        }
        let card = self
            .catalog
            .get(card_id)
            .cloned()
            .ok_or(DeployRejection::UnknownCard(card_id))?;
        let side = self.config.format.side_of(owner);

        let legal = if card.is_spell()
            || self.config.debug.free_placement
            || intake == Intake::Mirror
        {
            self.layout.contains(position)
        } else {
            self.layout.is_on_half(side, position)
        };
        if !legal {
            return Err(DeployRejection::InvalidPlacement);
        }

        let spawn_count = match &card.kind {
            CardKind::Troop(stats) => usize::from(stats.count.max(1)),
            CardKind::Spell(_) => 1,
        };
        if self.deployed_count() + spawn_count > self.config.max_entities {
            return Err(DeployRejection::EntityLimit);
        }

        let pool = &mut self.elixir[usize::from(owner)];
        match intake {
            Intake::Local => pool.try_spend(card.cost)?,
            Intake::Mirror => pool.spend_saturating(card.cost),
        }

        let first = match &card.kind {
            CardKind::Troop(stats) => {
                let mut first = None;
                for position in self.spawn_positions(position, stats.radius_px, stats.count) {
                    let troop =
                        Entity::troop(0, owner, side, card.id, stats, position, &self.layout);
                    let id = self.entities.insert(troop);
                    first.get_or_insert(id);
                }
                first.unwrap_or_default()
            }
            CardKind::Spell(stats) => {
                let spell = Entity::spell(0, owner, side, card.id, stats, position, &self.layout);
                self.entities.insert(spell)
            }
        };

        debug!(
            tick = self.tick,
            owner,
            card = card.id,
            entity = first,
            ?intake,
            "card deployed"
        );
        self.events.push(MatchEvent::CardPlayed {
            player: owner,
            card: card.id,
            entity: first,
        });
        let elixir = self.elixir[usize::from(owner)].whole();
        self.events.push(MatchEvent::ElixirUpdate {
            player: owner,
            elixir,
        });
        Ok(first)
    }

    /// Feed a frame into the clock and run every logic tick it completes.
    ///
    /// `now_ms` is only recorded; logic runs on `delta_ms` through the
    /// accumulator. Returns the number of logic ticks run.
    pub fn update(&mut self, now_ms: u64, delta_ms: u64) -> u32 {
        self.last_update_ms = now_ms;
        if self.phase != MatchPhase::Active {
            return 0;
        }
        self.accumulator_ms = self.accumulator_ms.saturating_add(delta_ms);
        let step = u64::from(self.config.logic_tick_ms);
        let mut ran = 0;
        while self.accumulator_ms >= step && self.phase == MatchPhase::Active {
            self.accumulator_ms -= step;
            self.step();
            ran += 1;
        }
        ran
    }

    /// Run exactly one logic tick.
    pub fn step(&mut self) {
        if self.phase != MatchPhase::Active {
            return;
        }
        self.tick += 1;
        let now_ms = self.now_ms();

        self.accrue_elixir();
        self.run_entities(now_ms);
        self.sweep();
        if self.phase == MatchPhase::Active && now_ms >= self.config.match_duration_ms {
            let outcome = self.timer_outcome();
            self.end(outcome, EndReason::Timer);
        }

        trace!(tick = self.tick, hash = self.state_hash(), "logic tick");
    }

    /// Credit the side opposing `side` with a crown and end the match if the
    /// king fell.
    pub fn on_tower_destroyed(&mut self, is_king: bool, side: u8) {
        let attacker = u8::from(side == 0);
        let crowns = &mut self.crowns[usize::from(attacker)];
        *crowns = (*crowns + 1).min(MAX_CROWNS);
        info!(side, is_king, crowns = ?self.crowns, "tower destroyed");
        self.events.push(MatchEvent::CrownUpdate {
            crowns: self.crowns,
        });
        if is_king {
            self.end(MatchOutcome::Winner(attacker), EndReason::KingDestroyed);
        }
    }

    /// End the match now, scored as if the clock ran out.
    pub fn force_end(&mut self) {
        let outcome = self.timer_outcome();
        self.end(outcome, EndReason::Timer);
    }

    /// End the match with the other side as winner.
    pub fn concede(&mut self, side: u8) {
        let winner = u8::from(side == 0);
        self.end(MatchOutcome::Winner(winner), EndReason::Conceded);
    }

    fn end(&mut self, outcome: MatchOutcome, reason: EndReason) {
        if self.phase == MatchPhase::Ended {
            return;
        }
        self.phase = MatchPhase::Ended;
        self.result = Some(MatchResult { outcome, reason });
        for (_, entity) in self.entities.iter_mut() {
            if entity.is_alive() {
                entity.state = EntityState::Idle;
                entity.target = None;
            }
        }
        info!(tick = self.tick, ?outcome, ?reason, "match ended");
        self.events.push(MatchEvent::GameEnd { outcome, reason });
    }

    fn timer_outcome(&self) -> MatchOutcome {
        let by_crowns = self.crowns[0].cmp(&self.crowns[1]);
        let ordering = match (by_crowns, self.config.tiebreak) {
            (Ordering::Equal, Tiebreak::TowerHealth) => {
                self.tower_health(0).cmp(&self.tower_health(1))
            }
            (ordering, _) => ordering,
        };
        match ordering {
            Ordering::Greater => MatchOutcome::Winner(0),
            Ordering::Less => MatchOutcome::Winner(1),
            Ordering::Equal => MatchOutcome::Draw,
        }
    }

    // ------------------------------------------------------------------
    // Tick internals
    // ------------------------------------------------------------------

    fn accrue_elixir(&mut self) {
        let delta = u64::from(self.config.logic_tick_ms);
        for player in 0..self.config.format.player_count() {
            let pool = &mut self.elixir[usize::from(player)];
            if pool.accrue(delta) {
                let elixir = pool.whole();
                self.events.push(MatchEvent::ElixirUpdate { player, elixir });
            }
        }
    }

    fn run_entities(&mut self, now_ms: u64) {
        let ids = self.entities.sorted_ids();
        let mut candidates: Vec<Candidate> = ids
            .iter()
            .filter_map(|id| self.entities.get(*id))
            .filter_map(Candidate::of)
            .collect();
        let ctx = UpdateContext {
            now_ms,
            delta_ms: self.config.logic_tick_ms,
            layout: &self.layout,
        };

        for id in ids {
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            let effects = entity.update(&ctx, &candidates);

            for strike in effects.strikes {
                let Some(target) = self.entities.get_mut(strike.target) else {
                    continue;
                };
                target.take_damage(strike.damage);
                let remaining = target.health.current;
                if let Some(candidate) = candidates.iter_mut().find(|c| c.id == strike.target) {
                    candidate.health = remaining;
                }
            }
        }
    }

    fn sweep(&mut self) {
        let mut fallen_towers = Vec::new();
        let mut departed = Vec::new();

        for id in self.entities.sorted_ids() {
            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            if entity.is_alive() {
                continue;
            }
            entity.state = EntityState::Dead;
            entity.target = None;
            match &mut entity.kind {
                EntityKind::Building(tower) => {
                    if !tower.destroyed {
                        tower.destroyed = true;
                        tower.shooting.active = false;
                        fallen_towers.push((id, entity.side, tower.is_king));
                    }
                }
                EntityKind::Unit(_) => departed.push((id, true)),
                EntityKind::Spell(_) => departed.push((id, false)),
            }
        }

        for (id, was_troop) in departed {
            self.entities.remove(id);
            if was_troop {
                self.events.push(MatchEvent::UnitDied { entity: id });
            }
        }
        for (tower, side, is_king) in fallen_towers {
            self.events.push(MatchEvent::TowerDestroyed {
                tower,
                side,
                is_king,
            });
            self.on_tower_destroyed(is_king, side);
        }
    }

    fn deployed_count(&self) -> usize {
        self.entities
            .sorted()
            .filter(|entity| !entity.is_building())
            .count()
    }

    fn spawn_positions(&self, centre: Vec2Fixed, radius_px: u32, count: u8) -> Vec<Vec2Fixed> {
        let count = i32::from(count.max(1));
        let spacing = self.layout.scale_px(radius_px);
        let max_x = self.layout.width() - Fixed::from_num(1);
        (0..count)
            .map(|i| {
                let offset = Fixed::from_num(2 * i - (count - 1)) * spacing;
                let x = (centre.x + offset).clamp(Fixed::ZERO, max_x);
                Vec2Fixed::new(x, centre.y)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Logic ticks run so far.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Logical match time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.tick * u64::from(self.config.logic_tick_ms)
    }

    /// Logical time left on the match clock.
    #[must_use]
    pub fn remaining_ms(&self) -> u64 {
        self.config.match_duration_ms.saturating_sub(self.now_ms())
    }

    /// Wall-clock stamp passed to the last [`update`](Self::update).
    #[must_use]
    pub const fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Final result once the match has ended.
    #[must_use]
    pub const fn result(&self) -> Option<MatchResult> {
        self.result
    }

    /// Whole elixir held by `player`.
    #[must_use]
    pub fn elixir(&self, player: u8) -> Option<u32> {
        self.elixir.get(usize::from(player)).map(ElixirPool::whole)
    }

    /// Elixir pool of `player`.
    #[must_use]
    pub fn elixir_pool(&self, player: u8) -> Option<&ElixirPool> {
        self.elixir.get(usize::from(player))
    }

    /// Crowns per side.
    #[must_use]
    pub const fn crowns(&self) -> [u8; 2] {
        self.crowns
    }

    /// Get a reference to the entity storage.
    #[must_use]
    pub fn entities(&self) -> &EntityStorage {
        &self.entities
    }

    /// Look up one entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Towers of `side`, king first.
    #[must_use]
    pub fn towers(&self, side: u8) -> Vec<&Entity> {
        self.entities
            .sorted()
            .filter(|entity| entity.is_building() && entity.side == side)
            .collect()
    }

    /// Combined remaining tower health of `side`.
    #[must_use]
    pub fn tower_health(&self, side: u8) -> u32 {
        self.towers(side)
            .iter()
            .map(|tower| tower.health.current)
            .sum()
    }

    /// Render-ready view of every entity in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EntitySnapshot> {
        self.entities.sorted().map(EntitySnapshot::from).collect()
    }

    /// Take every event queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.events)
    }

    /// Match configuration.
    #[must_use]
    pub const fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Card catalog.
    #[must_use]
    pub const fn catalog(&self) -> &CardCatalog {
        &self.catalog
    }

    /// Arena layout.
    #[must_use]
    pub const fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    /// Towers, troops, crowns and result as the host would send them.
    #[must_use]
    pub fn host_sync(&self) -> HostSync {
        HostSync {
            tick: self.tick,
            units: self
                .entities
                .sorted()
                .filter(|entity| entity.tag() != EntityTag::Spell)
                .map(EntitySnapshot::from)
                .collect(),
            crowns: self.crowns,
            result: self.result,
        }
    }

    /// Overwrite local state with the host's picture.
    ///
    /// Troops and towers are matched by id. A listed troop that is missing
    /// locally, or that holds a different card or owner, is rebuilt from
    /// the snapshot. A local troop the host no longer lists is removed when
    /// its id is not newer than every id the host listed; newer troops are
    /// deploys the host has not seen yet. Crowns are copied and a host
    /// result ends the local match. Ignored before the battle starts.
    ///
    /// Returns the number of entities overwritten or rebuilt.
    pub fn apply_host_sync(&mut self, sync: &HostSync) -> usize {
        if self.phase == MatchPhase::Waiting {
            return 0;
        }

        let mut applied = 0;
        for unit in &sync.units {
            let synced = match unit.tag {
                EntityTag::Building => self.sync_tower(unit),
                EntityTag::Unit => self.sync_troop(unit),
                EntityTag::Spell => false,
            };
            applied += usize::from(synced);
        }

        let listed: HashSet<EntityId> = sync.units.iter().map(|unit| unit.id).collect();
        let newest = listed.iter().copied().max().unwrap_or_default();
        let stale: Vec<EntityId> = self
            .entities
            .sorted()
            .filter(|entity| entity.tag() == EntityTag::Unit)
            .filter(|entity| entity.id <= newest && !listed.contains(&entity.id))
            .map(|entity| entity.id)
            .collect();
        for id in stale {
            self.entities.remove(id);
            self.events.push(MatchEvent::UnitDied { entity: id });
        }

        if sync.crowns != self.crowns {
            self.crowns = sync.crowns;
            self.events.push(MatchEvent::CrownUpdate {
                crowns: self.crowns,
            });
        }
        if let Some(result) = sync.result {
            self.end(result.outcome, result.reason);
        }

        debug!(
            tick = self.tick,
            host_tick = sync.tick,
            applied,
            "host sync applied"
        );
        applied
    }

    fn sync_tower(&mut self, unit: &EntitySnapshot) -> bool {
        let Some(entity) = self.entities.get_mut(unit.id) else {
            return false;
        };
        let EntityKind::Building(tower) = &mut entity.kind else {
            return false;
        };
        entity.health.current = unit.health.min(entity.health.max);
        if entity.health.current == 0 && !tower.destroyed {
            tower.destroyed = true;
            tower.shooting.active = false;
            entity.state = EntityState::Dead;
            entity.target = None;
            let (tower, side, is_king) = (entity.id, entity.side, tower.is_king);
            self.events.push(MatchEvent::TowerDestroyed {
                tower,
                side,
                is_king,
            });
        }
        true
    }

    fn sync_troop(&mut self, unit: &EntitySnapshot) -> bool {
        let position = Vec2Fixed::from_px(unit.x, unit.y);
        if let Some(entity) = self.entities.get_mut(unit.id) {
            if entity.tag() == EntityTag::Unit
                && entity.card() == unit.card
                && entity.owner == unit.owner
            {
                entity.position = position;
                entity.health.current = unit.health.min(entity.health.max);
                entity.state = unit.state;
                entity.target = unit.target;
                return true;
            }
        }

        let Some(card) = unit.card.and_then(|card| self.catalog.get(card)) else {
            return false;
        };
        let CardKind::Troop(stats) = &card.kind else {
            return false;
        };
        let mut troop = Entity::troop(
            unit.id,
            unit.owner,
            unit.side,
            card.id,
            stats,
            position,
            &self.layout,
        );
        troop.health.current = unit.health.min(troop.health.max);
        troop.state = unit.state;
        troop.target = unit.target;
        self.entities.insert_with_id(troop);
        true
    }

    /// Record the server countdown. Never touches the match clock.
    pub fn set_advisory_remaining(&mut self, remaining_ms: u64) {
        self.advisory_remaining_ms = Some(remaining_ms);
    }

    /// Last server countdown received, for the HUD.
    #[must_use]
    pub const fn advisory_remaining_ms(&self) -> Option<u64> {
        self.advisory_remaining_ms
    }

    /// Calculate a hash of the current simulation state.
    ///
    /// Used for desync detection between peers. Two simulations with
    /// identical state produce identical hashes. The frame accumulator and
    /// the advisory countdown are excluded; they legitimately differ
    /// between peers.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);
        self.phase.hash(&mut hasher);
        self.result.hash(&mut hasher);
        self.crowns.hash(&mut hasher);
        self.elixir.hash(&mut hasher);

        let ids = self.entities.sorted_ids();
        ids.len().hash(&mut hasher);
        for id in ids {
            if let Some(entity) = self.entities.get(id) {
                entity.hash(&mut hasher);
            }
        }

        hasher.finish()
    }

    /// Serialize the simulation state for rejoin reseeding or replays.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize simulation: {e}")))
    }

    /// Deserialize simulation state from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| {
            GameError::InvalidState(format!("Failed to deserialize simulation: {e}"))
        })
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::build(
            MatchConfig::default(),
            CardCatalog::standard(),
            ArenaLayout::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{ARCHERS, ARROWS, GIANT};
    use crate::config::{DebugOverrides, MatchFormat};

    fn started(config: MatchConfig) -> Simulation {
        let mut sim = Simulation::new(config, CardCatalog::standard()).unwrap();
        sim.start();
        sim.drain_events();
        sim
    }

    fn sandbox() -> Simulation {
        started(MatchConfig {
            debug: DebugOverrides {
                infinite_elixir: true,
                free_placement: true,
            },
            ..MatchConfig::default()
        })
    }

    fn south_deploy() -> Vec2Fixed {
        Vec2Fixed::from_px(143, 700)
    }

    #[test]
    fn test_new_match_has_six_towers() {
        let sim = Simulation::default();
        assert_eq!(sim.phase(), MatchPhase::Waiting);
        assert_eq!(sim.entities().len(), 6);
        assert_eq!(sim.towers(0).len(), 3);
        assert_eq!(sim.tower_health(1), 4000 + 2500 + 2500);
        assert!(sim.towers(0)[0].is_king());
    }

    #[test]
    fn test_deploy_before_start_is_rejected() {
        let mut sim = Simulation::default();
        assert_eq!(
            sim.deploy_card(GIANT, south_deploy(), 0),
            Err(DeployRejection::MatchNotStarted)
        );
    }

    #[test]
    fn test_deploy_debits_and_spawns() {
        let mut sim = started(MatchConfig::default());
        let id = sim.deploy_card(GIANT, south_deploy(), 0).unwrap();

        assert_eq!(sim.elixir(0), Some(0));
        assert_eq!(sim.entities().len(), 7);
        assert_eq!(sim.entity(id).and_then(Entity::card), Some(GIANT));
        let events = sim.drain_events();
        assert!(events.contains(&MatchEvent::CardPlayed {
            player: 0,
            card: GIANT,
            entity: id
        }));
    }

    #[test]
    fn test_rejections_leave_state_unchanged() {
        let mut sim = started(MatchConfig::default());
        let before = sim.state_hash();

        assert_eq!(
            sim.deploy_card(GIANT, Vec2Fixed::from_px(143, 200), 0),
            Err(DeployRejection::InvalidPlacement)
        );
        assert_eq!(
            sim.deploy_card(42, south_deploy(), 0),
            Err(DeployRejection::UnknownCard(42))
        );
        assert_eq!(
            sim.deploy_card(GIANT, south_deploy(), 2),
            Err(DeployRejection::InvalidOwner(2))
        );
        assert_eq!(sim.state_hash(), before);
        assert!(sim.drain_events().is_empty());
    }

    #[test]
    fn test_spells_ignore_half_rule() {
        let mut sim = started(MatchConfig::default());
        assert!(sim
            .deploy_card(ARROWS, Vec2Fixed::from_px(143, 200), 0)
            .is_ok());
    }

    #[test]
    fn test_mirror_skips_elixir_gate_and_floors_pool() {
        let mut sim = started(MatchConfig::default());
        let north = Vec2Fixed::from_px(143, 290);
        sim.mirror_card(GIANT, north, 1).unwrap();
        assert_eq!(sim.elixir(1), Some(0));

        let second = sim.mirror_card(GIANT, north, 1).unwrap();
        assert_eq!(sim.elixir(1), Some(0));
        assert_eq!(sim.entity(second).and_then(Entity::card), Some(GIANT));
        assert_eq!(
            sim.deploy_card(GIANT, north, 1),
            Err(DeployRejection::InsufficientElixir {
                required: 5,
                available: 0
            })
        );
    }

    #[test]
    fn test_mirror_keeps_structural_checks() {
        let mut waiting = Simulation::default();
        assert_eq!(
            waiting.mirror_card(GIANT, south_deploy(), 0),
            Err(DeployRejection::MatchNotStarted)
        );

        let mut sim = started(MatchConfig::default());
        let before = sim.state_hash();
        assert_eq!(
            sim.mirror_card(GIANT, Vec2Fixed::from_px(2000, 2000), 1),
            Err(DeployRejection::InvalidPlacement)
        );
        assert_eq!(
            sim.mirror_card(42, south_deploy(), 1),
            Err(DeployRejection::UnknownCard(42))
        );
        assert_eq!(
            sim.mirror_card(GIANT, south_deploy(), 5),
            Err(DeployRejection::InvalidOwner(5))
        );
        assert_eq!(sim.state_hash(), before);

        sim.concede(0);
        assert_eq!(
            sim.mirror_card(GIANT, south_deploy(), 1),
            Err(DeployRejection::MatchEnded)
        );
    }

    #[test]
    fn test_archers_spawn_in_pairs() {
        let mut sim = started(MatchConfig::default());
        let first = sim.deploy_card(ARCHERS, south_deploy(), 0).unwrap();
        let a = sim.entity(first).unwrap().position;
        let b = sim.entity(first + 1).unwrap().position;
        assert_eq!(a.y, b.y);
        assert_eq!(b.x - a.x, Fixed::from_num(40));
    }

    #[test]
    fn test_entity_limit() {
        let mut sim = started(MatchConfig {
            max_entities: 1,
            debug: DebugOverrides {
                infinite_elixir: true,
                free_placement: false,
            },
            ..MatchConfig::default()
        });
        sim.deploy_card(GIANT, south_deploy(), 0).unwrap();
        assert_eq!(
            sim.deploy_card(GIANT, south_deploy(), 0),
            Err(DeployRejection::EntityLimit)
        );
    }

    #[test]
    fn test_accumulator_runs_whole_ticks() {
        let mut sim = started(MatchConfig::default());
        assert_eq!(sim.update(16, 16), 0);
        assert_eq!(sim.update(32, 16), 0);
        assert_eq!(sim.update(48, 16), 0);
        assert_eq!(sim.update(64, 16), 1);
        assert_eq!(sim.update(214, 150), 3);
        assert_eq!(sim.tick(), 4);
        assert_eq!(sim.now_ms(), 200);
        assert_eq!(sim.last_update_ms(), 214);
    }

    #[test]
    fn test_elixir_regenerates_over_ticks() {
        let mut sim = started(MatchConfig::default());
        sim.update(2800, 2800);
        assert_eq!(sim.elixir(0), Some(6));
        assert_eq!(sim.elixir(1), Some(6));
        assert!(sim
            .drain_events()
            .contains(&MatchEvent::ElixirUpdate { player: 0, elixir: 6 }));
    }

    #[test]
    fn test_king_destruction_ends_match_once() {
        let mut sim = sandbox();
        let king = sim.towers(1)[0].id;
        if let Some(tower) = sim.entities.get_mut(king) {
            tower.take_damage(10_000);
        }

        sim.step();
        sim.step();
        sim.step();

        assert_eq!(sim.phase(), MatchPhase::Ended);
        assert_eq!(
            sim.result(),
            Some(MatchResult {
                outcome: MatchOutcome::Winner(0),
                reason: EndReason::KingDestroyed
            })
        );
        let events = sim.drain_events();
        let destroyed = events
            .iter()
            .filter(|e| matches!(e, MatchEvent::TowerDestroyed { .. }))
            .count();
        assert_eq!(destroyed, 1);
        assert_eq!(sim.crowns(), [1, 0]);
        assert_eq!(
            sim.deploy_card(GIANT, south_deploy(), 0),
            Err(DeployRejection::MatchEnded)
        );
    }

    #[test]
    fn test_timer_expiry_uses_crowns_then_tiebreak() {
        let mut sim = started(MatchConfig {
            match_duration_ms: 1000,
            ..MatchConfig::default()
        });
        sim.update(1000, 1000);
        assert_eq!(
            sim.result().map(|r| r.outcome),
            Some(MatchOutcome::Draw)
        );

        let mut sim = started(MatchConfig {
            match_duration_ms: 1000,
            tiebreak: Tiebreak::TowerHealth,
            ..MatchConfig::default()
        });
        let princess = sim.towers(0)[1].id;
        if let Some(tower) = sim.entities.get_mut(princess) {
            tower.take_damage(100);
        }
        sim.update(1000, 1000);
        assert_eq!(
            sim.result(),
            Some(MatchResult {
                outcome: MatchOutcome::Winner(1),
                reason: EndReason::Timer
            })
        );
    }

    #[test]
    fn test_concede_awards_other_side() {
        let mut sim = started(MatchConfig::default());
        sim.concede(1);
        assert_eq!(
            sim.result().map(|r| r.outcome),
            Some(MatchOutcome::Winner(0))
        );
        sim.force_end();
        assert_eq!(sim.result().map(|r| r.reason), Some(EndReason::Conceded));
    }

    #[test]
    fn test_end_freezes_troops() {
        let mut sim = started(MatchConfig::default());
        let giant = sim.deploy_card(GIANT, south_deploy(), 0).unwrap();
        sim.step();
        assert_eq!(sim.entity(giant).map(|e| e.state), Some(EntityState::Moving));

        sim.force_end();
        let before = sim.entity(giant).map(|e| e.position);
        sim.update(5000, 5000);
        assert_eq!(sim.entity(giant).map(|e| e.state), Some(EntityState::Idle));
        assert_eq!(sim.entity(giant).map(|e| e.position), before);
    }

    #[test]
    fn test_two_vs_two_seats_four_pools() {
        let mut sim = started(MatchConfig::for_format(MatchFormat::TwoVsTwo));
        assert_eq!(sim.elixir(3), Some(5));
        assert_eq!(sim.towers(1)[0].owner, 2);

        let id = sim
            .deploy_card(GIANT, Vec2Fixed::from_px(143, 200), 3)
            .unwrap();
        assert_eq!(sim.entity(id).map(|e| e.side), Some(1));
        assert_eq!(sim.elixir(3), Some(0));
        assert_eq!(sim.elixir(2), Some(5));
    }

    #[test]
    fn test_deterministic_hash() {
        let mut a = started(MatchConfig::default());
        let mut b = started(MatchConfig::default());
        a.deploy_card(GIANT, south_deploy(), 0).unwrap();
        b.deploy_card(GIANT, south_deploy(), 0).unwrap();

        // Different frame pacing, same logical time.
        for _ in 0..60 {
            a.update(0, 50);
        }
        for _ in 0..100 {
            b.update(0, 30);
        }
        assert_eq!(a.tick(), b.tick());
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut sim = started(MatchConfig::default());
        sim.deploy_card(GIANT, south_deploy(), 0).unwrap();
        sim.update(500, 500);

        let bytes = sim.serialize().unwrap();
        let restored = Simulation::deserialize(&bytes).unwrap();

        assert_eq!(sim.tick(), restored.tick());
        assert_eq!(sim.state_hash(), restored.state_hash());
    }

    #[test]
    fn test_host_sync_pulls_drifted_guest_in_line() {
        let mut host = started(MatchConfig::default());
        let mut guest = started(MatchConfig::default());
        let giant = host.deploy_card(GIANT, south_deploy(), 0).unwrap();
        guest.mirror_card(GIANT, south_deploy(), 0).unwrap();
        for _ in 0..20 {
            host.step();
        }
        for _ in 0..12 {
            guest.step();
        }
        assert_ne!(
            host.entity(giant).map(|e| e.position),
            guest.entity(giant).map(|e| e.position)
        );

        let sync = host.host_sync();
        assert!(sync.units.iter().all(|unit| unit.tag != EntityTag::Spell));
        assert_eq!(guest.apply_host_sync(&sync), 7);

        let host_giant = EntitySnapshot::from(host.entity(giant).unwrap());
        let guest_giant = EntitySnapshot::from(guest.entity(giant).unwrap());
        assert_eq!(host_giant, guest_giant);
        assert_eq!(guest.tower_health(1), host.tower_health(1));
    }

    #[test]
    fn test_host_sync_removes_and_rebuilds_troops() {
        let mut guest = started(MatchConfig::default());
        let giant = guest.deploy_card(GIANT, south_deploy(), 0).unwrap();
        let archer = guest.mirror_card(ARCHERS, Vec2Fixed::from_px(143, 290), 1).unwrap();
        let late = guest.mirror_card(GIANT, Vec2Fixed::from_px(385, 290), 1).unwrap();
        guest.drain_events();

        // The host lost the first archer and has not seen the late Giant.
        let mut sync = guest.host_sync();
        sync.units.retain(|unit| unit.id != archer && unit.id != late);
        let mut rebuilt = EntitySnapshot::from(guest.entity(giant).unwrap());
        rebuilt.id = archer + 1;
        rebuilt.health = 1000;
        sync.units.retain(|unit| unit.id != archer + 1);
        sync.units.push(rebuilt);

        guest.apply_host_sync(&sync);
        assert!(guest.entity(archer).is_none());
        assert!(guest.entity(late).is_some());
        let replaced = guest.entity(archer + 1).unwrap();
        assert_eq!(replaced.card(), Some(GIANT));
        assert_eq!(replaced.owner, 0);
        assert_eq!(replaced.health.current, 1000);
        assert!(guest
            .drain_events()
            .contains(&MatchEvent::UnitDied { entity: archer }));

        let next = guest.mirror_card(ARROWS, south_deploy(), 1).unwrap();
        assert!(next > late);
    }

    #[test]
    fn test_host_sync_copies_towers_crowns_and_result() {
        let mut guest = started(MatchConfig::default());
        let princess = guest.towers(1)[1].id;
        let mut sync = guest.host_sync();
        for unit in &mut sync.units {
            if unit.id == princess {
                unit.health = 0;
            }
        }
        sync.crowns = [1, 0];
        let result = MatchResult {
            outcome: MatchOutcome::Winner(0),
            reason: EndReason::KingDestroyed,
        };
        sync.result = Some(result);

        guest.apply_host_sync(&sync);
        let events = guest.drain_events();
        assert!(events.contains(&MatchEvent::TowerDestroyed {
            tower: princess,
            side: 1,
            is_king: false
        }));
        assert_eq!(guest.crowns(), [1, 0]);
        assert_eq!(guest.phase(), MatchPhase::Ended);
        assert_eq!(guest.result(), Some(result));

        // A destroyed tower is reported once even if the sync repeats.
        guest.apply_host_sync(&sync);
        assert!(!guest
            .drain_events()
            .iter()
            .any(|event| matches!(event, MatchEvent::TowerDestroyed { .. })));
    }

    #[test]
    fn test_host_sync_ignored_before_start() {
        let host = started(MatchConfig::default());
        let mut guest = Simulation::default();
        assert_eq!(guest.apply_host_sync(&host.host_sync()), 0);
        assert_eq!(guest.phase(), MatchPhase::Waiting);
    }

    #[test]
    fn test_snapshot_in_id_order() {
        let sim = Simulation::default();
        let snapshot = sim.snapshot();
        assert_eq!(snapshot.len(), 6);
        assert!(snapshot.windows(2).all(|w| w[0].id < w[1].id));
        assert!(snapshot[0].is_king);
        assert_eq!((snapshot[0].x, snapshot[0].y), (264, 913));
    }
}
