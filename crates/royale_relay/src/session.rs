//! Per-peer match session.
//!
//! A [`MatchSession`] is the scheduler intake for one peer. Local
//! deployments run through the simulation first and only then become an
//! outbound `deploy-troop` message. Relayed deployments are mirrored once
//! per `(owner, seq)` key without the elixir gate; the sender already paid.
//! Relayed deployments that arrive before the local battle start are held
//! and applied when it starts. Events the simulation queues are forwarded to
//! the session's own channel after every call that can produce them.
//!
//! With a ledger attached the session follows the battle account's log
//! stream from battle start until the match ends. Everything applied to the
//! simulation is recorded into a [`Replay`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use royale_core::cards::CardId;
use royale_core::components::EntityId;
use royale_core::error::{DeployRejection, GameError};
use royale_core::events::MatchEvent;
use royale_core::math::Vec2Fixed;
use royale_core::reconcile::{ActionId, LedgerLog, PendingActions, Resolved};
use royale_core::replay::{Replay, ReplayEnding};
use royale_core::simulation::{HostSync, MatchPhase, Simulation};

use crate::error::Result;
use crate::ledger::{LogSource, LogSubscription};
use crate::protocol::{ClientMessage, RelayedDeploy, ServerMessage};

/// Seat whose picture of the battle is authoritative.
pub const HOST_SEAT: u8 = 0;

/// Idempotency key of one relayed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeployKey {
    /// Deploying seat.
    pub owner: u8,
    /// That seat's sequence number.
    pub seq: u64,
}

/// A local deployment that passed intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDeploy {
    /// Message to send to the relay.
    pub message: ClientMessage,
    /// Pending-action id awaiting ledger confirmation.
    pub action: ActionId,
    /// First entity spawned.
    pub entity: EntityId,
}

/// What [`MatchSession::handle_server_message`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The battle clock started.
    Started,
    /// An opponent deployment was mirrored.
    Applied {
        /// First entity spawned.
        entity: EntityId,
    },
    /// An opponent deployment arrived before the battle started and is
    /// held until it does.
    Queued,
    /// The deployment was already mirrored or queued.
    Duplicate,
    /// The local player's own deployment came back.
    OwnEcho,
    /// The local simulation refused the mirrored deployment.
    Rejected(DeployRejection),
    /// The host's picture was applied.
    Synced {
        /// Entities overwritten or rebuilt.
        entities: usize,
    },
    /// Countdown recorded for display.
    Advisory,
    /// The match ended.
    Ended,
    /// The simulation was rebuilt from the relay's deploy log.
    Reseeded {
        /// Deployments replayed.
        deploys: usize,
    },
    /// Nothing for the session to do.
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct HeldDeploy {
    key: DeployKey,
    card_id: CardId,
    x: i32,
    y: i32,
}

#[derive(Default)]
struct LedgerLink {
    source: Option<Arc<dyn LogSource>>,
    stream: Option<LogSubscription>,
}

impl fmt::Debug for LedgerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerLink")
            .field("attached", &self.source.is_some())
            .field("stream", &self.stream)
            .finish()
    }
}

/// One peer's view of a match.
#[derive(Debug)]
pub struct MatchSession {
    sim: Simulation,
    game_id: u64,
    local_player: u8,
    next_seq: u64,
    seen: HashSet<DeployKey>,
    held: Vec<HeldDeploy>,
    pending: PendingActions,
    replay: Replay,
    finished: bool,
    ledger: LedgerLink,
    events: mpsc::UnboundedSender<MatchEvent>,
}

impl MatchSession {
    /// Wrap a simulation for the seat `local_player` of room `game_id`.
    ///
    /// Returns the session and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Game`](crate::error::RelayError::Game) if the
    /// starting state cannot be captured for the replay.
    pub fn new(
        sim: Simulation,
        game_id: u64,
        local_player: u8,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MatchEvent>)> {
        let replay = Replay::new(&sim)?;
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            sim,
            game_id,
            local_player,
            next_seq: 0,
            seen: HashSet::new(),
            held: Vec::new(),
            pending: PendingActions::new(local_player),
            replay,
            finished: false,
            ledger: LedgerLink::default(),
            events,
        };
        Ok((session, receiver))
    }

    /// Follow the battle account's logs on `source` while the battle runs.
    #[must_use]
    pub fn with_ledger(mut self, source: Arc<dyn LogSource>) -> Self {
        self.ledger.source = Some(source);
        self
    }

    /// Deploy for the local player and build the message that mirrors it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Game`](crate::error::RelayError::Game) with the
    /// rejection if intake refuses; nothing is sent or recorded then.
    pub fn deploy_local(&mut self, card_id: CardId, x: i32, y: i32) -> Result<LocalDeploy> {
        let position = Vec2Fixed::from_px(x, y);
        let entity = self
            .sim
            .deploy_card(card_id, position, self.local_player)
            .map_err(GameError::Rejected)?;
        self.replay
            .record_deploy(self.sim.tick(), self.local_player, card_id, position);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.seen.insert(DeployKey {
            owner: self.local_player,
            seq,
        });
        let action = self.pending.register(self.local_player, card_id);
        self.flush_events();

        debug!(game_id = self.game_id, seq, card_id, entity, "local deploy");
        Ok(LocalDeploy {
            message: ClientMessage::DeployTroop {
                seq,
                card_id,
                x,
                y,
            },
            action,
            entity,
        })
    }

    /// Apply one relay message to the local simulation.
    ///
    /// # Errors
    ///
    /// Returns an error only when a reseed cannot rebuild the simulation.
    pub fn handle_server_message(&mut self, message: &ServerMessage) -> Result<Handled> {
        let handled = match message {
            ServerMessage::BattleStarted => {
                self.sim.start();
                self.release_held();
                self.open_ledger();
                Handled::Started
            }
            ServerMessage::Tick { remaining_ms, .. } => {
                self.sim.set_advisory_remaining(*remaining_ms);
                Handled::Advisory
            }
            ServerMessage::OpponentDeployTroop {
                owner,
                seq,
                card_id,
                x,
                y,
            } => self.mirror_deploy(DeployKey { owner: *owner, seq: *seq }, *card_id, (*x, *y)),
            ServerMessage::SyncUnits(sync) => self.apply_host_sync(sync),
            ServerMessage::OpponentDisconnected { role } => {
                let side = self.sim.config().format.side_of(*role);
                info!(game_id = self.game_id, role, "opponent disconnected");
                self.impose_ending(ReplayEnding::Conceded { side });
                Handled::Ended
            }
            ServerMessage::GameTimeout => {
                self.impose_ending(ReplayEnding::Forced);
                Handled::Ended
            }
            ServerMessage::Rejoined {
                game_id,
                role,
                elapsed_ms,
                deploys,
            } => {
                let replayed = self.reseed(*game_id, *role, *elapsed_ms, deploys)?;
                self.open_ledger();
                Handled::Reseeded { deploys: replayed }
            }
            ServerMessage::Error { message } => {
                warn!(game_id = self.game_id, %message, "relay refused a request");
                Handled::Ignored
            }
            ServerMessage::MatchFound { .. } | ServerMessage::GameStart { .. } => Handled::Ignored,
        };
        self.flush_events();
        self.settle();
        Ok(handled)
    }

    fn mirror_deploy(&mut self, key: DeployKey, card_id: CardId, (x, y): (i32, i32)) -> Handled {
        if key.owner == self.local_player {
            return Handled::OwnEcho;
        }
        if self.seen.contains(&key) {
            warn!(game_id = self.game_id, owner = key.owner, seq = key.seq, "duplicate relayed deploy discarded");
            return Handled::Duplicate;
        }
        if self.sim.phase() == MatchPhase::Waiting {
            self.seen.insert(key);
            self.held.push(HeldDeploy { key, card_id, x, y });
            debug!(game_id = self.game_id, owner = key.owner, seq = key.seq, "relayed deploy held until start");
            return Handled::Queued;
        }
        self.apply_mirror(key, card_id, (x, y))
    }

    fn apply_mirror(&mut self, key: DeployKey, card_id: CardId, (x, y): (i32, i32)) -> Handled {
        let position = Vec2Fixed::from_px(x, y);
        match self.sim.mirror_card(card_id, position, key.owner) {
            Ok(entity) => {
                self.seen.insert(key);
                self.pending.register(key.owner, card_id);
                self.replay
                    .record_mirror(self.sim.tick(), key.owner, card_id, position);
                debug!(game_id = self.game_id, owner = key.owner, seq = key.seq, card_id, entity, "opponent deploy mirrored");
                Handled::Applied { entity }
            }
            Err(rejection) => {
                warn!(game_id = self.game_id, owner = key.owner, seq = key.seq, %rejection, "mirrored deploy rejected");
                Handled::Rejected(rejection)
            }
        }
    }

    fn release_held(&mut self) {
        for held in std::mem::take(&mut self.held) {
            // Held keys count as seen; a refusal now must not block redelivery.
            self.seen.remove(&held.key);
            self.apply_mirror(held.key, held.card_id, (held.x, held.y));
        }
    }

    fn apply_host_sync(&mut self, sync: &HostSync) -> Handled {
        if self.local_player == HOST_SEAT {
            return Handled::Ignored;
        }
        let entities = self.sim.apply_host_sync(sync);
        self.replay.record_sync(self.sim.tick(), sync);
        trace!(game_id = self.game_id, host_tick = sync.tick, entities, "host sync");
        Handled::Synced { entities }
    }

    fn impose_ending(&mut self, ending: ReplayEnding) {
        if self.sim.phase() == MatchPhase::Ended {
            return;
        }
        match ending {
            ReplayEnding::Conceded { side } => self.sim.concede(side),
            ReplayEnding::Forced => self.sim.force_end(),
        }
        self.replay.record_ending(ending);
    }

    /// Rebuild the simulation from the relay's deploy log.
    ///
    /// Each deployment is applied at the logic tick its relay timestamp
    /// falls in, then the clock is run up to `elapsed_ms`. Actions still
    /// awaiting ledger confirmation survive; opponent deploys this peer
    /// missed while away get pending markers of their own.
    fn reseed(
        &mut self,
        game_id: u64,
        role: u8,
        elapsed_ms: u64,
        deploys: &[RelayedDeploy],
    ) -> Result<usize> {
        let mut sim = Simulation::with_layout(
            self.sim.config().clone(),
            self.sim.catalog().clone(),
            self.sim.layout().clone(),
        )?;
        let mut replay = Replay::new(&sim)?;
        sim.start();
        let step = u64::from(sim.config().logic_tick_ms);
        let run_until = |sim: &mut Simulation, tick: u64| {
            while sim.tick() < tick && sim.phase() == MatchPhase::Active {
                sim.step();
            }
        };

        let mut seen = HashSet::new();
        let mut next_seq = 0;
        let mut replayed = 0;
        for deploy in deploys {
            run_until(&mut sim, deploy.elapsed_ms / step);
            let key = DeployKey {
                owner: deploy.owner,
                seq: deploy.seq,
            };
            if seen.contains(&key) {
                continue;
            }
            if deploy.owner == role {
                next_seq = next_seq.max(deploy.seq + 1);
            }
            let position = Vec2Fixed::from_px(deploy.x, deploy.y);
            match sim.mirror_card(deploy.card_id, position, deploy.owner) {
                Ok(_) => {
                    seen.insert(key);
                    replay.record_mirror(sim.tick(), deploy.owner, deploy.card_id, position);
                    if deploy.owner != role && !self.seen.contains(&key) {
                        self.pending.register(deploy.owner, deploy.card_id);
                    }
                    replayed += 1;
                }
                Err(rejection) => {
                    warn!(game_id, owner = deploy.owner, seq = deploy.seq, %rejection, "reseed deploy rejected");
                }
            }
        }
        run_until(&mut sim, elapsed_ms / step);
        sim.drain_events();

        info!(game_id, role, elapsed_ms, replayed, "simulation reseeded");
        self.sim = sim;
        self.replay = replay;
        self.finished = false;
        self.game_id = game_id;
        self.local_player = role;
        self.next_seq = self.next_seq.max(next_seq);
        self.seen = seen;
        self.held.clear();
        Ok(replayed)
    }

    /// Feed one frame into the simulation clock.
    pub fn advance(&mut self, now_ms: u64, delta_ms: u64) -> u32 {
        let ran = self.sim.update(now_ms, delta_ms);
        self.flush_events();
        self.settle();
        ran
    }

    /// The host's picture of the battle, ready to send. `None` on guest
    /// seats and outside a running battle.
    #[must_use]
    pub fn host_sync(&self) -> Option<ClientMessage> {
        (self.local_player == HOST_SEAT && self.sim.phase() == MatchPhase::Active)
            .then(|| ClientMessage::SyncUnits(self.sim.host_sync()))
    }

    /// Settle a pending action from a ledger log. The simulation is never
    /// rolled back.
    pub fn apply_ledger_log(&mut self, log: &LedgerLog) -> Option<Resolved> {
        self.pending.apply(log)
    }

    /// Apply every log the ledger stream has queued.
    pub fn poll_ledger(&mut self) -> Vec<Resolved> {
        let mut logs = Vec::new();
        if let Some(stream) = self.ledger.stream.as_mut() {
            while let Some(log) = stream.try_recv() {
                logs.push(log);
            }
        }
        logs.iter()
            .filter_map(|log| self.pending.apply(log))
            .collect()
    }

    /// Whether a ledger log stream is open.
    #[must_use]
    pub const fn is_following_ledger(&self) -> bool {
        self.ledger.stream.is_some()
    }

    /// Record the signature a local action was submitted under.
    pub fn attach_signature(&mut self, action: ActionId, signature: impl Into<String>) -> bool {
        self.pending.attach_signature(action, signature)
    }

    fn open_ledger(&mut self) {
        if self.sim.phase() != MatchPhase::Active {
            return;
        }
        let Some(source) = &self.ledger.source else {
            return;
        };
        if self
            .ledger
            .stream
            .as_ref()
            .is_some_and(|stream| stream.account() == self.game_id)
        {
            return;
        }
        self.ledger.stream = None;
        match LogSubscription::open(Arc::clone(source), self.game_id) {
            Ok(stream) => self.ledger.stream = Some(stream),
            Err(err) => {
                warn!(game_id = self.game_id, %err, "ledger log stream unavailable");
            }
        }
    }

    /// Close out a match that just ended: seal the replay, release the
    /// ledger stream.
    fn settle(&mut self) {
        if self.finished || self.sim.phase() != MatchPhase::Ended {
            return;
        }
        self.finished = true;
        self.replay.finalize(self.sim.tick(), self.sim.state_hash());
        if self.ledger.stream.take().is_some() {
            debug!(game_id = self.game_id, "ledger log stream closed at match end");
        }
    }

    fn flush_events(&mut self) {
        for event in self.sim.drain_events() {
            if self.events.send(event).is_err() {
                trace!(game_id = self.game_id, "event receiver dropped");
                break;
            }
        }
    }

    /// The local simulation.
    #[must_use]
    pub const fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Room id.
    #[must_use]
    pub const fn game_id(&self) -> u64 {
        self.game_id
    }

    /// Local seat index.
    #[must_use]
    pub const fn local_player(&self) -> u8 {
        self.local_player
    }

    /// Actions awaiting ledger confirmation.
    #[must_use]
    pub const fn pending(&self) -> &PendingActions {
        &self.pending
    }

    /// Everything applied so far. Sealed with the final hash once the
    /// match ends.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }
}
