//! Replay system for recording and playing back matches.
//!
//! Replays store the initial simulation state and the stream of
//! deployments issued during the match, each stamped with the logic tick
//! it was applied at. Host syncs and endings imposed from outside the
//! simulation (concession, relay timeout) are recorded alongside. Since the
//! simulation is deterministic this is enough to recreate the whole battle
//! and check it against the recorded final hash.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cards::CardId;
use crate::config::MatchConfig;
use crate::error::{GameError, Result};
use crate::math::Vec2Fixed;
use crate::simulation::{HostSync, MatchPhase, Simulation};

/// A single deployment record for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayDeploy {
    /// Logic ticks completed when the deployment was applied.
    pub tick: u64,
    /// Deploying player.
    pub owner: u8,
    /// Card deployed.
    pub card: CardId,
    /// Deploy point.
    pub position: Vec2Fixed,
    /// Relayed from another peer; replayed without the elixir gate.
    pub mirrored: bool,
}

/// A host sync applied during the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySync {
    /// Logic ticks completed when the sync was applied.
    pub tick: u64,
    /// Deployments applied before it.
    pub after_deploys: usize,
    /// The host picture.
    pub sync: HostSync,
}

/// An ending the simulation did not reach on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayEnding {
    /// `side` conceded.
    Conceded {
        /// Side that gave up.
        side: u8,
    },
    /// Scored as if the clock ran out.
    Forced,
}

/// Replay file format version for compatibility.
pub const REPLAY_VERSION: u32 = 2;

/// Complete replay data structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    /// Replay format version.
    pub version: u32,
    /// Config the match ran with.
    pub config: MatchConfig,
    /// Serialized initial simulation state.
    pub initial_state: Vec<u8>,
    /// Deployments in the order they were applied.
    pub deploys: Vec<ReplayDeploy>,
    /// Host syncs in the order they were applied.
    pub syncs: Vec<ReplaySync>,
    /// Imposed ending, applied at the final tick.
    pub ending: Option<ReplayEnding>,
    /// Final tick when the match ended.
    pub final_tick: u64,
    /// Final state hash for verification.
    pub final_hash: u64,
}

impl Replay {
    /// Create a new replay from a simulation's initial state.
    ///
    /// # Errors
    /// Returns an error if the state cannot be serialized.
    pub fn new(initial_state: &Simulation) -> Result<Self> {
        let state_bytes = initial_state.serialize()?;
        Ok(Self {
            version: REPLAY_VERSION,
            config: initial_state.config().clone(),
            initial_state: state_bytes,
            deploys: Vec::new(),
            syncs: Vec::new(),
            ending: None,
            final_tick: 0,
            final_hash: 0,
        })
    }

    /// Record a deployment for replay.
    pub fn record_deploy(&mut self, tick: u64, owner: u8, card: CardId, position: Vec2Fixed) {
        self.deploys.push(ReplayDeploy {
            tick,
            owner,
            card,
            position,
            mirrored: false,
        });
    }

    /// Record a deployment relayed from another peer.
    pub fn record_mirror(&mut self, tick: u64, owner: u8, card: CardId, position: Vec2Fixed) {
        self.deploys.push(ReplayDeploy {
            tick,
            owner,
            card,
            position,
            mirrored: true,
        });
    }

    /// Record a host sync applied after everything recorded so far.
    pub fn record_sync(&mut self, tick: u64, sync: &HostSync) {
        self.syncs.push(ReplaySync {
            tick,
            after_deploys: self.deploys.len(),
            sync: sync.clone(),
        });
    }

    /// Record how an imposed ending ended the match.
    pub fn record_ending(&mut self, ending: ReplayEnding) {
        self.ending.get_or_insert(ending);
    }

    /// Finalize the replay with end-game state.
    pub fn finalize(&mut self, final_tick: u64, final_hash: u64) {
        self.final_tick = final_tick;
        self.final_hash = final_hash;
    }

    /// Save the replay to a file.
    ///
    /// # Errors
    /// Returns an error if serialization or file writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize replay: {e}")))?;
        std::fs::write(path.as_ref(), bytes)
            .map_err(|e| GameError::InvalidState(format!("Failed to write replay file: {e}")))?;
        Ok(())
    }

    /// Load a replay from a file.
    ///
    /// # Errors
    /// Returns an error if file reading or deserialization fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| GameError::InvalidState(format!("Failed to read replay file: {e}")))?;
        let replay: Self = bincode::deserialize(&bytes)
            .map_err(|e| GameError::InvalidState(format!("Failed to deserialize replay: {e}")))?;

        // Version check
        if replay.version != REPLAY_VERSION {
            return Err(GameError::InvalidState(format!(
                "Replay version mismatch: expected {REPLAY_VERSION}, got {}",
                replay.version
            )));
        }

        Ok(replay)
    }

    /// Get the initial simulation state for playback.
    ///
    /// # Errors
    /// Returns an error if state deserialization fails.
    pub fn restore_initial_state(&self) -> Result<Simulation> {
        Simulation::deserialize(&self.initial_state)
    }

    /// Re-run the match and verify it ends on the recorded hash.
    ///
    /// # Errors
    /// Returns [`GameError::Rejected`] if a recorded deployment is refused
    /// and [`GameError::DesyncDetected`] if the final state differs.
    pub fn play(&self) -> Result<Simulation> {
        let mut sim = self.restore_initial_state()?;
        sim.start();

        let mut deploys = self.deploys.iter().peekable();
        let mut syncs = self.syncs.iter().peekable();
        let mut applied = 0;
        loop {
            loop {
                let tick = sim.tick();
                if let Some(entry) =
                    syncs.next_if(|s| s.tick <= tick && s.after_deploys <= applied)
                {
                    sim.apply_host_sync(&entry.sync);
                } else if let Some(deploy) = deploys.next_if(|d| d.tick <= tick) {
                    if deploy.mirrored {
                        sim.mirror_card(deploy.card, deploy.position, deploy.owner)?;
                    } else {
                        sim.deploy_card(deploy.card, deploy.position, deploy.owner)?;
                    }
                    applied += 1;
                } else {
                    break;
                }
            }
            if sim.tick() >= self.final_tick || sim.phase() != MatchPhase::Active {
                break;
            }
            sim.step();
        }
        match self.ending {
            Some(ReplayEnding::Conceded { side }) => sim.concede(side),
            Some(ReplayEnding::Forced) => sim.force_end(),
            None => {}
        }

        let local_hash = sim.state_hash();
        if sim.tick() != self.final_tick || local_hash != self.final_hash {
            return Err(GameError::DesyncDetected {
                tick: sim.tick(),
                local_hash,
                remote_hash: self.final_hash,
            });
        }
        Ok(sim)
    }

    /// Get deployments for a specific tick.
    #[must_use]
    pub fn deploys_at_tick(&self, tick: u64) -> Vec<&ReplayDeploy> {
        self.deploys
            .iter()
            .filter(|deploy| deploy.tick == tick)
            .collect()
    }

    /// Get the total duration of the replay in ticks.
    #[must_use]
    pub const fn duration(&self) -> u64 {
        self.final_tick
    }

    /// Get the total number of deployments in the replay.
    #[must_use]
    pub fn deploy_count(&self) -> usize {
        self.deploys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{CardCatalog, ARCHERS, GIANT};

    fn recorded() -> (Replay, Simulation) {
        let mut sim = Simulation::new(MatchConfig::default(), CardCatalog::standard()).unwrap();
        let mut replay = Replay::new(&sim).unwrap();
        sim.start();

        let plan = [
            (0, 0, GIANT, Vec2Fixed::from_px(143, 700)),
            (40, 1, ARCHERS, Vec2Fixed::from_px(385, 250)),
        ];
        for (at, owner, card, position) in plan {
            while sim.tick() < at {
                sim.step();
            }
            sim.deploy_card(card, position, owner).unwrap();
            replay.record_deploy(sim.tick(), owner, card, position);
        }
        for _ in 0..200 {
            sim.step();
        }
        replay.finalize(sim.tick(), sim.state_hash());
        (replay, sim)
    }

    #[test]
    fn test_play_reproduces_final_hash() {
        let (replay, sim) = recorded();
        assert_eq!(replay.deploy_count(), 2);
        assert_eq!(replay.deploys_at_tick(40).len(), 1);

        let replayed = replay.play().unwrap();
        assert_eq!(replayed.state_hash(), sim.state_hash());
        assert_eq!(replayed.tick(), replay.duration());
    }

    #[test]
    fn test_play_detects_tampering() {
        let (mut replay, _) = recorded();
        replay.deploys[1].position = Vec2Fixed::from_px(300, 250);
        assert!(matches!(
            replay.play(),
            Err(GameError::DesyncDetected { .. })
        ));
    }

    #[test]
    fn test_mirrored_deploys_and_concession_replay() {
        let mut sim = Simulation::new(MatchConfig::default(), CardCatalog::standard()).unwrap();
        let mut replay = Replay::new(&sim).unwrap();
        sim.start();

        let north = Vec2Fixed::from_px(143, 290);
        for _ in 0..2 {
            sim.mirror_card(GIANT, north, 1).unwrap();
            replay.record_mirror(sim.tick(), 1, GIANT, north);
            for _ in 0..10 {
                sim.step();
            }
        }
        let sync = sim.host_sync();
        sim.apply_host_sync(&sync);
        replay.record_sync(sim.tick(), &sync);
        sim.concede(1);
        replay.record_ending(ReplayEnding::Conceded { side: 1 });
        replay.finalize(sim.tick(), sim.state_hash());

        let replayed = replay.play().unwrap();
        assert_eq!(replayed.result(), sim.result());
        assert_eq!(replayed.state_hash(), sim.state_hash());

        // Without the mirror flag the second Giant is unaffordable.
        let mut strict = replay.clone();
        strict.deploys[1].mirrored = false;
        assert!(matches!(strict.play(), Err(GameError::Rejected(_))));
    }

    #[test]
    fn test_save_and_load() {
        let (replay, _) = recorded();
        let path = std::env::temp_dir().join(format!("royale-replay-{}.bin", std::process::id()));
        replay.save(&path).unwrap();
        let loaded = Replay::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.final_hash, replay.final_hash);
        assert_eq!(loaded.deploys, replay.deploys);
        assert_eq!(loaded.config, replay.config);
    }
}
