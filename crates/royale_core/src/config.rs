//! Match configuration.
//!
//! A [`MatchConfig`] fixes every tunable a peer needs to reproduce a
//! battle: elixir economy, timer, logic step and team format. Both peers
//! must run with identical configs or their state hashes diverge.

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};

/// Team format of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchFormat {
    /// Two players, one per side.
    #[default]
    OneVsOne,
    /// Four players; players 0 and 1 form side 0, players 2 and 3 side 1.
    TwoVsTwo,
}

impl MatchFormat {
    /// Number of players seated in this format.
    #[must_use]
    pub const fn player_count(self) -> u8 {
        match self {
            Self::OneVsOne => 2,
            Self::TwoVsTwo => 4,
        }
    }

    /// Side index (0 or 1) a player fights for.
    #[must_use]
    pub const fn side_of(self, player: u8) -> u8 {
        match self {
            Self::OneVsOne => player,
            Self::TwoVsTwo => player / 2,
        }
    }

    /// Lowest player index seated on `side`.
    #[must_use]
    pub const fn first_player_of(self, side: u8) -> u8 {
        match self {
            Self::OneVsOne => side,
            Self::TwoVsTwo => side * 2,
        }
    }
}

/// How a timer expiry with equal crowns is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Tiebreak {
    /// Equal crowns is a draw.
    #[default]
    Draw,
    /// Higher combined remaining tower health wins; equal health draws.
    TowerHealth,
}

/// Highest elixir cap a match may use.
pub const ELIXIR_CEILING: u32 = 10;

/// Test and debug switches. Both default to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DebugOverrides {
    /// Deployments never cost elixir.
    #[serde(default)]
    pub infinite_elixir: bool,
    /// Deployments may be placed anywhere inside the arena.
    #[serde(default)]
    pub free_placement: bool,
}

/// Tunables for one match.
///
/// # Example RON
///
/// ```ron
/// MatchConfig(
///     starting_elixir: 5,
///     max_elixir: 10,
///     elixir_regen_ms: 2800,
///     match_duration_ms: 180000,
///     logic_tick_ms: 50,
///     tiebreak: Draw,
///     format: OneVsOne,
///     debug: DebugOverrides(infinite_elixir: false, free_placement: false),
///     max_entities: 64,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Elixir each player holds when the battle starts.
    pub starting_elixir: u32,
    /// Elixir cap.
    pub max_elixir: u32,
    /// Milliseconds to regenerate one elixir.
    pub elixir_regen_ms: u32,
    /// Match length in milliseconds of simulated time.
    pub match_duration_ms: u64,
    /// Length of one logic tick in milliseconds.
    pub logic_tick_ms: u32,
    /// Rule applied when the timer expires on equal crowns.
    #[serde(default)]
    pub tiebreak: Tiebreak,
    /// Team format.
    #[serde(default)]
    pub format: MatchFormat,
    /// Test and debug switches.
    #[serde(default)]
    pub debug: DebugOverrides,
    /// Maximum live troops and spells at once.
    pub max_entities: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            starting_elixir: 5,
            max_elixir: 10,
            elixir_regen_ms: 2800,
            match_duration_ms: 180_000,
            logic_tick_ms: 50,
            tiebreak: Tiebreak::Draw,
            format: MatchFormat::OneVsOne,
            debug: DebugOverrides::default(),
            max_entities: 64,
        }
    }
}

impl MatchConfig {
    /// Default config for the given team format.
    #[must_use]
    pub fn for_format(format: MatchFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Parse a config from RON text and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] if the text is not a valid
    /// config, or [`GameError::InvalidState`] if its values are unusable.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let config: Self = ron::from_str(text).map_err(|e| GameError::DataParseError {
            path: "match config".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values describe a playable match.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidState`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.max_elixir == 0 {
            return Err(GameError::InvalidState("max_elixir must be positive".into()));
        }
        if self.max_elixir > ELIXIR_CEILING {
            return Err(GameError::InvalidState(format!(
                "max_elixir exceeds {ELIXIR_CEILING}"
            )));
        }
        if self.starting_elixir > self.max_elixir {
            return Err(GameError::InvalidState(
                "starting_elixir exceeds max_elixir".into(),
            ));
        }
        if self.elixir_regen_ms == 0 {
            return Err(GameError::InvalidState(
                "elixir_regen_ms must be positive".into(),
            ));
        }
        if self.logic_tick_ms == 0 {
            return Err(GameError::InvalidState("logic_tick_ms must be positive".into()));
        }
        if self.match_duration_ms == 0 {
            return Err(GameError::InvalidState(
                "match_duration_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
