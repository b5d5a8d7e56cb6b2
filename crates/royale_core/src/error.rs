//! Error types for the battle simulation.

use thiserror::Error;

use crate::cards::CardId;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all battle simulation errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// A deployment was refused by the scheduler intake.
    #[error("Deploy rejected: {0}")]
    Rejected(#[from] DeployRejection),

    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(u32),

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path or label of the data that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// The authoritative mirror refused an instruction.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Desync detected between peers or against a replay.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },
}

/// Reason a deployment was refused.
///
/// Rejections never change simulation state: elixir and the entity set
/// are exactly as they were before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeployRejection {
    /// The card costs more than the player currently holds.
    #[error("insufficient elixir: need {required}, have {available}")]
    InsufficientElixir {
        /// Whole elixir the card costs.
        required: u32,
        /// Whole elixir the player holds.
        available: u32,
    },

    /// The position is outside the arena or on the opponent's half.
    #[error("invalid placement")]
    InvalidPlacement,

    /// The match has already ended.
    #[error("match has ended")]
    MatchEnded,

    /// The battle has not started yet.
    #[error("match has not started")]
    MatchNotStarted,

    /// No card with this id exists in the catalog.
    #[error("unknown card {0}")]
    UnknownCard(CardId),

    /// The owner index does not belong to a player in this match.
    #[error("invalid owner {0}")]
    InvalidOwner(u8),

    /// The arena already holds the maximum number of live entities.
    #[error("entity limit reached")]
    EntityLimit,
}

/// Errors the authoritative mirror raises, named after the ledger's own
/// error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The battle is not accepting gameplay instructions.
    #[error("game is not active")]
    GameNotActive,

    /// The battle is not waiting for players.
    #[error("game is not in waiting state")]
    GameNotWaiting,

    /// Every seat is taken.
    #[error("game is already full")]
    GameAlreadyFull,

    /// The identity already holds a seat.
    #[error("invalid player")]
    InvalidPlayer,

    /// The signer holds no seat in this battle.
    #[error("not a player in this game")]
    NotAPlayer,

    /// No stats exist for this card.
    #[error("invalid card id {0}")]
    InvalidCardId(CardId),

    /// The deploy costs more than the player holds, in hundredths.
    #[error("not enough elixir: need {required}, have {available}")]
    NotEnoughElixir {
        /// Cost in hundredths of elixir.
        required: u64,
        /// Balance in hundredths of elixir.
        available: u64,
    },

    /// The account cannot hold another entity.
    #[error("too many entities")]
    TooManyEntities,

    /// The tower index is outside the six fixed slots.
    #[error("tower index {0} out of range")]
    InvalidTower(usize),
}
