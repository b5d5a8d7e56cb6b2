//! Relay wire messages.
//!
//! Newline-delimited JSON: one message per line, internally tagged by a
//! kebab-case `type` field. Unit variants encode as `{"type":"delegated"}`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use royale_core::cards::CardId;
use royale_core::config::MatchFormat;
use royale_core::simulation::HostSync;

use crate::error::Result;

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Wait for matchmaking to seat this identity.
    JoinQueue {
        /// Player identity.
        identity: String,
        /// Team format to queue for.
        #[serde(default)]
        format: MatchFormat,
    },
    /// Open a private room and take seat 0.
    CreateRoom {
        /// Player identity.
        identity: String,
        /// Requested room id; the relay picks one when absent.
        #[serde(default)]
        game_id: Option<u64>,
        /// Team format of the room.
        #[serde(default)]
        format: MatchFormat,
    },
    /// Take the next open seat of a private room.
    JoinRoom {
        /// Player identity.
        identity: String,
        /// Room to join.
        game_id: u64,
    },
    /// The host's ledger account is delegated; start the battle.
    Delegated,
    /// A local deployment to mirror to the other seats.
    DeployTroop {
        /// Sender's deploy sequence number, unique per sender.
        seq: u64,
        /// Card deployed.
        card_id: CardId,
        /// Deploy point, whole pixels.
        x: i32,
        /// Deploy point, whole pixels.
        y: i32,
    },
    /// Reclaim a seat after a dropped connection.
    Rejoin {
        /// Player identity.
        identity: String,
        /// Room to return to.
        game_id: u64,
    },
    /// Host picture of the battle. Only seat 0 may send it.
    SyncUnits(HostSync),
    /// Forfeit and leave.
    Leave,
}

/// A deployment as the relay recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedDeploy {
    /// Seat that sent it, stamped by the relay.
    pub owner: u8,
    /// Sender's sequence number.
    pub seq: u64,
    /// Card deployed.
    pub card_id: CardId,
    /// Deploy point, whole pixels.
    pub x: i32,
    /// Deploy point, whole pixels.
    pub y: i32,
    /// Battle time when the relay received it.
    pub elapsed_ms: u64,
}

/// Messages the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Matchmaking seated the client.
    MatchFound {
        /// Room id.
        game_id: u64,
        /// Seat index.
        role: u8,
        /// First seat on the other side.
        opponent_identity: String,
        /// Every seat in order.
        players: Vec<String>,
    },
    /// A private room filled up.
    GameStart {
        /// Room id.
        game_id: u64,
        /// Seat index.
        role: u8,
        /// First seat on the other side.
        opponent_identity: String,
        /// Every seat in order.
        players: Vec<String>,
    },
    /// The host delegated; the battle clock runs.
    BattleStarted,
    /// Advisory countdown for the HUD.
    Tick {
        /// Battle time elapsed.
        elapsed_ms: u64,
        /// Battle time left.
        remaining_ms: u64,
    },
    /// Another seat deployed.
    OpponentDeployTroop {
        /// Seat that deployed.
        owner: u8,
        /// That seat's sequence number.
        seq: u64,
        /// Card deployed.
        card_id: CardId,
        /// Deploy point, whole pixels.
        x: i32,
        /// Deploy point, whole pixels.
        y: i32,
    },
    /// The host's picture of the battle, for guests to converge on.
    SyncUnits(HostSync),
    /// A seat left or did not return in time. The room is closed.
    OpponentDisconnected {
        /// Seat that left.
        role: u8,
    },
    /// The countdown reached zero. The room is closed.
    GameTimeout,
    /// The seat was reclaimed.
    Rejoined {
        /// Room id.
        game_id: u64,
        /// Seat index.
        role: u8,
        /// Battle time elapsed.
        elapsed_ms: u64,
        /// Every deployment so far, in arrival order.
        deploys: Vec<RelayedDeploy>,
    },
    /// The last request was refused.
    Error {
        /// Why.
        message: String,
    },
}

/// Encode one message as a JSON line, newline included.
///
/// # Errors
///
/// Returns [`RelayError::Codec`](crate::error::RelayError::Codec) if the
/// message cannot be serialized.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line. Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`RelayError::Codec`](crate::error::RelayError::Codec) for a
/// malformed frame.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}
