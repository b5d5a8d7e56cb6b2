//! # Royale Relay
//!
//! Match relay for the tower battle: matchmaking and private rooms, deploy
//! mirroring between peers, the advisory countdown, disconnect and rejoin
//! handling. Also hosts the peer side of the protocol: a [`client`] for
//! the wire and a [`session`] that feeds relayed deployments into a local
//! [`Simulation`](royale_core::simulation::Simulation), plus scoped
//! [`ledger`] log subscriptions for reconciliation.
//!
//! The relay never runs a simulation. It stamps, records and forwards.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::RelayClient;
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use server::RelayServer;
pub use session::MatchSession;
