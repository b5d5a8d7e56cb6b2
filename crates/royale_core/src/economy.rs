//! Elixir economy.
//!
//! Elixir accrues continuously. To keep accrual exact the pool counts
//! regeneration milliseconds: one whole elixir is `regen_ms` units, so a
//! step of `delta_ms` adds exactly `delta_ms` units and nothing is lost to
//! rounding.

use serde::{Deserialize, Serialize};

use crate::error::DeployRejection;

/// One player's elixir.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElixirPool {
    /// Accrued regeneration milliseconds.
    units: u64,
    /// Milliseconds per whole elixir.
    regen_ms: u32,
    /// Cap in whole elixir.
    max: u32,
    /// Debug switch: spending never debits.
    infinite: bool,
}

impl ElixirPool {
    /// Create a pool holding `starting` whole elixir.
    #[must_use]
    pub fn new(starting: u32, max: u32, regen_ms: u32) -> Self {
        let regen_ms = regen_ms.max(1);
        Self {
            units: u64::from(starting.min(max)) * u64::from(regen_ms),
            regen_ms,
            max,
            infinite: false,
        }
    }

    /// Make spending free.
    #[must_use]
    pub const fn with_infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }

    fn cap_units(&self) -> u64 {
        u64::from(self.max) * u64::from(self.regen_ms)
    }

    /// Whole elixir available to spend.
    #[must_use]
    pub fn whole(&self) -> u32 {
        u32::try_from(self.units / u64::from(self.regen_ms)).unwrap_or(self.max)
    }

    /// Elixir in hundredths, for a smooth UI bar.
    #[must_use]
    pub fn hundredths(&self) -> u32 {
        u32::try_from(self.units * 100 / u64::from(self.regen_ms)).unwrap_or(self.max * 100)
    }

    /// Cap in whole elixir.
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Whether the pool is full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.units >= self.cap_units()
    }

    /// Accrue `delta_ms` of regeneration, clamped at the cap.
    ///
    /// Returns `true` when the whole-elixir count changed.
    pub fn accrue(&mut self, delta_ms: u64) -> bool {
        let before = self.whole();
        self.units = self.units.saturating_add(delta_ms).min(self.cap_units());
        self.whole() != before
    }

    /// Debit `cost` whole elixir, or refuse without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`DeployRejection::InsufficientElixir`] when `cost` exceeds
    /// the whole elixir held.
    pub fn try_spend(&mut self, cost: u32) -> Result<(), DeployRejection> {
        if self.infinite {
            return Ok(());
        }
        let available = self.whole();
        if cost > available {
            return Err(DeployRejection::InsufficientElixir {
                required: cost,
                available,
            });
        }
        self.units -= u64::from(cost) * u64::from(self.regen_ms);
        Ok(())
    }

    /// Debit `cost` whole elixir, flooring at zero.
    ///
    /// Used for deploys another peer already paid for.
    pub fn spend_saturating(&mut self, cost: u32) {
        if self.infinite {
            return;
        }
        self.units = self
            .units
            .saturating_sub(u64::from(cost) * u64::from(self.regen_ms));
    }
}
