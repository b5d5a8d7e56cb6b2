//! Pending-action reconciliation against ledger logs.
//!
//! Every deployment a client expects the ledger to confirm gets a
//! [`PendingAction`] with an application-assigned [`ActionId`]. When a
//! [`LedgerLog`] arrives it is matched to a pending action by, in order:
//!
//! 1. the action id carried in the log; an id that names no pending
//!    action matches nothing,
//! 2. the transaction signature recorded on submission,
//! 3. first-in-first-out among the opponent's pending markers, filtered by
//!    owner and card when the log names them.
//!
//! The third rule is a guess. [`Resolved::via`] says which rule matched so
//! callers can treat guesses with suspicion.
//!
//! A failed log marks the action [`ActionStatus::Fail`]; the local
//! simulation is never rolled back.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cards::CardId;

/// Application-assigned identifier of a pending action.
pub type ActionId = u64;

/// Ledger outcome of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Waiting for a log.
    Pending,
    /// Confirmed.
    Success,
    /// The ledger reported an error.
    Fail,
}

/// An action awaiting ledger confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Arena id.
    pub id: ActionId,
    /// Player who deployed.
    pub owner: u8,
    /// Card deployed.
    pub card: CardId,
    /// Ledger outcome so far.
    pub status: ActionStatus,
    /// Transaction signature, once known.
    pub signature: Option<String>,
}

/// One entry of the ledger log stream for the battle account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLog {
    /// Transaction signature.
    pub signature: String,
    /// Action id, when the submitting client embedded one.
    pub action_id: Option<ActionId>,
    /// Deploying player, when the log names it.
    pub owner: Option<u8>,
    /// Card deployed, when the log names it.
    pub card: Option<CardId>,
    /// Error reported by the ledger.
    pub err: Option<String>,
}

/// Which rule matched a log to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// The log carried the action id.
    ById,
    /// The log's signature was recorded on the action.
    BySignature,
    /// Oldest matching opponent marker.
    Fifo,
}

/// Outcome of applying one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    /// Action the log settled.
    pub id: ActionId,
    /// Status it now has.
    pub status: ActionStatus,
    /// Rule that matched.
    pub via: Resolution,
}

/// Arena of actions awaiting confirmation for one local player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingActions {
    local_player: u8,
    /// Ascending by id.
    actions: Vec<PendingAction>,
    next_id: ActionId,
}

impl PendingActions {
    /// Empty arena for `local_player`.
    #[must_use]
    pub fn new(local_player: u8) -> Self {
        Self {
            local_player,
            actions: Vec::new(),
            next_id: 1,
        }
    }

    /// Track a new action and return its id.
    pub fn register(&mut self, owner: u8, card: CardId) -> ActionId {
        let id = self.next_id;
        self.next_id += 1;
        self.actions.push(PendingAction {
            id,
            owner,
            card,
            status: ActionStatus::Pending,
            signature: None,
        });
        id
    }

    /// Record the signature a submitted action was sent under.
    ///
    /// Returns `false` if the action is unknown.
    pub fn attach_signature(&mut self, id: ActionId, signature: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(action) => {
                action.signature = Some(signature.into());
                true
            }
            None => false,
        }
    }

    /// Look up an action.
    #[must_use]
    pub fn get(&self, id: ActionId) -> Option<&PendingAction> {
        self.index_of(id).map(|index| &self.actions[index])
    }

    fn get_mut(&mut self, id: ActionId) -> Option<&mut PendingAction> {
        self.index_of(id).map(|index| &mut self.actions[index])
    }

    fn index_of(&self, id: ActionId) -> Option<usize> {
        self.actions.binary_search_by_key(&id, |action| action.id).ok()
    }

    /// Status of an action.
    #[must_use]
    pub fn status(&self, id: ActionId) -> Option<ActionStatus> {
        self.get(id).map(|action| action.status)
    }

    /// Actions still waiting, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingAction> + '_ {
        self.actions
            .iter()
            .filter(|action| action.status == ActionStatus::Pending)
    }

    /// Number of tracked actions, settled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Forget settled actions. Returns how many were dropped.
    pub fn prune_settled(&mut self) -> usize {
        let before = self.actions.len();
        self.actions
            .retain(|action| action.status == ActionStatus::Pending);
        before - self.actions.len()
    }

    /// Settle the pending action `log` refers to.
    ///
    /// Returns `None` when no pending action matches; the log is then
    /// ignored.
    pub fn apply(&mut self, log: &LedgerLog) -> Option<Resolved> {
        let Some((index, via)) = self.locate(log) else {
            warn!(signature = %log.signature, "ledger log matches no pending action");
            return None;
        };

        let status = if log.err.is_some() {
            ActionStatus::Fail
        } else {
            ActionStatus::Success
        };
        let action = &mut self.actions[index];
        action.status = status;
        action.signature.get_or_insert_with(|| log.signature.clone());

        match status {
            ActionStatus::Fail => warn!(
                id = action.id,
                err = log.err.as_deref().unwrap_or_default(),
                "ledger rejected action"
            ),
            _ => debug!(id = action.id, ?via, "ledger confirmed action"),
        }
        Some(Resolved {
            id: action.id,
            status,
            via,
        })
    }

    fn locate(&self, log: &LedgerLog) -> Option<(usize, Resolution)> {
        let is_pending = |index: &usize| self.actions[*index].status == ActionStatus::Pending;

        if let Some(id) = log.action_id {
            return self
                .index_of(id)
                .filter(is_pending)
                .map(|index| (index, Resolution::ById));
        }

        if let Some(index) = self
            .actions
            .iter()
            .position(|action| action.signature.as_deref() == Some(log.signature.as_str()))
        {
            return is_pending(&index).then_some((index, Resolution::BySignature));
        }

        self.actions
            .iter()
            .position(|action| {
                action.status == ActionStatus::Pending
                    && action.owner != self.local_player
                    && action.signature.is_none()
                    && log.owner.map_or(true, |owner| owner == action.owner)
                    && log.card.map_or(true, |card| card == action.card)
            })
            .map(|index| (index, Resolution::Fifo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{ARCHERS, GIANT};

    fn log(signature: &str) -> LedgerLog {
        LedgerLog {
            signature: signature.to_string(),
            ..LedgerLog::default()
        }
    }

    #[test]
    fn test_resolves_by_action_id() {
        let mut actions = PendingActions::new(0);
        let a = actions.register(0, GIANT);
        let b = actions.register(0, ARCHERS);

        let resolved = actions
            .apply(&LedgerLog {
                action_id: Some(b),
                ..log("sig-b")
            })
            .unwrap();
        assert_eq!(resolved.id, b);
        assert_eq!(resolved.via, Resolution::ById);
        assert_eq!(actions.status(a), Some(ActionStatus::Pending));
        assert_eq!(actions.status(b), Some(ActionStatus::Success));
    }

    #[test]
    fn test_resolves_by_signature_and_marks_failure() {
        let mut actions = PendingActions::new(0);
        let a = actions.register(0, GIANT);
        assert!(actions.attach_signature(a, "sig-a"));
        assert!(!actions.attach_signature(99, "nope"));

        let resolved = actions
            .apply(&LedgerLog {
                err: Some("NotEnoughElixir".into()),
                ..log("sig-a")
            })
            .unwrap();
        assert_eq!(resolved.via, Resolution::BySignature);
        assert_eq!(resolved.status, ActionStatus::Fail);

        // Already settled: a replayed log changes nothing.
        assert_eq!(actions.apply(&log("sig-a")), None);
        assert_eq!(actions.status(a), Some(ActionStatus::Fail));
    }

    #[test]
    fn test_fifo_fallback_only_takes_opponent_markers() {
        let mut actions = PendingActions::new(0);
        let mine = actions.register(0, GIANT);
        let first = actions.register(1, GIANT);
        let second = actions.register(1, ARCHERS);

        let resolved = actions.apply(&log("unknown-1")).unwrap();
        assert_eq!(resolved.id, first);
        assert_eq!(resolved.via, Resolution::Fifo);

        let resolved = actions
            .apply(&LedgerLog {
                card: Some(ARCHERS),
                ..log("unknown-2")
            })
            .unwrap();
        assert_eq!(resolved.id, second);

        assert_eq!(actions.apply(&log("unknown-3")), None);
        assert_eq!(actions.status(mine), Some(ActionStatus::Pending));
    }

    #[test]
    fn test_prune_settled() {
        let mut actions = PendingActions::new(0);
        let a = actions.register(1, GIANT);
        actions.register(0, GIANT);
        actions.apply(&LedgerLog {
            action_id: Some(a),
            ..log("x")
        });

        assert_eq!(actions.prune_settled(), 1);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions.pending().count(), 1);
        assert!(actions.get(a).is_none());
    }

    #[test]
    fn test_stale_action_id_never_falls_back_to_fifo() {
        let mut actions = PendingActions::new(0);
        let settled = actions.register(1, GIANT);
        let settle = LedgerLog {
            action_id: Some(settled),
            ..log("sig-1")
        };
        assert!(actions.apply(&settle).is_some());
        assert_eq!(actions.prune_settled(), 1);

        let fresh = actions.register(1, GIANT);
        assert_eq!(actions.apply(&settle), None);
        assert_eq!(
            actions.apply(&LedgerLog {
                action_id: Some(99),
                ..log("sig-99")
            }),
            None
        );
        assert_eq!(actions.status(fresh), Some(ActionStatus::Pending));
    }
}
