//! Busy/idle bookkeeping for the Apply and Save actions
//!
//! The orchestrator is the only writer of these states. Collaborators signal
//! completion through session events, and the session forwards them here.

use tracing::{debug, warn};

use crate::error::{ApplyBlock, EditorError, LedgerError, Result};

/// Apply action state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyState {
    #[default]
    Idle,
    /// Waiting for the render collaborator to report the new image
    Transforming { apply_id: u64 },
}

/// Save action state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveState {
    #[default]
    Idle,
    Submitting,
}

#[derive(Debug, Clone)]
pub struct ApplyOrchestrator {
    apply: ApplyState,
    save: SaveState,
    next_apply_id: u64,
    /// Credit fee per apply (negative delta)
    fee: i64,
    /// Last balance reported by the ledger (or the initial balance)
    reported_balance: i64,
    /// Debits dispatched but not yet settled
    in_flight: i64,
    /// Apply whose ledger balance was adopted last; replies for older applies are stale
    last_settled_apply: u64,
}

impl ApplyOrchestrator {
    pub fn new(credit_balance: i64, fee: i64) -> Self {
        Self {
            apply: ApplyState::Idle,
            save: SaveState::Idle,
            next_apply_id: 1,
            fee,
            reported_balance: credit_balance,
            in_flight: 0,
            last_settled_apply: 0,
        }
    }

    pub fn apply_state(&self) -> ApplyState {
        self.apply
    }

    pub fn save_state(&self) -> SaveState {
        self.save
    }

    pub fn is_transforming(&self) -> bool {
        matches!(self.apply, ApplyState::Transforming { .. })
    }

    pub fn is_submitting(&self) -> bool {
        self.save == SaveState::Submitting
    }

    pub fn fee(&self) -> i64 {
        self.fee
    }

    /// Balance with in-flight debits already taken off
    pub fn credit_balance(&self) -> i64 {
        self.reported_balance + self.in_flight * self.fee
    }

    /// Why apply is disabled, or `Ok` if it may run
    pub fn check_apply(&self, has_pending: bool) -> std::result::Result<(), ApplyBlock> {
        if self.is_transforming() {
            return Err(ApplyBlock::Transforming);
        }
        if !has_pending {
            return Err(ApplyBlock::NothingPending);
        }
        let balance = self.credit_balance();
        if balance + self.fee < 0 {
            return Err(ApplyBlock::InsufficientCredits { balance, fee: self.fee });
        }
        Ok(())
    }

    /// Idle -> Transforming, reserving one fee. Returns the apply id.
    pub fn begin_apply(&mut self) -> u64 {
        let apply_id = self.next_apply_id;
        self.next_apply_id += 1;
        self.apply = ApplyState::Transforming { apply_id };
        self.in_flight += 1;
        apply_id
    }

    /// Transforming -> Idle; ignores completions for other applies
    pub fn finish_render(&mut self, apply_id: u64) -> bool {
        match self.apply {
            ApplyState::Transforming { apply_id: current } if current == apply_id => {
                self.apply = ApplyState::Idle;
                true
            }
            _ => {
                warn!(apply_id, state = ?self.apply, "ignoring stale render completion");
                false
            }
        }
    }

    /// Record the ledger outcome of one dispatched debit
    ///
    /// On failure the reservation is released; nothing else is rolled back.
    /// A balance is only adopted if no later apply has reported one already,
    /// so replies settling out of order cannot inflate the mirror.
    pub fn settle_debit(&mut self, apply_id: u64, outcome: &std::result::Result<i64, LedgerError>) {
        self.in_flight = (self.in_flight - 1).max(0);
        match outcome {
            Ok(balance) if apply_id > self.last_settled_apply => {
                self.reported_balance = *balance;
                self.last_settled_apply = apply_id;
            }
            Ok(balance) => {
                debug!(apply_id, balance, latest = self.last_settled_apply, "ignoring stale ledger balance");
            }
            Err(_) => {}
        }
    }

    /// Idle -> Submitting
    pub fn begin_save(&mut self) -> Result<()> {
        if self.is_submitting() {
            return Err(EditorError::SaveInProgress);
        }
        self.save = SaveState::Submitting;
        Ok(())
    }

    /// Submitting -> Idle
    pub fn finish_save(&mut self) {
        self.save = SaveState::Idle;
    }
}
