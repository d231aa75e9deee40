//! Balance view: per-user rollup of open obligations across receipts.
//!
//! Deliberately a sum, not a graph simplification — "A owes B" and "B owes
//! A" edges from different receipts both stay open until settled.

use std::sync::Arc;

use tally_schemas::Balance;
use tally_store::{CancelToken, Store};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::ledger::LedgerService;

pub struct BalanceService<S> {
    ledger: LedgerService<S>,
}

impl<S: Store> BalanceService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            ledger: LedgerService::new(store),
        }
    }

    /// Open debtor/creditor totals and the resulting net position.
    pub async fn balance(&self, user_id: Uuid, cancel: &CancelToken) -> CoreResult<Balance> {
        let (owes_cents, is_owed_cents) = self.ledger.balance_components(user_id, cancel).await?;
        Ok(Balance {
            owes_cents,
            is_owed_cents,
            net_cents: is_owed_cents - owes_cents,
        })
    }
}
