//! Ledger service: obligation derivation, settlement, balance components.
//!
//! Obligation derivation is a pure pipeline (breakdown → matching →
//! entries); persistence happens inside the receipt finalize commit so the
//! status flip and the entry insert are one atomic unit.  Settlement rides
//! on the entry-level conditional write: a lost race re-reads the entry
//! and revalidates against the refreshed open amount, so
//! `settled <= amount` holds without any lock spanning store round trips.

use std::sync::Arc;

use chrono::Utc;
use tally_schemas::{EntryStatus, LedgerEntry, Receipt, ReceiptStatus};
use tally_split::{build_obligations, SplitBreakdown};
use tally_store::{CancelToken, Store};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Upper bound on conditional-write retries before the operation reports
/// an internal fault.  Contention on a single entry resolving this many
/// times in a row is not a realistic workload.
pub(crate) const MAX_CONDITIONAL_RETRIES: usize = 16;

pub struct LedgerService<S> {
    store: Arc<S>,
}

impl<S: Store> LedgerService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // -----------------------------------------------------------------------
    // Derivation (pure)
    // -----------------------------------------------------------------------

    /// Derive the ledger entries implied by a finalized receipt.
    ///
    /// Preconditions: the receipt is finalized and its total is positive.
    /// Entries are numbered by emission order (`position`), which is
    /// deterministic for a given receipt content.
    pub fn derive_entries(
        receipt: &Receipt,
        breakdown: &SplitBreakdown,
        now: chrono::DateTime<Utc>,
    ) -> CoreResult<Vec<LedgerEntry>> {
        if receipt.status != ReceiptStatus::Finalized {
            return Err(CoreError::NotFinalized);
        }
        if receipt.total_cents <= 0 {
            return Err(CoreError::EmptyReceipt);
        }

        let entries = build_obligations(&breakdown.net)
            .into_iter()
            .enumerate()
            .map(|(position, obligation)| LedgerEntry {
                entry_id: Uuid::new_v4(),
                receipt_id: receipt.receipt_id,
                debtor_id: obligation.debtor_id,
                creditor_id: obligation.creditor_id,
                amount_cents: obligation.amount_cents,
                settled_amount_cents: 0,
                status: EntryStatus::Pending,
                position: position as i32,
                is_deleted: false,
                settled_at: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Live entries for a receipt, in emission order.  Visibility of the
    /// receipt itself is the caller's concern (the facade checks it).
    pub async fn list_for_receipt(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Vec<LedgerEntry>> {
        Ok(self.store.list_entries_for_receipt(receipt_id, cancel).await?)
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Apply a (partial) settlement of `amount_cents` against an entry.
    ///
    /// Only the entry's debtor may settle.  The settled amount advances
    /// through a conditional write on the previously observed value; a
    /// lost race re-reads and revalidates, so the amount check is always
    /// against the freshest open amount.
    pub async fn settle(
        &self,
        entry_id: Uuid,
        amount_cents: i64,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<LedgerEntry> {
        for _ in 0..MAX_CONDITIONAL_RETRIES {
            let entry = self
                .store
                .fetch_entry(entry_id, cancel)
                .await?
                .ok_or(CoreError::NotFound)?;
            if entry.is_deleted {
                return Err(CoreError::AlreadyDeleted);
            }
            if entry.debtor_id != caller {
                return Err(CoreError::NotDebtor);
            }

            let open_cents = entry.open_amount_cents();
            if amount_cents < 0 || amount_cents > open_cents {
                return Err(CoreError::InvalidSettlementAmount {
                    requested_cents: amount_cents,
                    open_cents,
                });
            }

            let new_settled = entry.settled_amount_cents + amount_cents;
            let status = EntryStatus::derive_for(entry.amount_cents, new_settled);
            let now = Utc::now();
            let settled_at = if status == EntryStatus::Settled {
                Some(now)
            } else {
                entry.settled_at
            };

            let applied = self
                .store
                .settle_entry_conditional(
                    entry_id,
                    entry.settled_amount_cents,
                    new_settled,
                    status,
                    settled_at,
                    now,
                    cancel,
                )
                .await?;

            if applied {
                info!(
                    entry_id = %entry_id,
                    amount_cents,
                    settled_amount_cents = new_settled,
                    status = status.as_str(),
                    "ledger entry settled"
                );
                return Ok(LedgerEntry {
                    settled_amount_cents: new_settled,
                    status,
                    settled_at,
                    updated_at: now,
                    ..entry
                });
            }
            warn!(entry_id = %entry_id, "settlement lost conditional write; retrying");
        }

        Err(CoreError::Internal(
            "settlement retry budget exhausted".to_string(),
        ))
    }

    // -----------------------------------------------------------------------
    // Aggregation
    // -----------------------------------------------------------------------

    /// Open amounts owed / owed-to for a user across all receipts.
    pub async fn balance_components(
        &self,
        user_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<(i64, i64)> {
        Ok(self.store.balance_components(user_id, cancel).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests (derivation only; settlement is covered through the facade tests)
// ---------------------------------------------------------------------------
