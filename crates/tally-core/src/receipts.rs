//! Receipt service: lifecycle, membership, optimistic concurrency, and
//! settle-summary reconciliation.
//!
//! Mutation discipline: read the document, validate preconditions, build
//! the full replacement document (version + 1), then issue a conditional
//! write gated on the version that was read.  `update` carries the
//! client's version and surfaces [`CoreError::VersionConflict`] when the
//! gate fails; every other mutation carries no client version and retries
//! internally after a lost race, revalidating preconditions each round.
//! No in-process lock is held across store calls.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tally_schemas::{
    Charge, Item, LedgerEntry, NewReceipt, Participant, ParticipantRole, Receipt, ReceiptPatch,
    ReceiptStatus,
};
use tally_split::{
    build_settle_summary, compute_breakdown, compute_totals, overlay_settlement_progress,
    validate_charges, validate_items, validate_payments, validate_user_references,
};
use tally_store::{CancelToken, Store, UnfinalizeOutcome};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::ledger::{LedgerService, MAX_CONDITIONAL_RETRIES};

pub struct ReceiptService<S> {
    store: Arc<S>,
}

impl<S: Store> ReceiptService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch a receipt visible to `caller`: not deleted, caller is owner or
    /// participant.  Everything else is `NotFound` — invisibility and
    /// absence are indistinguishable to the caller.
    async fn fetch_visible(
        &self,
        receipt_id: Uuid,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        let receipt = self
            .store
            .fetch_receipt(receipt_id, cancel)
            .await?
            .ok_or(CoreError::NotFound)?;
        if receipt.is_deleted || !(receipt.is_owner(caller) || receipt.is_participant(caller)) {
            return Err(CoreError::NotFound);
        }
        Ok(receipt)
    }

    /// Fetch a visible receipt and require the caller to be its owner.
    async fn fetch_owned(
        &self,
        receipt_id: Uuid,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        let receipt = self.fetch_visible(receipt_id, caller, cancel).await?;
        if !receipt.is_owner(caller) {
            return Err(CoreError::NotOwner);
        }
        Ok(receipt)
    }

    pub async fn get(
        &self,
        receipt_id: Uuid,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        self.fetch_visible(receipt_id, caller, cancel).await
    }

    pub async fn list(&self, caller: Uuid, cancel: &CancelToken) -> CoreResult<Vec<Receipt>> {
        Ok(self.store.list_receipts_for_user(caller, cancel).await?)
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create a draft receipt; the caller becomes the owner and the first
    /// participant.
    pub async fn create(
        &self,
        payload: NewReceipt,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        let now = Utc::now();
        let receipt = Receipt {
            receipt_id: Uuid::new_v4(),
            owner_id: caller,
            title: payload.title,
            description: payload.description,
            comments: payload.comments,
            folder_id: payload.folder_id,
            status: ReceiptStatus::Draft,
            participants: vec![Participant {
                user_id: caller,
                role: ParticipantRole::Owner,
                joined_at: now,
            }],
            items: vec![],
            charges: vec![],
            payments: vec![],
            settle_summary: vec![],
            subtotal_cents: 0,
            total_cents: 0,
            version: 1,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            created_by: caller,
            updated_by: caller,
        };
        self.store.insert_receipt(&receipt, cancel).await?;
        info!(receipt_id = %receipt.receipt_id, owner_id = %caller, "receipt created");
        Ok(receipt)
    }

    // -----------------------------------------------------------------------
    // Update (client-versioned)
    // -----------------------------------------------------------------------

    /// Apply a partial patch to a draft.  Preconditions: caller is owner,
    /// status is draft, `patch.version` matches the stored version.  The
    /// settle summary and the stored totals are recomputed from the
    /// effective (patched + unchanged) fields before the conditional write.
    pub async fn update(
        &self,
        receipt_id: Uuid,
        caller: Uuid,
        patch: ReceiptPatch,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        let receipt = self.fetch_owned(receipt_id, caller, cancel).await?;
        if receipt.status != ReceiptStatus::Draft {
            return Err(CoreError::NotDraft);
        }
        if patch.version != receipt.version {
            return Err(CoreError::VersionConflict {
                client_version: patch.version,
                current_version: receipt.version,
            });
        }

        if let Some(items) = &patch.items {
            validate_items(items)?;
        }
        if let Some(charges) = &patch.charges {
            validate_charges(charges)?;
        }
        if let Some(payments) = &patch.payments {
            validate_payments(payments)?;
        }
        let participant_ids: BTreeSet<Uuid> = receipt.participant_ids().into_iter().collect();
        validate_user_references(
            &participant_ids,
            patch.items.as_deref().unwrap_or(&[]),
            patch.charges.as_deref().unwrap_or(&[]),
            patch.payments.as_deref().unwrap_or(&[]),
        )?;

        let expected_version = receipt.version;
        let mut updated = receipt;
        if let Some(title) = patch.title {
            updated.title = title;
        }
        if let Some(description) = patch.description {
            updated.description = Some(description);
        }
        if let Some(comments) = patch.comments {
            updated.comments = Some(comments);
        }
        if let Some(folder_id) = patch.folder_id {
            updated.folder_id = Some(folder_id);
        }
        if let Some(items) = patch.items {
            // Server assigns line ids; client-submitted ids are not trusted.
            updated.items = items
                .into_iter()
                .map(|item| Item {
                    item_id: Uuid::new_v4(),
                    name: item.name,
                    unit_price_cents: item.unit_price_cents,
                    quantity: item.quantity,
                    taxable: item.taxable,
                    splits: item.splits,
                })
                .collect();
        }
        if let Some(charges) = patch.charges {
            updated.charges = charges
                .into_iter()
                .map(|charge| Charge {
                    charge_id: Uuid::new_v4(),
                    name: charge.name,
                    unit_price_cents: charge.unit_price_cents,
                    taxable: charge.taxable,
                    splits: charge.splits,
                })
                .collect();
        }
        if let Some(payments) = patch.payments {
            updated.payments = payments;
        }

        self.refresh_derived_fields(&mut updated)?;
        updated.version += 1;
        updated.updated_at = Utc::now();
        updated.updated_by = caller;

        let applied = self
            .store
            .update_receipt_versioned(&updated, expected_version, cancel)
            .await?;
        if !applied {
            // A concurrent writer won between our read and our write.
            let current_version = self
                .store
                .fetch_receipt(receipt_id, cancel)
                .await?
                .map(|r| r.version)
                .unwrap_or(expected_version);
            return Err(CoreError::VersionConflict {
                client_version: patch.version,
                current_version,
            });
        }

        info!(receipt_id = %receipt_id, version = updated.version, "receipt updated");
        Ok(updated)
    }

    /// Recompute subtotal, total and the base settle summary from the
    /// document's current fields.
    fn refresh_derived_fields(&self, receipt: &mut Receipt) -> CoreResult<()> {
        let (subtotal_cents, total_cents) = compute_totals(&receipt.items, &receipt.charges)?;
        receipt.subtotal_cents = subtotal_cents;
        receipt.total_cents = total_cents;
        let breakdown = compute_breakdown(
            &receipt.participants,
            &receipt.items,
            &receipt.charges,
            &receipt.payments,
        )?;
        receipt.settle_summary = build_settle_summary(&receipt.participants, &breakdown);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Add a member (resolved by email) to a draft receipt.
    pub async fn add_member(
        &self,
        receipt_id: Uuid,
        email: &str,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        for _ in 0..MAX_CONDITIONAL_RETRIES {
            let receipt = self.fetch_owned(receipt_id, caller, cancel).await?;
            if receipt.status != ReceiptStatus::Draft {
                return Err(CoreError::NotDraft);
            }
            let user = self
                .store
                .find_user_by_email(email, cancel)
                .await?
                .ok_or(CoreError::UnknownEmail)?;
            if receipt.is_participant(user.user_id) {
                return Err(CoreError::AlreadyMember);
            }

            let expected_version = receipt.version;
            let mut updated = receipt;
            let now = Utc::now();
            updated.participants.push(Participant {
                user_id: user.user_id,
                role: ParticipantRole::Member,
                joined_at: now,
            });
            // Equal-split charges divide across participants, so membership
            // changes move liabilities.
            self.refresh_derived_fields(&mut updated)?;
            updated.version += 1;
            updated.updated_at = now;
            updated.updated_by = caller;

            if self
                .store
                .update_receipt_versioned(&updated, expected_version, cancel)
                .await?
            {
                info!(receipt_id = %receipt_id, user_id = %user.user_id, "member added");
                return Ok(updated);
            }
            warn!(receipt_id = %receipt_id, "add_member lost conditional write; retrying");
        }
        Err(CoreError::Internal(
            "add_member retry budget exhausted".to_string(),
        ))
    }

    /// Remove a member from a draft receipt.  Refused while the member
    /// appears in any item or charge split or has a recorded payment.
    pub async fn remove_member(
        &self,
        receipt_id: Uuid,
        member_id: Uuid,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        for _ in 0..MAX_CONDITIONAL_RETRIES {
            let receipt = self.fetch_owned(receipt_id, caller, cancel).await?;
            if receipt.status != ReceiptStatus::Draft {
                return Err(CoreError::NotDraft);
            }
            if member_id == receipt.owner_id {
                return Err(CoreError::CannotRemoveOwner);
            }
            if !receipt.is_participant(member_id) {
                return Err(CoreError::NotMember);
            }

            let in_item_splits = receipt
                .items
                .iter()
                .flat_map(|item| &item.splits)
                .any(|split| split.user_id == member_id);
            let in_charge_splits = receipt
                .charges
                .iter()
                .flat_map(|charge| &charge.splits)
                .any(|split| split.user_id == member_id);
            let has_payment = receipt
                .payments
                .iter()
                .any(|payment| payment.user_id == member_id);
            if in_item_splits || in_charge_splits || has_payment {
                return Err(CoreError::MemberHasObligations);
            }

            let expected_version = receipt.version;
            let mut updated = receipt;
            updated.participants.retain(|p| p.user_id != member_id);
            self.refresh_derived_fields(&mut updated)?;
            updated.version += 1;
            updated.updated_at = Utc::now();
            updated.updated_by = caller;

            if self
                .store
                .update_receipt_versioned(&updated, expected_version, cancel)
                .await?
            {
                info!(receipt_id = %receipt_id, user_id = %member_id, "member removed");
                return Ok(updated);
            }
            warn!(receipt_id = %receipt_id, "remove_member lost conditional write; retrying");
        }
        Err(CoreError::Internal(
            "remove_member retry budget exhausted".to_string(),
        ))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Finalize a draft: lock the document and create its ledger entries
    /// in one commit.  Preconditions: owner, draft, positive total, and
    /// payments summing exactly to the total.
    pub async fn finalize(
        &self,
        receipt_id: Uuid,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<(Receipt, Vec<LedgerEntry>)> {
        for _ in 0..MAX_CONDITIONAL_RETRIES {
            let receipt = self.fetch_owned(receipt_id, caller, cancel).await?;
            if receipt.status != ReceiptStatus::Draft {
                return Err(CoreError::NotDraft);
            }
            if receipt.total_cents <= 0 {
                return Err(CoreError::EmptyReceipt);
            }
            let paid_cents = receipt.payments_total_cents();
            if paid_cents != receipt.total_cents {
                return Err(CoreError::PaymentMismatch {
                    paid_cents,
                    total_cents: receipt.total_cents,
                });
            }

            let expected_version = receipt.version;
            let now = Utc::now();
            let mut finalized = receipt;
            finalized.status = ReceiptStatus::Finalized;
            finalized.version += 1;
            finalized.updated_at = now;
            finalized.updated_by = caller;

            let breakdown = compute_breakdown(
                &finalized.participants,
                &finalized.items,
                &finalized.charges,
                &finalized.payments,
            )?;
            finalized.settle_summary =
                build_settle_summary(&finalized.participants, &breakdown);
            let entries = LedgerService::<S>::derive_entries(&finalized, &breakdown, now)?;

            if self
                .store
                .commit_finalize(&finalized, expected_version, &entries, cancel)
                .await?
            {
                info!(
                    receipt_id = %receipt_id,
                    entry_count = entries.len(),
                    total_cents = finalized.total_cents,
                    "receipt finalized"
                );
                return Ok((finalized, entries));
            }
            warn!(receipt_id = %receipt_id, "finalize lost conditional write; retrying");
        }
        Err(CoreError::Internal(
            "finalize retry budget exhausted".to_string(),
        ))
    }

    /// Revert a finalized receipt to draft, soft-deleting its ledger
    /// entries.  Refused once any entry has settlement progress.
    pub async fn unfinalize(
        &self,
        receipt_id: Uuid,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        for _ in 0..MAX_CONDITIONAL_RETRIES {
            let receipt = self.fetch_owned(receipt_id, caller, cancel).await?;
            if receipt.status != ReceiptStatus::Finalized {
                return Err(CoreError::NotFinalized);
            }

            let expected_version = receipt.version;
            let mut reverted = receipt;
            reverted.status = ReceiptStatus::Draft;
            reverted.version += 1;
            reverted.updated_at = Utc::now();
            reverted.updated_by = caller;
            // Entries are about to disappear; the summary reverts to its
            // no-progress base.
            self.refresh_derived_fields(&mut reverted)?;

            match self
                .store
                .commit_unfinalize(&reverted, expected_version, cancel)
                .await?
            {
                UnfinalizeOutcome::Committed => {
                    info!(receipt_id = %receipt_id, "receipt unfinalized");
                    return Ok(reverted);
                }
                UnfinalizeOutcome::SettlementProgress => {
                    return Err(CoreError::AlreadySettled);
                }
                UnfinalizeOutcome::StateChanged => {
                    warn!(receipt_id = %receipt_id, "unfinalize lost conditional write; retrying");
                }
            }
        }
        Err(CoreError::Internal(
            "unfinalize retry budget exhausted".to_string(),
        ))
    }

    /// Soft-delete a receipt.  Ledger entries are left untouched.
    pub async fn soft_delete(
        &self,
        receipt_id: Uuid,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<()> {
        for _ in 0..MAX_CONDITIONAL_RETRIES {
            let receipt = self.fetch_owned(receipt_id, caller, cancel).await?;
            let expected_version = receipt.version;
            let mut deleted = receipt;
            deleted.is_deleted = true;
            deleted.version += 1;
            deleted.updated_at = Utc::now();
            deleted.updated_by = caller;

            if self
                .store
                .update_receipt_versioned(&deleted, expected_version, cancel)
                .await?
            {
                info!(receipt_id = %receipt_id, "receipt soft-deleted");
                return Ok(());
            }
            warn!(receipt_id = %receipt_id, "soft_delete lost conditional write; retrying");
        }
        Err(CoreError::Internal(
            "soft_delete retry budget exhausted".to_string(),
        ))
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Refresh the stored settle summary from the receipt's fields plus
    /// the ledger's settlement progress.  Called after every settlement
    /// event.  Not version-gated: this writes derived state only.
    pub async fn reconcile_settle_summary(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<()> {
        let receipt = self
            .store
            .fetch_receipt(receipt_id, cancel)
            .await?
            .ok_or(CoreError::NotFound)?;
        if receipt.is_deleted {
            return Err(CoreError::NotFound);
        }

        let breakdown = compute_breakdown(
            &receipt.participants,
            &receipt.items,
            &receipt.charges,
            &receipt.payments,
        )?;
        let mut summary = build_settle_summary(&receipt.participants, &breakdown);

        let entries = self.store.list_entries_for_receipt(receipt_id, cancel).await?;
        let mut settled_by_debtor = std::collections::BTreeMap::new();
        for entry in &entries {
            *settled_by_debtor.entry(entry.debtor_id).or_insert(0_i64) +=
                entry.settled_amount_cents;
        }
        let now = Utc::now();
        overlay_settlement_progress(&mut summary, &settled_by_debtor, now);

        self.store
            .replace_settle_summary(receipt_id, &summary, now, cancel)
            .await?;
        debug!(receipt_id = %receipt_id, "settle summary reconciled");
        Ok(())
    }
}
