//! The facade surfaced to the transport layer.
//!
//! One method per public operation; the facade owns the composition rules
//! that span services (entry listing checks receipt visibility first;
//! settlement propagates progress into the receipt's settle summary).  The
//! transport layer maps [`crate::ErrorClass`] onto status codes and stays
//! out of the semantics entirely.

use std::sync::Arc;

use tally_schemas::{Balance, LedgerEntry, NewReceipt, Receipt, ReceiptPatch};
use tally_store::{CancelToken, Store};
use tracing::warn;
use uuid::Uuid;

use crate::balance::BalanceService;
use crate::error::{CoreError, CoreResult};
use crate::ledger::LedgerService;
use crate::receipts::ReceiptService;

pub struct CoreApi<S> {
    receipts: ReceiptService<S>,
    ledger: LedgerService<S>,
    balance: BalanceService<S>,
}

impl<S: Store> CoreApi<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            receipts: ReceiptService::new(Arc::clone(&store)),
            ledger: LedgerService::new(Arc::clone(&store)),
            balance: BalanceService::new(store),
        }
    }

    // -----------------------------------------------------------------------
    // Receipts
    // -----------------------------------------------------------------------

    pub async fn create_receipt(
        &self,
        caller: Uuid,
        payload: NewReceipt,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        self.receipts.create(payload, caller, cancel).await
    }

    pub async fn list_receipts(
        &self,
        caller: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Vec<Receipt>> {
        self.receipts.list(caller, cancel).await
    }

    pub async fn get_receipt(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        self.receipts.get(receipt_id, caller, cancel).await
    }

    pub async fn update_receipt(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        patch: ReceiptPatch,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        self.receipts.update(receipt_id, caller, patch, cancel).await
    }

    pub async fn add_member(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        email: &str,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        self.receipts.add_member(receipt_id, email, caller, cancel).await
    }

    pub async fn remove_member(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        member_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        self.receipts
            .remove_member(receipt_id, member_id, caller, cancel)
            .await
    }

    pub async fn finalize(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<(Receipt, Vec<LedgerEntry>)> {
        self.receipts.finalize(receipt_id, caller, cancel).await
    }

    pub async fn unfinalize(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Receipt> {
        self.receipts.unfinalize(receipt_id, caller, cancel).await
    }

    pub async fn soft_delete_receipt(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<()> {
        self.receipts.soft_delete(receipt_id, caller, cancel).await
    }

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    /// Live entries of a receipt, visible only to its participants.
    pub async fn list_entries(
        &self,
        caller: Uuid,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> CoreResult<Vec<LedgerEntry>> {
        self.receipts.get(receipt_id, caller, cancel).await?;
        self.ledger.list_for_receipt(receipt_id, cancel).await
    }

    /// Settle part (or all) of an entry and propagate the progress into
    /// the receipt's settle summary.
    pub async fn settle_entry(
        &self,
        caller: Uuid,
        entry_id: Uuid,
        amount_cents: i64,
        cancel: &CancelToken,
    ) -> CoreResult<LedgerEntry> {
        let entry = self.ledger.settle(entry_id, amount_cents, caller, cancel).await?;
        // The settlement is committed; a cancellation observed during the
        // summary refresh does not undo it and is reported as success per
        // the cancellation contract.  The summary is derived state and the
        // next settlement event repairs it.
        match self
            .receipts
            .reconcile_settle_summary(entry.receipt_id, cancel)
            .await
        {
            Ok(()) | Err(CoreError::Cancelled) => {}
            Err(err) => {
                warn!(receipt_id = %entry.receipt_id, error = %err, "settle summary reconcile failed");
                return Err(err);
            }
        }
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Balance
    // -----------------------------------------------------------------------

    pub async fn balance(&self, user_id: Uuid, cancel: &CancelToken) -> CoreResult<Balance> {
        self.balance.balance(user_id, cancel).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tally_schemas::{
        EntryStatus, ItemInput, Payment, ReceiptStatus, SettleStatus, Split,
    };
    use tally_split::ValidationError;
    use tally_store::MemStore;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn cancel() -> CancelToken {
        CancelToken::new()
    }

    fn split(n: u128, share: f64) -> Split {
        Split {
            user_id: uid(n),
            share_quantity: share,
        }
    }

    fn item(price: i64, qty: f64, splits: Vec<Split>) -> ItemInput {
        ItemInput {
            name: "line".to_string(),
            unit_price_cents: price,
            quantity: qty,
            taxable: true,
            splits,
        }
    }

    fn payment(n: u128, cents: i64) -> Payment {
        Payment {
            user_id: uid(n),
            amount_paid_cents: cents,
        }
    }

    fn new_receipt(title: &str) -> NewReceipt {
        NewReceipt {
            title: title.to_string(),
            ..Default::default()
        }
    }

    async fn setup() -> (Arc<MemStore>, CoreApi<MemStore>) {
        let store = Arc::new(MemStore::new());
        let api = CoreApi::new(Arc::clone(&store));
        (store, api)
    }

    /// Draft owned by user 1 with user 2 as member, one 2000-cent item
    /// split evenly, paid in full by user 1.  Returns the receipt at v4.
    async fn two_person_draft(store: &MemStore, api: &CoreApi<MemStore>) -> Receipt {
        store.register_user_with_id(uid(1), "a@example.com").await;
        store.register_user_with_id(uid(2), "b@example.com").await;

        let receipt = api
            .create_receipt(uid(1), new_receipt("dinner"), &cancel())
            .await
            .unwrap();
        let receipt = api
            .add_member(uid(1), receipt.receipt_id, "b@example.com", &cancel())
            .await
            .unwrap();
        let receipt = api
            .update_receipt(
                uid(1),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    items: Some(vec![item(2000, 1.0, vec![split(1, 0.5), split(2, 0.5)])]),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap();
        api.update_receipt(
            uid(1),
            receipt.receipt_id,
            ReceiptPatch {
                version: receipt.version,
                payments: Some(vec![payment(1, 2000)]),
                ..Default::default()
            },
            &cancel(),
        )
        .await
        .unwrap()
    }

    // --- creation and reads ---

    #[tokio::test]
    async fn create_makes_owner_the_first_participant() {
        let (_, api) = setup().await;
        let receipt = api
            .create_receipt(uid(1), new_receipt("dinner"), &cancel())
            .await
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Draft);
        assert_eq!(receipt.version, 1);
        assert_eq!(receipt.participants.len(), 1);
        assert_eq!(receipt.participants[0].user_id, uid(1));
        assert_eq!(receipt.owner_id, uid(1));
        assert!(receipt.settle_summary.is_empty());
    }

    #[tokio::test]
    async fn receipt_is_invisible_to_strangers() {
        let (_, api) = setup().await;
        let receipt = api
            .create_receipt(uid(1), new_receipt("dinner"), &cancel())
            .await
            .unwrap();
        let err = api
            .get_receipt(uid(9), receipt.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotFound);
    }

    #[tokio::test]
    async fn members_can_read_but_not_mutate() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;

        assert!(api
            .get_receipt(uid(2), receipt.receipt_id, &cancel())
            .await
            .is_ok());

        let err = api
            .update_receipt(
                uid(2),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    title: Some("hijacked".to_string()),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotOwner);
    }

    // --- update ---

    #[tokio::test]
    async fn update_recomputes_totals_and_summary() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;

        assert_eq!(receipt.subtotal_cents, 2000);
        assert_eq!(receipt.total_cents, 2000);
        assert_eq!(receipt.version, 4); // create + add_member + 2 updates

        let summary = &receipt.settle_summary;
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].net_cents, -1000);
        assert_eq!(summary[0].status, SettleStatus::Creditor);
        assert_eq!(summary[1].net_cents, 1000);
        assert_eq!(summary[1].status, SettleStatus::Pending);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_before_any_write() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;

        let err = api
            .update_receipt(
                uid(1),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version - 1,
                    title: Some("stale".to_string()),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::VersionConflict {
                client_version: receipt.version - 1,
                current_version: receipt.version,
            }
        );
        // Loser re-reads and retries successfully.
        let updated = api
            .update_receipt(
                uid(1),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    title: Some("fresh".to_string()),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "fresh");
        assert_eq!(updated.version, receipt.version + 1);
    }

    #[tokio::test]
    async fn update_rejects_split_for_non_participant() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;

        let err = api
            .update_receipt(
                uid(1),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    items: Some(vec![item(500, 1.0, vec![split(9, 1.0)])]),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::Validation(ValidationError::NonParticipantReference { user_id: uid(9) })
        );
    }

    #[tokio::test]
    async fn update_rejects_structurally_invalid_items() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let err = api
            .update_receipt(
                uid(1),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    items: Some(vec![item(-5, 1.0, vec![])]),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    // --- membership ---

    #[tokio::test]
    async fn add_member_requires_known_email() {
        let (_, api) = setup().await;
        let receipt = api
            .create_receipt(uid(1), new_receipt("dinner"), &cancel())
            .await
            .unwrap();
        let err = api
            .add_member(uid(1), receipt.receipt_id, "ghost@example.com", &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::UnknownEmail);
    }

    #[tokio::test]
    async fn add_member_twice_is_rejected() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let err = api
            .add_member(uid(1), receipt.receipt_id, "b@example.com", &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::AlreadyMember);
    }

    #[tokio::test]
    async fn remove_member_blocked_by_splits_then_allowed() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;

        let err = api
            .remove_member(uid(1), receipt.receipt_id, uid(2), &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::MemberHasObligations);

        // Owner edits the splits so user 2 no longer appears.
        let receipt = api
            .update_receipt(
                uid(1),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    items: Some(vec![item(2000, 1.0, vec![split(1, 1.0)])]),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap();

        let after = api
            .remove_member(uid(1), receipt.receipt_id, uid(2), &cancel())
            .await
            .unwrap();
        assert_eq!(after.participants.len(), 1);
        assert_eq!(after.version, receipt.version + 1);
    }

    #[tokio::test]
    async fn owner_cannot_be_removed() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let err = api
            .remove_member(uid(1), receipt.receipt_id, uid(1), &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::CannotRemoveOwner);
    }

    #[tokio::test]
    async fn removing_a_stranger_reports_not_member() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let err = api
            .remove_member(uid(1), receipt.receipt_id, uid(9), &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotMember);
    }

    // --- finalize ---

    #[tokio::test]
    async fn finalize_emits_ledger_and_locks_the_draft() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;

        let (finalized, entries) = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        assert_eq!(finalized.status, ReceiptStatus::Finalized);
        assert_eq!(finalized.version, receipt.version + 1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].debtor_id, uid(2));
        assert_eq!(entries[0].creditor_id, uid(1));
        assert_eq!(entries[0].amount_cents, 1000);
        assert_eq!(entries[0].status, EntryStatus::Pending);

        // Draft mutations are now refused.
        let err = api
            .update_receipt(
                uid(1),
                finalized.receipt_id,
                ReceiptPatch {
                    version: finalized.version,
                    title: Some("late edit".to_string()),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotDraft);

        // And so is a second finalize.
        let err = api
            .finalize(uid(1), finalized.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotDraft);
    }

    #[tokio::test]
    async fn finalize_requires_payments_matching_total() {
        let (store, api) = setup().await;
        store.register_user_with_id(uid(1), "a@example.com").await;
        store.register_user_with_id(uid(2), "b@example.com").await;
        let receipt = api
            .create_receipt(uid(1), new_receipt("dinner"), &cancel())
            .await
            .unwrap();
        let receipt = api
            .add_member(uid(1), receipt.receipt_id, "b@example.com", &cancel())
            .await
            .unwrap();
        let receipt = api
            .update_receipt(
                uid(1),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    items: Some(vec![item(2000, 1.0, vec![split(1, 0.5), split(2, 0.5)])]),
                    payments: Some(vec![payment(1, 1500)]),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .unwrap();

        let err = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::PaymentMismatch {
                paid_cents: 1500,
                total_cents: 2000,
            }
        );
    }

    #[tokio::test]
    async fn finalize_rejects_an_empty_receipt() {
        let (_, api) = setup().await;
        let receipt = api
            .create_receipt(uid(1), new_receipt("empty"), &cancel())
            .await
            .unwrap();
        let err = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::EmptyReceipt);
    }

    // --- settlement ---

    #[tokio::test]
    async fn settlement_progresses_entry_and_summary() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let (_, entries) = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        let entry_id = entries[0].entry_id;

        let entry = api
            .settle_entry(uid(2), entry_id, 400, &cancel())
            .await
            .unwrap();
        assert_eq!(entry.settled_amount_cents, 400);
        assert_eq!(entry.status, EntryStatus::PartiallySettled);
        assert!(entry.settled_at.is_none());

        let refreshed = api
            .get_receipt(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        let row = refreshed
            .settle_summary
            .iter()
            .find(|s| s.user_id == uid(2))
            .unwrap();
        assert_eq!(row.settled_amount_cents, 400);
        assert_eq!(row.status, SettleStatus::PartiallySettled);

        let entry = api
            .settle_entry(uid(2), entry_id, 600, &cancel())
            .await
            .unwrap();
        assert_eq!(entry.status, EntryStatus::Settled);
        assert!(entry.settled_at.is_some());

        let refreshed = api
            .get_receipt(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        let row = refreshed
            .settle_summary
            .iter()
            .find(|s| s.user_id == uid(2))
            .unwrap();
        assert!(row.is_settled);
        assert_eq!(row.status, SettleStatus::Settled);
        assert!(row.settled_at.is_some());
    }

    #[tokio::test]
    async fn only_the_debtor_may_settle() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let (_, entries) = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();

        let err = api
            .settle_entry(uid(1), entries[0].entry_id, 100, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotDebtor);
    }

    #[tokio::test]
    async fn overpayment_and_negative_amounts_are_rejected() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let (_, entries) = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        let entry_id = entries[0].entry_id;

        let err = api
            .settle_entry(uid(2), entry_id, 1001, &cancel())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidSettlementAmount {
                requested_cents: 1001,
                open_cents: 1000,
            }
        );
        let err = api
            .settle_entry(uid(2), entry_id, -1, &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSettlementAmount { .. }));

        // Partial settle narrows the valid range.
        api.settle_entry(uid(2), entry_id, 800, &cancel()).await.unwrap();
        let err = api
            .settle_entry(uid(2), entry_id, 300, &cancel())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidSettlementAmount {
                requested_cents: 300,
                open_cents: 200,
            }
        );
    }

    #[tokio::test]
    async fn settling_an_unknown_entry_reports_not_found() {
        let (_, api) = setup().await;
        let err = api
            .settle_entry(uid(2), uid(999), 100, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotFound);
    }

    // --- unfinalize ---

    #[tokio::test]
    async fn unfinalize_reverts_and_deletes_entries() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let (finalized, entries) = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();

        let reverted = api
            .unfinalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        assert_eq!(reverted.status, ReceiptStatus::Draft);
        assert_eq!(reverted.version, finalized.version + 1);

        assert!(api
            .list_entries(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap()
            .is_empty());

        // The old entry is dead, not merely hidden.
        let err = api
            .settle_entry(uid(2), entries[0].entry_id, 100, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::AlreadyDeleted);
    }

    #[tokio::test]
    async fn unfinalize_blocked_after_partial_settlement() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let (_, entries) = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        api.settle_entry(uid(2), entries[0].entry_id, 400, &cancel())
            .await
            .unwrap();

        let err = api
            .unfinalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::AlreadySettled);
    }

    #[tokio::test]
    async fn unfinalize_requires_finalized_status() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let err = api
            .unfinalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotFinalized);
    }

    // --- balance ---

    #[tokio::test]
    async fn balance_tracks_open_amounts() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let (_, entries) = api
            .finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();

        let a = api.balance(uid(1), &cancel()).await.unwrap();
        assert_eq!((a.owes_cents, a.is_owed_cents, a.net_cents), (0, 1000, 1000));
        let b = api.balance(uid(2), &cancel()).await.unwrap();
        assert_eq!((b.owes_cents, b.is_owed_cents, b.net_cents), (1000, 0, -1000));

        api.settle_entry(uid(2), entries[0].entry_id, 1000, &cancel())
            .await
            .unwrap();
        let a = api.balance(uid(1), &cancel()).await.unwrap();
        assert_eq!((a.owes_cents, a.is_owed_cents, a.net_cents), (0, 0, 0));
    }

    // --- soft delete ---

    #[tokio::test]
    async fn soft_delete_hides_the_receipt() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        api.soft_delete_receipt(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        assert_eq!(
            api.get_receipt(uid(1), receipt.receipt_id, &cancel())
                .await
                .unwrap_err(),
            CoreError::NotFound
        );
        assert!(api
            .list_receipts(uid(1), &cancel())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn soft_delete_requires_ownership() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        let err = api
            .soft_delete_receipt(uid(2), receipt.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotOwner);
    }

    // --- entry listing ---

    #[tokio::test]
    async fn entry_listing_respects_receipt_visibility() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;
        api.finalize(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();

        assert_eq!(
            api.list_entries(uid(2), receipt.receipt_id, &cancel())
                .await
                .unwrap()
                .len(),
            1
        );
        let err = api
            .list_entries(uid(9), receipt.receipt_id, &cancel())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotFound);
    }

    // --- cancellation ---

    #[tokio::test]
    async fn cancelled_token_stops_mutations_cleanly() {
        let (store, api) = setup().await;
        let receipt = two_person_draft(&store, &api).await;

        let token = CancelToken::new();
        token.cancel();
        let err = api
            .finalize(uid(1), receipt.receipt_id, &token)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Cancelled);

        // Nothing was mutated: the receipt is still a draft at the same
        // version.
        let unchanged = api
            .get_receipt(uid(1), receipt.receipt_id, &cancel())
            .await
            .unwrap();
        assert_eq!(unchanged.status, ReceiptStatus::Draft);
        assert_eq!(unchanged.version, receipt.version);
    }
}
