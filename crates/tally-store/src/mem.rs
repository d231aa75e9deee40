//! In-memory reference backend.
//!
//! Plays the role a paper broker plays for an execution engine: a complete,
//! in-process stand-in for the real substrate with identical conditional
//! semantics, so services and scenario tests run without a database.  One
//! `tokio::sync::Mutex` guards the whole state; each method's critical
//! section is the atomic unit, mirroring a single conditional statement or
//! transaction against a real store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_schemas::{
    EntryStatus, LedgerEntry, Receipt, SettleSummaryEntry, UserRecord,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    CancelToken, LedgerRepo, ReceiptRepo, StoreResult, UnfinalizeOutcome, UserDirectory,
};

#[derive(Default)]
struct Inner {
    receipts: BTreeMap<Uuid, Receipt>,
    entries: BTreeMap<Uuid, LedgerEntry>,
    users: Vec<UserRecord>,
}

/// In-memory store implementing the full substrate surface.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a directory user (tests and fixtures).  Returns the record.
    pub async fn register_user(&self, email: &str) -> UserRecord {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.users.iter().find(|u| u.email == email) {
            return existing.clone();
        }
        let record = UserRecord {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        };
        inner.users.push(record.clone());
        record
    }

    /// Seed a directory user with a caller-chosen id (deterministic tests).
    pub async fn register_user_with_id(&self, user_id: Uuid, email: &str) -> UserRecord {
        let record = UserRecord {
            user_id,
            email: email.to_string(),
        };
        self.inner.lock().await.users.push(record.clone());
        record
    }

    /// Number of ledger entries ever stored for a receipt, deleted included.
    /// Test observability only.
    pub async fn entry_count_for_receipt(&self, receipt_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .filter(|e| e.receipt_id == receipt_id)
            .count()
    }
}

#[async_trait]
impl UserDirectory for MemStore {
    async fn find_user_by_email(
        &self,
        email: &str,
        cancel: &CancelToken,
    ) -> StoreResult<Option<UserRecord>> {
        cancel.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.email == email).cloned())
    }
}

#[async_trait]
impl ReceiptRepo for MemStore {
    async fn insert_receipt(&self, receipt: &Receipt, cancel: &CancelToken) -> StoreResult<()> {
        cancel.check()?;
        let mut inner = self.inner.lock().await;
        inner.receipts.insert(receipt.receipt_id, receipt.clone());
        Ok(())
    }

    async fn fetch_receipt(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Option<Receipt>> {
        cancel.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.receipts.get(&receipt_id).cloned())
    }

    async fn list_receipts_for_user(
        &self,
        user_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<Receipt>> {
        cancel.check()?;
        let inner = self.inner.lock().await;
        let mut receipts: Vec<Receipt> = inner
            .receipts
            .values()
            .filter(|r| !r.is_deleted && (r.owner_id == user_id || r.is_participant(user_id)))
            .cloned()
            .collect();
        // Newest first; receipt id breaks creation-time ties deterministically.
        receipts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.receipt_id.cmp(&a.receipt_id))
        });
        Ok(receipts)
    }

    async fn update_receipt_versioned(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        cancel: &CancelToken,
    ) -> StoreResult<bool> {
        cancel.check()?;
        let mut inner = self.inner.lock().await;
        match inner.receipts.get_mut(&receipt.receipt_id) {
            Some(stored) if stored.version == expected_version && !stored.is_deleted => {
                *stored = receipt.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_settle_summary(
        &self,
        receipt_id: Uuid,
        summary: &[SettleSummaryEntry],
        updated_at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> StoreResult<bool> {
        cancel.check()?;
        let mut inner = self.inner.lock().await;
        match inner.receipts.get_mut(&receipt_id) {
            Some(stored) if !stored.is_deleted => {
                stored.settle_summary = summary.to_vec();
                stored.updated_at = updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit_finalize(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        entries: &[LedgerEntry],
        cancel: &CancelToken,
    ) -> StoreResult<bool> {
        cancel.check()?;
        let mut inner = self.inner.lock().await;
        let gate_passes = matches!(
            inner.receipts.get(&receipt.receipt_id),
            Some(stored) if stored.version == expected_version
                && stored.status == tally_schemas::ReceiptStatus::Draft
                && !stored.is_deleted
        );
        if !gate_passes {
            return Ok(false);
        }
        inner.receipts.insert(receipt.receipt_id, receipt.clone());
        for entry in entries {
            inner.entries.insert(entry.entry_id, entry.clone());
        }
        Ok(true)
    }

    async fn commit_unfinalize(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        cancel: &CancelToken,
    ) -> StoreResult<UnfinalizeOutcome> {
        cancel.check()?;
        let mut inner = self.inner.lock().await;

        let gate_passes = matches!(
            inner.receipts.get(&receipt.receipt_id),
            Some(stored) if stored.version == expected_version
                && stored.status == tally_schemas::ReceiptStatus::Finalized
                && !stored.is_deleted
        );
        if !gate_passes {
            return Ok(UnfinalizeOutcome::StateChanged);
        }

        let progress = inner
            .entries
            .values()
            .any(|e| e.receipt_id == receipt.receipt_id && !e.is_deleted
                && e.settled_amount_cents > 0);
        if progress {
            return Ok(UnfinalizeOutcome::SettlementProgress);
        }

        let updated_at = receipt.updated_at;
        for entry in inner.entries.values_mut() {
            if entry.receipt_id == receipt.receipt_id && !entry.is_deleted {
                entry.is_deleted = true;
                entry.updated_at = updated_at;
            }
        }
        inner.receipts.insert(receipt.receipt_id, receipt.clone());
        Ok(UnfinalizeOutcome::Committed)
    }
}

#[async_trait]
impl LedgerRepo for MemStore {
    async fn fetch_entry(
        &self,
        entry_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Option<LedgerEntry>> {
        cancel.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(&entry_id).cloned())
    }

    async fn list_entries_for_receipt(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<LedgerEntry>> {
        cancel.check()?;
        let inner = self.inner.lock().await;
        let mut entries: Vec<LedgerEntry> = inner
            .entries
            .values()
            .filter(|e| e.receipt_id == receipt_id && !e.is_deleted)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }

    async fn settle_entry_conditional(
        &self,
        entry_id: Uuid,
        expected_settled_cents: i64,
        new_settled_cents: i64,
        status: EntryStatus,
        settled_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> StoreResult<bool> {
        cancel.check()?;
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(&entry_id) {
            Some(entry)
                if entry.settled_amount_cents == expected_settled_cents && !entry.is_deleted =>
            {
                entry.settled_amount_cents = new_settled_cents;
                entry.status = status;
                entry.settled_at = settled_at;
                entry.updated_at = updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn balance_components(
        &self,
        user_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<(i64, i64)> {
        cancel.check()?;
        let inner = self.inner.lock().await;
        let mut owes = 0_i64;
        let mut is_owed = 0_i64;
        for entry in inner.entries.values() {
            if entry.is_deleted || entry.status == EntryStatus::Settled {
                continue;
            }
            let open = entry.open_amount_cents();
            if entry.debtor_id == user_id {
                owes += open;
            }
            if entry.creditor_id == user_id {
                is_owed += open;
            }
        }
        Ok((owes, is_owed))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
