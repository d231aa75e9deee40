//! Persistence substrate boundary for the bill-splitting core.
//!
//! The core never holds in-process locks across store calls; every
//! correctness property rides on the conditional-write primitives defined
//! here (`update_receipt_versioned`, `settle_entry_conditional`,
//! `commit_finalize`, `commit_unfinalize`).  A backend implements the three
//! traits below and the services stay agnostic to what is underneath.
//!
//! Two implementations exist:
//! - [`MemStore`] (this crate): in-memory reference backend with exact
//!   conditional semantics, used by unit and scenario tests.
//! - `PgStore` (`tally-db`): Postgres via sqlx, transactional commits.
//!
//! Every method takes a [`CancelToken`] and returns
//! [`StoreError::Cancelled`] when cancellation is observed before the
//! write executes; a cancellation arriving after the commit is reported as
//! success.

pub mod cancel;
pub mod mem;

pub use cancel::CancelToken;
pub use mem::MemStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_schemas::{EntryStatus, LedgerEntry, Receipt, SettleSummaryEntry, UserRecord};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by a substrate backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The caller's cancellation signal fired before the operation ran.
    Cancelled,
    /// Backend failure (connection, query, serialization).  Opaque to the
    /// core; carried as text so backends stay free to use their own error
    /// stacks internally.
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of the conditional unfinalize commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfinalizeOutcome {
    /// Receipt reverted to draft; all live entries marked deleted.
    Committed,
    /// At least one entry had settlement progress; nothing was written.
    SettlementProgress,
    /// The version/status gate failed (concurrent mutation won the race);
    /// nothing was written.
    StateChanged,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read-only lookup into the external user directory.  Account CRUD lives
/// outside the core; membership resolution is the only thing it needs.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_email(
        &self,
        email: &str,
        cancel: &CancelToken,
    ) -> StoreResult<Option<UserRecord>>;
}

/// Receipt persistence.  `fetch_receipt` returns soft-deleted documents
/// (visibility is service policy); the listing filters them.
#[async_trait]
pub trait ReceiptRepo: Send + Sync {
    async fn insert_receipt(&self, receipt: &Receipt, cancel: &CancelToken) -> StoreResult<()>;

    async fn fetch_receipt(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Option<Receipt>>;

    /// Non-deleted receipts where the user is owner or participant, newest
    /// first.
    async fn list_receipts_for_user(
        &self,
        user_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<Receipt>>;

    /// Replace the stored document with `receipt`, conditional on the
    /// stored version still being `expected_version` (and the document not
    /// deleted).  Returns `false` when the gate fails; nothing is written.
    async fn update_receipt_versioned(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        cancel: &CancelToken,
    ) -> StoreResult<bool>;

    /// Overwrite only the settle summary and `updated_at`.  Derived-state
    /// refresh: deliberately not version-gated and does not bump the
    /// version.  Returns `false` if the receipt is missing or deleted.
    async fn replace_settle_summary(
        &self,
        receipt_id: Uuid,
        summary: &[SettleSummaryEntry],
        updated_at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> StoreResult<bool>;

    /// Atomically write the finalized receipt and insert its ledger
    /// entries.  Gate: stored version == `expected_version`, stored status
    /// is draft, not deleted.  Either both writes land or neither does.
    async fn commit_finalize(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        entries: &[LedgerEntry],
        cancel: &CancelToken,
    ) -> StoreResult<bool>;

    /// Atomically revert `receipt` to draft and soft-delete its ledger
    /// entries — conditional on every live entry still having
    /// `settled_amount_cents == 0` (the settle/unfinalize race resolution)
    /// and on the version/status gate.
    async fn commit_unfinalize(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        cancel: &CancelToken,
    ) -> StoreResult<UnfinalizeOutcome>;
}

/// Ledger entry persistence and aggregation.
#[async_trait]
pub trait LedgerRepo: Send + Sync {
    /// Returns the entry regardless of its deleted flag.
    async fn fetch_entry(
        &self,
        entry_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Option<LedgerEntry>>;

    /// Non-deleted entries for a receipt, in emission (`position`) order.
    async fn list_entries_for_receipt(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<LedgerEntry>>;

    /// Advance an entry's settled amount, conditional on the stored
    /// `settled_amount_cents` still being `expected_settled_cents` and the
    /// entry not deleted.  Returns `false` when a concurrent settlement
    /// won the race; the caller re-reads and retries.
    #[allow(clippy::too_many_arguments)]
    async fn settle_entry_conditional(
        &self,
        entry_id: Uuid,
        expected_settled_cents: i64,
        new_settled_cents: i64,
        status: EntryStatus,
        settled_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> StoreResult<bool>;

    /// Sum of open amounts (`amount - settled`) over live, not fully
    /// settled entries, as `(owes_cents, is_owed_cents)` for the user's
    /// debtor and creditor roles respectively.
    async fn balance_components(
        &self,
        user_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<(i64, i64)>;
}

/// Everything the core needs from a backend, as one bound.
pub trait Store: UserDirectory + ReceiptRepo + LedgerRepo {}

impl<T: UserDirectory + ReceiptRepo + LedgerRepo> Store for T {}
