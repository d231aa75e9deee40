//! Postgres substrate for the bill-splitting core.
//!
//! `PgStore` implements the `tally-store` traits over sqlx.  Receipts are
//! stored as a jsonb document plus extracted columns (owner, participants,
//! status, version, deletion flag) so the listing and the conditional
//! writes stay on indexed columns; ledger entries are a normalized table.
//! `finalize` and `unfinalize` commit inside one transaction, so the
//! status flip and the entry writes are atomic to every other connection.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use tally_schemas::{
    EntryStatus, LedgerEntry, Receipt, SettleSummaryEntry, UserRecord,
};
use tally_store::{
    CancelToken, LedgerRepo, ReceiptRepo, StoreError, StoreResult, UnfinalizeOutcome,
    UserDirectory,
};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "TALLY_DATABASE_URL";

/// Connect to Postgres using TALLY_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using TALLY_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// Postgres-backed substrate.  Cheap to clone; shares the pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert a directory user by email (fixtures and tests; account CRUD
    /// proper lives outside the core).
    pub async fn ensure_user(&self, email: &str) -> Result<UserRecord> {
        let row = sqlx::query(
            r#"
            insert into users (user_id, email)
            values ($1, $2)
            on conflict (email) do update set email = excluded.email
            returning user_id, email
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("ensure_user failed")?;

        Ok(UserRecord {
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
        })
    }
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

fn doc_to_receipt(doc: serde_json::Value) -> Result<Receipt> {
    serde_json::from_value(doc).context("receipt document failed to deserialize")
}

fn receipt_to_doc(receipt: &Receipt) -> Result<serde_json::Value> {
    serde_json::to_value(receipt).context("receipt document failed to serialize")
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry> {
    let status_text: String = row.try_get("status")?;
    let status = EntryStatus::from_str(&status_text)
        .ok_or_else(|| anyhow!("unknown ledger entry status '{status_text}'"))?;
    Ok(LedgerEntry {
        entry_id: row.try_get("entry_id")?,
        receipt_id: row.try_get("receipt_id")?,
        debtor_id: row.try_get("debtor_id")?,
        creditor_id: row.try_get("creditor_id")?,
        amount_cents: row.try_get("amount_cents")?,
        settled_amount_cents: row.try_get("settled_amount_cents")?,
        status,
        position: row.try_get("entry_position")?,
        is_deleted: row.try_get("is_deleted")?,
        settled_at: row.try_get("settled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Version/status-gated receipt write inside an open transaction.  Returns
/// whether the gate passed.
async fn write_receipt_gated(
    tx: &mut Transaction<'_, Postgres>,
    receipt: &Receipt,
    expected_version: i64,
    expected_status: &str,
) -> Result<bool> {
    let doc = receipt_to_doc(receipt)?;
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update receipts
           set doc = $2,
               owner_id = $3,
               participant_ids = $4,
               status = $5,
               version = $6,
               is_deleted = $7,
               updated_at = $8
         where receipt_id = $1
           and version = $9
           and status = $10
           and is_deleted = false
        returning receipt_id
        "#,
    )
    .bind(receipt.receipt_id)
    .bind(&doc)
    .bind(receipt.owner_id)
    .bind(receipt.participant_ids())
    .bind(receipt.status.as_str())
    .bind(receipt.version)
    .bind(receipt.is_deleted)
    .bind(receipt.updated_at)
    .bind(expected_version)
    .bind(expected_status)
    .fetch_optional(&mut **tx)
    .await
    .context("gated receipt write failed")?;

    Ok(row.is_some())
}

async fn insert_entry(tx: &mut Transaction<'_, Postgres>, entry: &LedgerEntry) -> Result<()> {
    sqlx::query(
        r#"
        insert into ledger_entries (
          entry_id, receipt_id, debtor_id, creditor_id, amount_cents,
          settled_amount_cents, status, entry_position, is_deleted,
          settled_at, created_at, updated_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
        )
        "#,
    )
    .bind(entry.entry_id)
    .bind(entry.receipt_id)
    .bind(entry.debtor_id)
    .bind(entry.creditor_id)
    .bind(entry.amount_cents)
    .bind(entry.settled_amount_cents)
    .bind(entry.status.as_str())
    .bind(entry.position)
    .bind(entry.is_deleted)
    .bind(entry.settled_at)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(&mut **tx)
    .await
    .context("ledger entry insert failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// UserDirectory
// ---------------------------------------------------------------------------

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user_by_email(
        &self,
        email: &str,
        cancel: &CancelToken,
    ) -> StoreResult<Option<UserRecord>> {
        cancel.check()?;
        let row = sqlx::query(
            r#"
            select user_id, email
            from users
            where email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("find_user_by_email failed")
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(UserRecord {
            user_id: row.try_get("user_id").map_err(|e| backend(e.into()))?,
            email: row.try_get("email").map_err(|e| backend(e.into()))?,
        }))
    }
}

// ---------------------------------------------------------------------------
// ReceiptRepo
// ---------------------------------------------------------------------------

#[async_trait]
impl ReceiptRepo for PgStore {
    async fn insert_receipt(&self, receipt: &Receipt, cancel: &CancelToken) -> StoreResult<()> {
        cancel.check()?;
        let doc = receipt_to_doc(receipt).map_err(backend)?;
        sqlx::query(
            r#"
            insert into receipts (
              receipt_id, owner_id, participant_ids, status, version,
              is_deleted, created_at, updated_at, doc
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            "#,
        )
        .bind(receipt.receipt_id)
        .bind(receipt.owner_id)
        .bind(receipt.participant_ids())
        .bind(receipt.status.as_str())
        .bind(receipt.version)
        .bind(receipt.is_deleted)
        .bind(receipt.created_at)
        .bind(receipt.updated_at)
        .bind(&doc)
        .execute(&self.pool)
        .await
        .context("insert_receipt failed")
        .map_err(backend)?;
        Ok(())
    }

    async fn fetch_receipt(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Option<Receipt>> {
        cancel.check()?;
        let row = sqlx::query(
            r#"
            select doc
            from receipts
            where receipt_id = $1
            "#,
        )
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_receipt failed")
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        let doc: serde_json::Value = row.try_get("doc").map_err(|e| backend(e.into()))?;
        Ok(Some(doc_to_receipt(doc).map_err(backend)?))
    }

    async fn list_receipts_for_user(
        &self,
        user_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<Receipt>> {
        cancel.check()?;
        let rows = sqlx::query(
            r#"
            select doc
            from receipts
            where is_deleted = false
              and (owner_id = $1 or $1 = any(participant_ids))
            order by created_at desc, receipt_id desc
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("list_receipts_for_user failed")
        .map_err(backend)?;

        let mut receipts = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: serde_json::Value = row.try_get("doc").map_err(|e| backend(e.into()))?;
            receipts.push(doc_to_receipt(doc).map_err(backend)?);
        }
        Ok(receipts)
    }

    async fn update_receipt_versioned(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        cancel: &CancelToken,
    ) -> StoreResult<bool> {
        cancel.check()?;
        let doc = receipt_to_doc(receipt).map_err(backend)?;
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            update receipts
               set doc = $2,
                   owner_id = $3,
                   participant_ids = $4,
                   status = $5,
                   version = $6,
                   is_deleted = $7,
                   updated_at = $8
             where receipt_id = $1
               and version = $9
               and is_deleted = false
            returning receipt_id
            "#,
        )
        .bind(receipt.receipt_id)
        .bind(&doc)
        .bind(receipt.owner_id)
        .bind(receipt.participant_ids())
        .bind(receipt.status.as_str())
        .bind(receipt.version)
        .bind(receipt.is_deleted)
        .bind(receipt.updated_at)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .context("update_receipt_versioned failed")
        .map_err(backend)?;

        Ok(row.is_some())
    }

    async fn replace_settle_summary(
        &self,
        receipt_id: Uuid,
        summary: &[SettleSummaryEntry],
        updated_at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> StoreResult<bool> {
        cancel.check()?;
        let summary_json = serde_json::to_value(summary)
            .context("settle summary failed to serialize")
            .map_err(backend)?;
        let updated_at_json = serde_json::to_value(updated_at)
            .context("timestamp failed to serialize")
            .map_err(backend)?;
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            update receipts
               set doc = jsonb_set(
                           jsonb_set(doc, '{settle_summary}', $2),
                           '{updated_at}', $3
                         ),
                   updated_at = $4
             where receipt_id = $1
               and is_deleted = false
            returning receipt_id
            "#,
        )
        .bind(receipt_id)
        .bind(&summary_json)
        .bind(&updated_at_json)
        .bind(updated_at)
        .fetch_optional(&self.pool)
        .await
        .context("replace_settle_summary failed")
        .map_err(backend)?;

        Ok(row.is_some())
    }

    async fn commit_finalize(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        entries: &[LedgerEntry],
        cancel: &CancelToken,
    ) -> StoreResult<bool> {
        cancel.check()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("commit_finalize begin failed")
            .map_err(backend)?;

        let gate_passed = write_receipt_gated(&mut tx, receipt, expected_version, "draft")
            .await
            .map_err(backend)?;
        if !gate_passed {
            tx.rollback()
                .await
                .context("commit_finalize rollback failed")
                .map_err(backend)?;
            return Ok(false);
        }

        for entry in entries {
            insert_entry(&mut tx, entry).await.map_err(backend)?;
        }

        tx.commit()
            .await
            .context("commit_finalize commit failed")
            .map_err(backend)?;
        Ok(true)
    }

    async fn commit_unfinalize(
        &self,
        receipt: &Receipt,
        expected_version: i64,
        cancel: &CancelToken,
    ) -> StoreResult<UnfinalizeOutcome> {
        cancel.check()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("commit_unfinalize begin failed")
            .map_err(backend)?;

        let gate_passed = write_receipt_gated(&mut tx, receipt, expected_version, "finalized")
            .await
            .map_err(backend)?;
        if !gate_passed {
            tx.rollback()
                .await
                .context("commit_unfinalize rollback failed")
                .map_err(backend)?;
            return Ok(UnfinalizeOutcome::StateChanged);
        }

        // Conditional bulk delete: only untouched entries are deletable.
        sqlx::query(
            r#"
            update ledger_entries
               set is_deleted = true,
                   updated_at = $2
             where receipt_id = $1
               and is_deleted = false
               and settled_amount_cents = 0
            "#,
        )
        .bind(receipt.receipt_id)
        .bind(receipt.updated_at)
        .execute(&mut *tx)
        .await
        .context("commit_unfinalize bulk delete failed")
        .map_err(backend)?;

        // Any survivor means a settlement raced in; abandon the whole commit.
        let (survivors,): (i64,) = sqlx::query_as(
            r#"
            select count(*)::bigint
            from ledger_entries
            where receipt_id = $1
              and is_deleted = false
            "#,
        )
        .bind(receipt.receipt_id)
        .fetch_one(&mut *tx)
        .await
        .context("commit_unfinalize survivor count failed")
        .map_err(backend)?;

        if survivors > 0 {
            tx.rollback()
                .await
                .context("commit_unfinalize rollback failed")
                .map_err(backend)?;
            return Ok(UnfinalizeOutcome::SettlementProgress);
        }

        tx.commit()
            .await
            .context("commit_unfinalize commit failed")
            .map_err(backend)?;
        Ok(UnfinalizeOutcome::Committed)
    }
}

// ---------------------------------------------------------------------------
// LedgerRepo
// ---------------------------------------------------------------------------

#[async_trait]
impl LedgerRepo for PgStore {
    async fn fetch_entry(
        &self,
        entry_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Option<LedgerEntry>> {
        cancel.check()?;
        let row = sqlx::query(
            r#"
            select entry_id, receipt_id, debtor_id, creditor_id, amount_cents,
                   settled_amount_cents, status, entry_position, is_deleted,
                   settled_at, created_at, updated_at
            from ledger_entries
            where entry_id = $1
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch_entry failed")
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_entry(&row).map_err(backend)?))
    }

    async fn list_entries_for_receipt(
        &self,
        receipt_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<LedgerEntry>> {
        cancel.check()?;
        let rows = sqlx::query(
            r#"
            select entry_id, receipt_id, debtor_id, creditor_id, amount_cents,
                   settled_amount_cents, status, entry_position, is_deleted,
                   settled_at, created_at, updated_at
            from ledger_entries
            where receipt_id = $1
              and is_deleted = false
            order by entry_position asc
            "#,
        )
        .bind(receipt_id)
        .fetch_all(&self.pool)
        .await
        .context("list_entries_for_receipt failed")
        .map_err(backend)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(row_to_entry(&row).map_err(backend)?);
        }
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
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            update ledger_entries
               set settled_amount_cents = $3,
                   status = $4,
                   settled_at = $5,
                   updated_at = $6
             where entry_id = $1
               and settled_amount_cents = $2
               and is_deleted = false
            returning entry_id
            "#,
        )
        .bind(entry_id)
        .bind(expected_settled_cents)
        .bind(new_settled_cents)
        .bind(status.as_str())
        .bind(settled_at)
        .bind(updated_at)
        .fetch_optional(&self.pool)
        .await
        .context("settle_entry_conditional failed")
        .map_err(backend)?;

        Ok(row.is_some())
    }

    async fn balance_components(
        &self,
        user_id: Uuid,
        cancel: &CancelToken,
    ) -> StoreResult<(i64, i64)> {
        cancel.check()?;
        let (owes,): (i64,) = sqlx::query_as(
            r#"
            select coalesce(sum(amount_cents - settled_amount_cents), 0)::bigint
            from ledger_entries
            where debtor_id = $1
              and is_deleted = false
              and status <> 'settled'
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("balance owes query failed")
        .map_err(backend)?;

        let (is_owed,): (i64,) = sqlx::query_as(
            r#"
            select coalesce(sum(amount_cents - settled_amount_cents), 0)::bigint
            from ledger_entries
            where creditor_id = $1
              and is_deleted = false
              and status <> 'settled'
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("balance is_owed query failed")
        .map_err(backend)?;

        Ok((owes, is_owed))
    }
}
