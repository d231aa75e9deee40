//! Per-user liability, payment, and net-position computation.
//!
//! Given a receipt's participants, items, charges and payments, this module
//! answers "who owes what to the pool".  It is the single source of truth
//! for both the draft-time settle summary and the finalize-time ledger
//! derivation.
//!
//! # Conventions
//!
//! - Maps are `BTreeMap<Uuid, i64>` so iteration order is the user-id
//!   order the ledger builder depends on.
//! - Unknown users (referenced by a split or payment but absent from the
//!   participant list) start at zero and accumulate normally; upstream
//!   update validation keeps them out of well-formed receipts, but the
//!   computation itself never panics on them.
//! - Items with empty splits contribute to the receipt subtotal but to no
//!   one's liability ("unassigned" lines).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tally_money::{allocate, equal_weights, integer_scale, MoneyError};
use tally_schemas::{
    Charge, Item, Participant, Payment, SettleStatus, SettleSummaryEntry,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Breakdown
// ---------------------------------------------------------------------------

/// The three parallel per-user maps derived from one receipt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitBreakdown {
    /// What each user owes to the pool before payments.
    pub liabilities: BTreeMap<Uuid, i64>,
    /// Total recorded payments per user.
    pub paid: BTreeMap<Uuid, i64>,
    /// `liability - paid`; positive owes, negative is owed.
    pub net: BTreeMap<Uuid, i64>,
}

impl SplitBreakdown {
    pub fn net_of(&self, user_id: Uuid) -> i64 {
        self.net.get(&user_id).copied().unwrap_or(0)
    }
}

/// Compute liabilities, payments and net positions for one receipt.
///
/// Allocation rules:
/// - Item with non-empty splits: the item subtotal
///   (`integer_scale(price, quantity)`) is allocated across the splits
///   with `share_quantity` as weights.
/// - Charge with non-empty splits: each share is
///   `integer_scale(price, weight)`; the final split absorbs the rounding
///   remainder so the shares sum to the charge price exactly.
/// - Charge with empty splits: allocated equally across participants in
///   participant order.
pub fn compute_breakdown(
    participants: &[Participant],
    items: &[Item],
    charges: &[Charge],
    payments: &[Payment],
) -> Result<SplitBreakdown, MoneyError> {
    let mut liabilities: BTreeMap<Uuid, i64> = BTreeMap::new();
    for p in participants {
        liabilities.insert(p.user_id, 0);
    }

    // Item liabilities.
    for item in items {
        if item.splits.is_empty() {
            continue;
        }
        let item_subtotal = integer_scale(item.unit_price_cents, item.quantity)?;
        let weights: Vec<f64> = item.splits.iter().map(|s| s.share_quantity).collect();
        let parts = allocate(item_subtotal, &weights)?;
        for (split, part) in item.splits.iter().zip(parts) {
            *liabilities.entry(split.user_id).or_insert(0) += part;
        }
    }

    // Charge liabilities.
    for charge in charges {
        if !charge.splits.is_empty() {
            let mut shares = Vec::with_capacity(charge.splits.len());
            for split in &charge.splits {
                shares.push(integer_scale(charge.unit_price_cents, split.share_quantity)?);
            }
            let assigned: i64 = shares.iter().sum();
            if let Some(last) = shares.last_mut() {
                *last += charge.unit_price_cents - assigned;
            }
            for (split, share) in charge.splits.iter().zip(shares) {
                *liabilities.entry(split.user_id).or_insert(0) += share;
            }
        } else if !participants.is_empty() {
            let parts = allocate(charge.unit_price_cents, &equal_weights(participants.len()))?;
            for (p, part) in participants.iter().zip(parts) {
                *liabilities.entry(p.user_id).or_insert(0) += part;
            }
        }
    }

    // Payments.
    let mut paid: BTreeMap<Uuid, i64> = BTreeMap::new();
    for payment in payments {
        *paid.entry(payment.user_id).or_insert(0) += payment.amount_paid_cents;
    }

    // Net positions over the union of both key sets.
    let mut net: BTreeMap<Uuid, i64> = BTreeMap::new();
    for user_id in liabilities.keys().chain(paid.keys()) {
        let liability = liabilities.get(user_id).copied().unwrap_or(0);
        let payment = paid.get(user_id).copied().unwrap_or(0);
        net.insert(*user_id, liability - payment);
    }

    Ok(SplitBreakdown {
        liabilities,
        paid,
        net,
    })
}

// ---------------------------------------------------------------------------
// Settle summary
// ---------------------------------------------------------------------------

/// Build the base settle summary: one entry per participant, in participant
/// order, with no settlement progress.  Ledger progress is overlaid later
/// by the reconciliation path.
pub fn build_settle_summary(
    participants: &[Participant],
    breakdown: &SplitBreakdown,
) -> Vec<SettleSummaryEntry> {
    participants
        .iter()
        .map(|p| {
            let net_cents = breakdown.net_of(p.user_id);
            let status = if net_cents < 0 {
                SettleStatus::Creditor
            } else if net_cents == 0 {
                SettleStatus::Settled
            } else {
                SettleStatus::Pending
            };
            SettleSummaryEntry {
                user_id: p.user_id,
                amount_cents: net_cents.max(0),
                paid_cents: breakdown.paid.get(&p.user_id).copied().unwrap_or(0),
                net_cents,
                settled_amount_cents: 0,
                is_settled: net_cents == 0,
                settled_at: None,
                status,
            }
        })
        .collect()
}

/// Overlay ledger settlement progress onto a base settle summary.
///
/// `settled_by_debtor` is the sum of `settled_amount_cents` over the
/// receipt's live entries, grouped by debtor.  Rows with
/// `amount_cents == 0` (creditors, zero-net participants) are left exactly
/// as the base computed them.
pub fn overlay_settlement_progress(
    summary: &mut [SettleSummaryEntry],
    settled_by_debtor: &BTreeMap<Uuid, i64>,
    now: DateTime<Utc>,
) {
    for entry in summary.iter_mut() {
        if entry.amount_cents == 0 {
            continue;
        }
        let settled = settled_by_debtor
            .get(&entry.user_id)
            .copied()
            .unwrap_or(0)
            .min(entry.amount_cents);
        entry.settled_amount_cents = settled;
        entry.is_settled = settled >= entry.amount_cents;
        if entry.is_settled {
            entry.status = SettleStatus::Settled;
            entry.settled_at = Some(now);
        } else if settled > 0 {
            entry.status = SettleStatus::PartiallySettled;
            entry.settled_at = None;
        } else {
            entry.status = SettleStatus::Pending;
            entry.settled_at = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// Derive `(subtotal_cents, total_cents)` from items and charges:
/// `subtotal = Σ integer_scale(price, quantity)` over items,
/// `total = subtotal + Σ charge price`.
pub fn compute_totals(items: &[Item], charges: &[Charge]) -> Result<(i64, i64), MoneyError> {
    let mut subtotal: i64 = 0;
    for item in items {
        subtotal += integer_scale(item.unit_price_cents, item.quantity)?;
    }
    let charges_total: i64 = charges.iter().map(|c| c.unit_price_cents).sum();
    Ok((subtotal, subtotal + charges_total))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
