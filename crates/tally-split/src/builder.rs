//! Debtor/creditor matching: net positions → pairwise obligations.
//!
//! Greedy two-pointer walk over debtors and creditors, both ordered by
//! user id.  The output is deterministic — same net positions, same entry
//! sequence — and emits at most `|debtors| + |creditors| - 1` obligations
//! when the positions balance.

use std::collections::BTreeMap;

use uuid::Uuid;

/// One obligation to be persisted as a ledger entry.  `amount_cents` is
/// always strictly positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObligationDraft {
    pub debtor_id: Uuid,
    pub creditor_id: Uuid,
    pub amount_cents: i64,
}

/// Match debtors (net > 0) against creditors (net < 0).
///
/// If the positions do not sum to zero — an upstream bug, since the
/// calculator conserves money — the walk terminates gracefully when one
/// side is exhausted and the surplus on the other side goes unmatched.
pub fn build_obligations(net_positions: &BTreeMap<Uuid, i64>) -> Vec<ObligationDraft> {
    // BTreeMap iteration is ascending by user id, which is the ordering
    // contract for deterministic output.
    let mut debtors: Vec<(Uuid, i64)> = Vec::new();
    let mut creditors: Vec<(Uuid, i64)> = Vec::new();
    for (user_id, net) in net_positions {
        if *net > 0 {
            debtors.push((*user_id, *net));
        } else if *net < 0 {
            creditors.push((*user_id, -*net));
        }
    }

    let mut entries = Vec::new();
    let mut di = 0;
    let mut ci = 0;

    while di < debtors.len() && ci < creditors.len() {
        let (debtor_id, debtor_remaining) = debtors[di];
        let (creditor_id, creditor_remaining) = creditors[ci];
        let amount_cents = debtor_remaining.min(creditor_remaining);

        entries.push(ObligationDraft {
            debtor_id,
            creditor_id,
            amount_cents,
        });

        debtors[di].1 -= amount_cents;
        creditors[ci].1 -= amount_cents;
        if debtors[di].1 == 0 {
            di += 1;
        }
        if creditors[ci].1 == 0 {
            ci += 1;
        }
    }

    entries
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
