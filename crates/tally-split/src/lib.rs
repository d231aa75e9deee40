//! Pure splitting logic: payload validation, per-user liability and net
//! position computation, and debtor/creditor matching.
//!
//! Everything here is deterministic and store-free, so the same routines
//! serve both the draft-update path (refreshing a receipt's settle summary)
//! and the finalize path (feeding the ledger builder).  All division of
//! money goes through `tally-money`; this crate never rounds on its own.

pub mod builder;
pub mod calculator;
pub mod validate;

pub use builder::{build_obligations, ObligationDraft};
pub use calculator::{
    build_settle_summary, compute_breakdown, compute_totals, overlay_settlement_progress,
    SplitBreakdown,
};
pub use validate::{
    validate_charges, validate_items, validate_payments, validate_user_references,
    ValidationError, SPLIT_SUM_TOLERANCE,
};
