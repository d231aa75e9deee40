//! Core engine for the bill-splitting backend.
//!
//! The facade surfaced to the transport layer is [`CoreApi`]; underneath it
//! sit [`ReceiptService`] (aggregate lifecycle and optimistic concurrency),
//! [`LedgerService`] (obligation derivation and settlement) and
//! [`BalanceService`] (cross-receipt rollup), all generic over the
//! persistence substrate defined in `tally-store`.  Splitting arithmetic
//! lives in `tally-split`/`tally-money` and is pure.

pub mod api;
pub mod balance;
pub mod error;
pub mod ledger;
pub mod receipts;

pub use api::CoreApi;
pub use balance::BalanceService;
pub use error::{CoreError, CoreResult, ErrorClass};
pub use ledger::LedgerService;
pub use receipts::ReceiptService;
