//! The public error surface of the core.
//!
//! Variants are operation-level (what the caller did wrong or what state
//! blocked them); [`ErrorClass`] groups them into the coarse taxonomy an
//! HTTP layer maps onto status codes.  The core never swallows an error
//! and never retries on the caller's behalf beyond re-issuing a lost
//! conditional write for operations that carry no client version.

use tally_money::MoneyError;
use tally_split::ValidationError;
use tally_store::StoreError;

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Payload violates a structural rule.  Recoverable by a client fix.
    Validation(ValidationError),
    /// Receipt or entry missing, deleted, or invisible to the caller.
    NotFound,
    /// Caller is not the receipt owner.
    NotOwner,
    /// Caller is not the entry's debtor.
    NotDebtor,
    /// Mutation requires a draft receipt.
    NotDraft,
    /// Operation requires a finalized receipt.
    NotFinalized,
    /// Finalize requires a positive total.
    EmptyReceipt,
    /// Recorded payments do not cover the receipt total exactly.
    PaymentMismatch { paid_cents: i64, total_cents: i64 },
    /// Unfinalize is blocked once any entry has settlement progress.
    AlreadySettled,
    /// The ledger entry was deleted by an unfinalize.
    AlreadyDeleted,
    /// The member appears in a split or has a recorded payment.
    MemberHasObligations,
    /// The owner participant cannot be removed.
    CannotRemoveOwner,
    /// The email already resolves to a participant.
    AlreadyMember,
    /// The target user is not a participant.
    NotMember,
    /// The email does not resolve to a known user.
    UnknownEmail,
    /// Optimistic lock lost; the caller must re-read and resubmit.
    VersionConflict {
        client_version: i64,
        current_version: i64,
    },
    /// Settlement amount outside `[0, open]`.
    InvalidSettlementAmount {
        requested_cents: i64,
        open_cents: i64,
    },
    /// Cooperative cancellation fired before the mutation committed.
    Cancelled,
    /// Persistence-layer failure, opaque to the caller.
    Internal(String),
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::NotFound => write!(f, "receipt or entry not found"),
            Self::NotOwner => write!(f, "caller is not the receipt owner"),
            Self::NotDebtor => write!(f, "caller is not the debtor on this entry"),
            Self::NotDraft => write!(f, "receipt is not in draft status"),
            Self::NotFinalized => write!(f, "receipt is not finalized"),
            Self::EmptyReceipt => write!(f, "receipt total must be positive"),
            Self::PaymentMismatch {
                paid_cents,
                total_cents,
            } => write!(
                f,
                "payments sum ({paid_cents} cents) does not equal total ({total_cents} cents)"
            ),
            Self::AlreadySettled => {
                write!(f, "ledger has settlement progress; unfinalize refused")
            }
            Self::AlreadyDeleted => write!(f, "ledger entry has been deleted"),
            Self::MemberHasObligations => {
                write!(f, "member appears in splits or payments and cannot be removed")
            }
            Self::CannotRemoveOwner => write!(f, "the owner cannot be removed"),
            Self::AlreadyMember => write!(f, "user is already a participant"),
            Self::NotMember => write!(f, "user is not a participant"),
            Self::UnknownEmail => write!(f, "no user with that email"),
            Self::VersionConflict {
                client_version,
                current_version,
            } => write!(
                f,
                "version conflict: client has {client_version}, current is {current_version}"
            ),
            Self::InvalidSettlementAmount {
                requested_cents,
                open_cents,
            } => write!(
                f,
                "settlement amount must be within 0 to {open_cents} cents, got {requested_cents}"
            ),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::Validation(err)
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => CoreError::Cancelled,
            StoreError::Backend(msg) => CoreError::Internal(msg),
        }
    }
}

impl From<MoneyError> for CoreError {
    // Money arithmetic failing after validation passed means the stored
    // document is inconsistent, which is an internal fault, not a caller
    // mistake.
    fn from(err: MoneyError) -> Self {
        CoreError::Internal(format!("money arithmetic failed: {err}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// ErrorClass
// ---------------------------------------------------------------------------

/// Coarse taxonomy for transport-layer mapping (4xx/5xx decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    NotAuthorized,
    InvalidState,
    VersionConflict,
    InvalidSettlementAmount,
    Cancelled,
    Internal,
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::NotFound => ErrorClass::NotFound,
            Self::NotOwner | Self::NotDebtor => ErrorClass::NotAuthorized,
            Self::NotDraft
            | Self::NotFinalized
            | Self::EmptyReceipt
            | Self::PaymentMismatch { .. }
            | Self::AlreadySettled
            | Self::AlreadyDeleted
            | Self::MemberHasObligations
            | Self::CannotRemoveOwner
            | Self::AlreadyMember
            | Self::NotMember
            | Self::UnknownEmail => ErrorClass::InvalidState,
            Self::VersionConflict { .. } => ErrorClass::VersionConflict,
            Self::InvalidSettlementAmount { .. } => ErrorClass::InvalidSettlementAmount,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
