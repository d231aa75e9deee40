//! Structural validation of receipt payloads.
//!
//! Pure functions over candidate items, charges and payments.  These rules
//! gate what a draft may contain; they do not consult the store.  Split
//! sums are float-valued, so equality checks carry a small tolerance.

use std::collections::BTreeSet;

use tally_schemas::{ChargeInput, ItemInput, Payment, Split};
use uuid::Uuid;

/// Tolerance for comparing float split sums against their target.
pub const SPLIT_SUM_TOLERANCE: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A payload rule violation.  Each variant names the offending line so the
/// client can point the user at it.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    ItemNegativePrice {
        name: String,
        unit_price_cents: i64,
    },
    ItemNonPositiveQuantity {
        name: String,
        quantity: f64,
    },
    ItemNonPositiveShare {
        name: String,
        share_quantity: f64,
    },
    /// Non-empty item splits must sum to the item quantity.
    ItemSplitSumMismatch {
        name: String,
        split_sum: f64,
        quantity: f64,
    },
    ChargeNegativePrice {
        name: String,
        unit_price_cents: i64,
    },
    ChargeNonPositiveShare {
        name: String,
        share_quantity: f64,
    },
    /// Non-empty charge splits are fractional weights and must sum to 1.0.
    ChargeSplitSumMismatch {
        name: String,
        split_sum: f64,
    },
    NegativePayment {
        user_id: Uuid,
        amount_paid_cents: i64,
    },
    /// A split or payment references a user who is not a participant.
    NonParticipantReference {
        user_id: Uuid,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNegativePrice {
                name,
                unit_price_cents,
            } => write!(f, "item '{name}' has negative price: {unit_price_cents}"),
            Self::ItemNonPositiveQuantity { name, quantity } => {
                write!(f, "item '{name}' has non-positive quantity: {quantity}")
            }
            Self::ItemNonPositiveShare {
                name,
                share_quantity,
            } => write!(
                f,
                "item '{name}' has non-positive split share: {share_quantity}"
            ),
            Self::ItemSplitSumMismatch {
                name,
                split_sum,
                quantity,
            } => write!(
                f,
                "item '{name}': split sum ({split_sum}) does not equal quantity ({quantity})"
            ),
            Self::ChargeNegativePrice {
                name,
                unit_price_cents,
            } => write!(f, "charge '{name}' has negative price: {unit_price_cents}"),
            Self::ChargeNonPositiveShare {
                name,
                share_quantity,
            } => write!(
                f,
                "charge '{name}' has non-positive split share: {share_quantity}"
            ),
            Self::ChargeSplitSumMismatch { name, split_sum } => {
                write!(f, "charge '{name}': split sum ({split_sum}) does not equal 1.0")
            }
            Self::NegativePayment {
                user_id,
                amount_paid_cents,
            } => write!(
                f,
                "payment by {user_id} has negative amount: {amount_paid_cents}"
            ),
            Self::NonParticipantReference { user_id } => {
                write!(f, "user {user_id} is referenced but is not a participant")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn check_splits_positive(splits: &[Split]) -> Option<f64> {
    // Returns the first non-positive share, if any.  NaN counts as
    // non-positive (it fails `> 0.0`).
    splits
        .iter()
        .map(|s| s.share_quantity)
        .find(|q| !(*q > 0.0))
}

/// Validate candidate items: non-negative price, positive quantity,
/// positive shares, and (for non-empty splits) `Σ shares == quantity`
/// within [`SPLIT_SUM_TOLERANCE`].
pub fn validate_items(items: &[ItemInput]) -> Result<(), ValidationError> {
    for item in items {
        if item.unit_price_cents < 0 {
            return Err(ValidationError::ItemNegativePrice {
                name: item.name.clone(),
                unit_price_cents: item.unit_price_cents,
            });
        }
        if !(item.quantity > 0.0) {
            return Err(ValidationError::ItemNonPositiveQuantity {
                name: item.name.clone(),
                quantity: item.quantity,
            });
        }
        if let Some(share_quantity) = check_splits_positive(&item.splits) {
            return Err(ValidationError::ItemNonPositiveShare {
                name: item.name.clone(),
                share_quantity,
            });
        }
        if !item.splits.is_empty() {
            let split_sum: f64 = item.splits.iter().map(|s| s.share_quantity).sum();
            if (split_sum - item.quantity).abs() > SPLIT_SUM_TOLERANCE {
                return Err(ValidationError::ItemSplitSumMismatch {
                    name: item.name.clone(),
                    split_sum,
                    quantity: item.quantity,
                });
            }
        }
    }
    Ok(())
}

/// Validate candidate charges: non-negative price, positive shares, and
/// (for non-empty splits) `Σ weights == 1.0` within [`SPLIT_SUM_TOLERANCE`].
pub fn validate_charges(charges: &[ChargeInput]) -> Result<(), ValidationError> {
    for charge in charges {
        if charge.unit_price_cents < 0 {
            return Err(ValidationError::ChargeNegativePrice {
                name: charge.name.clone(),
                unit_price_cents: charge.unit_price_cents,
            });
        }
        if let Some(share_quantity) = check_splits_positive(&charge.splits) {
            return Err(ValidationError::ChargeNonPositiveShare {
                name: charge.name.clone(),
                share_quantity,
            });
        }
        if !charge.splits.is_empty() {
            let split_sum: f64 = charge.splits.iter().map(|s| s.share_quantity).sum();
            if (split_sum - 1.0).abs() > SPLIT_SUM_TOLERANCE {
                return Err(ValidationError::ChargeSplitSumMismatch {
                    name: charge.name.clone(),
                    split_sum,
                });
            }
        }
    }
    Ok(())
}

/// Validate candidate payments: amounts must be non-negative.  Whether
/// payments cover the receipt total is checked at finalize, not here.
pub fn validate_payments(payments: &[Payment]) -> Result<(), ValidationError> {
    for payment in payments {
        if payment.amount_paid_cents < 0 {
            return Err(ValidationError::NegativePayment {
                user_id: payment.user_id,
                amount_paid_cents: payment.amount_paid_cents,
            });
        }
    }
    Ok(())
}

/// Reject any split or payment that references a user outside the
/// participant list.  Applied on the update path so a draft can never
/// accumulate obligations for someone who was not added to the receipt.
pub fn validate_user_references(
    participant_ids: &BTreeSet<Uuid>,
    items: &[ItemInput],
    charges: &[ChargeInput],
    payments: &[Payment],
) -> Result<(), ValidationError> {
    let check = |user_id: Uuid| -> Result<(), ValidationError> {
        if participant_ids.contains(&user_id) {
            Ok(())
        } else {
            Err(ValidationError::NonParticipantReference { user_id })
        }
    };
    for item in items {
        for split in &item.splits {
            check(split.user_id)?;
        }
    }
    for charge in charges {
        for split in &charge.splits {
            check(split.user_id)?;
        }
    }
    for payment in payments {
        check(payment.user_id)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
