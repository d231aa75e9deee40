//! Integer-cent arithmetic for bill splitting.
//!
//! # Motivation
//!
//! Every monetary amount in this system is an `i64` number of cents.  Money
//! is divided among participants in exactly one place — [`allocate`] — so
//! that the conservation property `sum(parts) == total` is enforced by a
//! single, well-tested routine instead of being re-derived (and re-broken)
//! at every call site.  Components that need a price × quantity subtotal go
//! through [`integer_scale`]; nothing else in the workspace multiplies or
//! divides money.
//!
//! # Rounding policy
//!
//! - [`integer_scale`] truncates toward zero, after nudging the f64 product
//!   by one micro-cent to absorb binary-representation dust (`1000 × 0.29`
//!   is `289.999…97` in f64 and must scale to `290`, not `289`).
//! - [`allocate`] floors each real share and then hands out the leftover
//!   cents one-by-one to the indices with the largest fractional
//!   remainders, ties broken by ascending index.  The result is fully
//!   deterministic: same inputs, same parts.
//!
//! # Determinism
//!
//! No IO, no time, no randomness.  Both functions are referentially
//! transparent.

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invalid inputs to the money routines.
#[derive(Debug, Clone, PartialEq)]
pub enum MoneyError {
    /// The amount being divided must be non-negative.
    NegativeTotal { total_cents: i64 },
    /// `allocate` needs at least one weight.
    EmptyWeights,
    /// A weight is NaN or infinite.
    NonFiniteWeight { index: usize },
    /// Weights must be non-negative.
    NegativeWeight { index: usize, weight: f64 },
    /// All weights are zero; shares are undefined.
    ZeroWeightSum,
    /// Unit price must be non-negative.
    NegativePrice { unit_price_cents: i64 },
    /// Quantity is NaN or infinite.
    NonFiniteQuantity,
    /// Quantity must be non-negative.
    NegativeQuantity { quantity: f64 },
    /// The scaled product does not fit in `i64`.
    Overflow,
}

impl std::fmt::Display for MoneyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeTotal { total_cents } => {
                write!(f, "total must be >= 0 cents, got {total_cents}")
            }
            Self::EmptyWeights => write!(f, "at least one weight is required"),
            Self::NonFiniteWeight { index } => {
                write!(f, "weight at index {index} is NaN or infinite")
            }
            Self::NegativeWeight { index, weight } => {
                write!(f, "weight at index {index} must be >= 0, got {weight}")
            }
            Self::ZeroWeightSum => write!(f, "weights must not all be zero"),
            Self::NegativePrice { unit_price_cents } => {
                write!(f, "unit price must be >= 0 cents, got {unit_price_cents}")
            }
            Self::NonFiniteQuantity => write!(f, "quantity is NaN or infinite"),
            Self::NegativeQuantity { quantity } => {
                write!(f, "quantity must be >= 0, got {quantity}")
            }
            Self::Overflow => write!(f, "scaled amount does not fit in i64 cents"),
        }
    }
}

impl std::error::Error for MoneyError {}

// ---------------------------------------------------------------------------
// allocate
// ---------------------------------------------------------------------------

/// Divide `total_cents` across `weights` proportionally, in whole cents.
///
/// Returns `parts` with `parts.len() == weights.len()`, every part
/// non-negative, and `sum(parts) == total_cents` — always, including when
/// the weights do not divide the total evenly.
///
/// # Algorithm (largest remainder)
///
/// 1. Compute each real share `total * w_i / Σw`, floor it.
/// 2. Hand the leftover cents out one at a time to the indices with the
///    largest fractional remainders, ties broken by ascending index.
/// 3. If f64 dust ever makes the floored sum overshoot the total, reclaim
///    cents smallest-remainder-first from non-zero parts.  Step 3 is a
///    guard; it does not fire for realistic inputs.
///
/// # Errors
///
/// Rejects a negative total, an empty weight list, NaN/infinite/negative
/// weights, and an all-zero weight list.
pub fn allocate(total_cents: i64, weights: &[f64]) -> Result<Vec<i64>, MoneyError> {
    if total_cents < 0 {
        return Err(MoneyError::NegativeTotal { total_cents });
    }
    if weights.is_empty() {
        return Err(MoneyError::EmptyWeights);
    }
    for (index, w) in weights.iter().enumerate() {
        if !w.is_finite() {
            return Err(MoneyError::NonFiniteWeight { index });
        }
        if *w < 0.0 {
            return Err(MoneyError::NegativeWeight { index, weight: *w });
        }
    }
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return Err(MoneyError::ZeroWeightSum);
    }

    let mut parts = Vec::with_capacity(weights.len());
    let mut fracs = Vec::with_capacity(weights.len());
    let mut floored_sum: i64 = 0;

    for w in weights {
        let exact = total_cents as f64 * w / weight_sum;
        let floor = exact.floor();
        let part = floor as i64;
        parts.push(part);
        fracs.push(exact - floor);
        floored_sum += part;
    }

    let mut leftover = total_cents - floored_sum;

    if leftover > 0 {
        // Largest fractional remainder first; ties by ascending index.
        let mut order: Vec<usize> = (0..weights.len()).collect();
        order.sort_by(|&a, &b| {
            fracs[b]
                .partial_cmp(&fracs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        let mut cursor = 0;
        while leftover > 0 {
            parts[order[cursor % order.len()]] += 1;
            leftover -= 1;
            cursor += 1;
        }
    } else if leftover < 0 {
        // Overshoot guard: reclaim from the smallest remainders.
        let mut order: Vec<usize> = (0..weights.len()).collect();
        order.sort_by(|&a, &b| {
            fracs[a]
                .partial_cmp(&fracs[b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        let mut cursor = 0;
        while leftover < 0 {
            let idx = order[cursor % order.len()];
            if parts[idx] > 0 {
                parts[idx] -= 1;
                leftover += 1;
            }
            cursor += 1;
        }
    }

    Ok(parts)
}

/// Unit weights for an equal split across `n` parties.
pub fn equal_weights(n: usize) -> Vec<f64> {
    vec![1.0; n]
}

// ---------------------------------------------------------------------------
// integer_scale
// ---------------------------------------------------------------------------

/// Scale a unit price by a (possibly fractional) quantity, in whole cents.
///
/// Computes `floor(unit_price_cents × quantity)` — truncation toward zero,
/// both operands being non-negative — with a one-micro-cent nudge so that
/// decimal quantities land on the cent value they denote rather than one
/// below it (f64 cannot represent most decimals exactly).
///
/// # Errors
///
/// Rejects a negative price, a NaN/infinite/negative quantity, and products
/// beyond `i64` range.
pub fn integer_scale(unit_price_cents: i64, quantity: f64) -> Result<i64, MoneyError> {
    if unit_price_cents < 0 {
        return Err(MoneyError::NegativePrice { unit_price_cents });
    }
    if !quantity.is_finite() {
        return Err(MoneyError::NonFiniteQuantity);
    }
    if quantity < 0.0 {
        return Err(MoneyError::NegativeQuantity { quantity });
    }

    let exact = unit_price_cents as f64 * quantity;
    if exact >= i64::MAX as f64 {
        return Err(MoneyError::Overflow);
    }
    Ok((exact + 1e-6).floor() as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
