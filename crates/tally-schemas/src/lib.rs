//! Shared domain model for the bill-splitting engine.
//!
//! Plain serde-able data types only — no IO, no business rules.  All money
//! fields are signed 64-bit integer cents; quantities and split shares are
//! f64.  Status enums carry `as_str`/`from_str` so stores can persist them
//! as text columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a receipt.  Settled-ness is derived from the ledger,
/// not stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Draft,
    Finalized,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Draft => "draft",
            ReceiptStatus::Finalized => "finalized",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ReceiptStatus::Draft),
            "finalized" => Some(ReceiptStatus::Finalized),
            _ => None,
        }
    }
}

/// Role of a participant on a receipt.  The owner is always the first
/// participant and the only one allowed to mutate the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Owner,
    Member,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Owner => "owner",
            ParticipantRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(ParticipantRole::Owner),
            "member" => Some(ParticipantRole::Member),
            _ => None,
        }
    }
}

/// Per-participant settlement state carried in a receipt's settle summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleStatus {
    Pending,
    PartiallySettled,
    Settled,
    /// Net position is negative: this participant is owed money.
    Creditor,
}

impl SettleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettleStatus::Pending => "pending",
            SettleStatus::PartiallySettled => "partially_settled",
            SettleStatus::Settled => "settled",
            SettleStatus::Creditor => "creditor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SettleStatus::Pending),
            "partially_settled" => Some(SettleStatus::PartiallySettled),
            "settled" => Some(SettleStatus::Settled),
            "creditor" => Some(SettleStatus::Creditor),
            _ => None,
        }
    }
}

/// Settlement state of a ledger entry — a pure function of
/// `(amount_cents, settled_amount_cents)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    PartiallySettled,
    Settled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::PartiallySettled => "partially_settled",
            EntryStatus::Settled => "settled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EntryStatus::Pending),
            "partially_settled" => Some(EntryStatus::PartiallySettled),
            "settled" => Some(EntryStatus::Settled),
            _ => None,
        }
    }

    /// Derive the status implied by an entry's amount/settled pair.
    pub fn derive_for(amount_cents: i64, settled_amount_cents: i64) -> Self {
        if settled_amount_cents >= amount_cents {
            EntryStatus::Settled
        } else if settled_amount_cents > 0 {
            EntryStatus::PartiallySettled
        } else {
            EntryStatus::Pending
        }
    }
}

// ---------------------------------------------------------------------------
// Receipt aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

/// One participant's share of an item's quantity, or of a charge's weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub user_id: Uuid,
    pub share_quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: f64,
    pub taxable: bool,
    pub splits: Vec<Split>,
}

/// A non-item line: tax, tip, service fee.  Splits are fractional weights
/// summing to 1.0; an empty split list means "equal across participants".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub taxable: bool,
    pub splits: Vec<Split>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub user_id: Uuid,
    pub amount_paid_cents: i64,
}

/// Per-participant projection of liability, payment and settlement progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleSummaryEntry {
    pub user_id: Uuid,
    /// What this participant still owed at finalization time, floored at 0.
    pub amount_cents: i64,
    pub paid_cents: i64,
    /// Liability minus payments; negative means this participant is owed.
    pub net_cents: i64,
    pub settled_amount_cents: i64,
    pub is_settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub status: SettleStatus,
}

/// The root aggregate: a shared bill and everything embedded in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub comments: Option<String>,
    pub folder_id: Option<Uuid>,
    pub status: ReceiptStatus,
    pub participants: Vec<Participant>,
    pub items: Vec<Item>,
    pub charges: Vec<Charge>,
    pub payments: Vec<Payment>,
    pub settle_summary: Vec<SettleSummaryEntry>,
    pub subtotal_cents: i64,
    pub total_cents: i64,
    pub version: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub updated_by: Uuid,
}

impl Receipt {
    /// Whether `user_id` appears in the participant list (the owner always
    /// does, at index 0).
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn participant_ids(&self) -> Vec<Uuid> {
        self.participants.iter().map(|p| p.user_id).collect()
    }

    pub fn payments_total_cents(&self) -> i64 {
        self.payments.iter().map(|p| p.amount_paid_cents).sum()
    }
}

// ---------------------------------------------------------------------------
// Ledger entry
// ---------------------------------------------------------------------------

/// A fixed obligation from one debtor to one creditor, derived from a single
/// finalized receipt.  `amount_cents` never changes after creation;
/// `settled_amount_cents` only grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub receipt_id: Uuid,
    pub debtor_id: Uuid,
    pub creditor_id: Uuid,
    pub amount_cents: i64,
    pub settled_amount_cents: i64,
    pub status: EntryStatus,
    /// Emission index within the receipt's ledger; `(receipt_id, position)`
    /// identifies an obligation across idempotent finalize retries.
    pub position: i32,
    pub is_deleted: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// What remains to be paid on this entry.
    pub fn open_amount_cents(&self) -> i64 {
        self.amount_cents - self.settled_amount_cents
    }
}

// ---------------------------------------------------------------------------
// External user directory (read-only)
// ---------------------------------------------------------------------------

/// The only user fields the core reads; accounts are managed elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Balance view
// ---------------------------------------------------------------------------

/// A user's open position aggregated across all receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub owes_cents: i64,
    pub is_owed_cents: i64,
    /// `is_owed - owes`: positive means net creditor.
    pub net_cents: i64,
}

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

/// Payload for creating a draft receipt.  Items, charges and payments are
/// added later through patches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewReceipt {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

/// An item as submitted by a client; the server assigns the `item_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInput {
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: f64,
    #[serde(default = "default_true")]
    pub taxable: bool,
    #[serde(default)]
    pub splits: Vec<Split>,
}

/// A charge as submitted by a client; the server assigns the `charge_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeInput {
    pub name: String,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub taxable: bool,
    #[serde(default)]
    pub splits: Vec<Split>,
}

/// Partial update of a draft receipt.  Every field except `version` is
/// optional so autosave clients can submit whatever subset changed;
/// `version` is the optimistic-lock gate and is always required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptPatch {
    pub version: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub items: Option<Vec<ItemInput>>,
    #[serde(default)]
    pub charges: Option<Vec<ChargeInput>>,
    #[serde(default)]
    pub payments: Option<Vec<Payment>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
