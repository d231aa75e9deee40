//! Scenario harness: a `CoreApi` over the in-memory store plus fixture
//! builders, shared by the end-to-end tests under `tests/`.
//!
//! User ids are small fixed uuids (`uid(1)`, `uid(2)`, …) so debtor and
//! creditor orderings in assertions are stable: the ledger builder walks
//! users in id order.

use std::sync::Arc;

use tally_core::CoreApi;
use tally_schemas::{
    ChargeInput, ItemInput, NewReceipt, Payment, Receipt, ReceiptPatch, Split,
};
use tally_store::{CancelToken, MemStore};
use uuid::Uuid;

pub fn uid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn cancel() -> CancelToken {
    CancelToken::new()
}

pub fn split(user: u128, share: f64) -> Split {
    Split {
        user_id: uid(user),
        share_quantity: share,
    }
}

pub fn item(name: &str, unit_price_cents: i64, quantity: f64, splits: Vec<Split>) -> ItemInput {
    ItemInput {
        name: name.to_string(),
        unit_price_cents,
        quantity,
        taxable: true,
        splits,
    }
}

pub fn charge(name: &str, unit_price_cents: i64, splits: Vec<Split>) -> ChargeInput {
    ChargeInput {
        name: name.to_string(),
        unit_price_cents,
        taxable: false,
        splits,
    }
}

pub fn payment(user: u128, amount_paid_cents: i64) -> Payment {
    Payment {
        user_id: uid(user),
        amount_paid_cents,
    }
}

/// A core engine wired to a fresh in-memory store.
pub struct Harness {
    pub store: Arc<MemStore>,
    pub api: CoreApi<MemStore>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemStore::new());
        let api = CoreApi::new(Arc::clone(&store));
        Self { store, api }
    }

    /// Seed a directory user with a fixed id; the email is derived from it.
    pub async fn seed_user(&self, n: u128) -> Uuid {
        self.store
            .register_user_with_id(uid(n), &format!("user{n}@example.com"))
            .await;
        uid(n)
    }

    /// Create a draft owned by `owner`, add `members`, then patch in the
    /// given lines and payments through the public update path.
    pub async fn draft_receipt(
        &self,
        owner: u128,
        members: &[u128],
        items: Vec<ItemInput>,
        charges: Vec<ChargeInput>,
        payments: Vec<Payment>,
    ) -> Receipt {
        self.seed_user(owner).await;
        let mut receipt = self
            .api
            .create_receipt(
                uid(owner),
                NewReceipt {
                    title: "shared bill".to_string(),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .expect("create receipt");

        for member in members {
            self.seed_user(*member).await;
            receipt = self
                .api
                .add_member(
                    uid(owner),
                    receipt.receipt_id,
                    &format!("user{member}@example.com"),
                    &cancel(),
                )
                .await
                .expect("add member");
        }

        self.api
            .update_receipt(
                uid(owner),
                receipt.receipt_id,
                ReceiptPatch {
                    version: receipt.version,
                    items: Some(items),
                    charges: Some(charges),
                    payments: Some(payments),
                    ..Default::default()
                },
                &cancel(),
            )
            .await
            .expect("patch draft")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
