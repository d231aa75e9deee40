//! A member appearing in any split (or holding a payment) is pinned to the
//! receipt; editing them out of the splits unpins them.

use tally_core::CoreError;
use tally_schemas::ReceiptPatch;
use tally_testkit::{cancel, item, payment, split, uid, Harness};

#[tokio::test]
async fn removal_blocked_by_splits_until_the_owner_edits_them_out() {
    let h = Harness::new();
    let receipt = h
        .draft_receipt(
            1,
            &[2],
            vec![item("dinner", 2000, 1.0, vec![split(1, 0.5), split(2, 0.5)])],
            vec![],
            vec![payment(1, 2000)],
        )
        .await;

    let err = h
        .api
        .remove_member(uid(1), receipt.receipt_id, uid(2), &cancel())
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::MemberHasObligations);

    // New version reassigns the whole item to the owner.
    let receipt = h
        .api
        .update_receipt(
            uid(1),
            receipt.receipt_id,
            ReceiptPatch {
                version: receipt.version,
                items: Some(vec![item("dinner", 2000, 1.0, vec![split(1, 1.0)])]),
                ..Default::default()
            },
            &cancel(),
        )
        .await
        .unwrap();

    let after = h
        .api
        .remove_member(uid(1), receipt.receipt_id, uid(2), &cancel())
        .await
        .unwrap();
    assert_eq!(after.participants.len(), 1);
    assert!(!after.is_participant(uid(2)));
    assert_eq!(after.version, receipt.version + 1);
}

#[tokio::test]
async fn removal_blocked_by_a_recorded_payment() {
    let h = Harness::new();
    let receipt = h
        .draft_receipt(
            1,
            &[2],
            vec![item("dinner", 2000, 1.0, vec![split(1, 1.0)])],
            vec![],
            vec![payment(1, 1500), payment(2, 500)],
        )
        .await;

    let err = h
        .api
        .remove_member(uid(1), receipt.receipt_id, uid(2), &cancel())
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::MemberHasObligations);
}

#[tokio::test]
async fn removal_recomputes_equal_charge_splits() {
    let h = Harness::new();
    // A 900-cent unsplit charge across three participants: 300 each.
    let receipt = h
        .draft_receipt(
            1,
            &[2, 3],
            vec![],
            vec![tally_testkit::charge("service", 900, vec![])],
            vec![],
        )
        .await;
    assert_eq!(receipt.settle_summary.len(), 3);
    assert!(receipt.settle_summary.iter().all(|s| s.net_cents == 300));

    // After removing one member the charge re-divides across two.
    let after = h
        .api
        .remove_member(uid(1), receipt.receipt_id, uid(3), &cancel())
        .await
        .unwrap();
    assert_eq!(after.settle_summary.len(), 2);
    assert!(after.settle_summary.iter().all(|s| s.net_cents == 450));
}
