//! Contract Test: Reconciliation Fail-Fast & Idempotency
//!
//! Constraints verified:
//! - The first failed record set update aborts the pass
//! - The error carries the number of successful updates before it
//! - Lines after the failure are never attempted
//! - Reconciling the same selection twice leaves the same store content
//!
//! If this test fails, a partial DNS write can go unnoticed.

mod common;

use common::*;
use multinet_core::config::ThresholdConfig;
use multinet_core::model::IpVersion;
use multinet_core::{Error, Reconciler, Selector, aggregate};
use tokio_test::{assert_err, assert_ok};

fn three_line_selection() -> (
    std::collections::BTreeMap<multinet_core::LineKey, multinet_core::LineResult>,
    Vec<multinet_core::LineConfig>,
) {
    let aggregated = aggregate(vec![
        measurement("r1", "cu", IpVersion::V4, "10.0.1.1", 10.0, 50.0, 0.0),
        measurement("r1", "cm", IpVersion::V4, "10.0.2.1", 10.0, 50.0, 0.0),
        measurement("r1", "ct", IpVersion::V4, "10.0.3.1", 10.0, 50.0, 0.0),
    ]);
    let lines = vec![line("cu", 2), line("cm", 2), line("ct", 2)];
    let selected = Selector::new(Default::default(), ThresholdConfig::permissive())
        .select_top(&aggregated, &lines);
    (selected, lines)
}

#[tokio::test]
async fn second_failure_stops_before_third_line() {
    let (selected, lines) = three_line_selection();

    let store = MockRecordStore::new().failing_on_call(2);
    let reconciler = Reconciler::new(Box::new(MockRecordStore::sharing_state_with(&store)), 300);

    let err = assert_err!(reconciler.reconcile(&selected, &lines).await);

    match &err {
        Error::Reconcile { updated, key, .. } => {
            assert_eq!(*updated, 1);
            assert_eq!(key, "cm-v4");
        }
        other => panic!("expected Error::Reconcile, got {other}"),
    }
    assert_eq!(err.updated_before_failure(), Some(1));

    // Exactly two calls: the success and the failure
    assert_eq!(store.call_count(), 2);
    let ids: Vec<String> = store.calls().into_iter().map(|c| c.record_set_id).collect();
    assert_eq!(ids, vec!["cu.example.com", "cm.example.com"]);
    assert!(!store.records().contains_key("ct.example.com"));
}

#[tokio::test]
async fn reconciling_twice_converges_to_same_content() {
    let (selected, lines) = three_line_selection();

    let store = MockRecordStore::new();
    let reconciler = Reconciler::new(Box::new(MockRecordStore::sharing_state_with(&store)), 300);

    let first = assert_ok!(reconciler.reconcile(&selected, &lines).await);
    let after_first = store.records();

    let second = assert_ok!(reconciler.reconcile(&selected, &lines).await);
    let after_second = store.records();

    assert_eq!(first, 3);
    assert_eq!(second, 3);
    assert_eq!(after_first, after_second);
    // Calls are still issued on the second pass
    assert_eq!(store.call_count(), 6);
}
