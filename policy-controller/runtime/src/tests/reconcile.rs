use super::{mk_namespace, mk_policy, selector_eq, FakeStore};
use crate::{
    k8s::{policy::TimeSyncPolicyStatus, LabelSelector, LabelSelectorRequirement},
    metrics::ReconcileMetrics,
    reconcile::{Error, Outcome, Reconciler},
};
use std::sync::Arc;

fn mk_reconciler() -> (Arc<FakeStore>, ReconcileMetrics, Reconciler<Arc<FakeStore>>) {
    let store = Arc::new(FakeStore::default());
    let metrics = ReconcileMetrics::register(&mut Default::default());
    let reconciler = Reconciler::new(store.clone(), metrics.clone());
    (store, metrics, reconciler)
}

fn add_namespaces(store: &FakeStore) {
    store.add_namespace(mk_namespace("ns-0", &[("env", "test")]));
    store.add_namespace(mk_namespace("ns-1", &[("env", "test"), ("team", "a")]));
    store.add_namespace(mk_namespace("ns-2", &[("env", "prod")]));
    store.add_namespace(mk_namespace("ns-3", &[]));
    store.add_namespace(mk_namespace("ns-4", &[("env", "test")]));
}

#[tokio::test]
async fn records_matched_namespaces_once() {
    let (store, metrics, reconciler) = mk_reconciler();
    add_namespaces(&store);
    store.add_policy(mk_policy(
        "tsp",
        selector_eq("env", "test"),
        true,
        "timesync:latest",
    ));

    let outcome = reconciler.reconcile("tsp").await.expect("must reconcile");
    assert_eq!(
        outcome,
        Outcome::Updated {
            previous: 0,
            matched: 3
        }
    );
    assert_eq!(store.status_writes(), vec![("tsp".to_string(), 3)]);
    assert_eq!(
        store.policy("tsp").and_then(|p| p.matched_namespaces()),
        Some(3)
    );

    let outcome = reconciler.reconcile("tsp").await.expect("must reconcile");
    assert_eq!(outcome, Outcome::Unchanged { matched: 3 });
    assert_eq!(store.status_writes().len(), 1, "no second write");

    assert_eq!(metrics.outcome_count("updated"), 1);
    assert_eq!(metrics.outcome_count("unchanged"), 1);
    assert_eq!(metrics.matched_count("tsp"), 3);
}

#[tokio::test]
async fn zero_matches_without_status_is_current() {
    let (store, _, reconciler) = mk_reconciler();
    add_namespaces(&store);
    store.add_policy(mk_policy(
        "tsp",
        selector_eq("env", "staging"),
        true,
        "timesync:latest",
    ));

    let outcome = reconciler.reconcile("tsp").await.expect("must reconcile");
    assert_eq!(outcome, Outcome::Unchanged { matched: 0 });
    assert!(store.status_writes().is_empty());
}

#[tokio::test]
async fn empty_selector_counts_every_namespace() {
    let (store, _, reconciler) = mk_reconciler();
    add_namespaces(&store);
    store.add_policy(mk_policy(
        "tsp",
        LabelSelector::default(),
        false,
        "timesync:latest",
    ));

    let outcome = reconciler.reconcile("tsp").await.expect("must reconcile");
    assert_eq!(
        outcome,
        Outcome::Updated {
            previous: 0,
            matched: 5
        }
    );
}

#[tokio::test]
async fn recounts_when_namespaces_change() {
    let (store, _, reconciler) = mk_reconciler();
    add_namespaces(&store);
    store.add_policy(mk_policy(
        "tsp",
        selector_eq("env", "test"),
        true,
        "timesync:latest",
    ));
    reconciler.reconcile("tsp").await.expect("must reconcile");

    store.add_namespace(mk_namespace("ns-5", &[("env", "test")]));
    let outcome = reconciler.reconcile("tsp").await.expect("must reconcile");
    assert_eq!(
        outcome,
        Outcome::Updated {
            previous: 3,
            matched: 4
        }
    );
    assert_eq!(
        store.status_writes(),
        vec![("tsp".to_string(), 3), ("tsp".to_string(), 4)]
    );
}

#[tokio::test]
async fn malformed_selector_records_zero() {
    let (store, _, reconciler) = mk_reconciler();
    add_namespaces(&store);
    let mut policy = mk_policy(
        "tsp",
        LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "In".to_string(),
                values: None,
            }]),
            ..Default::default()
        },
        true,
        "timesync:latest",
    );
    policy.status = Some(TimeSyncPolicyStatus {
        matched_namespaces: 4,
    });
    store.add_policy(policy);

    let outcome = reconciler.reconcile("tsp").await.expect("must reconcile");
    assert_eq!(
        outcome,
        Outcome::Updated {
            previous: 4,
            matched: 0
        }
    );
    assert_eq!(store.status_writes(), vec![("tsp".to_string(), 0)]);
}

#[tokio::test]
async fn deleted_policy_is_a_noop() {
    let (store, metrics, reconciler) = mk_reconciler();
    add_namespaces(&store);

    let outcome = reconciler.reconcile("missing").await.expect("must reconcile");
    assert_eq!(outcome, Outcome::Deleted);
    assert!(store.status_writes().is_empty());
    assert_eq!(metrics.outcome_count("deleted"), 1);
}

#[tokio::test]
async fn surfaces_conflicts() {
    let (store, metrics, reconciler) = mk_reconciler();
    add_namespaces(&store);
    store.add_policy(mk_policy(
        "tsp",
        selector_eq("env", "test"),
        true,
        "timesync:latest",
    ));
    store.conflict_writes();

    let error = reconciler
        .reconcile("tsp")
        .await
        .expect_err("conflict must be surfaced");
    assert!(error.is_conflict(), "unexpected error: {error}");
    assert!(store.status_writes().is_empty());
    assert_eq!(metrics.outcome_count("error"), 1);
}

#[tokio::test]
async fn surfaces_namespace_read_errors() {
    let (store, _, reconciler) = mk_reconciler();
    store.add_policy(mk_policy(
        "tsp",
        selector_eq("env", "test"),
        true,
        "timesync:latest",
    ));
    store.fail_namespaces();

    let error = reconciler
        .reconcile("tsp")
        .await
        .expect_err("read error must be surfaced");
    assert!(matches!(error, Error::ListNamespaces(_)));
    assert!(!error.is_conflict());
}

#[tokio::test]
async fn surfaces_policy_read_errors() {
    let (store, _, reconciler) = mk_reconciler();
    store.fail_policies();

    let error = reconciler
        .reconcile("tsp")
        .await
        .expect_err("read error must be surfaced");
    assert!(matches!(error, Error::GetPolicy { .. }));
}
