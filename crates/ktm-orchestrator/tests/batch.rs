//! Multi-cluster connect tests

mod common;

use common::{cluster, overlay_cluster, Harness, RANGE_START};
use ktm_core::types::NetworkRequirement;
use ktm_orchestrator::{ConnectionOutcome, OrchestratorError};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_results_follow_selection_order() {
    let h = Harness::new();
    h.transport.fail_host("b");
    let selected = vec![cluster("acme", "a"), cluster("acme", "b"), cluster("acme", "c")];

    let report = h.state.batch.connect_batch(&selected).await;

    let contexts: Vec<_> = report.results.iter().map(|r| r.context_name.as_str()).collect();
    assert_eq!(contexts, vec!["acme-a", "acme-b", "acme-c"]);
    assert!(report.results[0].is_success());
    assert!(!report.results[1].is_success());
    assert!(report.results[2].is_success());

    assert_eq!(report.active_context.as_deref(), Some("acme-a"));
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_complete_success());
    assert!(!report.is_total_failure());

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "acme-b");
    assert!(failures[0].1.contains("Connection refused"));

    assert_eq!(report.results[0].tunnel().unwrap().local_port, RANGE_START);
    assert_eq!(report.results[2].tunnel().unwrap().local_port, RANGE_START + 1);
}

#[tokio::test]
async fn test_active_context_is_first_success_not_first_selected() {
    let h = Harness::new();
    h.transport.fail_host("a");
    let selected = vec![cluster("acme", "a"), cluster("acme", "b"), cluster("acme", "c")];

    let report = h.state.batch.connect_batch(&selected).await;
    assert_eq!(report.active_context.as_deref(), Some("acme-b"));
}

#[tokio::test]
async fn test_empty_selection() {
    let h = Harness::new();
    let report = h.state.batch.connect_batch(&[]).await;

    assert!(report.results.is_empty());
    assert!(report.active_context.is_none());
    assert!(!report.is_total_failure());
    assert!(h.transport.opened().is_empty());
}

#[tokio::test]
async fn test_total_failure_sets_no_active_context() {
    let h = Harness::new();
    h.transport.fail_host("a");
    h.transport.fail_host("b");

    let report = h
        .state
        .batch
        .connect_batch(&[cluster("acme", "a"), cluster("acme", "b")])
        .await;

    assert!(report.active_context.is_none());
    assert!(report.is_total_failure());
    assert_eq!(report.failed(), 2);
}

#[tokio::test]
async fn test_unsatisfied_network_is_a_warning_not_a_failure() {
    let h = Harness::new();
    let selected = vec![
        overlay_cluster("acme", "a", "192.168.90.0/24"),
        overlay_cluster("acme", "b", "192.168.90.0/24"),
        cluster("acme", "c").with_network(NetworkRequirement::Vpn),
    ];

    let report = h.state.batch.connect_batch(&selected).await;

    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.warnings().count(), 3);
    assert_eq!(
        report.unresolved_hints(),
        vec![
            "sshuttle -r user@host 192.168.90.0/24".to_string(),
            "Ensure VPN connection is active".to_string(),
        ]
    );

    let stored = h.state.store.get("acme-a").await.unwrap().unwrap();
    let network = stored.network.unwrap();
    assert!(network.satisfied_last_checked_at.is_none());
}

#[tokio::test]
async fn test_satisfied_network_records_check_time() {
    let h = Harness::new();
    h.probe.start_overlay("192.168.90.0/24");

    let report = h
        .state
        .batch
        .connect_batch(&[overlay_cluster("acme", "a", "192.168.90.0/24")])
        .await;

    assert!(report.results[0].warnings.is_empty());
    let stored = h.state.store.get("acme-a").await.unwrap().unwrap();
    assert!(stored.network.unwrap().satisfied_last_checked_at.is_some());
}

#[tokio::test]
async fn test_duplicate_selection_is_independent_attempt() {
    let h = Harness::new();
    let prod = cluster("acme", "prod");

    let report = h.state.batch.connect_batch(&[prod.clone(), prod]).await;

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.results[0].tunnel(), report.results[1].tunnel());
    assert_eq!(h.transport.opened().len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = Harness::new();
    let token = CancellationToken::new();
    token.cancel();

    let report = h
        .state
        .batch
        .connect_batch_with_cancel(&[cluster("acme", "a"), cluster("acme", "b")], &token)
        .await;

    assert!(report.cancelled);
    assert!(report.results.is_empty());
    assert_eq!(report.requested, 2);
    assert!(!report.is_complete_success());
}

#[tokio::test]
async fn test_cancel_mid_batch_keeps_earlier_tunnels() {
    let h = Harness::new();
    let token = CancellationToken::new();
    h.transport.cancel_on_open(token.clone());

    let report = h
        .state
        .batch
        .connect_batch_with_cancel(
            &[cluster("acme", "a"), cluster("acme", "b"), cluster("acme", "c")],
            &token,
        )
        .await;

    assert!(report.cancelled);
    assert_eq!(report.results.len(), 1);
    assert!(matches!(
        report.results[0].outcome,
        ConnectionOutcome::Success(_)
    ));
    assert_eq!(report.active_context.as_deref(), Some("acme-a"));
    assert!(h.state.supervisor.is_alive("acme-a").await.unwrap());
}

#[tokio::test]
async fn test_connect_one_declined_creates_nothing() {
    let h = Harness::new();
    let target = overlay_cluster("acme", "a", "192.168.90.0/24");
    let mut seen_hint = None;

    let err = h
        .state
        .batch
        .connect_one(&target, |unsatisfied| {
            seen_hint = unsatisfied.hint.clone();
            false
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Aborted(_)));
    assert_eq!(
        seen_hint.as_deref(),
        Some("sshuttle -r user@host 192.168.90.0/24")
    );
    assert!(h.transport.opened().is_empty());
}

#[tokio::test]
async fn test_connect_one_confirmed_opens_tunnel() {
    let h = Harness::new();
    let target = cluster("acme", "a").with_network(NetworkRequirement::Vpn);

    let record = h.state.batch.connect_one(&target, |_| true).await.unwrap();
    assert_eq!(record.context_name, "acme-a");
    assert!(h.state.supervisor.is_alive("acme-a").await.unwrap());
}

#[tokio::test]
async fn test_connect_one_skips_prompt_when_satisfied() {
    let h = Harness::new();
    h.probe.set_vpn(true);
    let target = cluster("acme", "a").with_network(NetworkRequirement::Vpn);

    let record = h
        .state
        .batch
        .connect_one(&target, |_| panic!("should not ask"))
        .await
        .unwrap();
    assert_eq!(record.local_port, RANGE_START);
}
