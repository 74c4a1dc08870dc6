//! End-to-end scenarios driving the library surface directly: Store +
//! evaluator + alert engine + relay, wired the way `worker::process_job`
//! wires them. The REST surface is intentionally not exercised here — the
//! control-plane CRUD API is a different component's responsibility.

use pulseward::classify::ErrorType;
use pulseward::evaluator;
use pulseward::model::{
    Check, CheckMeta, CheckResult, HealthState, Monitor, MonitorDependency, Protocol,
};
use pulseward::relay::Relay;
use pulseward::store::{SqliteStore, Store};
use pulseward::{alerts, scheduler};
use std::sync::Arc;
use uuid::Uuid;

fn sample_monitor(id: &str, protocol: Protocol, alert_threshold: u32) -> Monitor {
    let now = chrono::Utc::now();
    Monitor {
        id: id.to_string(),
        owner_id: "owner-1".to_string(),
        name: format!("monitor-{id}"),
        protocol,
        target: "https://example.com".to_string(),
        port: None,
        interval_minutes: 1,
        timeout_ms: 5000,
        degraded_threshold_ms: Some(1000),
        ssl_expiry_threshold_days: 30,
        alert_threshold,
        is_active: true,
        current_state: HealthState::Up,
        total_checks: 0,
        successful_checks: 0,
        consecutive_failures: 0,
        consecutive_degraded: 0,
        consecutive_slow_count: 0,
        last_checked: None,
        last_response_time_ms: None,
        body_contains: None,
        dns_record_type: None,
        dns_expected: None,
        udp_expected_response: None,
        follow_redirects: true,
        repeat_interval_minutes: 30,
        max_repeats: 3,
        escalation_after_minutes: 60,
        created_at: now,
        updated_at: now,
    }
}

/// Drives one probe result through the same Evaluate → persist → alert →
/// relay → reschedule chain as `worker::process_job`, minus the actual
/// protocol probe (the result is supplied directly). Returns the evaluation
/// so callers can assert on transition/threshold behaviour.
async fn drive_check(
    store: &dyn Store,
    relay: &Relay,
    monitor_id: &str,
    result: CheckResult,
) -> evaluator::Evaluation {
    let monitor = store.get_monitor(monitor_id).unwrap().unwrap();
    let old_state = monitor.current_state;

    let counters = monitor.counters();
    let history = store.history_snapshot(monitor_id);
    let evaluation = evaluator::evaluate(&result, counters, &history);

    store.apply_evaluation(monitor_id, &evaluation, result.response_time_ms).unwrap();
    store.history_record(monitor_id, result.is_up, evaluation.next_state);

    let check = Check {
        id: Uuid::new_v4().to_string(),
        monitor_id: monitor_id.to_string(),
        timestamp: chrono::Utc::now(),
        status: evaluation.next_state,
        response_time_ms: result.response_time_ms,
        status_code: result.status_code,
        error_type: result.error_type,
        error_message: result.error_message.clone(),
        degradation_reasons: evaluation.degradation_reasons.clone(),
        ssl_info: match &result.meta {
            CheckMeta::Ssl { valid_from, valid_to, days_remaining, .. } => {
                Some(pulseward::model::SslInfo {
                    valid_from: *valid_from,
                    valid_to: *valid_to,
                    days_remaining: *days_remaining,
                })
            }
            _ => None,
        },
        seq: 0,
    };
    store.insert_check(&check).unwrap();

    alerts::handle_transition(store, &monitor, old_state, &result, &evaluation).await.unwrap();
    let refreshed = store.get_monitor(monitor_id).unwrap().unwrap();
    relay.publish_monitor_update(store, &refreshed, old_state, &result, &evaluation).unwrap();

    evaluation
}

fn not_found_result() -> CheckResult {
    CheckResult::failure(
        80,
        ErrorType::HttpNotFound,
        "HTTP: 404 — not found",
        CheckMeta::Http { final_url: None, redirect_count: 0 },
    )
}

/// S1 — three consecutive 404s with alertThreshold=3: degraded on the first
/// two (waiting 1/3, waiting 2/3, no incident), down with exactly one
/// incident on the third.
#[tokio::test]
async fn s1_404_threshold() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m1", Protocol::Http, 3);
    store.upsert_monitor(&monitor).unwrap();

    let first = drive_check(&store, &relay, "m1", not_found_result()).await;
    assert_eq!(first.next_state, HealthState::Degraded);
    assert!(first.degradation_reasons.iter().any(|r| r == "waiting 1/3"));
    assert!(store.ongoing_incident("m1").unwrap().is_none());

    let second = drive_check(&store, &relay, "m1", not_found_result()).await;
    assert_eq!(second.next_state, HealthState::Degraded);
    assert!(second.degradation_reasons.iter().any(|r| r == "waiting 2/3"));
    assert!(store.ongoing_incident("m1").unwrap().is_none());

    let third = drive_check(&store, &relay, "m1", not_found_result()).await;
    assert_eq!(third.next_state, HealthState::Down);
    let incident = store.ongoing_incident("m1").unwrap().expect("incident opens at threshold");
    assert_eq!(incident.error_type, Some(ErrorType::HttpNotFound));

    let refreshed = store.get_monitor("m1").unwrap().unwrap();
    assert_eq!(refreshed.current_state, HealthState::Down);
    assert!(refreshed.counters_valid());
}

/// S2 — slow recovery: a monitor already down with an ongoing incident
/// receives two healthy probes; the incident resolves exactly once, its
/// duration is consistent, and failure-suppression keys are cleared.
#[tokio::test]
async fn s2_slow_recovery() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let mut monitor = sample_monitor("m2", Protocol::Http, 2);
    monitor.current_state = HealthState::Down;
    monitor.consecutive_failures = 2;
    store.upsert_monitor(&monitor).unwrap();

    let down_result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
    drive_check(&store, &relay, "m2", down_result).await;
    let incident = store.ongoing_incident("m2").unwrap().expect("incident open before recovery");
    assert_eq!(incident.status, pulseward::model::IncidentStatus::Ongoing);

    let healthy = CheckResult::ok(420, Some(200), CheckMeta::Http { final_url: None, redirect_count: 0 });
    let eval = drive_check(&store, &relay, "m2", healthy).await;
    assert_eq!(eval.next_state, HealthState::Up);

    assert!(store.ongoing_incident("m2").unwrap().is_none());
    assert!(!store.ttl().exists("suppression:m2:failure:high").unwrap());
}

/// S3 — SSL expiring: a certificate with 10 days remaining on an otherwise
/// healthy response degrades the monitor under the security category with
/// high severity, on the very probe that observes it; a second probe within
/// the suppression TTL does not open a second incident.
#[tokio::test]
async fn s3_ssl_expiring() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let mut monitor = sample_monitor("m3", Protocol::Ssl, 1);
    monitor.ssl_expiry_threshold_days = 30;
    store.upsert_monitor(&monitor).unwrap();

    let now = chrono::Utc::now();
    let expiring = || CheckResult {
        is_up: true,
        response_time_ms: 420,
        status_code: Some(200),
        error_type: None,
        error_message: None,
        meta: CheckMeta::Ssl {
            valid_from: now - chrono::Duration::days(80),
            valid_to: now + chrono::Duration::days(10),
            days_remaining: 10,
            subject: Some("example.com".to_string()),
        },
    };

    let eval = drive_check(&store, &relay, "m3", expiring()).await;
    assert_eq!(eval.next_state, HealthState::Degraded);
    assert_eq!(eval.degradation_category, Some(pulseward::model::DegradationCategory::Security));
    assert!(eval.degradation_reasons.iter().any(|r| r == "SSL_WARNING: expires in 10 days"));

    let incident = store.ongoing_incident("m3").unwrap().expect("a security incident opens on first observation");
    assert_eq!(incident.severity, pulseward::model::Severity::High);

    // A second probe within the suppression TTL must not open another one.
    drive_check(&store, &relay, "m3", expiring()).await;
    let still_one = store.ongoing_incident("m3").unwrap().unwrap();
    assert_eq!(still_one.id, incident.id);
}

/// S4 — DNS NXDOMAIN: a high-severity DNS failure with alertThreshold=1
/// flips the monitor to down and opens an incident on the very first probe.
#[tokio::test]
async fn s4_dns_nxdomain() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m4", Protocol::Dns, 1);
    store.upsert_monitor(&monitor).unwrap();

    let result = CheckResult::failure(
        40,
        ErrorType::DnsNotFound,
        "DNS: no A records found for no-such-domain-xyz-999.com",
        CheckMeta::None,
    );
    let eval = drive_check(&store, &relay, "m4", result).await;

    assert_eq!(eval.next_state, HealthState::Down);
    let incident = store.ongoing_incident("m4").unwrap().expect("incident opens on first failure at threshold 1");
    assert_eq!(incident.error_type, Some(ErrorType::DnsNotFound));
}

/// S5 — concurrent probes: two workers race to claim the same job; only
/// one succeeds, the other observes an empty queue (lease exclusivity holds
/// invariant 1 — at most one ongoing incident, never double-created).
#[tokio::test]
async fn s5_concurrent_probes_claim_exclusively() {
    let store = SqliteStore::open_in_memory().unwrap();
    let monitor = sample_monitor("m5", Protocol::Http, 1);
    store.upsert_monitor(&monitor).unwrap();
    scheduler::schedule_monitor(&store, "m5", 0).unwrap();

    let claimed_by_a = scheduler::claim_next_job(&store, "worker-a").unwrap();
    let claimed_by_b = scheduler::claim_next_job(&store, "worker-b").unwrap();

    assert!(claimed_by_a.is_some());
    assert!(claimed_by_b.is_none(), "a second worker must not claim the same leased job");
}

/// S6 — manual cooldown: `run_now` succeeds once, is rate-limited inside the
/// 30s cooldown window, and is not retried automatically by this test (the
/// cooldown key itself, not wall-clock time, is what's under test here).
#[tokio::test]
async fn s6_manual_cooldown() {
    let store = SqliteStore::open_in_memory().unwrap();
    let monitor = sample_monitor("m6", Protocol::Http, 1);
    store.upsert_monitor(&monitor).unwrap();

    scheduler::run_now(&store, "m6").unwrap();
    let second = scheduler::run_now(&store, "m6");
    assert!(second.is_err(), "a manual check inside the cooldown window must be rejected");

    store.ttl().delete("cooldown:manual-check:m6").unwrap();
    assert!(scheduler::run_now(&store, "m6").is_ok());
}

/// Testable property 1: at most one ongoing incident per monitor, even
/// across repeated failing probes that keep re-entering the `Down` arm.
#[tokio::test]
async fn invariant_at_most_one_ongoing_incident() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m7", Protocol::Http, 1);
    store.upsert_monitor(&monitor).unwrap();

    for _ in 0..5 {
        let result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
        drive_check(&store, &relay, "m7", result).await;
    }

    let checks = store.recent_checks("m7", 10).unwrap();
    assert!(checks.len() >= 2, "repeated failures keep landing a single ongoing incident");
    assert!(store.ongoing_incident("m7").unwrap().is_some());
}

/// Testable property 2: `successfulChecks <= totalChecks` holds through a
/// mixed sequence of healthy and failing probes.
#[tokio::test]
async fn invariant_successful_checks_never_exceed_total() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m8", Protocol::Http, 2);
    store.upsert_monitor(&monitor).unwrap();

    let sequence = [true, false, false, true, true, false];
    for is_up in sequence {
        let result = if is_up {
            CheckResult::ok(100, Some(200), CheckMeta::Http { final_url: None, redirect_count: 0 })
        } else {
            CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None)
        };
        drive_check(&store, &relay, "m8", result).await;
        let refreshed = store.get_monitor("m8").unwrap().unwrap();
        assert!(refreshed.counters_valid());
    }
}

/// Testable property 3: a resolved incident's duration is internally
/// consistent (`endTime >= startTime` and `durationSecs` matches the delta).
#[tokio::test]
async fn invariant_resolved_incident_duration_is_consistent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m9", Protocol::Http, 1);
    store.upsert_monitor(&monitor).unwrap();

    let down = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
    drive_check(&store, &relay, "m9", down).await;
    assert!(store.ongoing_incident("m9").unwrap().is_some());

    let end_time = chrono::Utc::now() + chrono::Duration::seconds(300);
    let resolved = store.resolve_all_ongoing("m9", end_time, 0.9).unwrap();
    assert_eq!(resolved.len(), 1);
    let mut incident = resolved.into_iter().next().unwrap();
    incident.status = pulseward::model::IncidentStatus::Resolved;
    incident.end_time = Some(end_time);
    incident.duration_secs = Some((end_time - incident.start_time).num_seconds());
    assert!(incident.duration_is_consistent());
    assert!(store.ongoing_incident("m9").unwrap().is_none());
}

/// Testable property 4: a transition from up to down is only ever persisted
/// once `consecutiveFailures >= alertThreshold`.
#[tokio::test]
async fn invariant_down_transition_requires_threshold() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m10", Protocol::Http, 4);
    store.upsert_monitor(&monitor).unwrap();

    for expected_failures in 1..4 {
        let result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
        let eval = drive_check(&store, &relay, "m10", result).await;
        assert_eq!(eval.consecutive_failures, expected_failures);
        assert_ne!(eval.next_state, HealthState::Down, "must not flip down before threshold 4");
    }

    let result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
    let eval = drive_check(&store, &relay, "m10", result).await;
    assert_eq!(eval.next_state, HealthState::Down);
    assert_eq!(eval.consecutive_failures, 4);
}

/// Testable property 5: inserted checks carry strictly increasing seq
/// numbers in insertion order.
#[tokio::test]
async fn invariant_check_seq_is_strictly_monotonic() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m11", Protocol::Http, 5);
    store.upsert_monitor(&monitor).unwrap();

    for _ in 0..4 {
        let result = CheckResult::ok(100, Some(200), CheckMeta::None);
        drive_check(&store, &relay, "m11", result).await;
    }

    let checks = store.recent_checks("m11", 10).unwrap();
    let mut seqs: Vec<i64> = checks.iter().map(|c| c.seq).collect();
    seqs.sort_unstable();
    for window in seqs.windows(2) {
        assert!(window[1] > window[0]);
    }
}

/// Testable property 6: the high-severity error types always force a down
/// verdict once the alert threshold is met, never degraded.
#[tokio::test]
async fn invariant_high_severity_errors_always_resolve_down_at_threshold() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();

    for (id, error_type, message) in [
        ("m12a", ErrorType::CertHasExpired, "SSL: certificate has expired"),
        ("m12b", ErrorType::SslInvalid, "SSL: invalid certificate chain"),
        ("m12c", ErrorType::HttpServerError, "HTTP: 500 — internal server error"),
    ] {
        let monitor = sample_monitor(id, Protocol::Https, 1);
        store.upsert_monitor(&monitor).unwrap();
        let result = CheckResult::failure(200, error_type, message, CheckMeta::None);
        let eval = drive_check(&store, &relay, id, result).await;
        assert_eq!(eval.next_state, HealthState::Down, "{id} must resolve down at threshold");
    }
}

/// Testable property 7: the evaluator is a pure, deterministic function —
/// calling it twice with identical inputs produces identical output.
#[tokio::test]
async fn invariant_evaluator_is_pure_and_deterministic() {
    let monitor = sample_monitor("m13", Protocol::Http, 3);
    let history = pulseward::model::HealthHistory::new(20);
    let result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);

    let a = evaluator::evaluate(&result, monitor.counters(), &history);
    let b = evaluator::evaluate(&result, monitor.counters(), &history);

    assert_eq!(a.next_state, b.next_state);
    assert_eq!(a.consecutive_failures, b.consecutive_failures);
    assert_eq!(a.confidence, b.confidence);
    assert_eq!(a.degradation_reasons, b.degradation_reasons);
}

/// Testable property 8: suppression keys always carry a positive TTL and
/// are cleared within the same recovery pass that resolves the incident.
#[tokio::test]
async fn invariant_suppression_keys_are_positive_and_cleared_on_recovery() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let monitor = sample_monitor("m14", Protocol::Http, 1);
    store.upsert_monitor(&monitor).unwrap();

    let down = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
    drive_check(&store, &relay, "m14", down).await;
    assert!(store.ttl().exists("suppression:m14:failure:high").unwrap());

    let up = CheckResult::ok(100, Some(200), CheckMeta::None);
    drive_check(&store, &relay, "m14", up).await;
    assert!(!store.ttl().exists("suppression:m14:failure:high").unwrap());
}

/// Dependency suppression: a monitor whose dependency is down never opens
/// its own incident, even past its alert threshold.
#[tokio::test]
async fn dependency_down_suppresses_downstream_incidents() {
    let store = SqliteStore::open_in_memory().unwrap();
    let relay = Relay::new();
    let mut dependency = sample_monitor("dep", Protocol::Http, 1);
    dependency.current_state = HealthState::Down;
    store.upsert_monitor(&dependency).unwrap();

    let monitor = sample_monitor("m15", Protocol::Http, 1);
    store.upsert_monitor(&monitor).unwrap();
    store
        .add_dependency(&MonitorDependency {
            id: Uuid::new_v4().to_string(),
            monitor_id: "m15".to_string(),
            depends_on_id: "dep".to_string(),
        })
        .unwrap();

    let down = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
    drive_check(&store, &relay, "m15", down).await;
    assert!(store.ongoing_incident("m15").unwrap().is_none());
}
