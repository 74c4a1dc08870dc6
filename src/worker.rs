//! Worker (component E). Pulls leased jobs off the scheduler and runs the
//! eight-step pipeline: load monitor, probe, evaluate, persist, alert,
//! broadcast, ack, reschedule.

use crate::model::{Check, HealthState};
use crate::probe::ProbeClients;
use crate::store::Store;
use crate::{alerts, evaluator, probe, relay, scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Spawn `n` worker tasks sharing the store/relay/probe clients, each
/// pulling jobs from the same lease-based queue.
pub fn spawn_worker_pool(
    n: usize,
    store: Arc<dyn Store>,
    relay: Arc<relay::Relay>,
    shutdown: rocket::Shutdown,
) -> Vec<tokio::task::JoinHandle<()>> {
    let clients = match ProbeClients::build() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("worker: failed to build HTTP clients: {e}");
            return Vec::new();
        }
    };

    (0..n)
        .map(|idx| {
            let store = store.clone();
            let relay = relay.clone();
            let clients = clients.clone();
            let shutdown = shutdown.clone();
            let worker_id = format!("worker-{idx}");
            tokio::spawn(async move { run_worker_loop(worker_id, store, relay, clients, shutdown).await })
        })
        .collect()
}

async fn run_worker_loop(
    worker_id: String,
    store: Arc<dyn Store>,
    relay: Arc<relay::Relay>,
    clients: Arc<ProbeClients>,
    shutdown: rocket::Shutdown,
) {
    info!("{worker_id}: starting");
    loop {
        let job = scheduler::claim_next_job(&*store, &worker_id);

        match job {
            Ok(Some(job)) => {
                if let Err(e) = process_job(&*store, &relay, &clients, &job).await {
                    error!("{worker_id}: job {} failed: {e}", job.id);
                    let _ = store.fail_job(job.id);
                } else {
                    let _ = store.ack_job(job.id);
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = time::sleep(Duration::from_millis(250)) => {},
                    _ = shutdown.clone() => {
                        info!("{worker_id}: shutting down");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("{worker_id}: failed to claim job: {e}");
                tokio::select! {
                    _ = time::sleep(Duration::from_secs(1)) => {},
                    _ = shutdown.clone() => return,
                }
            }
        }
    }
}

async fn process_job(
    store: &dyn Store,
    relay: &relay::Relay,
    clients: &ProbeClients,
    job: &crate::store::Job,
) -> crate::error::CoreResult<()> {
    // Step 1: load the monitor; if missing or inactive, treat as a no-op ack.
    let Some(monitor) = store.get_monitor(&job.monitor_id)? else {
        return Ok(());
    };
    if !monitor.is_active {
        return Ok(());
    }

    // Step 2: probe under the monitor's configured timeout.
    let result = tokio::time::timeout(
        Duration::from_millis(monitor.timeout_ms as u64 + 2000),
        probe::probe(clients, &monitor),
    )
    .await
    .unwrap_or_else(|_| {
        crate::model::CheckResult::failure(
            monitor.timeout_ms,
            crate::classify::ErrorType::Timeout,
            "probe exceeded deadline",
            crate::model::CheckMeta::None,
        )
    });

    // Step 3: evaluate.
    let counters = monitor.counters();
    let history = store.history_snapshot(&monitor.id);
    let evaluation = evaluator::evaluate(&result, counters, &history);
    let old_state = monitor.current_state;

    // Step 4: atomic counter + status update.
    store.apply_evaluation(&monitor.id, &evaluation, result.response_time_ms)?;
    store.history_record(&monitor.id, result.is_up, evaluation.next_state);

    // Step 5: persist the Check row.
    let ssl_info = match &result.meta {
        crate::model::CheckMeta::Ssl { valid_from, valid_to, days_remaining, .. } => {
            Some(crate::model::SslInfo {
                valid_from: *valid_from,
                valid_to: *valid_to,
                days_remaining: *days_remaining,
            })
        }
        _ => None,
    };
    let check = Check {
        id: Uuid::new_v4().to_string(),
        monitor_id: monitor.id.clone(),
        timestamp: chrono::Utc::now(),
        status: evaluation.next_state,
        response_time_ms: result.response_time_ms,
        status_code: result.status_code,
        error_type: result.error_type,
        error_message: result.error_message.clone(),
        degradation_reasons: evaluation.degradation_reasons.clone(),
        ssl_info,
        seq: 0,
    };
    store.insert_check(&check)?;

    // Verification lane: raise confidence before the next interval if the
    // evaluator hasn't crossed the hysteresis threshold yet.
    if evaluation.next_state != HealthState::Up && !evaluation.is_transition {
        store.schedule_verification(&monitor.id, 5)?;
    }

    // Step 6: alert engine.
    alerts::handle_transition(store, &monitor, old_state, &result, &evaluation).await?;

    // Step 7: emit a monitor_update event to the relay, scoped to the owner.
    relay.publish_monitor_update(store, &monitor, old_state, &result, &evaluation)?;

    // Step 8: reschedule the next regular interval (unless now inactive).
    let refreshed = store.get_monitor(&monitor.id)?;
    if let Some(m) = refreshed {
        if m.is_active {
            scheduler::schedule_monitor(store, &m.id, m.interval_minutes)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HealthState, Monitor, Protocol};
    use crate::store::SqliteStore;

    fn sample_monitor(id: &str) -> Monitor {
        let now = chrono::Utc::now();
        Monitor {
            id: id.to_string(),
            owner_id: "owner-1".to_string(),
            name: "t".to_string(),
            protocol: Protocol::Tcp,
            target: "tcp://127.0.0.1:1".to_string(),
            port: Some(1),
            interval_minutes: 1,
            timeout_ms: 200,
            degraded_threshold_ms: None,
            ssl_expiry_threshold_days: 14,
            alert_threshold: 1,
            is_active: true,
            current_state: HealthState::Unknown,
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

    #[tokio::test]
    async fn missing_monitor_is_a_no_op() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let relay = Arc::new(relay::Relay::new());
        let clients = ProbeClients::build().unwrap();
        let job = crate::store::Job { id: 1, monitor_id: "ghost".to_string(), attempts: 1, max_attempts: 5 };
        let result = process_job(&*store, &relay, &clients, &job).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failed_tcp_probe_persists_a_check_and_reschedules() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let relay = Arc::new(relay::Relay::new());
        let clients = ProbeClients::build().unwrap();
        let monitor = sample_monitor("m1");
        store.upsert_monitor(&monitor).unwrap();
        let job = crate::store::Job { id: 1, monitor_id: "m1".to_string(), attempts: 1, max_attempts: 5 };
        process_job(&*store, &relay, &clients, &job).await.unwrap();

        let checks = store.recent_checks("m1", 10).unwrap();
        assert_eq!(checks.len(), 1);
        let refreshed = store.get_monitor("m1").unwrap().unwrap();
        assert_eq!(refreshed.total_checks, 1);
        assert!(refreshed.consecutive_failures >= 1);
    }
}
