//! Alert/Incident Engine (component F). Reconciles a monitor's state
//! transition into at most one ongoing incident per monitor and fans out
//! notifications exactly once per meaningful transition.

use crate::classify::ErrorType;
use crate::evaluator::Evaluation;
use crate::model::{
    CheckResult, DegradationCategory, HealthState, Incident, IncidentStatus, Monitor,
    NotificationsSent, ResolvedBy, Severity,
};
use crate::notify;
use crate::store::Store;
use tracing::{info, warn};
use uuid::Uuid;

const RECOVERY_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Entry point invoked by the worker after every evaluation (step 6 of the
/// pipeline). Never fails the worker pipeline on a notification error —
/// failures are recorded per-channel and surfaced only via `notificationsSent`.
pub async fn handle_transition(
    store: &dyn Store,
    monitor: &Monitor,
    old_state: HealthState,
    result: &CheckResult,
    evaluation: &Evaluation,
) -> crate::error::CoreResult<()> {
    if evaluation.next_state == HealthState::Up {
        if old_state != HealthState::Up {
            recover(store, monitor, evaluation).await?;
        }
        return Ok(());
    }

    if store.has_dependency_down(&monitor.id)? {
        info!(
            "alerts: monitor {} suppressed — dependency is down",
            monitor.id
        );
        return Ok(());
    }

    let thresholds_met = crosses_incident_threshold(monitor, evaluation, result);
    if !thresholds_met {
        return Ok(());
    }

    let severity = severity_for(evaluation, result);
    let category = evaluation
        .degradation_category
        .unwrap_or(DegradationCategory::General);

    match store.ongoing_incident(&monitor.id)? {
        Some(mut existing) => {
            existing.error_message = result.error_message.clone();
            existing.error_type = result.error_type;
            existing.status_code = result.status_code;
            existing.severity = severity;
            existing.confidence = evaluation.confidence;
            existing.degradation_category = category;
            store.update_incident(&existing)?;
            maybe_repeat_or_escalate(store, monitor, &existing).await?;
        }
        None => {
            let incident = Incident {
                id: Uuid::new_v4().to_string(),
                monitor_id: monitor.id.clone(),
                start_time: chrono::Utc::now(),
                end_time: None,
                duration_secs: None,
                status: IncidentStatus::Ongoing,
                error_message: result.error_message.clone(),
                error_type: result.error_type,
                status_code: result.status_code,
                severity,
                confidence: evaluation.confidence,
                degradation_category: category,
                notifications_sent: NotificationsSent::default(),
                recovery_confidence: None,
                resolved_by: None,
                seq: 0,
            };
            store.open_incident(&incident)?;
            notify_and_record(store, monitor, &incident, "failure", escalation_for(severity)).await?;
        }
    }

    Ok(())
}

fn crosses_incident_threshold(monitor: &Monitor, evaluation: &Evaluation, _result: &CheckResult) -> bool {
    let threshold = monitor.alert_threshold.max(1);
    match evaluation.next_state {
        HealthState::Down => evaluation.consecutive_failures >= threshold,
        HealthState::Degraded => {
            let confidence_ok = evaluation.confidence >= RECOVERY_CONFIDENCE_THRESHOLD;
            match evaluation.degradation_category {
                Some(DegradationCategory::Performance) => {
                    evaluation.consecutive_slow_count >= threshold && confidence_ok
                }
                // An expiring certificate is a deterministic, one-shot
                // measurement, not a flaky symptom — alert on the first
                // observation rather than waiting out a failure streak.
                Some(DegradationCategory::Security) => confidence_ok,
                _ => evaluation.consecutive_degraded >= threshold && confidence_ok,
            }
        }
        _ => false,
    }
}

fn severity_for(evaluation: &Evaluation, result: &CheckResult) -> Severity {
    match evaluation.degradation_category {
        Some(DegradationCategory::Performance) => {
            if result.response_time_ms as f64 >= 2.0 * threshold_guess(result) {
                Severity::High
            } else {
                Severity::Medium
            }
        }
        Some(DegradationCategory::Security) => Severity::High,
        _ if evaluation.next_state == HealthState::Down => Severity::High,
        _ => Severity::Low,
    }
}

fn threshold_guess(result: &CheckResult) -> f64 {
    (result.response_time_ms as f64 / 2.0).max(1.0)
}

fn escalation_for(severity: Severity) -> &'static str {
    match severity {
        Severity::High => "high",
        Severity::Medium => "medium",
        Severity::Low => "low",
    }
}

async fn recover(
    store: &dyn Store,
    monitor: &Monitor,
    evaluation: &Evaluation,
) -> crate::error::CoreResult<()> {
    let resolved = store.resolve_all_ongoing(&monitor.id, chrono::Utc::now(), evaluation.confidence)?;
    if resolved.is_empty() {
        return Ok(());
    }
    if resolved.len() > 1 {
        warn!(
            "alerts: monitor {} had {} ongoing incidents, resolved all but expected one",
            monitor.id,
            resolved.len()
        );
    }
    store.ttl().delete_prefix(&format!("suppression:{}:", monitor.id))?;

    let mut incident = resolved.into_iter().next().unwrap();
    incident.status = IncidentStatus::Resolved;
    incident.resolved_by = Some(ResolvedBy::Auto);
    notify::fan_out_recovery(store, monitor, &incident).await
}

async fn notify_and_record(
    store: &dyn Store,
    monitor: &Monitor,
    incident: &Incident,
    alert_type: &str,
    escalation: &str,
) -> crate::error::CoreResult<()> {
    let suppression_key = format!("suppression:{}:{}:{}", monitor.id, alert_type, escalation);
    if store.ttl().exists(&suppression_key)? {
        return Ok(());
    }

    let sent = notify::fan_out_incident(store, monitor, incident).await;

    let mut updated = incident.clone();
    updated.notifications_sent = sent;
    store.update_incident(&updated)?;

    let ttl_secs = match escalation {
        "high" => 15,
        "medium" => 60,
        _ => 30,
    };
    store.ttl().set(&suppression_key, ttl_secs)?;
    Ok(())
}

/// Repeat reminders and one-time escalation for an incident that remains
/// ongoing.
async fn maybe_repeat_or_escalate(
    store: &dyn Store,
    monitor: &Monitor,
    incident: &Incident,
) -> crate::error::CoreResult<()> {
    if store.is_incident_acknowledged(&incident.id)? {
        return Ok(());
    }

    let age = chrono::Utc::now() - incident.start_time;
    let age_minutes = age.num_minutes().max(0) as u32;

    if age_minutes >= monitor.escalation_after_minutes {
        let escalation_key = format!("suppression:{}:escalation:one-time", monitor.id);
        if !store.ttl().exists(&escalation_key)? {
            let sent = notify::fan_out_incident(store, monitor, incident).await;
            let mut updated = incident.clone();
            updated.notifications_sent = sent;
            store.update_incident(&updated)?;
            store.ttl().set(&escalation_key, monitor.escalation_after_minutes as i64 * 60)?;
        }
        return Ok(());
    }

    if monitor.repeat_interval_minutes == 0 || monitor.max_repeats == 0 {
        return Ok(());
    }
    let repeats_elapsed = age_minutes / monitor.repeat_interval_minutes.max(1);
    if repeats_elapsed == 0 || repeats_elapsed > monitor.max_repeats {
        return Ok(());
    }

    let repeat_key = format!("suppression:{}:repeat:{}", monitor.id, repeats_elapsed);
    if store.ttl().exists(&repeat_key)? {
        return Ok(());
    }
    let sent = notify::fan_out_incident(store, monitor, incident).await;
    let mut updated = incident.clone();
    updated.notifications_sent = sent;
    store.update_incident(&updated)?;
    store
        .ttl()
        .set(&repeat_key, monitor.repeat_interval_minutes as i64 * 60)?;
    Ok(())
}
