//! Health-state evaluator (component C).
//!
//! Deliberately a pure function: `(CheckResult, MonitorCounters, &HealthHistory)
//! -> Evaluation`. It never touches the store and never mutates a `Monitor` —
//! the worker pipeline (`crate::worker`) is responsible for persisting the
//! returned counters and invoking the alert engine on state transitions.

use crate::classify::ErrorType;
use crate::model::{CheckMeta, CheckResult, DegradationCategory, HealthState, MonitorCounters};

/// Result of one evaluation pass. `next_state` is the monitor's new
/// `current_state`; the other fields are the updated counters to persist.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub next_state: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_degraded: u32,
    pub consecutive_slow_count: u32,
    pub is_transition: bool,
    pub degradation_category: Option<DegradationCategory>,
    pub degradation_reasons: Vec<String>,
    pub confidence: f64,
}

/// Rule-ordered evaluation per the monitor's alert threshold and short-window
/// failure history. Rules, in priority order:
///   1. A high-severity error type forces DOWN once `consecutive_failures`
///      reaches `alert_threshold`; a non-fatal failure (e.g. a 4xx) waits
///      out the same threshold, spending the interim as DEGRADED.
///   2. A certificate within `ssl_expiry_threshold_days` of expiring marks
///      DEGRADED (security category) on the probe that observes it.
///   3. Response time beyond the effective degraded threshold (the
///      monitor's own `degraded_threshold_ms`, or the protocol default when
///      unset) for `alert_threshold` checks running marks DEGRADED
///      (performance category) even on an otherwise-OK probe.
///   4. A non-fatal 4xx/429 on an up probe marks DEGRADED (content/security
///      category, depending on the specific error) once it has recurred for
///      `alert_threshold` checks running.
///   5. Anything else healthy clears counters and returns to UP.
pub fn evaluate(
    result: &CheckResult,
    counters: MonitorCounters,
    history: &crate::model::HealthHistory,
) -> Evaluation {
    let mut consecutive_failures = counters.consecutive_failures;
    let mut consecutive_degraded = counters.consecutive_degraded;
    let mut consecutive_slow_count = counters.consecutive_slow_count;

    if !result.is_up {
        consecutive_failures = consecutive_failures.saturating_add(1);
        consecutive_degraded = 0;
    } else {
        consecutive_failures = 0;
    }

    let threshold_ms =
        crate::classify::effective_threshold(counters.protocol, counters.degraded_threshold_ms);
    let is_slow = threshold_ms.is_some_and(|threshold| result.response_time_ms >= threshold);
    if is_slow {
        consecutive_slow_count = consecutive_slow_count.saturating_add(1);
    } else {
        consecutive_slow_count = 0;
    }

    let is_soft_error = result
        .error_type
        .is_some_and(|e| e.down_severity().is_none());
    if result.is_up && is_soft_error {
        consecutive_degraded = consecutive_degraded.saturating_add(1);
    } else if result.is_up && !is_slow {
        consecutive_degraded = 0;
    }

    let high_severity = result
        .error_type
        .and_then(|e| e.down_severity())
        .is_some();

    // A certificate nearing its expiry threshold is a deterministic
    // measurement carried in the meta payload rather than a classified
    // error — it degrades the monitor on the very probe that observes it,
    // with no "waiting N/M" accumulation.
    let ssl_warning = result.is_up
        && matches!(
            &result.meta,
            CheckMeta::Ssl { days_remaining, .. }
                if *days_remaining <= counters.ssl_expiry_threshold_days as i64
        );

    let next_state = if high_severity && consecutive_failures >= counters.alert_threshold.max(1) {
        HealthState::Down
    } else if high_severity {
        // Below threshold: stay in current UP/DEGRADED posture, don't flap to DOWN yet.
        if counters.current_state == HealthState::Down {
            HealthState::Down
        } else {
            HealthState::Degraded
        }
    } else if !result.is_up && consecutive_failures >= counters.alert_threshold.max(1) {
        HealthState::Down
    } else if !result.is_up {
        // A non-fatal failure (e.g. a 404) waits out the same threshold as a
        // high-severity one before flipping the monitor to DOWN.
        HealthState::Degraded
    } else if ssl_warning {
        HealthState::Degraded
    } else if is_soft_error && consecutive_degraded >= counters.alert_threshold.max(1) {
        HealthState::Degraded
    } else if is_slow && consecutive_slow_count >= counters.alert_threshold.max(1) {
        HealthState::Degraded
    } else {
        HealthState::Up
    };

    let degradation_category = match next_state {
        HealthState::Degraded if ssl_warning => Some(DegradationCategory::Security),
        HealthState::Degraded => Some(degradation_category_for(result.error_type, is_slow)),
        _ => None,
    };

    let mut degradation_reasons = Vec::new();
    if ssl_warning && next_state == HealthState::Degraded {
        if let CheckMeta::Ssl { days_remaining, .. } = &result.meta {
            degradation_reasons.push(format!("SSL_WARNING: expires in {days_remaining} days"));
        }
    }
    if !result.is_up && next_state == HealthState::Degraded {
        degradation_reasons.push(format!(
            "waiting {}/{}",
            consecutive_failures,
            counters.alert_threshold.max(1)
        ));
    }
    if is_slow && next_state == HealthState::Degraded {
        degradation_reasons.push(format!(
            "response time {}ms exceeded degraded threshold",
            result.response_time_ms
        ));
    }
    if is_soft_error && next_state == HealthState::Degraded {
        if let Some(msg) = &result.error_message {
            degradation_reasons.push(msg.clone());
        }
    }

    let is_transition = next_state != counters.current_state;
    let confidence = confidence_for(next_state, consecutive_failures, history);

    Evaluation {
        next_state,
        consecutive_failures,
        consecutive_degraded,
        consecutive_slow_count,
        is_transition,
        degradation_category,
        degradation_reasons,
        confidence,
    }
}

fn degradation_category_for(error_type: Option<ErrorType>, is_slow: bool) -> DegradationCategory {
    match error_type {
        Some(ErrorType::HttpUnauthorized | ErrorType::HttpForbidden) => {
            DegradationCategory::Security
        }
        Some(ErrorType::HttpNotFound | ErrorType::HttpBadRequest) => DegradationCategory::Content,
        Some(_) if is_slow => DegradationCategory::Performance,
        Some(_) => DegradationCategory::General,
        None if is_slow => DegradationCategory::Performance,
        None => DegradationCategory::General,
    }
}

/// Confidence that a DOWN verdict reflects a real outage rather than a
/// transient blip, derived from the short-window failure rate in history —
/// consulted by the alert engine before firing notifications.
fn confidence_for(
    next_state: HealthState,
    consecutive_failures: u32,
    history: &crate::model::HealthHistory,
) -> f64 {
    if next_state != HealthState::Down {
        return 1.0;
    }
    let rate = history.failure_rate();
    let streak_weight = (consecutive_failures as f64 / 5.0).min(1.0);
    (rate * 0.5 + streak_weight * 0.5).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckMeta, HealthHistory, Protocol};

    fn counters(state: HealthState, alert_threshold: u32) -> MonitorCounters {
        MonitorCounters {
            total_checks: 10,
            successful_checks: 8,
            consecutive_failures: 0,
            consecutive_degraded: 0,
            consecutive_slow_count: 0,
            alert_threshold,
            degraded_threshold_ms: Some(1000),
            ssl_expiry_threshold_days: 14,
            protocol: Protocol::Http,
            current_state: state,
        }
    }

    #[test]
    fn healthy_result_stays_up() {
        let result = CheckResult::ok(120, Some(200), CheckMeta::None);
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, counters(HealthState::Up, 3), &history);
        assert_eq!(eval.next_state, HealthState::Up);
        assert!(!eval.is_transition);
    }

    #[test]
    fn failures_below_threshold_do_not_flip_to_down() {
        let result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
        let mut c = counters(HealthState::Up, 3);
        c.consecutive_failures = 1;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Degraded);
        assert_eq!(eval.consecutive_failures, 2);
    }

    #[test]
    fn failures_at_threshold_flip_to_down() {
        let result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
        let mut c = counters(HealthState::Up, 3);
        c.consecutive_failures = 2;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Down);
        assert!(eval.is_transition);
        assert_eq!(eval.consecutive_failures, 3);
    }

    #[test]
    fn repeated_slow_checks_mark_degraded() {
        let result = CheckResult::ok(2500, Some(200), CheckMeta::None);
        let mut c = counters(HealthState::Up, 3);
        c.consecutive_slow_count = 2;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Degraded);
        assert_eq!(eval.degradation_category, Some(DegradationCategory::Performance));
    }

    #[test]
    fn single_slow_check_does_not_degrade_yet() {
        let result = CheckResult::ok(2500, Some(200), CheckMeta::None);
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, counters(HealthState::Up, 3), &history);
        assert_eq!(eval.next_state, HealthState::Up);
    }

    #[test]
    fn expiring_certificate_degrades_on_the_first_observation() {
        let now = chrono::Utc::now();
        let result = CheckResult {
            is_up: true,
            response_time_ms: 420,
            status_code: Some(200),
            error_type: None,
            error_message: None,
            meta: CheckMeta::Ssl {
                valid_from: now - chrono::Duration::days(80),
                valid_to: now + chrono::Duration::days(10),
                days_remaining: 10,
                subject: Some("example.com".into()),
            },
        };
        let mut c = counters(HealthState::Up, 3);
        c.ssl_expiry_threshold_days = 30;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Degraded);
        assert_eq!(eval.degradation_category, Some(DegradationCategory::Security));
        assert!(eval.degradation_reasons.iter().any(|r| r == "SSL_WARNING: expires in 10 days"));
    }

    #[test]
    fn certificate_well_within_threshold_stays_up() {
        let now = chrono::Utc::now();
        let result = CheckResult::ok(
            420,
            None,
            CheckMeta::Ssl {
                valid_from: now - chrono::Duration::days(80),
                valid_to: now + chrono::Duration::days(90),
                days_remaining: 90,
                subject: Some("example.com".into()),
            },
        );
        let mut c = counters(HealthState::Up, 3);
        c.ssl_expiry_threshold_days = 30;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Up);
    }

    #[test]
    fn soft_http_failure_waits_out_the_threshold_before_going_down() {
        let result = CheckResult::failure(
            80,
            ErrorType::HttpNotFound,
            "HTTP: 404 — not found",
            CheckMeta::Http { final_url: None, redirect_count: 0 },
        );
        let mut c = counters(HealthState::Up, 3);
        let history = HealthHistory::new(20);

        let first = evaluate(&result, c, &history);
        assert_eq!(first.next_state, HealthState::Degraded);
        assert_eq!(first.consecutive_failures, 1);
        assert!(first.degradation_reasons.iter().any(|r| r == "waiting 1/3"));

        c.consecutive_failures = first.consecutive_failures;
        let second = evaluate(&result, c, &history);
        assert_eq!(second.next_state, HealthState::Degraded);
        assert_eq!(second.consecutive_failures, 2);

        c.consecutive_failures = second.consecutive_failures;
        let third = evaluate(&result, c, &history);
        assert_eq!(third.next_state, HealthState::Down);
        assert_eq!(third.consecutive_failures, 3);
    }

    #[test]
    fn not_found_degrades_as_content_category() {
        let result = CheckResult {
            is_up: true,
            response_time_ms: 100,
            status_code: Some(404),
            error_type: Some(ErrorType::HttpNotFound),
            error_message: Some("HTTP: 404 — Not Found".into()),
            meta: CheckMeta::None,
        };
        let mut c = counters(HealthState::Up, 3);
        c.consecutive_degraded = 2;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Degraded);
        assert_eq!(eval.degradation_category, Some(DegradationCategory::Content));
    }

    #[test]
    fn recovery_clears_failure_counters() {
        let result = CheckResult::ok(100, Some(200), CheckMeta::None);
        let mut c = counters(HealthState::Down, 3);
        c.consecutive_failures = 5;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Up);
        assert_eq!(eval.consecutive_failures, 0);
        assert!(eval.is_transition);
    }

    #[test]
    fn soft_error_hysteresis_follows_the_monitor_alert_threshold() {
        let result = CheckResult {
            is_up: true,
            response_time_ms: 100,
            status_code: Some(404),
            error_type: Some(ErrorType::HttpNotFound),
            error_message: Some("HTTP: 404 — Not Found".into()),
            meta: CheckMeta::None,
        };
        let mut c = counters(HealthState::Up, 4);
        c.consecutive_degraded = 2;
        let history = HealthHistory::new(20);

        // 3rd consecutive soft error, threshold 4: not yet degraded.
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Up);
        assert_eq!(eval.consecutive_degraded, 3);

        // 4th consecutive soft error reaches the threshold.
        c.consecutive_degraded = 3;
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Degraded);
        assert_eq!(eval.consecutive_degraded, 4);
    }

    #[test]
    fn slow_hysteresis_follows_the_monitor_alert_threshold() {
        let result = CheckResult::ok(2500, Some(200), CheckMeta::None);
        let mut c = counters(HealthState::Up, 4);
        c.consecutive_slow_count = 2;
        let history = HealthHistory::new(20);

        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Up);
        assert_eq!(eval.consecutive_slow_count, 3);

        c.consecutive_slow_count = 3;
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Degraded);
        assert_eq!(eval.consecutive_slow_count, 4);
    }

    #[test]
    fn unset_degraded_threshold_falls_back_to_protocol_default() {
        // Http default is 5000ms; 5000ms response with no configured
        // threshold must still be treated as slow.
        let result = CheckResult::ok(5000, Some(200), CheckMeta::None);
        let mut c = counters(HealthState::Up, 1);
        c.degraded_threshold_ms = None;
        c.consecutive_slow_count = 0;
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Degraded);
        assert_eq!(eval.consecutive_slow_count, 1);
    }

    #[test]
    fn explicit_zero_threshold_disables_the_slow_rule() {
        let result = CheckResult::ok(60_000, Some(200), CheckMeta::None);
        let mut c = counters(HealthState::Up, 1);
        c.degraded_threshold_ms = Some(0);
        let history = HealthHistory::new(20);
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Up);
        assert_eq!(eval.consecutive_slow_count, 0);
    }

    #[test]
    fn down_confidence_reflects_failure_rate() {
        let result = CheckResult::failure(5000, ErrorType::Timeout, "TCP: timed out", CheckMeta::None);
        let mut c = counters(HealthState::Up, 1);
        c.consecutive_failures = 0;
        let mut history = HealthHistory::new(5);
        for _ in 0..5 {
            history.push(false);
        }
        let eval = evaluate(&result, c, &history);
        assert_eq!(eval.next_state, HealthState::Down);
        assert!(eval.confidence > 0.5);
    }
}
