//! Shared domain types for the probing/evaluation/incident hot path.
//!
//! Kept deliberately free of persistence or I/O concerns — the [`crate::store`]
//! layer maps these to and from SQLite rows, and [`crate::probe`]/[`crate::evaluator`]
//! produce and consume them as plain values.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Udp,
    Dns,
    Smtp,
    Ssl,
    Ping,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Dns => "dns",
            Protocol::Smtp => "smtp",
            Protocol::Ssl => "ssl",
            Protocol::Ping => "ping",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "dns" => Ok(Protocol::Dns),
            "smtp" => Ok(Protocol::Smtp),
            "ssl" => Ok(Protocol::Ssl),
            "ping" => Ok(Protocol::Ping),
            other => Err(format!("unknown protocol tag: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Up,
    Down,
    Degraded,
    Paused,
    Unknown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Up => "up",
            HealthState::Down => "down",
            HealthState::Degraded => "degraded",
            HealthState::Paused => "paused",
            HealthState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for HealthState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(HealthState::Up),
            "down" => Ok(HealthState::Down),
            "degraded" => Ok(HealthState::Degraded),
            "paused" => Ok(HealthState::Paused),
            "unknown" => Ok(HealthState::Unknown),
            other => Err(format!("unknown health state: {other}")),
        }
    }
}

/// A configured probe target, owned exclusively by its user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub protocol: Protocol,
    pub target: String,
    pub port: Option<u16>,
    pub interval_minutes: u32,
    pub timeout_ms: u32,
    pub degraded_threshold_ms: Option<u32>,
    pub ssl_expiry_threshold_days: u32,
    pub alert_threshold: u32,
    pub is_active: bool,
    pub current_state: HealthState,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub consecutive_failures: u32,
    pub consecutive_degraded: u32,
    pub consecutive_slow_count: u32,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
    pub last_response_time_ms: Option<u32>,
    pub body_contains: Option<String>,
    pub dns_record_type: Option<String>,
    pub dns_expected: Option<String>,
    pub udp_expected_response: Option<String>,
    pub follow_redirects: bool,
    pub repeat_interval_minutes: u32,
    pub max_repeats: u32,
    pub escalation_after_minutes: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Monitor {
    /// `successfulChecks ≤ totalChecks` invariant (testable property 2).
    pub fn counters_valid(&self) -> bool {
        self.successful_checks <= self.total_checks
    }

    pub fn counters(&self) -> MonitorCounters {
        MonitorCounters {
            total_checks: self.total_checks,
            successful_checks: self.successful_checks,
            consecutive_failures: self.consecutive_failures,
            consecutive_degraded: self.consecutive_degraded,
            consecutive_slow_count: self.consecutive_slow_count,
            alert_threshold: self.alert_threshold,
            degraded_threshold_ms: self.degraded_threshold_ms,
            ssl_expiry_threshold_days: self.ssl_expiry_threshold_days,
            protocol: self.protocol,
            current_state: self.current_state,
        }
    }
}

/// The subset of monitor state the evaluator needs. Kept separate from
/// [`Monitor`] so the evaluator stays a pure function of plain values
/// instead of borrowing the whole persisted row.
#[derive(Debug, Clone, Copy)]
pub struct MonitorCounters {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub consecutive_failures: u32,
    pub consecutive_degraded: u32,
    pub consecutive_slow_count: u32,
    pub alert_threshold: u32,
    pub degraded_threshold_ms: Option<u32>,
    pub ssl_expiry_threshold_days: u32,
    pub protocol: Protocol,
    pub current_state: HealthState,
}

impl MonitorCounters {
    pub fn reliability(&self) -> f64 {
        if self.total_checks == 0 {
            1.0
        } else {
            self.successful_checks as f64 / self.total_checks as f64
        }
    }
}

/// Protocol-specific detail carried by a [`CheckResult`], replacing a
/// free-form map with a closed, pattern-matchable variant per protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckMeta {
    None,
    Http {
        final_url: Option<String>,
        redirect_count: u32,
    },
    Tcp {
        resolved_addr: Option<String>,
    },
    Udp {
        reliability: &'static str,
    },
    Dns {
        record_type: String,
        resolved_values: Vec<String>,
    },
    Smtp {
        banner: Option<String>,
    },
    Ssl {
        valid_from: chrono::DateTime<chrono::Utc>,
        valid_to: chrono::DateTime<chrono::Utc>,
        days_remaining: i64,
        subject: Option<String>,
    },
    Ping {
        fallback_used: bool,
    },
}

/// Ephemeral result of one probe execution, produced by the Probe Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub is_up: bool,
    pub response_time_ms: u32,
    pub status_code: Option<u16>,
    pub error_type: Option<crate::classify::ErrorType>,
    pub error_message: Option<String>,
    pub meta: CheckMeta,
}

impl CheckResult {
    pub fn ok(response_time_ms: u32, status_code: Option<u16>, meta: CheckMeta) -> Self {
        CheckResult {
            is_up: true,
            response_time_ms,
            status_code,
            error_type: None,
            error_message: None,
            meta,
        }
    }

    pub fn failure(
        response_time_ms: u32,
        error_type: crate::classify::ErrorType,
        message: impl Into<String>,
        meta: CheckMeta,
    ) -> Self {
        CheckResult {
            is_up: false,
            response_time_ms,
            status_code: None,
            error_type: Some(error_type),
            error_message: Some(message.into()),
            meta,
        }
    }
}

/// Append-only persisted record of one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: String,
    pub monitor_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status: HealthState,
    pub response_time_ms: u32,
    pub status_code: Option<u16>,
    pub error_type: Option<crate::classify::ErrorType>,
    pub error_message: Option<String>,
    pub degradation_reasons: Vec<String>,
    pub ssl_info: Option<SslInfo>,
    pub seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslInfo {
    pub valid_from: chrono::DateTime<chrono::Utc>,
    pub valid_to: chrono::DateTime<chrono::Utc>,
    pub days_remaining: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Ongoing,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradationCategory {
    Performance,
    Security,
    Content,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedBy {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsSent {
    pub email: bool,
    pub slack: bool,
    pub sms: bool,
    pub webhook: bool,
    pub email_details: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub monitor_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_secs: Option<i64>,
    pub status: IncidentStatus,
    pub error_message: Option<String>,
    pub error_type: Option<crate::classify::ErrorType>,
    pub status_code: Option<u16>,
    pub severity: Severity,
    pub confidence: f64,
    pub degradation_category: DegradationCategory,
    pub notifications_sent: NotificationsSent,
    pub recovery_confidence: Option<f64>,
    pub resolved_by: Option<ResolvedBy>,
    pub seq: i64,
}

impl Incident {
    /// Testable property 3: resolved incidents have a non-negative, consistent duration.
    pub fn duration_is_consistent(&self) -> bool {
        match (self.status, self.end_time, self.duration_secs) {
            (IncidentStatus::Resolved, Some(end), Some(dur)) => {
                end >= self.start_time && dur == (end - self.start_time).num_seconds()
            }
            (IncidentStatus::Ongoing, None, None) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentNote {
    pub id: String,
    pub incident_id: String,
    pub content: String,
    pub author: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorDependency {
    pub id: String,
    pub monitor_id: String,
    pub depends_on_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Email,
    Slack,
    Sms,
    Webhook,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelType::Email => "email",
            ChannelType::Slack => "slack",
            ChannelType::Sms => "sms",
            ChannelType::Webhook => "webhook",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelType::Email),
            "slack" => Ok(ChannelType::Slack),
            "sms" => Ok(ChannelType::Sms),
            "webhook" => Ok(ChannelType::Webhook),
            other => Err(format!("unknown channel type: {other}")),
        }
    }
}

/// A configured notification destination for a monitor, mirroring the
/// teacher's generic `notification_channels` table (one row per channel
/// rather than per-monitor scalar columns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub monitor_id: String,
    pub channel_type: ChannelType,
    /// Channel-specific config, e.g. `{"url": "..."}` for webhook/Slack,
    /// `{"address": "..."}` for email, `{"number": "..."}` for SMS.
    pub config: serde_json::Value,
    pub is_enabled: bool,
}

/// Ring buffer of recent check outcomes plus the bookkeeping the evaluator's
/// hysteresis logic needs. One instance per monitor, kept independent of the
/// `Monitor` record itself (no back-pointer).
#[derive(Debug, Clone)]
pub struct HealthHistory {
    capacity: usize,
    outcomes: std::collections::VecDeque<bool>,
    pub last_state_change: Option<chrono::DateTime<chrono::Utc>>,
    pub last_stable_state: HealthState,
    pub state_entry_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        HealthHistory {
            capacity,
            outcomes: std::collections::VecDeque::with_capacity(capacity),
            last_state_change: None,
            last_stable_state: HealthState::Unknown,
            state_entry_time: None,
        }
    }

    pub fn push(&mut self, was_up: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(was_up);
    }

    /// Short-window failure rate over the retained outcomes, in `[0, 1]`.
    pub fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|up| !**up).count();
        failures as f64 / self.outcomes.len() as f64
    }

    pub fn record_state_change(&mut self, new_state: HealthState, at: chrono::DateTime<chrono::Utc>) {
        self.last_state_change = Some(at);
        self.last_stable_state = new_state;
        self.state_entry_time = Some(at);
    }
}
