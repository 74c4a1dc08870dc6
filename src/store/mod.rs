//! Persistence interface. `Store` is the seam the worker, scheduler, and
//! alert engine depend on; `sqlite` is the one implementation, a
//! `Mutex<Connection>` under WAL.

mod sqlite;
mod ttl;

pub use sqlite::SqliteStore;
pub use ttl::TtlStore;

use crate::error::CoreResult;
use crate::model::{
    Check, HealthHistory, Incident, IncidentNote, Monitor, MonitorDependency, NotificationChannel,
};

/// A durably-leased job row delivered to a worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub monitor_id: String,
    pub attempts: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub failed: u64,
    pub is_ready: bool,
}

/// A durable stream entry, the SQL analogue of a Redis Streams `XADD` row.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub seq: i64,
    pub user_id: String,
    pub payload: serde_json::Value,
}

pub trait Store: Send + Sync {
    // Monitors
    fn get_monitor(&self, id: &str) -> CoreResult<Option<Monitor>>;
    fn list_active_monitors(&self) -> CoreResult<Vec<Monitor>>;
    fn upsert_monitor(&self, monitor: &Monitor) -> CoreResult<()>;
    fn delete_monitor(&self, id: &str) -> CoreResult<()>;
    fn apply_evaluation(
        &self,
        monitor_id: &str,
        evaluation: &crate::evaluator::Evaluation,
        response_time_ms: u32,
    ) -> CoreResult<()>;

    // Checks
    fn insert_check(&self, check: &Check) -> CoreResult<()>;
    fn recent_checks(&self, monitor_id: &str, limit: u32) -> CoreResult<Vec<Check>>;
    /// Deletes checks older than `retention_days`. Returns the number of
    /// rows deleted.
    fn prune_old_checks(&self, retention_days: u32) -> CoreResult<usize>;

    // Health history (ephemeral, in-memory arena keyed by monitor id)
    fn history_snapshot(&self, monitor_id: &str) -> HealthHistory;
    fn history_record(&self, monitor_id: &str, was_up: bool, new_state: crate::model::HealthState);

    // Incidents
    fn ongoing_incident(&self, monitor_id: &str) -> CoreResult<Option<Incident>>;
    fn open_incident(&self, incident: &Incident) -> CoreResult<()>;
    fn update_incident(&self, incident: &Incident) -> CoreResult<()>;
    fn resolve_all_ongoing(
        &self,
        monitor_id: &str,
        end_time: chrono::DateTime<chrono::Utc>,
        recovery_confidence: f64,
    ) -> CoreResult<Vec<Incident>>;
    fn add_incident_note(&self, note: &IncidentNote) -> CoreResult<()>;
    fn list_incident_notes(&self, incident_id: &str) -> CoreResult<Vec<IncidentNote>>;
    fn acknowledge_incident(&self, incident_id: &str) -> CoreResult<()>;
    fn is_incident_acknowledged(&self, incident_id: &str) -> CoreResult<bool>;

    // Notification channels
    fn add_channel(&self, channel: &NotificationChannel) -> CoreResult<()>;
    fn channels_for(&self, monitor_id: &str) -> CoreResult<Vec<NotificationChannel>>;

    // Dependencies
    fn add_dependency(&self, dependency: &MonitorDependency) -> CoreResult<()>;
    fn dependencies_of(&self, monitor_id: &str) -> CoreResult<Vec<MonitorDependency>>;
    fn has_dependency_down(&self, monitor_id: &str) -> CoreResult<bool>;

    // Scheduler durable queue
    fn schedule_monitor(&self, monitor_id: &str, delay_secs: i64) -> CoreResult<()>;
    fn schedule_verification(&self, monitor_id: &str, delay_secs: i64) -> CoreResult<()>;
    fn cancel_jobs(&self, monitor_id: &str) -> CoreResult<()>;
    fn claim_next_job(&self, worker_id: &str, lease_secs: i64) -> CoreResult<Option<Job>>;
    fn ack_job(&self, job_id: i64) -> CoreResult<()>;
    fn fail_job(&self, job_id: i64) -> CoreResult<()>;
    fn queue_stats(&self) -> CoreResult<QueueStats>;

    // Scheduler leadership
    fn try_acquire_leadership(&self, owner_token: &str, ttl_secs: i64) -> CoreResult<bool>;
    fn renew_leadership(&self, owner_token: &str, ttl_secs: i64) -> CoreResult<bool>;

    // Real-time relay durable stream
    fn append_stream_event(&self, user_id: &str, payload: serde_json::Value) -> CoreResult<i64>;
    fn read_stream_since(
        &self,
        group: &str,
        consumer_id: &str,
        batch: u32,
    ) -> CoreResult<Vec<StreamEntry>>;
    fn ack_stream_entries(&self, group: &str, consumer_id: &str, up_to_seq: i64) -> CoreResult<()>;

    // TTL-backed key/value store (suppression, cooldown, master-lock)
    fn ttl(&self) -> &dyn TtlStore;
}
