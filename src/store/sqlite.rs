//! SQLite-backed `Store` implementation: a single `Mutex<Connection>` under
//! WAL, idempotent `CREATE TABLE IF NOT EXISTS` + defensive `ALTER TABLE ...
//! ADD COLUMN` migrations, and `seq` columns for cursor-based pagination.

use super::ttl::SqliteTtlStore;
use super::{Job, QueueStats, Store, StreamEntry, TtlStore};
use crate::error::{CoreError, CoreResult};
use crate::evaluator::Evaluation;
use crate::model::{
    Check, ChannelType, DegradationCategory, HealthHistory, HealthState, Incident, IncidentNote,
    IncidentStatus, Monitor, MonitorDependency, NotificationChannel, NotificationsSent, Protocol,
    ResolvedBy, Severity, SslInfo,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    ttl: SqliteTtlStore,
    history: Mutex<HashMap<String, HealthHistory>>,
    history_capacity: usize,
}

impl SqliteStore {
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> CoreResult<Self> {
        Self::migrate(&conn)?;
        SqliteTtlStore::migrate(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        let ttl = SqliteTtlStore::new(conn.clone());
        Ok(SqliteStore {
            conn,
            ttl,
            history: Mutex::new(HashMap::new()),
            history_capacity: 20,
        })
    }

    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS monitors (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                protocol TEXT NOT NULL,
                target TEXT NOT NULL,
                port INTEGER,
                interval_minutes INTEGER NOT NULL DEFAULT 5,
                timeout_ms INTEGER NOT NULL DEFAULT 10000,
                degraded_threshold_ms INTEGER,
                ssl_expiry_threshold_days INTEGER NOT NULL DEFAULT 14,
                alert_threshold INTEGER NOT NULL DEFAULT 2,
                is_active INTEGER NOT NULL DEFAULT 1,
                current_state TEXT NOT NULL DEFAULT 'unknown',
                total_checks INTEGER NOT NULL DEFAULT 0,
                successful_checks INTEGER NOT NULL DEFAULT 0,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                consecutive_degraded INTEGER NOT NULL DEFAULT 0,
                consecutive_slow_count INTEGER NOT NULL DEFAULT 0,
                last_checked TEXT,
                last_response_time_ms INTEGER,
                body_contains TEXT,
                dns_record_type TEXT,
                dns_expected TEXT,
                udp_expected_response TEXT,
                follow_redirects INTEGER NOT NULL DEFAULT 1,
                repeat_interval_minutes INTEGER NOT NULL DEFAULT 30,
                max_repeats INTEGER NOT NULL DEFAULT 3,
                escalation_after_minutes INTEGER NOT NULL DEFAULT 60,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(owner_id, target, protocol)
            );

            CREATE TABLE IF NOT EXISTS checks (
                id TEXT PRIMARY KEY,
                monitor_id TEXT NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                status TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL,
                status_code INTEGER,
                error_type TEXT,
                error_message TEXT,
                degradation_reasons TEXT NOT NULL DEFAULT '[]',
                ssl_info TEXT,
                seq INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_checks_monitor_ts ON checks(monitor_id, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_checks_seq ON checks(seq);

            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                monitor_id TEXT NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                start_time TEXT NOT NULL DEFAULT (datetime('now')),
                end_time TEXT,
                duration_secs INTEGER,
                status TEXT NOT NULL DEFAULT 'ongoing',
                error_message TEXT,
                error_type TEXT,
                status_code INTEGER,
                severity TEXT NOT NULL DEFAULT 'low',
                confidence REAL NOT NULL DEFAULT 1.0,
                degradation_category TEXT NOT NULL DEFAULT 'general',
                notifications_sent TEXT NOT NULL DEFAULT '{}',
                recovery_confidence REAL,
                resolved_by TEXT,
                acknowledged INTEGER NOT NULL DEFAULT 0,
                seq INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_monitor_status ON incidents(monitor_id, status);

            CREATE TABLE IF NOT EXISTS incident_notes (
                id TEXT PRIMARY KEY,
                incident_id TEXT NOT NULL REFERENCES incidents(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                author TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS notification_channels (
                id TEXT PRIMARY KEY,
                monitor_id TEXT NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                channel_type TEXT NOT NULL,
                config TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_channels_monitor ON notification_channels(monitor_id);

            CREATE TABLE IF NOT EXISTS monitor_dependencies (
                id TEXT PRIMARY KEY,
                monitor_id TEXT NOT NULL REFERENCES monitors(id) ON DELETE CASCADE,
                depends_on_id TEXT NOT NULL REFERENCES monitors(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_deps_monitor ON monitor_dependencies(monitor_id);

            CREATE TABLE IF NOT EXISTS scheduler_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                monitor_id TEXT NOT NULL,
                run_at TEXT NOT NULL,
                leased_until TEXT,
                leased_by TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 5,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                UNIQUE(monitor_id, status)
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_run_at ON scheduler_jobs(status, run_at);

            CREATE TABLE IF NOT EXISTS scheduler_locks (
                name TEXT PRIMARY KEY,
                owner_token TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stream_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS stream_consumer_offsets (
                grp TEXT NOT NULL,
                consumer_id TEXT NOT NULL,
                last_seq INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (grp, consumer_id)
            );
            ",
        )?;

        // Defensive column backfills for columns added after the initial release.
        conn.execute_batch("ALTER TABLE monitors ADD COLUMN follow_redirects INTEGER NOT NULL DEFAULT 1;").ok();
        conn.execute_batch("ALTER TABLE incidents ADD COLUMN acknowledged INTEGER NOT NULL DEFAULT 0;").ok();

        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn next_seq(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
        conn.query_row(&format!("SELECT COALESCE(MAX(seq), 0) + 1 FROM {table}"), [], |r| r.get(0))
    }

    fn row_to_monitor(row: &rusqlite::Row) -> rusqlite::Result<Monitor> {
        let protocol_str: String = row.get("protocol")?;
        let state_str: String = row.get("current_state")?;
        let last_checked: Option<String> = row.get("last_checked")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Monitor {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            protocol: Protocol::from_str(&protocol_str).unwrap_or(Protocol::Http),
            target: row.get("target")?,
            port: row.get::<_, Option<i64>>("port")?.map(|p| p as u16),
            interval_minutes: row.get::<_, i64>("interval_minutes")? as u32,
            timeout_ms: row.get::<_, i64>("timeout_ms")? as u32,
            degraded_threshold_ms: row.get::<_, Option<i64>>("degraded_threshold_ms")?.map(|v| v as u32),
            ssl_expiry_threshold_days: row.get::<_, i64>("ssl_expiry_threshold_days")? as u32,
            alert_threshold: row.get::<_, i64>("alert_threshold")? as u32,
            is_active: row.get::<_, i64>("is_active")? != 0,
            current_state: HealthState::from_str(&state_str).unwrap_or(HealthState::Unknown),
            total_checks: row.get::<_, i64>("total_checks")? as u64,
            successful_checks: row.get::<_, i64>("successful_checks")? as u64,
            consecutive_failures: row.get::<_, i64>("consecutive_failures")? as u32,
            consecutive_degraded: row.get::<_, i64>("consecutive_degraded")? as u32,
            consecutive_slow_count: row.get::<_, i64>("consecutive_slow_count")? as u32,
            last_checked: last_checked.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&chrono::Utc)),
            last_response_time_ms: row.get::<_, Option<i64>>("last_response_time_ms")?.map(|v| v as u32),
            body_contains: row.get("body_contains")?,
            dns_record_type: row.get("dns_record_type")?,
            dns_expected: row.get("dns_expected")?,
            udp_expected_response: row.get("udp_expected_response")?,
            follow_redirects: row.get::<_, i64>("follow_redirects")? != 0,
            repeat_interval_minutes: row.get::<_, i64>("repeat_interval_minutes")? as u32,
            max_repeats: row.get::<_, i64>("max_repeats")? as u32,
            escalation_after_minutes: row.get::<_, i64>("escalation_after_minutes")? as u32,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&chrono::Utc)).unwrap_or_else(|_| chrono::Utc::now()),
            updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at).map(|d| d.with_timezone(&chrono::Utc)).unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    fn row_to_incident(row: &rusqlite::Row) -> rusqlite::Result<Incident> {
        let status_str: String = row.get("status")?;
        let severity_str: String = row.get("severity")?;
        let category_str: String = row.get("degradation_category")?;
        let start_time: String = row.get("start_time")?;
        let end_time: Option<String> = row.get("end_time")?;
        let resolved_by: Option<String> = row.get("resolved_by")?;
        let notifications_sent: String = row.get("notifications_sent")?;
        let error_type: Option<String> = row.get("error_type")?;

        Ok(Incident {
            id: row.get("id")?,
            monitor_id: row.get("monitor_id")?,
            start_time: chrono::DateTime::parse_from_rfc3339(&start_time).map(|d| d.with_timezone(&chrono::Utc)).unwrap_or_else(|_| chrono::Utc::now()),
            end_time: end_time.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&chrono::Utc)),
            duration_secs: row.get("duration_secs")?,
            status: if status_str == "resolved" { IncidentStatus::Resolved } else { IncidentStatus::Ongoing },
            error_message: row.get("error_message")?,
            error_type: error_type.and_then(|s| serde_json::from_str(&format!("\"{s}\"")).ok()),
            status_code: row.get::<_, Option<i64>>("status_code")?.map(|v| v as u16),
            severity: match severity_str.as_str() {
                "high" => Severity::High,
                "medium" => Severity::Medium,
                _ => Severity::Low,
            },
            confidence: row.get("confidence")?,
            degradation_category: match category_str.as_str() {
                "performance" => DegradationCategory::Performance,
                "security" => DegradationCategory::Security,
                "content" => DegradationCategory::Content,
                _ => DegradationCategory::General,
            },
            notifications_sent: serde_json::from_str(&notifications_sent).unwrap_or_default(),
            recovery_confidence: row.get("recovery_confidence")?,
            resolved_by: resolved_by.map(|s| if s == "manual" { ResolvedBy::Manual } else { ResolvedBy::Auto }),
            seq: row.get("seq")?,
        })
    }
}

impl Store for SqliteStore {
    fn get_monitor(&self, id: &str) -> CoreResult<Option<Monitor>> {
        let conn = self.conn();
        conn.query_row("SELECT * FROM monitors WHERE id = ?1", params![id], Self::row_to_monitor)
            .optional()
            .map_err(CoreError::from)
    }

    fn list_active_monitors(&self) -> CoreResult<Vec<Monitor>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM monitors WHERE is_active = 1")?;
        let rows = stmt.query_map([], Self::row_to_monitor)?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    fn upsert_monitor(&self, m: &Monitor) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO monitors (
                id, owner_id, name, protocol, target, port, interval_minutes, timeout_ms,
                degraded_threshold_ms, ssl_expiry_threshold_days, alert_threshold, is_active,
                current_state, total_checks, successful_checks, consecutive_failures,
                consecutive_degraded, consecutive_slow_count, last_checked, last_response_time_ms,
                body_contains, dns_record_type, dns_expected, udp_expected_response,
                follow_redirects, repeat_interval_minutes, max_repeats, escalation_after_minutes,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
                ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30
            )
            ON CONFLICT(id) DO UPDATE SET
                name=excluded.name, protocol=excluded.protocol, target=excluded.target,
                port=excluded.port, interval_minutes=excluded.interval_minutes,
                timeout_ms=excluded.timeout_ms, degraded_threshold_ms=excluded.degraded_threshold_ms,
                ssl_expiry_threshold_days=excluded.ssl_expiry_threshold_days,
                alert_threshold=excluded.alert_threshold, is_active=excluded.is_active,
                current_state=excluded.current_state, total_checks=excluded.total_checks,
                successful_checks=excluded.successful_checks,
                consecutive_failures=excluded.consecutive_failures,
                consecutive_degraded=excluded.consecutive_degraded,
                consecutive_slow_count=excluded.consecutive_slow_count,
                last_checked=excluded.last_checked,
                last_response_time_ms=excluded.last_response_time_ms,
                body_contains=excluded.body_contains, dns_record_type=excluded.dns_record_type,
                dns_expected=excluded.dns_expected, udp_expected_response=excluded.udp_expected_response,
                follow_redirects=excluded.follow_redirects,
                repeat_interval_minutes=excluded.repeat_interval_minutes,
                max_repeats=excluded.max_repeats,
                escalation_after_minutes=excluded.escalation_after_minutes,
                updated_at=excluded.updated_at",
            params![
                m.id, m.owner_id, m.name, m.protocol.to_string(), m.target,
                m.port.map(|p| p as i64), m.interval_minutes, m.timeout_ms,
                m.degraded_threshold_ms, m.ssl_expiry_threshold_days, m.alert_threshold,
                m.is_active as i64, m.current_state.to_string(), m.total_checks as i64,
                m.successful_checks as i64, m.consecutive_failures, m.consecutive_degraded,
                m.consecutive_slow_count, m.last_checked.map(|d| d.to_rfc3339()),
                m.last_response_time_ms, m.body_contains, m.dns_record_type, m.dns_expected,
                m.udp_expected_response, m.follow_redirects as i64, m.repeat_interval_minutes,
                m.max_repeats, m.escalation_after_minutes, m.created_at.to_rfc3339(),
                m.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_monitor(&self, id: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM monitors WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn apply_evaluation(
        &self,
        monitor_id: &str,
        evaluation: &Evaluation,
        response_time_ms: u32,
    ) -> CoreResult<()> {
        let conn = self.conn();
        let is_successful = matches!(evaluation.next_state, HealthState::Up | HealthState::Degraded);
        conn.execute(
            "UPDATE monitors SET
                total_checks = total_checks + 1,
                successful_checks = successful_checks + ?1,
                consecutive_failures = ?2,
                consecutive_degraded = ?3,
                consecutive_slow_count = ?4,
                current_state = ?5,
                last_checked = ?6,
                last_response_time_ms = ?7,
                updated_at = ?6
             WHERE id = ?8",
            params![
                is_successful as i64,
                evaluation.consecutive_failures,
                evaluation.consecutive_degraded,
                evaluation.consecutive_slow_count,
                evaluation.next_state.to_string(),
                chrono::Utc::now().to_rfc3339(),
                response_time_ms,
                monitor_id,
            ],
        )?;
        Ok(())
    }

    fn insert_check(&self, check: &Check) -> CoreResult<()> {
        let conn = self.conn();
        let seq = Self::next_seq(&conn, "checks")?;
        let ssl_info = check.ssl_info.as_ref().map(|s| serde_json::to_string(s).unwrap_or_default());
        let degradation_reasons = serde_json::to_string(&check.degradation_reasons).unwrap_or_else(|_| "[]".into());
        conn.execute(
            "INSERT INTO checks (id, monitor_id, timestamp, status, response_time_ms, status_code,
                error_type, error_message, degradation_reasons, ssl_info, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                check.id, check.monitor_id, check.timestamp.to_rfc3339(), check.status.to_string(),
                check.response_time_ms, check.status_code,
                check.error_type.map(|e| serde_json::to_string(&e).unwrap_or_default().trim_matches('"').to_string()),
                check.error_message, degradation_reasons, ssl_info, seq,
            ],
        )?;
        Ok(())
    }

    fn prune_old_checks(&self, retention_days: u32) -> CoreResult<usize> {
        let conn = self.conn();
        let deleted = conn.execute(
            "DELETE FROM checks WHERE timestamp < datetime('now', ?1)",
            params![format!("-{retention_days} days")],
        )?;
        Ok(deleted)
    }

    fn recent_checks(&self, monitor_id: &str, limit: u32) -> CoreResult<Vec<Check>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, timestamp, status, response_time_ms, status_code, error_type,
                    error_message, degradation_reasons, ssl_info, seq
             FROM checks WHERE monitor_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![monitor_id, limit], |row| {
            let status_str: String = row.get(3)?;
            let error_type: Option<String> = row.get(6)?;
            let degradation_reasons: String = row.get(8)?;
            let ssl_info: Option<String> = row.get(9)?;
            let timestamp: String = row.get(2)?;
            Ok(Check {
                id: row.get(0)?,
                monitor_id: row.get(1)?,
                timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp).map(|d| d.with_timezone(&chrono::Utc)).unwrap_or_else(|_| chrono::Utc::now()),
                status: HealthState::from_str(&status_str).unwrap_or(HealthState::Unknown),
                response_time_ms: row.get(4)?,
                status_code: row.get(5)?,
                error_type: error_type.and_then(|s| serde_json::from_str(&format!("\"{s}\"")).ok()),
                error_message: row.get(7)?,
                degradation_reasons: serde_json::from_str(&degradation_reasons).unwrap_or_default(),
                ssl_info: ssl_info.and_then(|s| serde_json::from_str::<SslInfo>(&s).ok()),
                seq: row.get(10)?,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    fn history_snapshot(&self, monitor_id: &str) -> HealthHistory {
        let mut arena = self.history.lock().unwrap();
        arena
            .entry(monitor_id.to_string())
            .or_insert_with(|| HealthHistory::new(self.history_capacity))
            .clone()
    }

    fn history_record(&self, monitor_id: &str, was_up: bool, new_state: HealthState) {
        let mut arena = self.history.lock().unwrap();
        let entry = arena
            .entry(monitor_id.to_string())
            .or_insert_with(|| HealthHistory::new(self.history_capacity));
        entry.push(was_up);
        if entry.last_stable_state != new_state {
            entry.record_state_change(new_state, chrono::Utc::now());
        }
    }

    fn ongoing_incident(&self, monitor_id: &str) -> CoreResult<Option<Incident>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM incidents WHERE monitor_id = ?1 AND status = 'ongoing' ORDER BY start_time DESC LIMIT 1",
            params![monitor_id],
            Self::row_to_incident,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn open_incident(&self, incident: &Incident) -> CoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        // The "at most one ongoing incident" invariant is enforced here,
        // inside the same critical section as the insert.
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM incidents WHERE monitor_id = ?1 AND status = 'ongoing'",
            params![incident.monitor_id],
            |r| r.get(0),
        )?;
        if existing > 0 {
            return Err(CoreError::Invariant(format!(
                "monitor {} already has an ongoing incident",
                incident.monitor_id
            )));
        }
        let seq = Self::next_seq(&tx, "incidents")?;
        tx.execute(
            "INSERT INTO incidents (id, monitor_id, start_time, status, error_message, error_type,
                status_code, severity, confidence, degradation_category, notifications_sent, seq)
             VALUES (?1, ?2, ?3, 'ongoing', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                incident.id, incident.monitor_id, incident.start_time.to_rfc3339(),
                incident.error_message,
                incident.error_type.map(|e| serde_json::to_string(&e).unwrap_or_default().trim_matches('"').to_string()),
                incident.status_code, severity_str(incident.severity), incident.confidence,
                category_str(incident.degradation_category),
                serde_json::to_string(&incident.notifications_sent).unwrap_or_default(),
                seq,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_incident(&self, incident: &Incident) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE incidents SET error_message=?1, error_type=?2, status_code=?3, severity=?4,
                confidence=?5, degradation_category=?6, notifications_sent=?7
             WHERE id = ?8",
            params![
                incident.error_message,
                incident.error_type.map(|e| serde_json::to_string(&e).unwrap_or_default().trim_matches('"').to_string()),
                incident.status_code, severity_str(incident.severity), incident.confidence,
                category_str(incident.degradation_category),
                serde_json::to_string(&incident.notifications_sent).unwrap_or_default(),
                incident.id,
            ],
        )?;
        Ok(())
    }

    fn resolve_all_ongoing(
        &self,
        monitor_id: &str,
        end_time: chrono::DateTime<chrono::Utc>,
        recovery_confidence: f64,
    ) -> CoreResult<Vec<Incident>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM incidents WHERE monitor_id = ?1 AND status = 'ongoing'",
        )?;
        let ongoing: Vec<Incident> = stmt
            .query_map(params![monitor_id], Self::row_to_incident)?
            .filter_map(Result::ok)
            .collect();
        for incident in &ongoing {
            let duration = (end_time - incident.start_time).num_seconds();
            conn.execute(
                "UPDATE incidents SET status='resolved', end_time=?1, duration_secs=?2,
                    recovery_confidence=?3, resolved_by='auto' WHERE id=?4",
                params![end_time.to_rfc3339(), duration, recovery_confidence, incident.id],
            )?;
        }
        Ok(ongoing)
    }

    fn add_incident_note(&self, note: &IncidentNote) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO incident_notes (id, incident_id, content, author, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![note.id, note.incident_id, note.content, note.author, note.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn list_incident_notes(&self, incident_id: &str) -> CoreResult<Vec<IncidentNote>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, content, author, created_at FROM incident_notes
             WHERE incident_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![incident_id], |row| {
            let created_at: String = row.get(4)?;
            Ok(IncidentNote {
                id: row.get(0)?,
                incident_id: row.get(1)?,
                content: row.get(2)?,
                author: row.get(3)?,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    fn acknowledge_incident(&self, incident_id: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute("UPDATE incidents SET acknowledged = 1 WHERE id = ?1", params![incident_id])?;
        Ok(())
    }

    fn is_incident_acknowledged(&self, incident_id: &str) -> CoreResult<bool> {
        let conn = self.conn();
        let acknowledged: i64 = conn.query_row(
            "SELECT acknowledged FROM incidents WHERE id = ?1",
            params![incident_id],
            |r| r.get(0),
        )?;
        Ok(acknowledged != 0)
    }

    fn add_channel(&self, channel: &NotificationChannel) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO notification_channels (id, monitor_id, channel_type, config, is_enabled)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                channel.id,
                channel.monitor_id,
                channel.channel_type.to_string(),
                channel.config.to_string(),
                channel.is_enabled as i64,
            ],
        )?;
        Ok(())
    }

    fn channels_for(&self, monitor_id: &str) -> CoreResult<Vec<NotificationChannel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, channel_type, config, is_enabled
             FROM notification_channels WHERE monitor_id = ?1 AND is_enabled = 1",
        )?;
        let rows = stmt.query_map(params![monitor_id], |row| {
            let channel_type: String = row.get(2)?;
            let config: String = row.get(3)?;
            Ok(NotificationChannel {
                id: row.get(0)?,
                monitor_id: row.get(1)?,
                channel_type: ChannelType::from_str(&channel_type).unwrap_or(ChannelType::Webhook),
                config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
                is_enabled: row.get::<_, i64>(4)? != 0,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    fn add_dependency(&self, dependency: &MonitorDependency) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO monitor_dependencies (id, monitor_id, depends_on_id) VALUES (?1, ?2, ?3)",
            params![dependency.id, dependency.monitor_id, dependency.depends_on_id],
        )?;
        Ok(())
    }

    fn dependencies_of(&self, monitor_id: &str) -> CoreResult<Vec<MonitorDependency>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, depends_on_id FROM monitor_dependencies WHERE monitor_id = ?1",
        )?;
        let rows = stmt.query_map(params![monitor_id], |row| {
            Ok(MonitorDependency {
                id: row.get(0)?,
                monitor_id: row.get(1)?,
                depends_on_id: row.get(2)?,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    fn has_dependency_down(&self, monitor_id: &str) -> CoreResult<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM monitor_dependencies d
             JOIN monitors m ON m.id = d.depends_on_id
             WHERE d.monitor_id = ?1 AND m.current_state = 'down'",
            params![monitor_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    fn schedule_monitor(&self, monitor_id: &str, delay_secs: i64) -> CoreResult<()> {
        let conn = self.conn();
        let run_at = (chrono::Utc::now() + chrono::Duration::seconds(delay_secs)).to_rfc3339();
        conn.execute(
            "INSERT INTO scheduler_jobs (monitor_id, run_at, status) VALUES (?1, ?2, 'pending')
             ON CONFLICT(monitor_id, status) DO UPDATE SET run_at = excluded.run_at",
            params![monitor_id, run_at],
        )?;
        Ok(())
    }

    fn schedule_verification(&self, monitor_id: &str, delay_secs: i64) -> CoreResult<()> {
        let conn = self.conn();
        let run_at = (chrono::Utc::now() + chrono::Duration::seconds(delay_secs)).to_rfc3339();
        conn.execute(
            "INSERT INTO scheduler_jobs (monitor_id, run_at, status, priority) VALUES (?1, ?2, 'pending', 10)",
            params![monitor_id, run_at],
        ).ok();
        Ok(())
    }

    fn cancel_jobs(&self, monitor_id: &str) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM scheduler_jobs WHERE monitor_id = ?1 AND status IN ('pending', 'dead')",
            params![monitor_id],
        )?;
        Ok(())
    }

    fn claim_next_job(&self, worker_id: &str, lease_secs: i64) -> CoreResult<Option<Job>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        let candidate: Option<(i64, String, i64, i64)> = tx
            .query_row(
                "SELECT id, monitor_id, attempts, max_attempts FROM scheduler_jobs
                 WHERE status = 'pending' AND run_at <= ?1
                   AND (leased_until IS NULL OR leased_until < ?1)
                 ORDER BY priority DESC, run_at ASC LIMIT 1",
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((id, monitor_id, attempts, max_attempts)) = candidate else {
            return Ok(None);
        };

        let leased_until = (chrono::Utc::now() + chrono::Duration::seconds(lease_secs)).to_rfc3339();
        tx.execute(
            "UPDATE scheduler_jobs SET leased_until = ?1, leased_by = ?2, attempts = attempts + 1
             WHERE id = ?3",
            params![leased_until, worker_id, id],
        )?;
        tx.commit()?;

        Ok(Some(Job {
            id,
            monitor_id,
            attempts: attempts as u32 + 1,
            max_attempts: max_attempts as u32,
        }))
    }

    fn ack_job(&self, job_id: i64) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM scheduler_jobs WHERE id = ?1", params![job_id])?;
        Ok(())
    }

    fn fail_job(&self, job_id: i64) -> CoreResult<()> {
        let conn = self.conn();
        let (attempts, max_attempts): (i64, i64) = conn.query_row(
            "SELECT attempts, max_attempts FROM scheduler_jobs WHERE id = ?1",
            params![job_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        if attempts >= max_attempts {
            conn.execute("UPDATE scheduler_jobs SET status = 'dead', leased_until = NULL WHERE id = ?1", params![job_id])?;
        } else {
            conn.execute("UPDATE scheduler_jobs SET leased_until = NULL, leased_by = NULL WHERE id = ?1", params![job_id])?;
        }
        Ok(())
    }

    fn queue_stats(&self) -> CoreResult<QueueStats> {
        let conn = self.conn();
        let now = chrono::Utc::now().to_rfc3339();
        let waiting: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduler_jobs WHERE status='pending' AND run_at <= ?1",
            params![now], |r| r.get(0),
        )?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduler_jobs WHERE status='pending' AND leased_until IS NOT NULL AND leased_until >= ?1",
            params![now], |r| r.get(0),
        )?;
        let delayed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduler_jobs WHERE status='pending' AND run_at > ?1",
            params![now], |r| r.get(0),
        )?;
        let failed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduler_jobs WHERE status='dead'", [], |r| r.get(0),
        )?;
        Ok(QueueStats { waiting: waiting as u64, active: active as u64, delayed: delayed as u64, failed: failed as u64, is_ready: true })
    }

    fn try_acquire_leadership(&self, owner_token: &str, ttl_secs: i64) -> CoreResult<bool> {
        let conn = self.conn();
        let now = chrono::Utc::now();
        let expires_at = (now + chrono::Duration::seconds(ttl_secs)).to_rfc3339();
        let changed = conn.execute(
            "INSERT INTO scheduler_locks (name, owner_token, expires_at) VALUES ('scheduler:master-lock', ?1, ?2)
             ON CONFLICT(name) DO UPDATE SET owner_token = excluded.owner_token, expires_at = excluded.expires_at
             WHERE scheduler_locks.expires_at < ?3 OR scheduler_locks.owner_token = ?1",
            params![owner_token, expires_at, now.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    fn renew_leadership(&self, owner_token: &str, ttl_secs: i64) -> CoreResult<bool> {
        let conn = self.conn();
        let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(ttl_secs)).to_rfc3339();
        let changed = conn.execute(
            "UPDATE scheduler_locks SET expires_at = ?1 WHERE name = 'scheduler:master-lock' AND owner_token = ?2",
            params![expires_at, owner_token],
        )?;
        Ok(changed > 0)
    }

    fn append_stream_event(&self, user_id: &str, payload: serde_json::Value) -> CoreResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stream_events (user_id, payload) VALUES (?1, ?2)",
            params![user_id, payload.to_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn read_stream_since(&self, group: &str, consumer_id: &str, batch: u32) -> CoreResult<Vec<StreamEntry>> {
        let conn = self.conn();
        let last_seq: i64 = conn
            .query_row(
                "SELECT last_seq FROM stream_consumer_offsets WHERE grp = ?1 AND consumer_id = ?2",
                params![group, consumer_id],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let mut stmt = conn.prepare(
            "SELECT seq, user_id, payload FROM stream_events WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![last_seq, batch], |row| {
            let payload: String = row.get(2)?;
            Ok(StreamEntry {
                seq: row.get(0)?,
                user_id: row.get(1)?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    fn ack_stream_entries(&self, group: &str, consumer_id: &str, up_to_seq: i64) -> CoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stream_consumer_offsets (grp, consumer_id, last_seq) VALUES (?1, ?2, ?3)
             ON CONFLICT(grp, consumer_id) DO UPDATE SET last_seq = excluded.last_seq",
            params![group, consumer_id, up_to_seq],
        )?;
        Ok(())
    }

    fn ttl(&self) -> &dyn TtlStore {
        &self.ttl
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
    }
}

fn category_str(c: DegradationCategory) -> &'static str {
    match c {
        DegradationCategory::Performance => "performance",
        DegradationCategory::Security => "security",
        DegradationCategory::Content => "content",
        DegradationCategory::General => "general",
    }
}
