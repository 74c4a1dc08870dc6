//! Distributed job scheduler (component D). A persistent, retryable,
//! delayed-job queue keyed by monitor id, backed by the store's
//! `scheduler_jobs`/`scheduler_locks` tables instead of an external broker,
//! so the whole system has one durability story instead of two.

use crate::store::{QueueStats, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

const LEASE_SECS: i64 = 60;
const LEADER_TTL_SECS: i64 = 15;
const MANUAL_CHECK_COOLDOWN_SECS: i64 = 30;

/// Enqueue exactly one pending job for the monitor, delayed by its interval.
pub fn schedule_monitor(store: &dyn Store, monitor_id: &str, interval_minutes: u32) -> crate::error::CoreResult<()> {
    store.schedule_monitor(monitor_id, interval_minutes as i64 * 60)
}

/// Immediate manual check, subject to a per-monitor cooldown.
pub fn run_now(store: &dyn Store, monitor_id: &str) -> crate::error::CoreResult<()> {
    let cooldown_key = format!("cooldown:manual-check:{monitor_id}");
    if store.ttl().exists(&cooldown_key)? {
        return Err(crate::error::CoreError::CooldownActive(
            monitor_id.to_string(),
            MANUAL_CHECK_COOLDOWN_SECS as u64,
        ));
    }
    store.ttl().set(&cooldown_key, MANUAL_CHECK_COOLDOWN_SECS)?;
    store.schedule_verification(monitor_id, 0)
}

pub fn queue_stats(store: &dyn Store) -> crate::error::CoreResult<QueueStats> {
    store.queue_stats()
}

/// Master reconciliation loop: one process holds the `scheduler:master-lock`
/// row at a time and is responsible for keeping the job queue in sync with
/// the active monitor set. Runs until `shutdown` fires, matching the
/// teacher's `run_checker(..., shutdown: rocket::Shutdown)` pattern.
pub async fn run_master_loop(store: Arc<dyn Store>, owner_token: String, shutdown: rocket::Shutdown) {
    info!("scheduler: master loop starting (owner={owner_token})");
    loop {
        let is_leader = match store.try_acquire_leadership(&owner_token, LEADER_TTL_SECS) {
            Ok(leader) => leader,
            Err(e) => {
                warn!("scheduler: leadership acquisition failed: {e}");
                false
            }
        };

        if is_leader {
            if let Err(e) = reconcile(&*store) {
                warn!("scheduler: reconciliation error: {e}");
            }
            let _ = store.renew_leadership(&owner_token, LEADER_TTL_SECS);
        }

        tokio::select! {
            _ = time::sleep(Duration::from_secs((LEADER_TTL_SECS / 3).max(1) as u64)) => {},
            _ = shutdown.clone() => {
                info!("scheduler: master loop shutting down");
                return;
            }
        }
    }
}

fn reconcile(store: &dyn Store) -> crate::error::CoreResult<()> {
    let monitors = store.list_active_monitors()?;
    for monitor in monitors {
        if monitor.last_checked.is_none() {
            store.schedule_monitor(&monitor.id, 0)?;
        }
    }
    Ok(())
}

/// Claim one job with a lease bounded by the probe timeout plus a fixed
/// buffer, so a crashed worker's job becomes claimable again shortly after
/// the probe would have timed out.
pub fn claim_next_job(store: &dyn Store, worker_id: &str) -> crate::error::CoreResult<Option<crate::store::Job>> {
    store.claim_next_job(worker_id, LEASE_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn run_now_respects_cooldown() {
        let store = SqliteStore::open_in_memory().unwrap();
        run_now(&store, "m1").unwrap();
        let second = run_now(&store, "m1");
        assert!(second.is_err());
    }

    #[test]
    fn leadership_is_exclusive_until_expiry() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.try_acquire_leadership("owner-a", 15).unwrap());
        assert!(!store.try_acquire_leadership("owner-b", 15).unwrap());
        assert!(store.try_acquire_leadership("owner-a", 15).unwrap());
    }
}
