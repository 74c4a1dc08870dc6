//! Real-time relay. Persists every monitor update as a durable stream event
//! (so a reconnecting SSE client can catch up from its last acknowledged
//! offset) and fans it out to any in-process subscribers via a broadcast
//! channel.

use crate::error::CoreResult;
use crate::evaluator::Evaluation;
use crate::model::{CheckResult, HealthState, Monitor};
use rocket::response::stream::{Event, EventStream};
use rocket::tokio::sync::broadcast;
use serde::Serialize;

const BROADCAST_CAPACITY: usize = 1024;
pub const CONSUMER_GROUP: &str = "relay";

/// SSE payload pushed to subscribers, scoped to the owning user's room.
#[derive(Debug, Clone, Serialize)]
pub struct RelayEvent {
    pub event_type: String,
    pub room: String,
    pub monitor_id: String,
    pub seq: i64,
    pub data: serde_json::Value,
}

pub struct Relay {
    sender: broadcast::Sender<RelayEvent>,
}

impl Relay {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Relay { sender }
    }

    /// Persist the update and broadcast it, scoped to `room = user:{owner_id}`.
    pub fn publish_monitor_update(
        &self,
        store: &dyn crate::store::Store,
        monitor: &Monitor,
        old_state: HealthState,
        result: &CheckResult,
        evaluation: &Evaluation,
    ) -> CoreResult<()> {
        let room = format!("user:{}", monitor.owner_id);
        let data = serde_json::json!({
            "monitor_id": monitor.id,
            "name": monitor.name,
            "old_state": old_state.to_string(),
            "new_state": evaluation.next_state.to_string(),
            "response_time_ms": result.response_time_ms,
            "is_transition": evaluation.is_transition,
            "degradation_reasons": evaluation.degradation_reasons,
        });

        let seq = store.append_stream_event(&monitor.owner_id, data.clone())?;

        let event = RelayEvent {
            event_type: "monitor_update".to_string(),
            room,
            monitor_id: monitor.id.clone(),
            seq,
            data,
        };
        // No subscribers is not an error — the event is already durable.
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Live SSE stream for a single user's room, replaying durable history
    /// since `consumer_id`'s last acknowledged offset before switching to
    /// the broadcast channel for fresh events.
    pub fn user_stream<'a>(
        &'a self,
        store: &'a dyn crate::store::Store,
        owner_id: String,
        consumer_id: String,
    ) -> EventStream![Event + 'a] {
        let room = format!("user:{owner_id}");
        let mut rx = self.sender.subscribe();
        EventStream! {
            if let Ok(backlog) = store.read_stream_since(CONSUMER_GROUP, &consumer_id, 100) {
                let mut last_seq = None;
                for entry in backlog {
                    if entry.user_id != owner_id {
                        continue;
                    }
                    last_seq = Some(entry.seq);
                    let data = serde_json::to_string(&entry.data).unwrap_or_default();
                    yield Event::data(data).event("monitor_update").id(entry.seq.to_string());
                }
                if let Some(seq) = last_seq {
                    let _ = store.ack_stream_entries(CONSUMER_GROUP, &consumer_id, seq);
                }
            }

            loop {
                match rx.recv().await {
                    Ok(evt) if evt.room == room => {
                        let data = serde_json::to_string(&evt.data).unwrap_or_default();
                        let _ = store.ack_stream_entries(CONSUMER_GROUP, &consumer_id, evt.seq);
                        yield Event::data(data).event(evt.event_type).id(evt.seq.to_string());
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Event::data(format!("{{\"skipped\":{n}}}")).event("lag");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
