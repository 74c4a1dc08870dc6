//! The one user-facing network surface in scope: a health check and the
//! per-user SSE relay stream. Monitor CRUD and the rest of the REST API are
//! external collaborators' responsibility.

use crate::auth::ObserverId;
use crate::relay::Relay;
use crate::store::Store;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::{get, State};
use std::sync::Arc;
use uuid::Uuid;

#[get("/health")]
pub fn health(store: &State<Arc<dyn Store>>) -> Json<serde_json::Value> {
    let queue = crate::scheduler::queue_stats(store.inner().as_ref()).ok();
    Json(serde_json::json!({
        "status": "ok",
        "queue": queue,
    }))
}

/// Connects the caller to their own `user:{id}` room, replaying any durable
/// backlog the consumer group hasn't acknowledged yet before switching to
/// live broadcast events.
#[get("/stream")]
pub fn stream<'a>(
    observer: ObserverId,
    store: &'a State<Arc<dyn Store>>,
    relay: &'a State<Arc<Relay>>,
) -> EventStream![Event + 'a] {
    let consumer_id = Uuid::new_v4().to_string();
    relay.user_stream(store.inner().as_ref(), observer.0, consumer_id)
}
