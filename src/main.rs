#[macro_use]
extern crate rocket;

use pulseward::config::Config;
use pulseward::store::{SqliteStore, Store};
use pulseward::{catchers, relay, routes, scheduler, worker};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[launch]
fn rocket() -> _ {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let store: Arc<dyn Store> =
        Arc::new(SqliteStore::open(&config.database_path).expect("failed to initialize database"));
    let relay = Arc::new(relay::Relay::new());
    let owner_token = Uuid::new_v4().to_string();

    let scheduler_store = store.clone();
    let worker_store = store.clone();
    let worker_relay = relay.clone();
    let retention_store = store.clone();
    let retention_days = config.check_retention_days;
    let retention_interval = config.retention_sweep_interval_secs;
    let pool_size = config.worker_pool_size;

    rocket::build()
        .manage(store)
        .manage(relay)
        .manage(config)
        .register("/", catchers![catchers::unauthorized, catchers::not_found, catchers::internal_error])
        .mount("/", routes![routes::health, routes::stream])
        .attach(rocket::fairing::AdHoc::on_liftoff("Scheduler", move |rocket| {
            Box::pin(async move {
                let shutdown = rocket.shutdown();
                info!("launching scheduler master loop (owner={owner_token})");
                tokio::spawn(scheduler::run_master_loop(scheduler_store, owner_token, shutdown));
            })
        }))
        .attach(rocket::fairing::AdHoc::on_liftoff("Workers", move |rocket| {
            Box::pin(async move {
                let shutdown = rocket.shutdown();
                info!("spawning {pool_size} workers");
                worker::spawn_worker_pool(pool_size, worker_store, worker_relay, shutdown);
            })
        }))
        .attach(rocket::fairing::AdHoc::on_liftoff("RetentionSweep", move |rocket| {
            Box::pin(async move {
                let shutdown = rocket.shutdown();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(retention_interval)) => {
                                match retention_store.prune_old_checks(retention_days) {
                                    Ok(n) if n > 0 => info!("retention sweep: pruned {n} checks older than {retention_days}d"),
                                    Ok(_) => {}
                                    Err(e) => tracing::warn!("retention sweep failed: {e}"),
                                }
                            }
                            _ = shutdown.clone() => return,
                        }
                    }
                });
            })
        }))
}
