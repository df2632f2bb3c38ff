use crate::modules::broadcast::processor::SendBroadcastProcessor;
use crate::modules::dispatch::Dispatcher;
use crate::modules::segment::builder::BuildSegmentProcessor;
use crate::modules::segment::recompute::CheckSegmentRecomputeProcessor;
use crate::modules::task::{ProcessorContext, TaskRuntime};
use crate::modules::webhook::{fanout, EventBus};
use crate::server::controller::AppState;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{sync::Arc, time::Duration};

mod config;
mod cronjobs;
mod database;
mod modules;
mod server;

#[tokio::main]
async fn main() {
    let cfg = config::app_config();

    shared::tracer::init_tracing_with_otel(cfg.tracer_service_name.clone(), cfg.app_debug);

    let db = database::db::create_db_conn(&cfg.db_url).await;
    database::db::run_migrations(&db).await;

    let (events, events_rx) = EventBus::new();

    let dispatcher = Arc::new(Dispatcher::new(
        cfg.breaker_failure_threshold,
        Duration::from_secs(cfg.breaker_cooldown_seconds),
    ));

    let ctx = Arc::new(ProcessorContext {
        db: db.clone(),
        dispatcher,
        events: events.clone(),
        send_batch_size: cfg.send_batch_size,
        segment_page_size: cfg.segment_page_size,
    });

    let mut runtime = TaskRuntime::new(ctx);
    runtime.register(Arc::new(SendBroadcastProcessor));
    runtime.register(Arc::new(BuildSegmentProcessor));
    runtime.register(Arc::new(CheckSegmentRecomputeProcessor));
    let runtime = Arc::new(runtime);

    tokio::spawn(fanout::start_fanout_loop(db.clone(), events_rx));

    cronjobs::ensure_segment_recompute_tasks(&db, &runtime).await;

    cronjobs::start_executor_loops(
        runtime.clone(),
        cfg.executor_count,
        Duration::from_secs(cfg.executor_poll_seconds),
        cfg.task_claim_limit,
    );

    cronjobs::start_stale_claim_sweeper(runtime.clone(), cfg.stale_claim_seconds);

    listen_to_shutdown_signals();

    server::controller::start(AppState {
        db,
        runtime,
        events,
    })
    .await
}

/// Listen to shutdown signals `SIGINT` and `SIGTERM`, on a signal gracefully shutdowns down the application
#[allow(clippy::never_loop)]
fn listen_to_shutdown_signals() {
    let mut signals = Signals::new([SIGINT, SIGTERM]).expect("failed to setup signals hook");

    tokio::spawn(async move {
        for sig in signals.forever() {
            println!("\n[APP] received signal: {}, shutting down", sig);

            shared::tracer::shutdown().await;

            std::process::exit(sig)
        }
    });
}
