use crate::config::app_config;
use crate::modules::{broadcast, contact, segment, task, tracking};
use crate::modules::task::TaskRuntime;
use crate::modules::webhook::EventBus;
use axum::{
    routing::{get, post},
    Router,
};
use http::StatusCode;
use sea_orm::DatabaseConnection;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tower_http::trace::TraceLayer;

/// The main application state, cloned for every HTTP request, fields are
/// cheap to clone handles
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub runtime: Arc<TaskRuntime>,
    pub events: EventBus,
}

async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

/// Creates the operational router: task execution, broadcast and segment
/// control, and the click / open tracking endpoints
pub fn new(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/tasks.execute", post(task::routes::execute_pending))
        .route("/tasks.executeOne", post(task::routes::execute_one))
        .route("/tasks.list", get(task::routes::list_tasks))
        .route(
            "/broadcasts.schedule",
            post(broadcast::routes::schedule_broadcast),
        )
        .route("/broadcasts.pause", post(broadcast::routes::pause_broadcast))
        .route(
            "/broadcasts.resume",
            post(broadcast::routes::resume_broadcast),
        )
        .route(
            "/broadcasts.cancel",
            post(broadcast::routes::cancel_broadcast),
        )
        .route(
            "/broadcasts.selectWinner",
            post(broadcast::routes::select_winner),
        )
        .route(
            "/broadcasts.getTestResults",
            get(broadcast::routes::get_test_results),
        )
        .route("/segments.create", post(segment::routes::create_segment))
        .route("/segments.update", post(segment::routes::update_segment))
        .route("/segments.delete", post(segment::routes::delete_segment))
        .route("/segments.rebuild", post(segment::routes::rebuild_segment))
        .route("/segments.preview", post(segment::routes::preview_segment))
        .route(
            "/contacts.unsubscribe",
            post(contact::routes::unsubscribe_contact),
        )
        .route("/visit", get(tracking::routes::visit))
        .route("/opens", get(tracking::routes::opens))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves the operational endpoints
pub async fn start(state: AppState) {
    let cfg = app_config();

    let app = new(state);

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), cfg.http_port);
    println!("[WEB] listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|_| panic!("[WEB] failed to get address {}", addr));

    axum::serve(listener, app.into_make_service())
        .await
        .unwrap_or_else(|_| panic!("[WEB] failed to serve app on address {}", addr))
}
