//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::AppConfig;
use crate::scheduler::{AdmissionController, Collaborators, Scheduler, SchedulerHandle};
use crate::store::MissionStore;
use crate::AppState;

/// Create the application router and start the scheduler loops.
///
/// The caller keeps the returned handle; dropping it without aborting
/// leaves the loops running for the life of the runtime.
pub fn create_app(
    config: &AppConfig,
    store: Arc<dyn MissionStore>,
    collaborators: Collaborators,
) -> (Router, SchedulerHandle) {
    let admission = Arc::new(AdmissionController::new(
        store.clone(),
        collaborators.oracle.clone(),
        config.scheduler.max_in_flight_per_user,
    ));

    let scheduler = Scheduler::new(store.clone(), collaborators, &config.scheduler);
    let handle = scheduler.spawn();

    let state = AppState { store, admission };
    let app = api::create_router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.timeout_secs,
        )))
        .with_state(state);

    (app, handle)
}
